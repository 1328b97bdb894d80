//! GPU resource and frame orchestration core
//!
//! Backend-agnostic building blocks for an explicit-API renderer:
//!
//! - [`geometry`]: a packed, compacting vertex/index store with exact
//!   sizing and staged uploads
//! - [`frame`]: a multi-frame-in-flight synchronizer pacing a render
//!   target against one presentation surface
//! - [`reflect`] and [`binding`]: reflection-driven binding layouts and
//!   dirty-tracked resource packages
//! - [`submit`]: validated command stream recording and aggregation
//! - [`vulkan`]: `ash`-backed implementations of the collaborator traits
//!
//! The core talks to the GPU only through traits ([`memory::Allocator`],
//! [`frame::RenderDevice`], [`frame::PresentationSurface`],
//! [`binding::SamplerFactory`]), so every policy decision is testable
//! without a device.

pub mod binding;
pub mod config;
pub mod frame;
pub mod geometry;
pub mod memory;
pub mod pipeline_cache;
pub mod reflect;
pub mod resource;
pub mod submit;
pub mod vulkan;

pub use binding::{
    BindingError, BindingWrite, BoundResource, ResourcePackage, SamplerCache, SamplerFactory,
    SamplerSpec,
};
pub use config::{Config, ConfigError, RenderTargetConfig};
pub use frame::{
    AcquiredImage, FrameError, FrameState, FramesInFlight, PresentationSurface, RenderDevice,
    RenderTarget, SurfaceStatus,
};
pub use geometry::{
    AttributeFormat, GeometryError, GeometryStore, IndexKind, MeshAllocation, VertexAttribute,
    VertexLayout,
};
pub use memory::{AllocationError, Allocator, BufferUsage, MemoryKind, TransferQueue};
pub use pipeline_cache::{CacheError, DiskPipelineCache, PipelineCacheStore};
pub use reflect::{
    BindingLayout, BindingSlot, BlockMember, PushConstantRange, ReflectError, ReflectedResource,
    ResourceKind, ShaderBinary, ShaderReflector,
};
pub use resource::{BufferId, ImageId, PipelineId, SamplerId};
pub use submit::{Command, CommandStream, SubmitError};
