//! Vulkan backend
//!
//! Implements the collaborator traits ([`crate::memory::Allocator`],
//! [`crate::frame::RenderDevice`], [`crate::frame::PresentationSurface`],
//! [`crate::binding::SamplerFactory`]) on top of `ash`. Everything here is
//! a thin RAII layer; policy lives in the backend-agnostic modules.

pub mod descriptor;
pub mod memory;
pub mod sampler;
pub mod shader;
pub mod surface;
pub mod sync;

use ash::vk;

pub use descriptor::{DescriptorSetLayout, HandleResolver, VulkanDescriptors};
pub use memory::VulkanAllocator;
pub use sampler::VulkanSamplerFactory;
pub use shader::ShaderModule;
pub use surface::SwapchainSurface;
pub use sync::{Fence, Semaphore, VulkanDevice};

/// Vulkan-specific errors
#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The unique identifier of the resource
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// The descriptor pool has no room for another set
    #[error("Descriptor pool exhausted")]
    DescriptorPoolExhausted,

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Translate an index width to its Vulkan index type
///
/// `U8` requires `VK_EXT_index_type_uint8`; callers are responsible for
/// checking device support before storing 8-bit indices.
pub fn index_type(kind: crate::geometry::IndexKind) -> vk::IndexType {
    match kind {
        crate::geometry::IndexKind::U8 => vk::IndexType::UINT8_EXT,
        crate::geometry::IndexKind::U16 => vk::IndexType::UINT16,
        crate::geometry::IndexKind::U32 => vk::IndexType::UINT32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::IndexKind;

    #[test]
    fn index_widths_map_to_their_vulkan_types() {
        assert_eq!(index_type(IndexKind::U8), vk::IndexType::UINT8_EXT);
        assert_eq!(index_type(IndexKind::U16), vk::IndexType::UINT16);
        assert_eq!(index_type(IndexKind::U32), vk::IndexType::UINT32);
    }
}
