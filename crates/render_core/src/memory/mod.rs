//! Device memory collaborator interfaces
//!
//! The core never allocates device memory itself; it consumes an
//! [`Allocator`] capability (allocate/free/map/unmap) and a
//! [`TransferQueue`] capability (device-side buffer copies) supplied by a
//! backend. The Vulkan implementations live in [`crate::vulkan::memory`];
//! tests substitute byte-vector fakes.

use crate::resource::BufferId;

bitflags::bitflags! {
    /// Intended usage of a buffer allocation
    ///
    /// Mirrors the usage split the device needs to place an allocation:
    /// geometry buffers carry `TRANSFER_SRC | TRANSFER_DST` on top of their
    /// bind point so they can be grown and compacted by device copies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Bindable as a vertex buffer
        const VERTEX = 1 << 0;
        /// Bindable as an index buffer
        const INDEX = 1 << 1;
        /// Bindable as a uniform buffer
        const UNIFORM = 1 << 2;
        /// Bindable as a storage buffer
        const STORAGE = 1 << 3;
        /// Source of device-side copies
        const TRANSFER_SRC = 1 << 4;
        /// Destination of device-side copies
        const TRANSFER_DST = 1 << 5;
    }
}

/// Memory placement of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Device-local memory, not mappable from the host
    DeviceLocal,
    /// Host-visible (and host-coherent) memory, mappable for CPU writes
    HostVisible,
}

/// Allocation failures reported by the backing allocator
#[derive(thiserror::Error, Debug)]
pub enum AllocationError {
    /// The device cannot satisfy the allocation
    #[error("out of device memory: {requested} bytes requested")]
    OutOfDeviceMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// Any other backend failure during allocation
    #[error("allocator backend error: {reason}")]
    Backend {
        /// Description of the underlying failure
        reason: String,
    },
}

/// Mapping failures
///
/// Mapping a device-only buffer is a contract violation, not a condition
/// to recover from.
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    /// The buffer lives in device-local memory and cannot be mapped
    #[error("buffer is not host-visible and cannot be mapped")]
    NotHostVisible,

    /// The handle does not refer to a live allocation
    #[error("unknown buffer handle")]
    InvalidHandle,

    /// The requested range does not fit the allocation
    #[error("mapped range {offset}+{size} exceeds buffer size {buffer_size}")]
    OutOfRange {
        /// Requested byte offset
        offset: u64,
        /// Requested byte size
        size: u64,
        /// Actual allocation size
        buffer_size: u64,
    },

    /// Any other backend failure while mapping
    #[error("map backend error: {reason}")]
    Backend {
        /// Description of the underlying failure
        reason: String,
    },
}

/// Device-side copy failures
#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    /// A handle does not refer to a live allocation
    #[error("unknown buffer handle")]
    InvalidHandle,

    /// A copy range does not fit its buffer
    #[error("copy range {offset}+{size} exceeds buffer size {buffer_size}")]
    OutOfRange {
        /// Byte offset of the violating range
        offset: u64,
        /// Byte size of the violating range
        size: u64,
        /// Size of the buffer the range was applied to
        buffer_size: u64,
    },

    /// Any other backend failure during the copy
    #[error("transfer backend error: {reason}")]
    Backend {
        /// Description of the underlying failure
        reason: String,
    },
}

/// Device memory allocation capability consumed by the core
///
/// Handles are keys into the allocator's own table; freeing an unknown
/// handle is a no-op the allocator may log but must not abort on.
pub trait Allocator {
    /// Allocate a buffer of `size` bytes with the given usage and placement
    fn allocate(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryKind,
    ) -> Result<BufferId, AllocationError>;

    /// Release an allocation and its backing memory
    fn free(&mut self, buffer: BufferId);

    /// Map `size` bytes at `offset` for host writes
    ///
    /// Only valid for [`MemoryKind::HostVisible`] allocations. The pointer
    /// stays valid until [`Allocator::unmap`] or [`Allocator::free`] is
    /// called for the same buffer.
    fn map(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<*mut u8, MapError>;

    /// Unmap a previously mapped buffer
    fn unmap(&mut self, buffer: BufferId);

    /// Byte size of a live allocation, or 0 for unknown handles
    fn buffer_size(&self, buffer: BufferId) -> u64;
}

/// Device-side copy capability used for staging round trips
pub trait TransferQueue {
    /// Copy `size` bytes between two buffers on the device timeline
    ///
    /// The copy is complete when the call returns; callers sequence these
    /// between frames, never while a frame referencing either buffer is in
    /// flight.
    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), TransferError>;
}
