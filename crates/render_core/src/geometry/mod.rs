//! Packed geometry storage
//!
//! Many independent meshes share one growable vertex buffer and one
//! growable index buffer so draw calls never switch buffers, only offsets.
//! The storage normally lives in device-local memory, so every mutation is
//! a staging-buffer round trip driven through the [`Allocator`] and
//! [`TransferQueue`] collaborator traits.
//!
//! Removal is an O(n) compaction: the surviving head and tail are copied
//! into a freshly sized buffer and the old one is released. Steady-state
//! scenes extend far more often than they shrink, and the flat layout means
//! draws bind with a plain element offset and no per-mesh lookup table.
//!
//! Offsets handed out by insertion stay valid until a removal that precedes
//! them in the buffer; callers re-query offsets after any removal.

use crate::memory::{
    Allocator, AllocationError, BufferUsage, MapError, MemoryKind, TransferError, TransferQueue,
};
use crate::resource::BufferId;

/// Format of a single vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    /// One 32-bit float
    R32Float,
    /// Two 32-bit floats
    Rg32Float,
    /// Three 32-bit floats
    Rgb32Float,
    /// Four 32-bit floats
    Rgba32Float,
    /// Four unsigned normalized bytes
    Rgba8Unorm,
    /// One 32-bit unsigned integer
    R32Uint,
}

impl AttributeFormat {
    /// Byte size of one attribute of this format
    pub fn byte_size(self) -> u32 {
        match self {
            Self::R32Float | Self::R32Uint | Self::Rgba8Unorm => 4,
            Self::Rg32Float => 8,
            Self::Rgb32Float => 12,
            Self::Rgba32Float => 16,
        }
    }
}

/// One attribute of a vertex layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Attribute format
    pub format: AttributeFormat,
}

/// Immutable per-store vertex layout
///
/// Fixed at store creation; the stride it derives is the element size for
/// every vertex the store will ever hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: u32,
}

impl VertexLayout {
    /// Build a layout from an ordered attribute list
    pub fn new(attributes: Vec<VertexAttribute>) -> Self {
        let stride = attributes.iter().map(|a| a.format.byte_size()).sum();
        Self { attributes, stride }
    }

    /// Packed byte stride of one vertex
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The attributes in declaration order
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }
}

/// Width of one stored index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// 8-bit indices
    U8,
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

impl IndexKind {
    /// Byte stride of one index
    pub fn stride(self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Element offsets returned to the caller after an insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshAllocation {
    /// First vertex element of the inserted range
    pub vertex_offset: u32,
    /// First index element of the inserted range
    pub index_offset: u32,
}

/// Geometry store failures
#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    /// The device could not satisfy a buffer allocation
    #[error("geometry capacity error: {0}")]
    Capacity(#[from] AllocationError),

    /// A buffer was mapped in a way its memory kind forbids
    #[error("geometry memory access error: {0}")]
    MemoryAccess(#[from] MapError),

    /// A device-side copy failed
    #[error("geometry transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// A removal range lies outside the current occupancy
    #[error("range {offset}+{count} outside current occupancy {occupancy}")]
    RangeOutOfBounds {
        /// First element of the violating range
        offset: u32,
        /// Element count of the violating range
        count: u32,
        /// Current element occupancy of the buffer
        occupancy: u32,
    },

    /// Payload bytes are not a whole number of elements
    #[error("payload of {len} bytes is not a multiple of the {stride}-byte stride")]
    MisalignedPayload {
        /// Payload length in bytes
        len: usize,
        /// Element stride of the target buffer
        stride: u32,
    },
}

/// Result type for geometry store operations
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Packed vertex/index storage for many independent meshes
///
/// Owns at most one vertex buffer and one index buffer, both exactly sized
/// to their occupancy after every mutating operation: `byte size ==
/// element count * stride` always holds.
pub struct GeometryStore {
    layout: VertexLayout,
    index_kind: IndexKind,
    memory: MemoryKind,
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
    vertex_count: u32,
    index_count: u32,
}

impl GeometryStore {
    /// Create an empty store with a fixed vertex layout and index width
    pub fn new(layout: VertexLayout, index_kind: IndexKind, memory: MemoryKind) -> Self {
        log::debug!(
            "Creating GeometryStore (stride {} bytes, index stride {} bytes)",
            layout.stride(),
            index_kind.stride()
        );
        Self {
            layout,
            index_kind,
            memory,
            vertex_buffer: None,
            index_buffer: None,
            vertex_count: 0,
            index_count: 0,
        }
    }

    /// Create a pre-sized store
    ///
    /// Equivalent to [`GeometryStore::new`] followed by one
    /// [`GeometryStore::create_mesh`] for the requested element counts; the
    /// caller owns writing the reserved range.
    pub fn pre_sized<D: Allocator + TransferQueue>(
        device: &mut D,
        layout: VertexLayout,
        index_kind: IndexKind,
        memory: MemoryKind,
        vertex_count: u32,
        index_count: u32,
    ) -> GeometryResult<Self> {
        let mut store = Self::new(layout, index_kind, memory);
        store.create_mesh(device, vertex_count, index_count)?;
        Ok(store)
    }

    /// Vertex stride in bytes, fixed for the store's lifetime
    pub fn vertex_stride(&self) -> u32 {
        self.layout.stride()
    }

    /// The vertex layout the store was created with
    pub fn vertex_layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// Index width, fixed for the store's lifetime
    pub fn index_kind(&self) -> IndexKind {
        self.index_kind
    }

    /// Current vertex occupancy in elements
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Current index occupancy in elements
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Byte size of the vertex buffer
    pub fn vertex_buffer_size(&self) -> u64 {
        u64::from(self.vertex_count) * u64::from(self.layout.stride())
    }

    /// Byte size of the index buffer
    pub fn index_buffer_size(&self) -> u64 {
        u64::from(self.index_count) * u64::from(self.index_kind.stride())
    }

    /// Handle of the vertex buffer, if any geometry is stored
    pub fn vertex_buffer(&self) -> Option<BufferId> {
        self.vertex_buffer
    }

    /// Handle of the index buffer, if any geometry is stored
    pub fn index_buffer(&self) -> Option<BufferId> {
        self.index_buffer
    }

    /// Reserve space for a mesh and return the offsets to write it at
    ///
    /// Grows each backing buffer by exactly the requested element count,
    /// preserving existing contents with a device-side copy. A request of
    /// `(0, 0)` is a no-op. Fails only if the device cannot satisfy the
    /// allocation; on failure the store is untouched, even when one side
    /// had already grown.
    pub fn create_mesh<D: Allocator + TransferQueue>(
        &mut self,
        device: &mut D,
        vertex_count: u32,
        index_count: u32,
    ) -> GeometryResult<MeshAllocation> {
        let allocation = MeshAllocation {
            vertex_offset: self.vertex_count,
            index_offset: self.index_count,
        };

        // Both buffers are grown before either side is committed, so a
        // failure on the index side leaves no phantom vertex growth.
        let grown_vertex = if vertex_count > 0 {
            Some(self.grow(
                device,
                self.vertex_buffer,
                self.vertex_count,
                vertex_count,
                self.layout.stride(),
                BufferUsage::VERTEX,
            )?)
        } else {
            None
        };

        let grown_index = if index_count > 0 {
            match self.grow(
                device,
                self.index_buffer,
                self.index_count,
                index_count,
                self.index_kind.stride(),
                BufferUsage::INDEX,
            ) {
                Ok(grown) => Some(grown),
                Err(err) => {
                    if let Some(grown) = grown_vertex {
                        device.free(grown);
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        if let Some(grown) = grown_vertex {
            if let Some(old) = self.vertex_buffer {
                device.free(old);
            }
            self.vertex_buffer = Some(grown);
            self.vertex_count += vertex_count;
        }
        if let Some(grown) = grown_index {
            if let Some(old) = self.index_buffer {
                device.free(old);
            }
            self.index_buffer = Some(grown);
            self.index_count += index_count;
        }

        Ok(allocation)
    }

    /// Insert mesh payloads through a staging round trip
    ///
    /// Reserves space with [`GeometryStore::create_mesh`], then writes the
    /// payloads into a temporary host-visible buffer and copies them into
    /// the reserved region on the device timeline. Use this when the store
    /// lives in device-local memory and direct mapping is unavailable. A
    /// failed upload releases the reserved region before the error returns.
    pub fn add_geometry<D: Allocator + TransferQueue>(
        &mut self,
        device: &mut D,
        vertex_data: &[u8],
        index_data: &[u8],
    ) -> GeometryResult<MeshAllocation> {
        let vertex_stride = self.layout.stride();
        if vertex_data.len() % vertex_stride as usize != 0 {
            return Err(GeometryError::MisalignedPayload {
                len: vertex_data.len(),
                stride: vertex_stride,
            });
        }
        let index_stride = self.index_kind.stride();
        if index_data.len() % index_stride as usize != 0 {
            return Err(GeometryError::MisalignedPayload {
                len: index_data.len(),
                stride: index_stride,
            });
        }

        let vertex_count = (vertex_data.len() / vertex_stride as usize) as u32;
        let index_count = (index_data.len() / index_stride as usize) as u32;
        let allocation = self.create_mesh(device, vertex_count, index_count)?;

        let upload = (|device: &mut D| -> GeometryResult<()> {
            if let (false, Some(dst)) = (vertex_data.is_empty(), self.vertex_buffer) {
                let dst_offset = u64::from(allocation.vertex_offset) * u64::from(vertex_stride);
                stage_upload(device, vertex_data, dst, dst_offset)?;
            }
            if let (false, Some(dst)) = (index_data.is_empty(), self.index_buffer) {
                let dst_offset = u64::from(allocation.index_offset) * u64::from(index_stride);
                stage_upload(device, index_data, dst, dst_offset)?;
            }
            Ok(())
        })(device);

        if let Err(err) = upload {
            // The reservation sits at the tail; release it so occupancy
            // only ever covers fully written payloads.
            if let Err(rollback) = self.remove_geometry(
                device,
                allocation.vertex_offset,
                vertex_count,
                allocation.index_offset,
                index_count,
            ) {
                log::error!("Failed to release reserved region after upload error: {rollback}");
            }
            return Err(err);
        }

        Ok(allocation)
    }

    /// Typed convenience wrapper over [`GeometryStore::add_geometry`]
    pub fn add_geometry_slices<D, V, I>(
        &mut self,
        device: &mut D,
        vertices: &[V],
        indices: &[I],
    ) -> GeometryResult<MeshAllocation>
    where
        D: Allocator + TransferQueue,
        V: bytemuck::Pod,
        I: bytemuck::Pod,
    {
        self.add_geometry(
            device,
            bytemuck::cast_slice(vertices),
            bytemuck::cast_slice(indices),
        )
    }

    /// Remove a stored mesh, compacting both buffers
    ///
    /// Three-way split-and-recombine: the bytes before the removed range
    /// and the bytes after it are copied into a buffer sized to the new
    /// total and the old buffer is released. All offsets at or beyond the
    /// removed range are invalidated; callers re-query them. On failure
    /// nothing is removed, even when one side had already compacted.
    pub fn remove_geometry<D: Allocator + TransferQueue>(
        &mut self,
        device: &mut D,
        vertex_offset: u32,
        vertex_count: u32,
        index_offset: u32,
        index_count: u32,
    ) -> GeometryResult<()> {
        if vertex_offset.saturating_add(vertex_count) > self.vertex_count {
            return Err(GeometryError::RangeOutOfBounds {
                offset: vertex_offset,
                count: vertex_count,
                occupancy: self.vertex_count,
            });
        }
        if index_offset.saturating_add(index_count) > self.index_count {
            return Err(GeometryError::RangeOutOfBounds {
                offset: index_offset,
                count: index_count,
                occupancy: self.index_count,
            });
        }

        // Both buffers are compacted before either side is committed; a
        // failure on the index side releases the vertex replacement and
        // leaves the store untouched.
        let vertex_step = match (vertex_count > 0, self.vertex_buffer) {
            (true, Some(old)) => Some((
                old,
                self.compact(
                    device,
                    old,
                    self.vertex_count,
                    vertex_offset,
                    vertex_count,
                    self.layout.stride(),
                    BufferUsage::VERTEX,
                )?,
            )),
            _ => None,
        };

        let index_step = match (index_count > 0, self.index_buffer) {
            (true, Some(old)) => {
                match self.compact(
                    device,
                    old,
                    self.index_count,
                    index_offset,
                    index_count,
                    self.index_kind.stride(),
                    BufferUsage::INDEX,
                ) {
                    Ok(replacement) => Some((old, replacement)),
                    Err(err) => {
                        if let Some((_, Some(replacement))) = vertex_step {
                            device.free(replacement);
                        }
                        return Err(err);
                    }
                }
            }
            _ => None,
        };

        if let Some((old, replacement)) = vertex_step {
            device.free(old);
            self.vertex_buffer = replacement;
            self.vertex_count -= vertex_count;
        }
        if let Some((old, replacement)) = index_step {
            device.free(old);
            self.index_buffer = replacement;
            self.index_count -= index_count;
        }

        log::debug!(
            "Compacted geometry store to {} vertices / {} indices",
            self.vertex_count,
            self.index_count
        );
        Ok(())
    }

    /// Map the vertex buffer for direct host writes
    ///
    /// Valid only when the store was created with
    /// [`MemoryKind::HostVisible`]; mapping a device-local store is a
    /// contract violation.
    pub fn map_vertex_buffer<D: Allocator>(&self, device: &mut D) -> GeometryResult<*mut u8> {
        self.map_buffer(device, self.vertex_buffer, self.vertex_buffer_size())
    }

    /// Map the index buffer for direct host writes
    pub fn map_index_buffer<D: Allocator>(&self, device: &mut D) -> GeometryResult<*mut u8> {
        self.map_buffer(device, self.index_buffer, self.index_buffer_size())
    }

    /// Unmap a previously mapped vertex buffer
    pub fn unmap_vertex_buffer<D: Allocator>(&self, device: &mut D) {
        if let Some(buffer) = self.vertex_buffer {
            device.unmap(buffer);
        }
    }

    /// Unmap a previously mapped index buffer
    pub fn unmap_index_buffer<D: Allocator>(&self, device: &mut D) {
        if let Some(buffer) = self.index_buffer {
            device.unmap(buffer);
        }
    }

    /// Release both buffers and reset occupancy to zero
    pub fn destroy<D: Allocator>(&mut self, device: &mut D) {
        if let Some(buffer) = self.vertex_buffer.take() {
            device.free(buffer);
        }
        if let Some(buffer) = self.index_buffer.take() {
            device.free(buffer);
        }
        self.vertex_count = 0;
        self.index_count = 0;
    }

    fn map_buffer<D: Allocator>(
        &self,
        device: &mut D,
        buffer: Option<BufferId>,
        size: u64,
    ) -> GeometryResult<*mut u8> {
        if self.memory != MemoryKind::HostVisible {
            return Err(GeometryError::MemoryAccess(MapError::NotHostVisible));
        }
        let buffer = buffer.ok_or(GeometryError::MemoryAccess(MapError::InvalidHandle))?;
        Ok(device.map(buffer, 0, size)?)
    }

    fn buffer_usage(&self, bind_point: BufferUsage) -> BufferUsage {
        bind_point | BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST
    }

    /// Extend-and-copy growth of one backing buffer
    ///
    /// Copies the old contents into the larger buffer but leaves the old
    /// buffer alive; the caller frees it once every buffer of the operation
    /// has grown.
    fn grow<D: Allocator + TransferQueue>(
        &self,
        device: &mut D,
        old: Option<BufferId>,
        old_count: u32,
        added_count: u32,
        stride: u32,
        bind_point: BufferUsage,
    ) -> GeometryResult<BufferId> {
        let old_bytes = u64::from(old_count) * u64::from(stride);
        let new_bytes = u64::from(old_count + added_count) * u64::from(stride);
        let grown = device.allocate(new_bytes, self.buffer_usage(bind_point), self.memory)?;

        if let Some(old) = old {
            if old_bytes > 0 {
                if let Err(e) = device.copy_buffer(old, 0, grown, 0, old_bytes) {
                    device.free(grown);
                    return Err(e.into());
                }
            }
        }
        Ok(grown)
    }

    /// Three-way split-and-recombine removal of one element range
    ///
    /// Returns the replacement buffer, or `None` when the removal empties
    /// the buffer entirely. The tail copy is skipped when the removed range
    /// ends at the buffer tail; sizes and surviving offsets are identical
    /// to the general path. The old buffer stays alive; the caller frees it
    /// once every buffer of the operation has compacted.
    fn compact<D: Allocator + TransferQueue>(
        &self,
        device: &mut D,
        old: BufferId,
        total_count: u32,
        offset: u32,
        count: u32,
        stride: u32,
        bind_point: BufferUsage,
    ) -> GeometryResult<Option<BufferId>> {
        let remaining = total_count - count;
        if remaining == 0 {
            return Ok(None);
        }

        let head_bytes = u64::from(offset) * u64::from(stride);
        let removed_end = u64::from(offset + count) * u64::from(stride);
        let total_bytes = u64::from(total_count) * u64::from(stride);
        let tail_bytes = total_bytes - removed_end;

        let replacement = device.allocate(
            u64::from(remaining) * u64::from(stride),
            self.buffer_usage(bind_point),
            self.memory,
        )?;

        let result = (|| -> GeometryResult<()> {
            if head_bytes > 0 {
                device.copy_buffer(old, 0, replacement, 0, head_bytes)?;
            }
            if tail_bytes > 0 {
                device.copy_buffer(old, removed_end, replacement, head_bytes, tail_bytes)?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            device.free(replacement);
            return Err(e);
        }

        Ok(Some(replacement))
    }
}

/// Write a payload into a temporary host-visible buffer and copy it into
/// `dst` at `dst_offset` on the device timeline
fn stage_upload<D: Allocator + TransferQueue>(
    device: &mut D,
    data: &[u8],
    dst: BufferId,
    dst_offset: u64,
) -> GeometryResult<()> {
    let size = data.len() as u64;
    let staging = device.allocate(size, BufferUsage::TRANSFER_SRC, MemoryKind::HostVisible)?;

    let result = (|| -> GeometryResult<()> {
        let mapped = device.map(staging, 0, size)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
        }
        device.unmap(staging);
        device.copy_buffer(staging, 0, dst, dst_offset, size)?;
        Ok(())
    })();

    device.free(staging);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    struct FakeBuffer {
        data: Box<[u8]>,
        memory: MemoryKind,
    }

    /// Byte-vector device standing in for the allocator and transfer queue
    #[derive(Default)]
    struct FakeDevice {
        buffers: SlotMap<BufferId, FakeBuffer>,
        /// When set, the next allocation fails
        exhausted: bool,
        /// Fail the allocation after this many successes, once
        allocations_until_failure: Option<u32>,
        /// Fail the copy after this many successes, once
        transfers_until_failure: Option<u32>,
    }

    impl FakeDevice {
        fn contents(&self, buffer: BufferId) -> &[u8] {
            &self.buffers[buffer].data
        }

        fn live_buffers(&self) -> usize {
            self.buffers.len()
        }
    }

    impl Allocator for FakeDevice {
        fn allocate(
            &mut self,
            size: u64,
            _usage: BufferUsage,
            memory: MemoryKind,
        ) -> Result<BufferId, AllocationError> {
            if self.exhausted {
                return Err(AllocationError::OutOfDeviceMemory { requested: size });
            }
            if let Some(left) = self.allocations_until_failure.as_mut() {
                if *left == 0 {
                    self.allocations_until_failure = None;
                    return Err(AllocationError::OutOfDeviceMemory { requested: size });
                }
                *left -= 1;
            }
            let data = vec![0u8; size as usize].into_boxed_slice();
            Ok(self.buffers.insert(FakeBuffer { data, memory }))
        }

        fn free(&mut self, buffer: BufferId) {
            self.buffers.remove(buffer);
        }

        fn map(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<*mut u8, MapError> {
            let block = self.buffers.get_mut(buffer).ok_or(MapError::InvalidHandle)?;
            if block.memory != MemoryKind::HostVisible {
                return Err(MapError::NotHostVisible);
            }
            if offset + size > block.data.len() as u64 {
                return Err(MapError::OutOfRange {
                    offset,
                    size,
                    buffer_size: block.data.len() as u64,
                });
            }
            Ok(unsafe { block.data.as_mut_ptr().add(offset as usize) })
        }

        fn unmap(&mut self, _buffer: BufferId) {}

        fn buffer_size(&self, buffer: BufferId) -> u64 {
            self.buffers.get(buffer).map_or(0, |b| b.data.len() as u64)
        }
    }

    impl TransferQueue for FakeDevice {
        fn copy_buffer(
            &mut self,
            src: BufferId,
            src_offset: u64,
            dst: BufferId,
            dst_offset: u64,
            size: u64,
        ) -> Result<(), TransferError> {
            if let Some(left) = self.transfers_until_failure.as_mut() {
                if *left == 0 {
                    self.transfers_until_failure = None;
                    return Err(TransferError::Backend {
                        reason: "injected copy failure".to_string(),
                    });
                }
                *left -= 1;
            }
            let chunk = {
                let src = self.buffers.get(src).ok_or(TransferError::InvalidHandle)?;
                if src_offset + size > src.data.len() as u64 {
                    return Err(TransferError::OutOfRange {
                        offset: src_offset,
                        size,
                        buffer_size: src.data.len() as u64,
                    });
                }
                src.data[src_offset as usize..(src_offset + size) as usize].to_vec()
            };
            let dst = self.buffers.get_mut(dst).ok_or(TransferError::InvalidHandle)?;
            if dst_offset + size > dst.data.len() as u64 {
                return Err(TransferError::OutOfRange {
                    offset: dst_offset,
                    size,
                    buffer_size: dst.data.len() as u64,
                });
            }
            dst.data[dst_offset as usize..(dst_offset + size) as usize].copy_from_slice(&chunk);
            Ok(())
        }
    }

    fn position_layout() -> VertexLayout {
        // 3 x f32 position, 12-byte stride
        VertexLayout::new(vec![VertexAttribute {
            location: 0,
            format: AttributeFormat::Rgb32Float,
        }])
    }

    fn device_local_store() -> GeometryStore {
        GeometryStore::new(position_layout(), IndexKind::U32, MemoryKind::DeviceLocal)
    }

    fn vertices(count: u32, seed: f32) -> Vec<[f32; 3]> {
        (0..count)
            .map(|i| [seed + i as f32, seed * 2.0, i as f32])
            .collect()
    }

    fn init_test_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn stride_derives_from_layout() {
        assert_eq!(position_layout().stride(), 12);
        let layout = VertexLayout::new(vec![
            VertexAttribute { location: 0, format: AttributeFormat::Rgb32Float },
            VertexAttribute { location: 1, format: AttributeFormat::Rg32Float },
            VertexAttribute { location: 2, format: AttributeFormat::Rgba8Unorm },
        ]);
        assert_eq!(layout.stride(), 24);
    }

    #[test]
    fn create_mesh_zero_is_a_no_op() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();
        store.add_geometry_slices(&mut device, &vertices(4, 1.0), &[0u32, 1, 2]).unwrap();

        let size_before = store.vertex_buffer_size();
        let buffers_before = device.live_buffers();
        let allocation = store.create_mesh(&mut device, 0, 0).unwrap();

        assert_eq!(allocation, MeshAllocation { vertex_offset: 4, index_offset: 3 });
        assert_eq!(store.vertex_buffer_size(), size_before);
        assert_eq!(store.vertex_count(), 4);
        assert_eq!(store.index_count(), 3);
        assert_eq!(device.live_buffers(), buffers_before);
    }

    #[test]
    fn round_trip_insertion() {
        init_test_logging();
        let mut device = FakeDevice::default();
        let mut store = device_local_store();

        let verts = vertices(4, 3.0);
        let indices = [0u32, 1, 2, 2, 3, 0];
        let allocation = store.add_geometry_slices(&mut device, &verts, &indices).unwrap();

        assert_eq!(allocation, MeshAllocation { vertex_offset: 0, index_offset: 0 });
        let vertex_bytes = device.contents(store.vertex_buffer().unwrap());
        assert_eq!(vertex_bytes, bytemuck::cast_slice::<[f32; 3], u8>(&verts));
        let index_bytes = device.contents(store.index_buffer().unwrap());
        assert_eq!(index_bytes, bytemuck::cast_slice::<u32, u8>(&indices));
    }

    #[test]
    fn scenario_insert_two_meshes_then_remove_first() {
        init_test_logging();
        let mut device = FakeDevice::default();
        let mut store = device_local_store();

        // Mesh A: 4 vertices, 6 indices. Mesh B: 3 vertices, 3 indices.
        let a = store
            .add_geometry_slices(&mut device, &vertices(4, 1.0), &[0u32, 1, 2, 2, 3, 0])
            .unwrap();
        let b_verts = vertices(3, 9.0);
        let b = store
            .add_geometry_slices(&mut device, &b_verts, &[0u32, 1, 2])
            .unwrap();

        assert_eq!(store.vertex_buffer_size(), 84);
        assert_eq!(store.index_buffer_size(), 36);
        assert_eq!(a.vertex_offset, 0);
        assert_eq!(b.vertex_offset, 4);

        store.remove_geometry(&mut device, a.vertex_offset, 4, a.index_offset, 6).unwrap();

        assert_eq!(store.vertex_buffer_size(), 36);
        assert_eq!(store.vertex_count(), 3);
        assert_eq!(store.index_count(), 3);
        // B's data now begins at vertex offset 0.
        let vertex_bytes = device.contents(store.vertex_buffer().unwrap());
        assert_eq!(vertex_bytes, bytemuck::cast_slice::<[f32; 3], u8>(&b_verts));
    }

    #[test]
    fn compaction_preserves_order_of_survivors() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();

        let a = vertices(2, 1.0);
        let b = vertices(3, 10.0);
        let c = vertices(2, 100.0);
        store.add_geometry_slices(&mut device, &a, &[0u32]).unwrap();
        let b_alloc = store.add_geometry_slices(&mut device, &b, &[0u32]).unwrap();
        store.add_geometry_slices(&mut device, &c, &[0u32]).unwrap();
        assert_eq!(store.vertex_count(), 7);

        // Remove the middle mesh; head and tail survive in order.
        store
            .remove_geometry(&mut device, b_alloc.vertex_offset, 3, b_alloc.index_offset, 1)
            .unwrap();

        assert_eq!(store.vertex_count(), 4);
        let mut expected: Vec<[f32; 3]> = a.clone();
        expected.extend_from_slice(&c);
        let vertex_bytes = device.contents(store.vertex_buffer().unwrap());
        assert_eq!(vertex_bytes, bytemuck::cast_slice::<[f32; 3], u8>(&expected));
    }

    #[test]
    fn tail_removal_shrinks_without_shifting() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();

        let a = vertices(3, 1.0);
        store.add_geometry_slices(&mut device, &a, &[0u32, 1, 2]).unwrap();
        let tail = store.add_geometry_slices(&mut device, &vertices(2, 50.0), &[0u32, 1]).unwrap();

        store.remove_geometry(&mut device, tail.vertex_offset, 2, tail.index_offset, 2).unwrap();

        assert_eq!(store.vertex_count(), 3);
        assert_eq!(store.vertex_buffer_size(), 36);
        let vertex_bytes = device.contents(store.vertex_buffer().unwrap());
        assert_eq!(vertex_bytes, bytemuck::cast_slice::<[f32; 3], u8>(&a));
    }

    #[test]
    fn removing_everything_releases_the_buffers() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();
        store.add_geometry_slices(&mut device, &vertices(4, 1.0), &[0u32, 1, 2]).unwrap();

        store.remove_geometry(&mut device, 0, 4, 0, 3).unwrap();

        assert_eq!(store.vertex_count(), 0);
        assert!(store.vertex_buffer().is_none());
        assert!(store.index_buffer().is_none());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn out_of_bounds_removal_is_rejected() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();
        store.add_geometry_slices(&mut device, &vertices(4, 1.0), &[0u32, 1, 2]).unwrap();

        let err = store.remove_geometry(&mut device, 2, 3, 0, 0).unwrap_err();
        assert!(matches!(err, GeometryError::RangeOutOfBounds { occupancy: 4, .. }));
        // Nothing changed.
        assert_eq!(store.vertex_count(), 4);
    }

    #[test]
    fn mapping_a_device_local_store_is_a_contract_violation() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();
        store.add_geometry_slices(&mut device, &vertices(1, 1.0), &[0u32]).unwrap();

        let err = store.map_vertex_buffer(&mut device).unwrap_err();
        assert!(matches!(err, GeometryError::MemoryAccess(MapError::NotHostVisible)));
    }

    #[test]
    fn host_visible_store_maps_for_direct_writes() {
        let mut device = FakeDevice::default();
        let mut store =
            GeometryStore::new(position_layout(), IndexKind::U16, MemoryKind::HostVisible);
        store.create_mesh(&mut device, 2, 3).unwrap();

        let ptr = store.map_vertex_buffer(&mut device).unwrap();
        let payload = vertices(2, 7.0);
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr().cast::<u8>(),
                ptr,
                store.vertex_buffer_size() as usize,
            );
        }
        store.unmap_vertex_buffer(&mut device);

        let vertex_bytes = device.contents(store.vertex_buffer().unwrap());
        assert_eq!(vertex_bytes, bytemuck::cast_slice::<[f32; 3], u8>(&payload));
    }

    #[test]
    fn misaligned_payload_is_rejected() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();

        let err = store.add_geometry(&mut device, &[0u8; 13], &[]).unwrap_err();
        assert!(matches!(err, GeometryError::MisalignedPayload { len: 13, stride: 12 }));
    }

    #[test]
    fn allocation_failure_surfaces_as_capacity_error() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();
        store.add_geometry_slices(&mut device, &vertices(2, 1.0), &[0u32, 1]).unwrap();

        device.exhausted = true;
        let err = store.create_mesh(&mut device, 8, 0).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::Capacity(AllocationError::OutOfDeviceMemory { .. })
        ));
        // The store keeps its previous occupancy on failure.
        assert_eq!(store.vertex_count(), 2);
    }

    #[test]
    fn partial_growth_failure_rolls_back_the_vertex_side() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();

        // The vertex growth succeeds, then the index allocation fails.
        device.allocations_until_failure = Some(1);
        let err = store.create_mesh(&mut device, 4, 6).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::Capacity(AllocationError::OutOfDeviceMemory { .. })
        ));

        assert_eq!((store.vertex_count(), store.index_count()), (0, 0));
        assert!(store.vertex_buffer().is_none());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn partial_compaction_failure_leaves_the_store_intact() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();
        let a = vertices(2, 1.0);
        let b = vertices(3, 9.0);
        let a_alloc = store.add_geometry_slices(&mut device, &a, &[0u32, 1]).unwrap();
        store.add_geometry_slices(&mut device, &b, &[0u32, 1, 2]).unwrap();
        let buffers_before = device.live_buffers();

        // The vertex compaction succeeds, then the index allocation fails.
        device.allocations_until_failure = Some(1);
        let err = store
            .remove_geometry(&mut device, a_alloc.vertex_offset, 2, a_alloc.index_offset, 2)
            .unwrap_err();
        assert!(matches!(err, GeometryError::Capacity(_)));

        assert_eq!(store.vertex_count(), 5);
        assert_eq!(store.index_count(), 5);
        assert_eq!(device.live_buffers(), buffers_before);
        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        let vertex_bytes = device.contents(store.vertex_buffer().unwrap());
        assert_eq!(vertex_bytes, bytemuck::cast_slice::<[f32; 3], u8>(&expected));
    }

    #[test]
    fn failed_upload_releases_the_reserved_region() {
        let mut device = FakeDevice::default();
        let mut store = device_local_store();
        let a = vertices(2, 1.0);
        store.add_geometry_slices(&mut device, &a, &[0u32, 1]).unwrap();

        // Two growth copies and the vertex payload copy succeed; the
        // index payload copy fails.
        device.transfers_until_failure = Some(3);
        let err = store
            .add_geometry_slices(&mut device, &vertices(3, 9.0), &[0u32, 1, 2])
            .unwrap_err();
        assert!(matches!(err, GeometryError::Transfer(_)));

        assert_eq!(store.vertex_count(), 2);
        assert_eq!(store.index_count(), 2);
        let vertex_bytes = device.contents(store.vertex_buffer().unwrap());
        assert_eq!(vertex_bytes, bytemuck::cast_slice::<[f32; 3], u8>(&a));
        let index_bytes = device.contents(store.index_buffer().unwrap());
        assert_eq!(index_bytes, bytemuck::cast_slice::<u32, u8>(&[0u32, 1]));
    }
}
