//! Vulkan buffer allocation and transfer
//!
//! Implements [`Allocator`] and [`TransferQueue`] with individual
//! `vkAllocateMemory` allocations per buffer and one-time-submit copy
//! commands on a transient command pool. Handles are keys into a
//! slotmap-owned table of buffer/memory pairs.

use ash::{vk, Device, Instance};
use slotmap::SlotMap;

use super::{VulkanError, VulkanResult};
use crate::memory::{
    AllocationError, Allocator, BufferUsage, MapError, MemoryKind, TransferError, TransferQueue,
};
use crate::resource::BufferId;

struct BufferBlock {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    kind: MemoryKind,
    mapped: bool,
}

/// Allocator backed by per-buffer device memory allocations
pub struct VulkanAllocator {
    device: Device,
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    buffers: SlotMap<BufferId, BufferBlock>,
}

impl VulkanAllocator {
    /// Create an allocator bound to a transfer-capable queue
    pub fn new(
        device: Device,
        instance: Instance,
        physical_device: vk::PhysicalDevice,
        queue: vk::Queue,
        queue_family_index: u32,
    ) -> VulkanResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let command_pool = unsafe {
            device.create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            instance,
            physical_device,
            queue,
            command_pool,
            buffers: SlotMap::with_key(),
        })
    }

    /// Raw buffer handle for a live allocation
    pub fn buffer_handle(&self, buffer: BufferId) -> Option<vk::Buffer> {
        self.buffers.get(buffer).map(|block| block.buffer)
    }

    fn record_and_submit_copy(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        src_offset: u64,
        dst: vk::Buffer,
        dst_offset: u64,
        size: u64,
    ) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device.begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;

            let region = vk::BufferCopy::builder()
                .src_offset(src_offset)
                .dst_offset(dst_offset)
                .size(size)
                .build();
            self.device.cmd_copy_buffer(command_buffer, src, dst, &[region]);

            self.device.end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers);

            self.device.queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device.queue_wait_idle(self.queue)
                .map_err(VulkanError::Api)?;
        }

        Ok(())
    }
}

impl Allocator for VulkanAllocator {
    fn allocate(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryKind,
    ) -> Result<BufferId, AllocationError> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(buffer_usage_flags(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device.create_buffer(&buffer_info, None)
                .map_err(|e| AllocationError::Backend { reason: format!("{e:?}") })?
        };

        let mem_requirements = unsafe {
            self.device.get_buffer_memory_requirements(buffer)
        };

        let memory_type_index = match find_memory_type(
            &self.instance,
            self.physical_device,
            mem_requirements.memory_type_bits,
            memory_property_flags(memory),
        ) {
            Ok(index) => index,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(AllocationError::Backend { reason: err.to_string() });
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let device_memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(device_memory) => device_memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(match err {
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                        AllocationError::OutOfDeviceMemory { requested: size }
                    }
                    other => AllocationError::Backend { reason: format!("{other:?}") },
                });
            }
        };

        if let Err(err) = unsafe { self.device.bind_buffer_memory(buffer, device_memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(device_memory, None);
            }
            return Err(AllocationError::Backend { reason: format!("{err:?}") });
        }

        log::trace!("Allocated {size} byte buffer ({memory:?})");
        Ok(self.buffers.insert(BufferBlock {
            buffer,
            memory: device_memory,
            size,
            kind: memory,
            mapped: false,
        }))
    }

    fn free(&mut self, buffer: BufferId) {
        if let Some(block) = self.buffers.remove(buffer) {
            unsafe {
                if block.mapped {
                    self.device.unmap_memory(block.memory);
                }
                self.device.destroy_buffer(block.buffer, None);
                self.device.free_memory(block.memory, None);
            }
        } else {
            log::warn!("Attempted to free an unknown buffer handle");
        }
    }

    fn map(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<*mut u8, MapError> {
        let block = self.buffers.get_mut(buffer).ok_or(MapError::InvalidHandle)?;
        if block.kind != MemoryKind::HostVisible {
            return Err(MapError::NotHostVisible);
        }
        if offset.checked_add(size).map_or(true, |end| end > block.size) {
            return Err(MapError::OutOfRange { offset, size, buffer_size: block.size });
        }

        let ptr = unsafe {
            self.device.map_memory(block.memory, offset, size, vk::MemoryMapFlags::empty())
                .map_err(|e| MapError::Backend { reason: format!("{e:?}") })?
        };
        block.mapped = true;
        Ok(ptr.cast::<u8>())
    }

    fn unmap(&mut self, buffer: BufferId) {
        if let Some(block) = self.buffers.get_mut(buffer) {
            if block.mapped {
                unsafe { self.device.unmap_memory(block.memory) };
                block.mapped = false;
            }
        }
    }

    fn buffer_size(&self, buffer: BufferId) -> u64 {
        self.buffers.get(buffer).map_or(0, |block| block.size)
    }
}

impl TransferQueue for VulkanAllocator {
    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), TransferError> {
        let src_block = self.buffers.get(src).ok_or(TransferError::InvalidHandle)?;
        let dst_block = self.buffers.get(dst).ok_or(TransferError::InvalidHandle)?;

        if src_offset.checked_add(size).map_or(true, |end| end > src_block.size) {
            return Err(TransferError::OutOfRange {
                offset: src_offset,
                size,
                buffer_size: src_block.size,
            });
        }
        if dst_offset.checked_add(size).map_or(true, |end| end > dst_block.size) {
            return Err(TransferError::OutOfRange {
                offset: dst_offset,
                size,
                buffer_size: dst_block.size,
            });
        }

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(|e| TransferError::Backend { reason: format!("{e:?}") })?
        };
        let command_buffer = command_buffers[0];

        let result = self.record_and_submit_copy(
            command_buffer,
            src_block.buffer,
            src_offset,
            dst_block.buffer,
            dst_offset,
            size,
        );

        unsafe {
            self.device.free_command_buffers(self.command_pool, &command_buffers);
        }

        result.map_err(|e| TransferError::Backend { reason: e.to_string() })
    }
}

impl Drop for VulkanAllocator {
    fn drop(&mut self) {
        unsafe {
            for (_, block) in self.buffers.drain() {
                if block.mapped {
                    self.device.unmap_memory(block.memory);
                }
                self.device.destroy_buffer(block.buffer, None);
                self.device.free_memory(block.memory, None);
            }
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

fn memory_property_flags(kind: MemoryKind) -> vk::MemoryPropertyFlags {
    match kind {
        MemoryKind::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryKind::HostVisible => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
    }
}

/// Find a memory type matching the filter and property requirements
fn find_memory_type(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let mem_properties = unsafe {
        instance.get_physical_device_memory_properties(physical_device)
    };

    for i in 0..mem_properties.memory_type_count {
        if (type_filter & (1 << i)) != 0
            && mem_properties.memory_types[i as usize].property_flags.contains(properties)
        {
            return Ok(i);
        }
    }

    Err(VulkanError::NoSuitableMemoryType)
}
