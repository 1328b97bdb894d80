//! Descriptor pool, layout and write materialization
//!
//! Pools are sized from a [`BindingLayout`]'s per-kind histogram, set
//! layouts are derived from its ordered slots, and prepared
//! [`BindingWrite`] lists from a resource package are applied through
//! `vkUpdateDescriptorSets`. Handle-to-object resolution is delegated to
//! a [`HandleResolver`] owned by the caller.

use ash::{vk, Device};
use slotmap::Key;

use super::{VulkanError, VulkanResult};
use crate::binding::{BindingWrite, BoundResource};
use crate::reflect::{BindingLayout, ResourceKind};
use crate::resource::{BufferId, ImageId, SamplerId};

/// Resolves arena handles to live Vulkan objects
pub trait HandleResolver {
    /// Buffer handle lookup
    fn buffer(&self, id: BufferId) -> Option<vk::Buffer>;
    /// Image view lookup
    fn image_view(&self, id: ImageId) -> Option<vk::ImageView>;
    /// Sampler lookup
    fn sampler(&self, id: SamplerId) -> Option<vk::Sampler>;
}

/// Descriptor set layout with RAII cleanup
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Build a set layout from the slots of one binding layout
    pub fn new(
        device: Device,
        layout: &BindingLayout,
        stage_flags: vk::ShaderStageFlags,
    ) -> VulkanResult<Self> {
        let mut bindings = Vec::with_capacity(layout.slot_count());
        for slot in layout.slots() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(slot.binding)
                    .descriptor_type(descriptor_type(slot.kind)?)
                    .descriptor_count(slot.count)
                    .stage_flags(stage_flags)
                    .build(),
            );
        }

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings);

        let handle = unsafe {
            device.create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, layout: handle })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool plus write application for one binding layout
pub struct VulkanDescriptors {
    device: Device,
    pool: vk::DescriptorPool,
}

impl VulkanDescriptors {
    /// Create a pool sized for `max_sets` sets of the given layout
    ///
    /// Each resource kind's bucket is the layout's histogram count times
    /// `max_sets`, so every set the pool promises can actually be
    /// allocated.
    pub fn new(device: Device, layout: &BindingLayout, max_sets: u32) -> VulkanResult<Self> {
        let mut pool_sizes = Vec::new();
        for (kind, count) in layout.kind_histogram() {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: descriptor_type(kind)?,
                descriptor_count: count * max_sets,
            });
        }

        if pool_sizes.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "binding layout declares no descriptor slots".to_string(),
            });
        }

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        let pool = unsafe {
            device.create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("Created descriptor pool for {max_sets} sets");
        Ok(Self { device, pool })
    }

    /// Allocate one descriptor set of the given layout
    ///
    /// Pool exhaustion is reported as a distinct recoverable error so the
    /// caller can create another pool and retry.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let set_layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&set_layouts);

        let sets = unsafe {
            self.device.allocate_descriptor_sets(&alloc_info)
                .map_err(|err| match err {
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                        VulkanError::DescriptorPoolExhausted
                    }
                    other => VulkanError::Api(other),
                })?
        };
        Ok(sets[0])
    }

    /// Apply a prepared package's writes to a descriptor set
    pub fn write_set<R: HandleResolver>(
        &self,
        set: vk::DescriptorSet,
        writes: &[BindingWrite],
        resolver: &R,
    ) -> VulkanResult<()> {
        // Info arrays are collected first so the write structs can point
        // into stable storage.
        let mut buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = Vec::new();
        let mut image_infos: Vec<[vk::DescriptorImageInfo; 1]> = Vec::new();
        let mut slots: Vec<(usize, bool)> = Vec::with_capacity(writes.len());

        for write in writes {
            match write.resource {
                BoundResource::Buffer { buffer, offset } => {
                    let handle = resolver.buffer(buffer).ok_or(VulkanError::ResourceNotFound {
                        id: buffer.data().as_ffi(),
                    })?;
                    buffer_infos.push([vk::DescriptorBufferInfo {
                        buffer: handle,
                        offset,
                        range: vk::WHOLE_SIZE,
                    }]);
                    slots.push((buffer_infos.len() - 1, true));
                }
                BoundResource::Image { image, sampler } => {
                    let view = resolver.image_view(image).ok_or(VulkanError::ResourceNotFound {
                        id: image.data().as_ffi(),
                    })?;
                    let sampler_handle =
                        resolver.sampler(sampler).ok_or(VulkanError::ResourceNotFound {
                            id: sampler.data().as_ffi(),
                        })?;
                    image_infos.push([vk::DescriptorImageInfo {
                        sampler: sampler_handle,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }]);
                    slots.push((image_infos.len() - 1, false));
                }
            }
        }

        let mut set_writes = Vec::with_capacity(writes.len());
        for (write, (info_index, is_buffer)) in writes.iter().zip(&slots) {
            let builder = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(write.array_element)
                .descriptor_type(descriptor_type(write.kind)?);

            let entry = if *is_buffer {
                builder.buffer_info(&buffer_infos[*info_index]).build()
            } else {
                builder.image_info(&image_infos[*info_index]).build()
            };
            set_writes.push(entry);
        }

        unsafe {
            self.device.update_descriptor_sets(&set_writes, &[]);
        }
        Ok(())
    }
}

impl Drop for VulkanDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Translate a resource kind to its descriptor type
///
/// Push constants have no descriptor representation; asking for one is a
/// contract violation.
fn descriptor_type(kind: ResourceKind) -> VulkanResult<vk::DescriptorType> {
    match kind {
        ResourceKind::UniformBuffer => Ok(vk::DescriptorType::UNIFORM_BUFFER),
        ResourceKind::StorageBuffer => Ok(vk::DescriptorType::STORAGE_BUFFER),
        ResourceKind::SampledImage => Ok(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ResourceKind::StorageImage => Ok(vk::DescriptorType::STORAGE_IMAGE),
        ResourceKind::InputAttachment => Ok(vk::DescriptorType::INPUT_ATTACHMENT),
        ResourceKind::AccelerationStructure => Ok(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR),
        ResourceKind::PushConstant => Err(VulkanError::InvalidOperation {
            reason: "push constants do not occupy descriptor slots".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_descriptor_kind_translates() {
        assert_eq!(
            descriptor_type(ResourceKind::UniformBuffer).unwrap(),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            descriptor_type(ResourceKind::SampledImage).unwrap(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert!(descriptor_type(ResourceKind::PushConstant).is_err());
    }
}
