//! Sampler creation from value-equal specs
//!
//! The [`VulkanSamplerFactory`] turns a [`SamplerSpec`] into a
//! `vk::Sampler` and owns every sampler it hands out; the device-wide
//! deduplication itself lives in [`crate::binding::SamplerCache`].

use ash::{vk, Device};
use slotmap::SlotMap;

use super::{VulkanError, VulkanResult};
use crate::binding::{AddressMode, Filter, MipmapMode, SamplerFactory, SamplerSpec};
use crate::resource::SamplerId;

/// Sampler factory owning a table of created samplers
pub struct VulkanSamplerFactory {
    device: Device,
    samplers: SlotMap<SamplerId, vk::Sampler>,
}

impl VulkanSamplerFactory {
    /// Create a factory for one logical device
    pub fn new(device: Device) -> Self {
        Self { device, samplers: SlotMap::with_key() }
    }

    /// Raw sampler handle for a live id
    pub fn handle(&self, id: SamplerId) -> Option<vk::Sampler> {
        self.samplers.get(id).copied()
    }

    fn build_sampler(&self, spec: &SamplerSpec) -> VulkanResult<vk::Sampler> {
        let anisotropy = spec.max_anisotropy.map(f32::from);
        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter(spec.mag_filter))
            .min_filter(filter(spec.min_filter))
            .address_mode_u(address_mode(spec.address_u))
            .address_mode_v(address_mode(spec.address_v))
            .address_mode_w(address_mode(spec.address_w))
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(mipmap_mode(spec.mipmap_mode))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        unsafe {
            self.device.create_sampler(&sampler_create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl SamplerFactory for VulkanSamplerFactory {
    type Error = VulkanError;

    fn create_sampler(&mut self, spec: &SamplerSpec) -> Result<SamplerId, VulkanError> {
        let sampler = self.build_sampler(spec)?;
        log::debug!("Created sampler: {spec:?}");
        Ok(self.samplers.insert(sampler))
    }
}

impl Drop for VulkanSamplerFactory {
    fn drop(&mut self) {
        unsafe {
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
        }
    }
}

fn filter(value: Filter) -> vk::Filter {
    match value {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

fn mipmap_mode(value: MipmapMode) -> vk::SamplerMipmapMode {
    match value {
        MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

fn address_mode(value: AddressMode) -> vk::SamplerAddressMode {
    match value {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_translations_are_exhaustive() {
        assert_eq!(filter(Filter::Nearest), vk::Filter::NEAREST);
        assert_eq!(mipmap_mode(MipmapMode::Linear), vk::SamplerMipmapMode::LINEAR);
        assert_eq!(
            address_mode(AddressMode::MirroredRepeat),
            vk::SamplerAddressMode::MIRRORED_REPEAT
        );
    }
}
