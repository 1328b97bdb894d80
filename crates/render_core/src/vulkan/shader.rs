//! Shader module creation from validated SPIR-V
//!
//! The alignment-checked [`ShaderBinary`] is the only accepted input, so
//! the unsafe module creation never sees a misaligned blob.

use std::path::Path;

use ash::{vk, Device};

use super::{VulkanError, VulkanResult};
use crate::reflect::{ReflectError, ShaderBinary};

/// Compiled shader module with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from a validated binary
    pub fn from_binary(device: Device, binary: &ShaderBinary) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(binary.words());

        let module = unsafe {
            device.create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Load, validate and create a module from a file on disk
    pub fn from_file<P: AsRef<Path>>(device: Device, path: P) -> VulkanResult<Self> {
        let binary = ShaderBinary::from_file(path).map_err(|err| match err {
            ReflectError::Misaligned { len } => VulkanError::InvalidOperation {
                reason: format!("shader binary of {len} bytes is not 4-byte aligned"),
            },
            other => VulkanError::InvalidOperation { reason: other.to_string() },
        })?;
        Self::from_binary(device, &binary)
    }

    /// Get the shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}
