//! Vulkan synchronization primitives and queue submission
//!
//! RAII wrappers over `vk::Semaphore` and `vk::Fence`, plus the
//! [`VulkanDevice`] adapter that implements [`RenderDevice`] for the frame
//! synchronizer. Submissions wait on the image-available semaphore at the
//! color-attachment-output stage.

use ash::{vk, Device};

use super::VulkanError;
use crate::frame::{FrameError, FrameResult, RenderDevice};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> Result<Self, VulkanError> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally pre-signaled
    pub fn new(device: Device, signaled: bool) -> Result<Self, VulkanError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Logical device plus graphics queue, adapted to the frame synchronizer
pub struct VulkanDevice {
    device: Device,
    queue: vk::Queue,
}

impl VulkanDevice {
    /// Wrap a logical device and its submission queue
    pub fn new(device: Device, queue: vk::Queue) -> Self {
        Self { device, queue }
    }

    /// The wrapped logical device
    pub fn handle(&self) -> &Device {
        &self.device
    }

    /// The submission queue
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }
}

impl RenderDevice for VulkanDevice {
    type Fence = Fence;
    type Semaphore = Semaphore;
    type CommandStream = vk::CommandBuffer;

    fn create_fence(&self, signaled: bool) -> FrameResult<Fence> {
        Fence::new(self.device.clone(), signaled)
            .map_err(|e| FrameError::Backend { reason: e.to_string() })
    }

    fn create_semaphore(&self) -> FrameResult<Semaphore> {
        Semaphore::new(self.device.clone())
            .map_err(|e| FrameError::Backend { reason: e.to_string() })
    }

    fn wait_fence(&self, fence: &Fence, timeout_ns: u64) -> FrameResult<()> {
        unsafe {
            self.device.wait_for_fences(&[fence.handle()], true, timeout_ns)
                .map_err(|err| match err {
                    vk::Result::TIMEOUT => FrameError::DeviceLost {
                        reason: format!("fence wait exceeded {timeout_ns} ns"),
                    },
                    vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost {
                        reason: "device reported lost during fence wait".to_string(),
                    },
                    other => FrameError::Backend { reason: format!("{other:?}") },
                })
        }
    }

    fn reset_fence(&self, fence: &Fence) -> FrameResult<()> {
        unsafe {
            self.device.reset_fences(&[fence.handle()])
                .map_err(|e| FrameError::Backend { reason: format!("{e:?}") })
        }
    }

    fn submit(
        &self,
        stream: &vk::CommandBuffer,
        wait: &Semaphore,
        signal: &Semaphore,
        fence: &Fence,
    ) -> FrameResult<()> {
        let wait_semaphores = [wait.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [*stream];
        let signal_semaphores = [signal.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.queue_submit(self.queue, &[submit_info.build()], fence.handle())
                .map_err(|err| match err {
                    vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost {
                        reason: "device reported lost during queue submit".to_string(),
                    },
                    other => FrameError::Backend { reason: format!("{other:?}") },
                })
        }
    }
}
