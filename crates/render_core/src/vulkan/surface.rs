//! Swapchain adapter for the frame synchronizer
//!
//! Wraps an `ash` swapchain loader and handle behind
//! [`PresentationSurface`], translating `ERROR_OUT_OF_DATE_KHR` and the
//! suboptimal flag into [`SurfaceStatus`] values the synchronizer
//! understands. The adapter owns the swapchain handle and destroys it on
//! drop; instance, device and surface creation stay with the caller.

use ash::extensions::khr::Swapchain;
use ash::vk;

use super::sync::{Semaphore, VulkanDevice};
use crate::frame::{FrameError, FrameResult, PresentationSurface, SurfaceStatus};

/// Surface capability limits captured at swapchain creation
#[derive(Debug, Clone, Copy)]
pub struct SurfaceLimits {
    /// Number of images the swapchain was created with
    pub image_count: u32,
    /// Maximum image count the surface supports (0 means unbounded;
    /// callers should have clamped already)
    pub max_image_count: u32,
}

/// Presentation adapter owning one `vk::SwapchainKHR`
pub struct SwapchainSurface {
    loader: Swapchain,
    swapchain: vk::SwapchainKHR,
    present_queue: vk::Queue,
    extent: (u32, u32),
    limits: SurfaceLimits,
}

impl SwapchainSurface {
    /// Adopt an already-created swapchain
    pub fn new(
        loader: Swapchain,
        swapchain: vk::SwapchainKHR,
        present_queue: vk::Queue,
        extent: (u32, u32),
        limits: SurfaceLimits,
    ) -> Self {
        log::debug!(
            "Adopted swapchain: {} images, {}x{}",
            limits.image_count,
            extent.0,
            extent.1
        );
        Self { loader, swapchain, present_queue, extent, limits }
    }

    /// Replace the swapchain after recreation, destroying the old handle
    pub fn replace(
        &mut self,
        swapchain: vk::SwapchainKHR,
        extent: (u32, u32),
        limits: SurfaceLimits,
    ) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = swapchain;
        self.extent = extent;
        self.limits = limits;
        log::info!("Swapchain replaced at {}x{}", extent.0, extent.1);
    }

    /// The wrapped swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl PresentationSurface<VulkanDevice> for SwapchainSurface {
    fn acquire(
        &mut self,
        signal: &Semaphore,
        timeout_ns: u64,
    ) -> FrameResult<(u32, SurfaceStatus)> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                signal.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok((index, SurfaceStatus::Ok)),
            Ok((index, true)) => Ok((index, SurfaceStatus::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((0, SurfaceStatus::OutOfDate)),
            Err(vk::Result::TIMEOUT) => Err(FrameError::DeviceLost {
                reason: format!("image acquire exceeded {timeout_ns} ns"),
            }),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(FrameError::DeviceLost {
                reason: "device reported lost during image acquire".to_string(),
            }),
            Err(other) => Err(FrameError::Backend { reason: format!("{other:?}") }),
        }
    }

    fn present(&mut self, image_index: u32, wait: &Semaphore) -> FrameResult<SurfaceStatus> {
        let wait_semaphores = [wait.handle()];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.loader.queue_present(self.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(SurfaceStatus::Ok),
            Ok(true) => Ok(SurfaceStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::OutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(FrameError::DeviceLost {
                reason: "device reported lost during present".to_string(),
            }),
            Err(other) => Err(FrameError::Backend { reason: format!("{other:?}") }),
        }
    }

    fn current_extent(&self) -> (u32, u32) {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.limits.image_count
    }

    fn max_image_count(&self) -> u32 {
        self.limits.max_image_count
    }
}

impl Drop for SwapchainSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
