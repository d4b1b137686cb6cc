//! Vulkan presentation surface: FIFO swapchain, image views, ring cursor.

use std::cell::RefCell;
use std::sync::Arc;

use ash::vk;

use crate::{Queue, RhiError, RhiResult, Surface, SurfaceDescriptor, SurfaceFormat};

use super::{surface_format_to_vk, vk_to_surface_format, DeviceShared, VulkanQueue};

pub struct VulkanSurface {
    shared: Arc<DeviceShared>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: SurfaceFormat,
    /// The format actually chosen for the swapchain. `format` is its lossy
    /// public projection; anything format-exact (render pass attachments)
    /// must use this.
    vk_format: vk::Format,
    extent: (u32, u32),
    /// Ring cursor: the slot to render into next. Advances once per
    /// successful present.
    cursor: u32,
    last_acquired: u32,
    /// Swapchain images are born in the undefined layout; the first
    /// present-source transition per slot must use that as its source.
    /// Interior mutability because recording sees the surface immutably.
    pristine: RefCell<Vec<bool>>,
    /// Blocks acquisition until the presentation engine releases the image.
    /// With one frame in flight the wait returns immediately in practice.
    acquire_fence: vk::Fence,
    /// Signaled by the frame submission, waited by present, so the engine
    /// never scans out a buffer the GPU is still writing.
    render_done: vk::Semaphore,
}

impl VulkanSurface {
    pub(crate) fn new(shared: Arc<DeviceShared>, desc: &SurfaceDescriptor) -> RhiResult<Self> {
        let err = |what: &str, e: vk::Result| {
            RhiError::ResourceCreation(format!("{what}: {e:?}"))
        };
        let caps = unsafe {
            shared
                .surface_loader
                .get_physical_device_surface_capabilities(shared.physical_device, shared.surface)
                .map_err(|e| err("surface capabilities", e))?
        };
        let formats = unsafe {
            shared
                .surface_loader
                .get_physical_device_surface_formats(shared.physical_device, shared.surface)
                .map_err(|e| err("surface formats", e))?
        };
        let wanted = surface_format_to_vk(desc.format);
        let format = formats
            .iter()
            .copied()
            .find(|f| f.format == wanted)
            .or_else(|| formats.first().copied())
            .ok_or_else(|| RhiError::ResourceCreation("surface reports no formats".into()))?;

        let extent = vk::Extent2D {
            width: desc
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: desc
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        };
        let mut image_count = desc.buffer_count.max(caps.min_image_count);
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        // FIFO is the only mode guaranteed everywhere and never tears.
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(shared.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);
        let swapchain = unsafe {
            shared
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| err("swapchain", e))?
        };
        let images = unsafe {
            shared
                .swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|e| err("swapchain images", e))?
        };

        let mut views = Vec::with_capacity(images.len());
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            let view = unsafe {
                shared
                    .device
                    .create_image_view(&view_info, None)
                    .map_err(|e| err("swapchain image view", e))?
            };
            views.push(view);
        }

        let acquire_fence = unsafe {
            shared
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(|e| err("acquire fence", e))?
        };
        let render_done = unsafe {
            shared
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|e| err("render-done semaphore", e))?
        };

        let slot_count = images.len();
        log::info!(
            "created swapchain: {}x{} x{} {:?}",
            extent.width,
            extent.height,
            slot_count,
            format.format
        );
        Ok(Self {
            shared,
            swapchain,
            images,
            views,
            format: vk_to_surface_format(format.format),
            vk_format: format.format,
            extent: (extent.width, extent.height),
            cursor: 0,
            last_acquired: 0,
            pristine: RefCell::new(vec![true; slot_count]),
            acquire_fence,
            render_done,
        })
    }

    pub(crate) fn image(&self, slot: u32) -> Option<vk::Image> {
        self.images.get(slot as usize).copied()
    }

    pub(crate) fn view(&self, slot: u32) -> Option<vk::ImageView> {
        self.views.get(slot as usize).copied()
    }

    /// True exactly once per slot, on its first recorded transition.
    pub(crate) fn take_pristine(&self, slot: u32) -> bool {
        let mut pristine = self.pristine.borrow_mut();
        match pristine.get_mut(slot as usize) {
            Some(flag) => std::mem::take(flag),
            None => false,
        }
    }

    pub(crate) fn render_done(&self) -> vk::Semaphore {
        self.render_done
    }

    pub(crate) fn vk_format(&self) -> vk::Format {
        self.vk_format
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_semaphore(self.render_done, None);
            self.shared.device.destroy_fence(self.acquire_fence, None);
            for view in self.views.drain(..) {
                self.shared.device.destroy_image_view(view, None);
            }
            // Images are owned by the swapchain.
            self.shared
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

impl std::fmt::Debug for VulkanSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSurface")
            .field("extent", &self.extent)
            .field("buffer_count", &self.images.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Surface for VulkanSurface {
    fn acquire_current_index(&mut self) -> RhiResult<u32> {
        let (index, suboptimal) = unsafe {
            self.shared
                .swapchain_loader
                .acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    vk::Semaphore::null(),
                    self.acquire_fence,
                )
                .map_err(|e| RhiError::Present(format!("acquire: {e:?}")))?
        };
        if suboptimal {
            log::warn!("swapchain is suboptimal for the surface");
        }
        unsafe {
            self.shared
                .device
                .wait_for_fences(&[self.acquire_fence], true, u64::MAX)
                .map_err(|e| RhiError::Sync(format!("acquire wait: {e:?}")))?;
            self.shared
                .device
                .reset_fences(&[self.acquire_fence])
                .map_err(|e| RhiError::Sync(format!("acquire fence reset: {e:?}")))?;
        }
        // The ring cursor is the contract; under flush-per-frame FIFO the
        // driver cannot hand out anything else.
        if index != self.cursor {
            log::warn!("driver acquired slot {index}, ring cursor was {}", self.cursor);
            self.cursor = index;
        }
        self.last_acquired = index;
        Ok(index)
    }

    fn present(&mut self, queue: &dyn Queue) -> RhiResult<()> {
        let queue = queue
            .as_any()
            .downcast_ref::<VulkanQueue>()
            .ok_or_else(|| RhiError::Present("queue is not a Vulkan queue".into()))?;
        let wait_semaphores = [self.render_done];
        let image_indices = [self.last_acquired];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(std::slice::from_ref(&self.swapchain))
            .image_indices(&image_indices);
        unsafe {
            self.shared
                .swapchain_loader
                .queue_present(queue.raw(), &present_info)
                .map_err(|e| RhiError::Present(format!("{e:?}")))?;
        }
        self.cursor = (self.last_acquired + 1) % self.images.len() as u32;
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn buffer_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn restore_windowed(&mut self) {
        // The host never enters exclusive fullscreen on Vulkan, so there is
        // no display mode to restore. Kept for the teardown contract.
        log::debug!("restore_windowed: nothing to do");
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
