//! Depth/stencil target: one committed device-local image plus its view,
//! sized to the presentation surface and never resized.

use std::sync::Arc;

use ash::vk;

use crate::{DepthFormat, DepthTarget, RhiError, RhiResult};

use super::{depth_format_to_vk, find_memory_type, DeviceShared};

pub struct VulkanDepthTarget {
    shared: Arc<DeviceShared>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: DepthFormat,
    extent: (u32, u32),
}

impl VulkanDepthTarget {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        width: u32,
        height: u32,
        format: DepthFormat,
    ) -> RhiResult<Self> {
        let err = |what: &str, e: vk::Result| {
            RhiError::ResourceCreation(format!("{what}: {e:?}"))
        };
        let vk_format = depth_format_to_vk(format);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe {
            shared
                .device
                .create_image(&image_info, None)
                .map_err(|e| err("depth image", e))?
        };

        let requirements = unsafe { shared.device.get_image_memory_requirements(image) };
        let memory_type_index = find_memory_type(
            &shared.instance,
            shared.physical_device,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .ok_or_else(|| {
            RhiError::ResourceCreation("no device-local memory type for depth image".into())
        })?;
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe {
            shared
                .device
                .allocate_memory(&allocate_info, None)
                .map_err(|e| err("depth memory", e))?
        };
        unsafe {
            shared
                .device
                .bind_image_memory(image, memory, 0)
                .map_err(|e| err("depth memory bind", e))?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = unsafe {
            shared
                .device
                .create_image_view(&view_info, None)
                .map_err(|e| err("depth view", e))?
        };

        Ok(Self {
            shared,
            image,
            memory,
            view,
            format,
            extent: (width, height),
        })
    }

    pub(crate) fn image(&self) -> vk::Image {
        self.image
    }

    pub(crate) fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for VulkanDepthTarget {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_image_view(self.view, None);
            self.shared.device.destroy_image(self.image, None);
            self.shared.device.free_memory(self.memory, None);
        }
    }
}

impl std::fmt::Debug for VulkanDepthTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDepthTarget")
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish()
    }
}

impl DepthTarget for VulkanDepthTarget {
    fn format(&self) -> DepthFormat {
        self.format
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
