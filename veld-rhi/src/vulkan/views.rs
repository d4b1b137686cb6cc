//! Slot-indexed target views: the clear render pass plus one framebuffer per
//! swapchain slot, each binding that slot's color view and the shared depth
//! view. Created once at init, indexed by buffer slot ever after.

use std::sync::Arc;

use ash::vk;

use crate::{RhiError, RhiResult, TargetViews};

use super::{depth_format_to_vk, DeviceShared, VulkanDepthTarget, VulkanSurface};

pub struct VulkanTargetViews {
    shared: Arc<DeviceShared>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    extent: (u32, u32),
}

impl VulkanTargetViews {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        surface: &VulkanSurface,
        depth: &VulkanDepthTarget,
    ) -> RhiResult<Self> {
        use crate::{DepthTarget as _, Surface as _};

        let err = |what: &str, e: vk::Result| {
            RhiError::ResourceCreation(format!("{what}: {e:?}"))
        };

        // The host declares layouts itself via explicit transitions, so the
        // pass neither transitions nor clears anything it was not asked to:
        // attachments enter and leave in their attachment-optimal layouts and
        // both are cleared on load.
        let attachments = [
            // The swapchain's actual format, not the public enum: drivers may
            // hand out formats the enum cannot represent.
            vk::AttachmentDescription::default()
                .format(surface.vk_format())
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            vk::AttachmentDescription::default()
                .format(depth_format_to_vk(depth.format()))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];
        let color_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref))
            .depth_stencil_attachment(&depth_ref);
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass));
        let render_pass = unsafe {
            shared
                .device
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| err("render pass", e))?
        };

        let (width, height) = surface.extent();
        let mut framebuffers = Vec::with_capacity(surface.buffer_count() as usize);
        for slot in 0..surface.buffer_count() {
            let color_view = surface.view(slot).ok_or_else(|| {
                RhiError::ResourceCreation(format!("surface has no view for slot {slot}"))
            })?;
            let views = [color_view, depth.view()];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&views)
                .width(width)
                .height(height)
                .layers(1);
            let framebuffer = unsafe {
                shared
                    .device
                    .create_framebuffer(&framebuffer_info, None)
                    .map_err(|e| err("framebuffer", e))
            };
            match framebuffer {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    for fb in framebuffers.drain(..) {
                        unsafe { shared.device.destroy_framebuffer(fb, None) };
                    }
                    unsafe { shared.device.destroy_render_pass(render_pass, None) };
                    return Err(e);
                }
            }
        }

        Ok(Self {
            shared,
            render_pass,
            framebuffers,
            extent: (width, height),
        })
    }

    pub(crate) fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub(crate) fn framebuffer(&self, slot: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(slot as usize).copied()
    }

    pub(crate) fn extent(&self) -> (u32, u32) {
        self.extent
    }
}

impl Drop for VulkanTargetViews {
    fn drop(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.shared.device.destroy_framebuffer(framebuffer, None);
            }
            self.shared.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

impl std::fmt::Debug for VulkanTargetViews {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanTargetViews")
            .field("slot_count", &self.framebuffers.len())
            .finish()
    }
}

impl TargetViews for VulkanTargetViews {
    fn slot_count(&self) -> u32 {
        self.framebuffers.len() as u32
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
