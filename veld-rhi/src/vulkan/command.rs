//! Command recording and submission: a per-list command pool (the reusable
//! allocator) with one primary command buffer (the recording handle), plus
//! the direct queue wrapper.

use std::sync::Arc;

use ash::vk;

use crate::{
    ClearValues, CommandList, DepthTarget, Queue, ResourceState, RhiError, RhiResult, ScissorRect,
    Surface, TargetViews, Viewport,
};

use super::{state_layout, state_sync_scope, DeviceShared, VulkanDepthTarget, VulkanSurface,
    VulkanTargetViews};

pub struct VulkanCommandList {
    shared: Arc<DeviceShared>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    recording: bool,
}

impl VulkanCommandList {
    /// Created in the recording state: record, close, submit; reset before
    /// the next use.
    pub(crate) fn new(shared: Arc<DeviceShared>) -> RhiResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(shared.queue_family_index);
        let pool = unsafe {
            shared
                .device
                .create_command_pool(&pool_info, None)
                .map_err(|e| RhiError::ResourceCreation(format!("command pool: {e:?}")))?
        };
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe {
            shared
                .device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| RhiError::ResourceCreation(format!("command buffer: {e:?}")))?
        };
        let buffer = buffers[0];
        unsafe {
            shared
                .device
                .begin_command_buffer(buffer, &vk::CommandBufferBeginInfo::default())
                .map_err(|e| RhiError::CommandRecording(format!("begin: {e:?}")))?;
        }
        Ok(Self {
            shared,
            pool,
            buffer,
            recording: true,
        })
    }

    pub(crate) fn raw(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub(crate) fn is_closed(&self) -> bool {
        !self.recording
    }

    fn check_recording(&self, what: &str) -> RhiResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(RhiError::CommandRecording(format!(
                "{what} on a closed list; reset first"
            )))
        }
    }

    fn barrier(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        from: ResourceState,
        to: ResourceState,
    ) {
        let (src_access, src_stage) = state_sync_scope(from);
        let (dst_access, dst_stage) = state_sync_scope(to);
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(state_layout(to))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        unsafe {
            self.shared.device.cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        if self.recording {
            let _ = unsafe { self.shared.device.end_command_buffer(self.buffer) };
        }
        unsafe {
            self.shared.device.destroy_command_pool(self.pool, None);
        }
    }
}

impl std::fmt::Debug for VulkanCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandList")
            .field("recording", &self.recording)
            .finish()
    }
}

impl CommandList for VulkanCommandList {
    fn reset(&mut self) -> RhiResult<()> {
        // Resetting the pool recycles the allocator's backing store; only
        // legal once the fence has confirmed the prior submission retired.
        unsafe {
            self.shared
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| RhiError::CommandRecording(format!("allocator reset: {e:?}")))?;
            self.shared
                .device
                .begin_command_buffer(self.buffer, &vk::CommandBufferBeginInfo::default())
                .map_err(|e| RhiError::CommandRecording(format!("begin: {e:?}")))?;
        }
        self.recording = true;
        Ok(())
    }

    fn transition_color(
        &mut self,
        surface: &dyn Surface,
        slot: u32,
        from: ResourceState,
        to: ResourceState,
    ) -> RhiResult<()> {
        self.check_recording("transition_color")?;
        let surface = surface
            .as_any()
            .downcast_ref::<VulkanSurface>()
            .ok_or_else(|| RhiError::CommandRecording("surface is not Vulkan".into()))?;
        let image = surface.image(slot).ok_or_else(|| {
            RhiError::CommandRecording(format!("surface has no slot {slot}"))
        })?;
        // Swapchain images leave the presentation engine in the undefined
        // layout before their very first use; after that, present-source.
        let old_layout = if from == ResourceState::Present && surface.take_pristine(slot) {
            vk::ImageLayout::UNDEFINED
        } else {
            state_layout(from)
        };
        self.barrier(image, vk::ImageAspectFlags::COLOR, old_layout, from, to);
        Ok(())
    }

    fn transition_depth(
        &mut self,
        depth: &dyn DepthTarget,
        from: ResourceState,
        to: ResourceState,
    ) -> RhiResult<()> {
        self.check_recording("transition_depth")?;
        let depth = depth
            .as_any()
            .downcast_ref::<VulkanDepthTarget>()
            .ok_or_else(|| RhiError::CommandRecording("depth target is not Vulkan".into()))?;
        self.barrier(
            depth.image(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            state_layout(from),
            from,
            to,
        );
        Ok(())
    }

    fn record_clear_pass(
        &mut self,
        views: &dyn TargetViews,
        slot: u32,
        clear: &ClearValues,
        viewport: Viewport,
        scissor: ScissorRect,
    ) -> RhiResult<()> {
        self.check_recording("record_clear_pass")?;
        let views = views
            .as_any()
            .downcast_ref::<VulkanTargetViews>()
            .ok_or_else(|| RhiError::CommandRecording("target views are not Vulkan".into()))?;
        let framebuffer = views.framebuffer(slot).ok_or_else(|| {
            RhiError::CommandRecording(format!("no framebuffer for slot {slot}"))
        })?;
        let (width, height) = views.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear.color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear.depth,
                    stencil: clear.stencil,
                },
            },
        ];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(views.render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            })
            .clear_values(&clear_values);
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        let vk_scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.left,
                y: scissor.top,
            },
            extent: vk::Extent2D {
                width: (scissor.right - scissor.left).max(0) as u32,
                height: (scissor.bottom - scissor.top).max(0) as u32,
            },
        };
        unsafe {
            self.shared.device.cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
            self.shared
                .device
                .cmd_set_viewport(self.buffer, 0, &[vk_viewport]);
            self.shared.device.cmd_set_scissor(self.buffer, 0, &[vk_scissor]);
            self.shared.device.cmd_end_render_pass(self.buffer);
        }
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        self.check_recording("close")?;
        unsafe {
            self.shared
                .device
                .end_command_buffer(self.buffer)
                .map_err(|e| RhiError::CommandRecording(format!("close: {e:?}")))?;
        }
        self.recording = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct VulkanQueue {
    shared: Arc<DeviceShared>,
}

impl VulkanQueue {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn raw(&self) -> vk::Queue {
        self.shared.queue
    }
}

impl std::fmt::Debug for VulkanQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanQueue").finish()
    }
}

impl Queue for VulkanQueue {
    fn submit(&self, list: &dyn CommandList, present_to: Option<&dyn Surface>) -> RhiResult<()> {
        let list = list
            .as_any()
            .downcast_ref::<VulkanCommandList>()
            .ok_or_else(|| RhiError::Submission("list is not a Vulkan command list".into()))?;
        if !list.is_closed() {
            return Err(RhiError::Submission("command list is not closed".into()));
        }
        let mut signal_semaphores = Vec::new();
        if let Some(surface) = present_to {
            let surface = surface
                .as_any()
                .downcast_ref::<VulkanSurface>()
                .ok_or_else(|| RhiError::Submission("surface is not Vulkan".into()))?;
            signal_semaphores.push(surface.render_done());
        }
        let buffers = [list.raw()];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.shared
                .device
                .queue_submit(self.shared.queue, &[submit_info], vk::Fence::null())
                .map_err(|e| RhiError::Submission(format!("{e:?}")))
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
