//! The render context: one ownership aggregate for everything the host
//! holds against the GPU, with strict init ordering and best-effort,
//! presence-checked teardown.

use veld_rhi::{
    ClearValues, CommandList, DepthTarget, Device, Fence, Queue, ResourceState, RhiError,
    RhiResult, ScissorRect, Surface, SurfaceDescriptor, TargetViews, Viewport,
};

use crate::config::RenderConfig;

fn absent(what: &str) -> RhiError {
    RhiError::ResourceCreation(format!("render context has no {what}"))
}

/// Everything a frame needs, borrowed at once. Only available after a
/// successful `init`.
pub(crate) struct FrameParts<'a> {
    pub queue: &'a dyn Queue,
    pub fence: &'a mut dyn Fence,
    pub list: &'a mut dyn CommandList,
    pub surface: &'a mut dyn Surface,
    pub views: &'a dyn TargetViews,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub clear: ClearValues,
}

/// Owns the device and every resource derived from it. Field declaration
/// order is reverse creation order, so dropping the context releases
/// dependents before the device itself.
pub struct RenderContext {
    views: Option<Box<dyn TargetViews>>,
    depth: Option<Box<dyn DepthTarget>>,
    surface: Option<Box<dyn Surface>>,
    list: Option<Box<dyn CommandList>>,
    queue: Option<Box<dyn Queue>>,
    fence: Option<Box<dyn Fence>>,
    device: Box<dyn Device>,
    viewport: Viewport,
    scissor: ScissorRect,
    config: RenderConfig,
}

impl RenderContext {
    pub fn new(device: Box<dyn Device>, config: RenderConfig) -> Self {
        let extent = (config.width, config.height);
        Self {
            views: None,
            depth: None,
            surface: None,
            list: None,
            queue: None,
            fence: None,
            device,
            viewport: Viewport::of_extent(extent),
            scissor: ScissorRect::of_extent(extent),
            config,
        }
    }

    /// Build every owned resource in strict dependency order: fence, queue,
    /// command list, surface, depth buffer, target views, then the one-shot
    /// depth transition flushed to completion, then viewport/scissor. Each
    /// resource is stored the moment it exists, so a failure partway leaves
    /// a context `uninit` can still walk safely.
    pub fn init(&mut self) -> RhiResult<()> {
        log::info!("initializing render context");
        self.fence = Some(self.device.create_fence()?);
        self.queue = Some(self.device.queue()?);
        self.list = Some(self.device.create_command_list()?);
        self.surface = Some(self.device.create_surface(&SurfaceDescriptor {
            width: self.config.width,
            height: self.config.height,
            buffer_count: self.config.buffer_count,
            format: self.config.format,
        })?);

        // The driver may clamp the requested extent; everything derived from
        // it uses what the surface actually is.
        let surface = self.surface.as_deref().ok_or_else(|| absent("surface"))?;
        let (width, height) = surface.extent();
        self.depth = Some(
            self.device
                .create_depth_target(width, height, self.config.depth_format)?,
        );

        let surface = self.surface.as_deref().ok_or_else(|| absent("surface"))?;
        let depth = self.depth.as_deref().ok_or_else(|| absent("depth target"))?;
        let views = self.device.create_target_views(surface, depth)?;
        // Every ring slot must have a view; a short set would make some
        // acquired index unrenderable.
        if views.slot_count() != surface.buffer_count() {
            return Err(RhiError::ResourceCreation(format!(
                "target views cover {} slots but the surface ring has {}",
                views.slot_count(),
                surface.buffer_count()
            )));
        }
        self.views = Some(views);

        // Move the depth buffer into its writable state before the first
        // frame. Submitted once and flushed so it has fully retired.
        let queue = self.queue.as_deref().ok_or_else(|| absent("queue"))?;
        let list = self.list.as_deref_mut().ok_or_else(|| absent("command list"))?;
        let fence = self.fence.as_deref_mut().ok_or_else(|| absent("fence"))?;
        list.transition_depth(depth, ResourceState::Common, ResourceState::DepthWrite)?;
        list.close()?;
        queue.submit(&*list, None)?;
        fence.flush(queue)?;

        self.viewport = Viewport::of_extent((width, height));
        self.scissor = ScissorRect::of_extent((width, height));
        log::info!("render context ready ({width}x{height})");
        Ok(())
    }

    /// Best-effort teardown; never fails. Restores windowed display mode
    /// first (surface resources must not be released in fullscreen), then
    /// drains the queue so nothing is released while the GPU references it.
    /// Safe after a partial `init`: every step checks its resource exists.
    pub fn uninit(&mut self) {
        log::info!("tearing down render context");
        if let Some(surface) = self.surface.as_deref_mut() {
            surface.restore_windowed();
        }
        if let (Some(fence), Some(queue)) = (self.fence.as_deref_mut(), self.queue.as_deref()) {
            if let Err(e) = fence.flush(queue) {
                log::warn!("queue flush during shutdown failed: {e}");
            }
        }
    }

    pub fn fence(&self) -> Option<&dyn Fence> {
        self.fence.as_deref()
    }

    pub fn surface(&self) -> Option<&dyn Surface> {
        self.surface.as_deref()
    }

    pub(crate) fn frame_parts(&mut self) -> RhiResult<FrameParts<'_>> {
        Ok(FrameParts {
            queue: self.queue.as_deref().ok_or_else(|| absent("queue"))?,
            fence: self.fence.as_deref_mut().ok_or_else(|| absent("fence"))?,
            list: self.list.as_deref_mut().ok_or_else(|| absent("command list"))?,
            surface: self.surface.as_deref_mut().ok_or_else(|| absent("surface"))?,
            views: self.views.as_deref().ok_or_else(|| absent("target views"))?,
            viewport: self.viewport,
            scissor: self.scissor,
            clear: self.config.clear,
        })
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("initialized", &self.views.is_some())
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}
