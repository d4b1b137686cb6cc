//! Veld RHI: the hardware interface of the veld rendering host.
//!
//! Defines the traits and types the frame lifecycle engine drives: a device
//! with one direct queue, a monotonic timeline fence, a presentation surface
//! (ring of color buffers), a depth target, slot-indexed target views, and a
//! resettable command list. The Vulkan backend lives behind the `vulkan`
//! cargo feature; tests inject their own implementations.

use std::any::Any;
use std::fmt::Debug;

use thiserror::Error;

/// GPU failures are unrecoverable at this layer: every variant is propagated
/// to the lifecycle controller, which tears down best-effort and exits.
#[derive(Debug, Error)]
pub enum RhiError {
    #[error("device creation failed: {0}")]
    DeviceCreation(String),
    #[error("queue creation failed: {0}")]
    QueueCreation(String),
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    #[error("command recording failed: {0}")]
    CommandRecording(String),
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("present failed: {0}")]
    Present(String),
    #[error("synchronization failed: {0}")]
    Sync(String),
}

pub type RhiResult<T> = Result<T, RhiError>;

/// Authoritative usage state of a GPU resource. Every use that differs from
/// the state declared by the most recent transition recorded against the
/// resource is undefined behavior in the underlying GPU contract, so the
/// host transitions explicitly on every differing use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Freshly created, no declared use yet.
    Common,
    /// Owned by the presentation engine.
    Present,
    /// Color attachment being rendered into.
    RenderTarget,
    /// Depth/stencil attachment with writes enabled.
    DepthWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthFormat {
    /// 24-bit depth + 8-bit stencil. Not universal on Vulkan; prefer
    /// `D32FloatS8` where it is unsupported.
    #[default]
    D24UnormS8,
    D32FloatS8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with the standard [0, 1] depth range.
    pub fn of_extent(extent: (u32, u32)) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.0 as f32,
            height: extent.1 as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn of_extent(extent: (u32, u32)) -> Self {
        Self {
            left: 0,
            top: 0,
            right: extent.0 as i32,
            bottom: extent.1 as i32,
        }
    }
}

/// Clear values for one frame: background color, depth, stencil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SurfaceDescriptor {
    pub width: u32,
    pub height: u32,
    /// Ring length N. The host renders into slot i and presents it while the
    /// engine displays slot (i + N - 1) mod N.
    pub buffer_count: u32,
    pub format: SurfaceFormat,
}

/// The logical GPU device. Owns nothing per-frame; created once, destroyed
/// after all work referencing it has retired. Absence of a suitable adapter
/// is fatal to the process, so there is no enumeration or fallback here.
pub trait Device: Debug {
    /// The single direct (graphics-capable) submission queue.
    fn queue(&self) -> RhiResult<Box<dyn Queue>>;
    fn create_fence(&self) -> RhiResult<Box<dyn Fence>>;
    /// A fresh command list in the recording state, backed by its own
    /// allocator. `CommandList::reset` recycles both.
    fn create_command_list(&self) -> RhiResult<Box<dyn CommandList>>;
    fn create_surface(&self, desc: &SurfaceDescriptor) -> RhiResult<Box<dyn Surface>>;
    fn create_depth_target(
        &self,
        width: u32,
        height: u32,
        format: DepthFormat,
    ) -> RhiResult<Box<dyn DepthTarget>>;
    /// Slot-indexed render-target views plus the shared depth-stencil view,
    /// sized to the surface's ring at creation.
    fn create_target_views(
        &self,
        surface: &dyn Surface,
        depth: &dyn DepthTarget,
    ) -> RhiResult<Box<dyn TargetViews>>;
}

/// Ordered FIFO submission channel. All lists submitted to one queue execute
/// in submission order on the GPU; the host relies on this so a single fence
/// with a strictly increasing target is enough synchronization.
pub trait Queue: Debug {
    /// Submit one closed command list. With `present_to`, the submission
    /// also signals the surface's render-finished primitive so the following
    /// `Surface::present` orders correctly after rendering.
    fn submit(&self, list: &dyn CommandList, present_to: Option<&dyn Surface>) -> RhiResult<()>;
    fn as_any(&self) -> &dyn Any;
}

/// Monotonic CPU/GPU fence: `target` is the last value the CPU requested,
/// `completed` the last value the GPU reached. `completed <= target` always.
///
/// One fence value per presented frame (single frame in flight). A pipelined
/// variant would keep one target per buffer slot and wait only for the
/// oldest in-flight slot; that is a throughput extension, not required for
/// correctness here.
pub trait Fence: Debug {
    fn target(&self) -> u64;
    fn completed(&self) -> RhiResult<u64>;
    /// Increment the target and ask the queue to signal it once all
    /// previously submitted work completes. Returns the new target.
    fn signal(&mut self, queue: &dyn Queue) -> RhiResult<u64>;
    /// Block the calling thread until `completed() >= value`. Must suspend
    /// on an OS wait primitive, never busy-poll.
    fn wait_until(&self, value: u64) -> RhiResult<()>;
    /// Drain the queue: wait until everything submitted so far has retired.
    fn flush(&mut self, queue: &dyn Queue) -> RhiResult<()> {
        let target = self.signal(queue)?;
        self.wait_until(target)
    }
}

/// The swap surface: a ring of `buffer_count` equivalent color buffers and a
/// cursor that advances once per successful present.
pub trait Surface: Debug {
    /// The ring slot to render into next: the slot following the last
    /// presented one. No GPU-side acquire synchronization is needed because
    /// the flush-per-frame protocol already guarantees availability.
    fn acquire_current_index(&mut self) -> RhiResult<u32>;
    /// Display the buffer most recently transitioned back to the present
    /// state, then advance the cursor. Failure (device removed) is fatal.
    fn present(&mut self, queue: &dyn Queue) -> RhiResult<()>;
    fn extent(&self) -> (u32, u32);
    fn buffer_count(&self) -> u32;
    fn format(&self) -> SurfaceFormat;
    /// Force windowed display mode. Best-effort and infallible: called
    /// during teardown before surface resources are released, because the
    /// presentation contract forbids releasing them in exclusive fullscreen.
    fn restore_windowed(&mut self);
    fn as_any(&self) -> &dyn Any;
}

/// One depth/stencil image sized to the surface. Created in `Common` state
/// and transitioned once to `DepthWrite` before the first frame; never
/// resized in this host.
pub trait DepthTarget: Debug {
    fn format(&self) -> DepthFormat;
    fn extent(&self) -> (u32, u32);
    fn as_any(&self) -> &dyn Any;
}

/// Slot-indexed descriptor storage: render-target view i for color buffer i,
/// plus the single shared depth-stencil view. Pure creation-time mapping
/// from resource to GPU-readable metadata; no mutable state.
pub trait TargetViews: Debug {
    fn slot_count(&self) -> u32;
    fn as_any(&self) -> &dyn Any;
}

/// Recording unit: reusable allocator + recording handle. The allocator must
/// not be reset while the GPU may still execute lists allocated from it;
/// the fence flush after every present is what guarantees that.
///
/// Lifecycle per frame: `reset` → record → `close` → `Queue::submit`.
/// A closed list cannot be re-recorded without a reset.
pub trait CommandList: Debug {
    fn reset(&mut self) -> RhiResult<()>;
    /// Declare a state change of color buffer `slot` of the surface.
    fn transition_color(
        &mut self,
        surface: &dyn Surface,
        slot: u32,
        from: ResourceState,
        to: ResourceState,
    ) -> RhiResult<()>;
    /// Declare a state change of the depth target.
    fn transition_depth(
        &mut self,
        depth: &dyn DepthTarget,
        from: ResourceState,
        to: ResourceState,
    ) -> RhiResult<()>;
    /// Clear slot `slot`'s render target and the depth-stencil view, set the
    /// viewport and scissor, and bind the slot's targets for output.
    fn record_clear_pass(
        &mut self,
        views: &dyn TargetViews,
        slot: u32,
        clear: &ClearValues,
        viewport: Viewport,
        scissor: ScissorRect,
    ) -> RhiResult<()>;
    fn close(&mut self) -> RhiResult<()>;
    fn as_any(&self) -> &dyn Any;
}

#[cfg(feature = "vulkan")]
pub mod vulkan;

#[cfg(feature = "vulkan")]
pub use vulkan::VulkanDevice;
