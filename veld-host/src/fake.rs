//! In-process fake backend for the host tests: records every operation the
//! lifecycle engine performs into a shared log instead of touching a GPU.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use veld_rhi::{
    ClearValues, CommandList, DepthFormat, DepthTarget, Device, Fence, Queue, ResourceState,
    RhiError, RhiResult, ScissorRect, Surface, SurfaceDescriptor, SurfaceFormat, TargetViews,
    Viewport,
};

/// One recorded command-list operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    TransitionColor {
        slot: u32,
        from: ResourceState,
        to: ResourceState,
    },
    TransitionDepth {
        from: ResourceState,
        to: ResourceState,
    },
    ClearPass {
        slot: u32,
    },
}

/// One queue submission: the list's recorded ops plus whether it was paired
/// with a present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub ops: Vec<Op>,
    pub for_present: bool,
}

/// The observable history of the fake GPU, shared by every fake resource.
#[derive(Debug, Default)]
pub struct GpuLog {
    pub completed: u64,
    pub submissions: Vec<Submission>,
    pub presents: u32,
    pub acquired: Vec<u32>,
    pub windowed_restored: bool,
    pub flush_waits: u32,
}

pub type SharedGpu = Rc<RefCell<GpuLog>>;

/// Fake device with per-resource failure injection.
#[derive(Debug, Default)]
pub struct FakeDevice {
    gpu: SharedGpu,
    pub fail_queue: bool,
    pub fail_surface: bool,
    /// Fail the Nth present (1-based), before the cursor advances.
    pub fail_present_at: Option<u32>,
    /// Report one target-view slot fewer than the surface ring has.
    pub short_views: bool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gpu(&self) -> SharedGpu {
        Rc::clone(&self.gpu)
    }
}

impl Device for FakeDevice {
    fn queue(&self) -> RhiResult<Box<dyn Queue>> {
        if self.fail_queue {
            return Err(RhiError::QueueCreation("injected".into()));
        }
        Ok(Box::new(FakeQueue {
            gpu: self.gpu(),
        }))
    }

    fn create_fence(&self) -> RhiResult<Box<dyn Fence>> {
        Ok(Box::new(FakeFence {
            gpu: self.gpu(),
            target: 0,
        }))
    }

    fn create_command_list(&self) -> RhiResult<Box<dyn CommandList>> {
        Ok(Box::new(FakeList {
            ops: Vec::new(),
            recording: true,
        }))
    }

    fn create_surface(&self, desc: &SurfaceDescriptor) -> RhiResult<Box<dyn Surface>> {
        if self.fail_surface {
            return Err(RhiError::ResourceCreation("injected".into()));
        }
        Ok(Box::new(FakeSurface {
            gpu: self.gpu(),
            extent: (desc.width, desc.height),
            count: desc.buffer_count,
            format: desc.format,
            cursor: 0,
            fail_present_at: self.fail_present_at,
        }))
    }

    fn create_depth_target(
        &self,
        width: u32,
        height: u32,
        format: DepthFormat,
    ) -> RhiResult<Box<dyn DepthTarget>> {
        Ok(Box::new(FakeDepth {
            extent: (width, height),
            format,
        }))
    }

    fn create_target_views(
        &self,
        surface: &dyn Surface,
        _depth: &dyn DepthTarget,
    ) -> RhiResult<Box<dyn TargetViews>> {
        let mut slots = surface.buffer_count();
        if self.short_views {
            slots -= 1;
        }
        Ok(Box::new(FakeViews { slots }))
    }
}

#[derive(Debug)]
struct FakeQueue {
    gpu: SharedGpu,
}

impl Queue for FakeQueue {
    fn submit(&self, list: &dyn CommandList, present_to: Option<&dyn Surface>) -> RhiResult<()> {
        let list = list
            .as_any()
            .downcast_ref::<FakeList>()
            .ok_or_else(|| RhiError::Submission("foreign command list".into()))?;
        if list.recording {
            return Err(RhiError::Submission("list not closed".into()));
        }
        self.gpu.borrow_mut().submissions.push(Submission {
            ops: list.ops.clone(),
            for_present: present_to.is_some(),
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct FakeFence {
    gpu: SharedGpu,
    target: u64,
}

impl Fence for FakeFence {
    fn target(&self) -> u64 {
        self.target
    }

    fn completed(&self) -> RhiResult<u64> {
        Ok(self.gpu.borrow().completed)
    }

    fn signal(&mut self, _queue: &dyn Queue) -> RhiResult<u64> {
        self.target += 1;
        Ok(self.target)
    }

    fn wait_until(&self, value: u64) -> RhiResult<()> {
        if value > self.target {
            return Err(RhiError::Sync(format!(
                "waiting for {value} but target is {}",
                self.target
            )));
        }
        let mut gpu = self.gpu.borrow_mut();
        if gpu.completed < value {
            // The fake GPU "catches up" instantly; count the real wait.
            gpu.completed = value;
            gpu.flush_waits += 1;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct FakeSurface {
    gpu: SharedGpu,
    extent: (u32, u32),
    count: u32,
    format: SurfaceFormat,
    cursor: u32,
    fail_present_at: Option<u32>,
}

impl Surface for FakeSurface {
    fn acquire_current_index(&mut self) -> RhiResult<u32> {
        self.gpu.borrow_mut().acquired.push(self.cursor);
        Ok(self.cursor)
    }

    fn present(&mut self, _queue: &dyn Queue) -> RhiResult<()> {
        let ordinal = self.gpu.borrow().presents + 1;
        if self.fail_present_at == Some(ordinal) {
            return Err(RhiError::Present("injected".into()));
        }
        self.gpu.borrow_mut().presents = ordinal;
        self.cursor = (self.cursor + 1) % self.count;
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn buffer_count(&self) -> u32 {
        self.count
    }

    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn restore_windowed(&mut self) {
        self.gpu.borrow_mut().windowed_restored = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct FakeDepth {
    extent: (u32, u32),
    format: DepthFormat,
}

impl DepthTarget for FakeDepth {
    fn format(&self) -> DepthFormat {
        self.format
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct FakeViews {
    slots: u32,
}

impl TargetViews for FakeViews {
    fn slot_count(&self) -> u32 {
        self.slots
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct FakeList {
    ops: Vec<Op>,
    recording: bool,
}

impl FakeList {
    fn record(&mut self, op: Op) -> RhiResult<()> {
        if !self.recording {
            return Err(RhiError::CommandRecording("list is closed".into()));
        }
        self.ops.push(op);
        Ok(())
    }
}

impl CommandList for FakeList {
    fn reset(&mut self) -> RhiResult<()> {
        self.ops.clear();
        self.recording = true;
        Ok(())
    }

    fn transition_color(
        &mut self,
        _surface: &dyn Surface,
        slot: u32,
        from: ResourceState,
        to: ResourceState,
    ) -> RhiResult<()> {
        self.record(Op::TransitionColor { slot, from, to })
    }

    fn transition_depth(
        &mut self,
        _depth: &dyn DepthTarget,
        from: ResourceState,
        to: ResourceState,
    ) -> RhiResult<()> {
        self.record(Op::TransitionDepth { from, to })
    }

    fn record_clear_pass(
        &mut self,
        _views: &dyn TargetViews,
        slot: u32,
        _clear: &ClearValues,
        _viewport: Viewport,
        _scissor: ScissorRect,
    ) -> RhiResult<()> {
        self.record(Op::ClearPass { slot })
    }

    fn close(&mut self) -> RhiResult<()> {
        if !self.recording {
            return Err(RhiError::CommandRecording("list already closed".into()));
        }
        self.recording = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_target_never_exceeds_waitable_range() {
        let device = FakeDevice::new();
        let queue = device.queue().unwrap();
        let mut fence = device.create_fence().unwrap();

        assert_eq!(fence.target(), 0);
        assert_eq!(fence.completed().unwrap(), 0);

        let v1 = fence.signal(&*queue).unwrap();
        let v2 = fence.signal(&*queue).unwrap();
        assert_eq!((v1, v2), (1, 2));
        assert!(fence.completed().unwrap() <= fence.target());

        // Waiting past the target is a protocol violation, not a hang.
        assert!(matches!(fence.wait_until(3), Err(RhiError::Sync(_))));
    }

    #[test]
    fn flush_brings_completed_up_to_target() {
        let device = FakeDevice::new();
        let gpu = device.gpu();
        let queue = device.queue().unwrap();
        let mut fence = device.create_fence().unwrap();

        fence.flush(&*queue).unwrap();
        fence.flush(&*queue).unwrap();

        assert_eq!(fence.target(), 2);
        assert_eq!(fence.completed().unwrap(), 2);
        assert_eq!(gpu.borrow().flush_waits, 2);
    }

    #[test]
    fn ring_cursor_cycles_with_period_n() {
        let device = FakeDevice::new();
        let queue = device.queue().unwrap();
        let mut surface = device
            .create_surface(&SurfaceDescriptor {
                width: 64,
                height: 64,
                buffer_count: 3,
                format: SurfaceFormat::Rgba8Unorm,
            })
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(surface.acquire_current_index().unwrap());
            surface.present(&*queue).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn submitting_an_open_list_is_rejected() {
        let device = FakeDevice::new();
        let queue = device.queue().unwrap();
        let list = device.create_command_list().unwrap();

        assert!(matches!(
            queue.submit(&*list, None),
            Err(RhiError::Submission(_))
        ));
    }
}
