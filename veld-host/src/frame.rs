//! The frame recorder: one cleared, depth-tested frame per call.
//!
//! Per-frame state machine: `Idle → Recording → Submitted → Retired → Idle`.
//! `Retired` is reached only after the fence flush confirms the GPU has
//! fully executed the submission, which is what makes the next frame's
//! allocator reset legal.

use veld_rhi::{ResourceState, RhiResult};

use crate::context::RenderContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
    Retired,
}

#[derive(Debug)]
pub struct FrameRecorder {
    state: FrameState,
    frames_retired: u64,
}

impl Default for FrameRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            frames_retired: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_retired(&self) -> u64 {
        self.frames_retired
    }

    /// Record, submit and present one frame, then block until it retires.
    /// Any GPU-level failure is fatal: the error is propagated and the
    /// recorder is left mid-state for the lifecycle layer to tear down.
    pub fn render_frame(&mut self, ctx: &mut RenderContext) -> RhiResult<()> {
        debug_assert_eq!(self.state, FrameState::Idle);
        let parts = ctx.frame_parts()?;
        let (queue, fence, list, surface) = (parts.queue, parts.fence, parts.list, parts.surface);

        let slot = surface.acquire_current_index()?;

        // The previous frame was flushed to retirement, so the allocator is
        // free for reuse.
        list.reset()?;
        self.state = FrameState::Recording;

        list.transition_color(
            &*surface,
            slot,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;
        list.record_clear_pass(parts.views, slot, &parts.clear, parts.viewport, parts.scissor)?;
        list.transition_color(
            &*surface,
            slot,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;
        list.close()?;

        queue.submit(&*list, Some(&*surface))?;
        self.state = FrameState::Submitted;

        surface.present(queue)?;
        fence.flush(queue)?;
        self.state = FrameState::Retired;
        self.frames_retired += 1;
        log::trace!(
            "frame {} retired, fence target {}",
            self.frames_retired,
            fence.target()
        );

        self.state = FrameState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::fake::{FakeDevice, Op};

    fn ready_context() -> (RenderContext, crate::fake::SharedGpu) {
        let device = FakeDevice::new();
        let gpu = device.gpu();
        let mut ctx = RenderContext::new(Box::new(device), RenderConfig::default());
        ctx.init().unwrap();
        (ctx, gpu)
    }

    #[test]
    fn one_frame_records_the_contracted_sequence() {
        let (mut ctx, gpu) = ready_context();
        let mut recorder = FrameRecorder::new();
        recorder.render_frame(&mut ctx).unwrap();

        assert_eq!(recorder.state(), FrameState::Idle);
        assert_eq!(recorder.frames_retired(), 1);
        // Fence: one init flush + one per-frame flush.
        assert_eq!(ctx.fence().unwrap().target(), 2);

        let log = gpu.borrow();
        let frame = log.submissions.last().unwrap();
        assert!(frame.for_present);
        assert_eq!(
            frame.ops,
            vec![
                Op::TransitionColor {
                    slot: 0,
                    from: ResourceState::Present,
                    to: ResourceState::RenderTarget,
                },
                Op::ClearPass { slot: 0 },
                Op::TransitionColor {
                    slot: 0,
                    from: ResourceState::RenderTarget,
                    to: ResourceState::Present,
                },
            ]
        );
    }

    #[test]
    fn every_frame_pairs_its_transitions() {
        let (mut ctx, gpu) = ready_context();
        let mut recorder = FrameRecorder::new();
        for _ in 0..4 {
            recorder.render_frame(&mut ctx).unwrap();
        }

        let log = gpu.borrow();
        for frame in log.submissions.iter().filter(|s| s.for_present) {
            let transitions: Vec<_> = frame
                .ops
                .iter()
                .filter(|op| matches!(op, Op::TransitionColor { .. }))
                .collect();
            assert_eq!(transitions.len(), 2);
            assert!(matches!(
                transitions[0],
                Op::TransitionColor {
                    from: ResourceState::Present,
                    to: ResourceState::RenderTarget,
                    ..
                }
            ));
            assert!(matches!(
                transitions[1],
                Op::TransitionColor {
                    from: ResourceState::RenderTarget,
                    to: ResourceState::Present,
                    ..
                }
            ));
        }
    }

    #[test]
    fn frames_walk_the_buffer_ring_in_order() {
        let (mut ctx, gpu) = ready_context();
        let mut recorder = FrameRecorder::new();
        for _ in 0..3 {
            recorder.render_frame(&mut ctx).unwrap();
        }

        let log = gpu.borrow();
        assert_eq!(log.acquired, vec![0, 1, 0]);
        assert_eq!(log.presents, 3);
    }
}
