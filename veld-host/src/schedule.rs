//! The run loop: drain platform events first, render only when idle.
//!
//! The host does not own a windowing stack; it asks an [`EventPump`] whether
//! anything is pending and renders a frame only when the answer is "nothing".
//! Teardown runs on every exit path, error or not.

use veld_rhi::RhiResult;

use crate::context::RenderContext;
use crate::frame::FrameRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// One or more events were dispatched; poll again before rendering.
    Dispatched,
    /// Nothing pending; the loop may render a frame.
    Idle,
    /// The platform asked us to stop, with its exit code.
    Quit(i32),
}

/// Non-blocking bridge to whatever owns the window's event queue.
pub trait EventPump {
    fn pump(&mut self) -> PumpStatus;
}

/// Drive the loop until the pump reports quit or a frame fails, then tear
/// the context down. Returns the platform exit code on a clean quit.
pub fn run(
    ctx: &mut RenderContext,
    recorder: &mut FrameRecorder,
    pump: &mut dyn EventPump,
) -> RhiResult<i32> {
    let result = drive(ctx, recorder, pump);
    ctx.uninit();
    result
}

fn drive(
    ctx: &mut RenderContext,
    recorder: &mut FrameRecorder,
    pump: &mut dyn EventPump,
) -> RhiResult<i32> {
    loop {
        match pump.pump() {
            PumpStatus::Dispatched => continue,
            PumpStatus::Idle => recorder.render_frame(ctx)?,
            PumpStatus::Quit(code) => {
                log::info!(
                    "quit requested after {} frames (code {code})",
                    recorder.frames_retired()
                );
                return Ok(code);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::fake::{FakeDevice, SharedGpu};
    use veld_rhi::RhiError;

    /// Replays a fixed pump script, then quits with code 0.
    struct ScriptPump {
        script: Vec<PumpStatus>,
        at: usize,
    }

    impl ScriptPump {
        fn new(script: Vec<PumpStatus>) -> Self {
            Self { script, at: 0 }
        }
    }

    impl EventPump for ScriptPump {
        fn pump(&mut self) -> PumpStatus {
            let status = self
                .script
                .get(self.at)
                .copied()
                .unwrap_or(PumpStatus::Quit(0));
            self.at += 1;
            status
        }
    }

    fn ready_context(device: FakeDevice) -> (RenderContext, SharedGpu) {
        let gpu = device.gpu();
        let mut ctx = RenderContext::new(Box::new(device), RenderConfig::default());
        ctx.init().unwrap();
        (ctx, gpu)
    }

    #[test]
    fn idle_pumps_render_one_frame_each() {
        let (mut ctx, gpu) = ready_context(FakeDevice::new());
        let mut recorder = FrameRecorder::new();
        let mut pump = ScriptPump::new(vec![PumpStatus::Idle; 5]);

        let code = run(&mut ctx, &mut recorder, &mut pump).unwrap();

        assert_eq!(code, 0);
        assert_eq!(recorder.frames_retired(), 5);
        let log = gpu.borrow();
        assert_eq!(log.acquired, vec![0, 1, 0, 1, 0]);
        assert_eq!(log.presents, 5);
        drop(log);
        // init flush + 5 frame flushes + shutdown flush.
        assert_eq!(ctx.fence().unwrap().target(), 7);
    }

    #[test]
    fn dispatched_events_defer_rendering() {
        let (mut ctx, gpu) = ready_context(FakeDevice::new());
        let mut recorder = FrameRecorder::new();
        let mut pump = ScriptPump::new(vec![
            PumpStatus::Dispatched,
            PumpStatus::Dispatched,
            PumpStatus::Idle,
            PumpStatus::Quit(7),
        ]);

        let code = run(&mut ctx, &mut recorder, &mut pump).unwrap();

        assert_eq!(code, 7);
        assert_eq!(recorder.frames_retired(), 1);
        assert_eq!(gpu.borrow().presents, 1);
    }

    #[test]
    fn present_failure_still_tears_down() {
        let mut device = FakeDevice::new();
        device.fail_present_at = Some(3);
        let (mut ctx, gpu) = ready_context(device);
        let mut recorder = FrameRecorder::new();
        let mut pump = ScriptPump::new(vec![PumpStatus::Idle; 10]);

        let err = run(&mut ctx, &mut recorder, &mut pump).unwrap_err();

        assert!(matches!(err, RhiError::Present(_)));
        let log = gpu.borrow();
        // Third acquire happened, third present did not.
        assert_eq!(log.acquired, vec![0, 1, 0]);
        assert_eq!(log.presents, 2);
        // Teardown ran: windowed restore plus the shutdown drain.
        assert!(log.windowed_restored);
        assert_eq!(log.flush_waits, 4);
        drop(log);
        // init + 2 retired frames + shutdown signal.
        assert_eq!(ctx.fence().unwrap().target(), 4);
    }

    #[test]
    fn quit_before_any_frame_still_tears_down() {
        let (mut ctx, gpu) = ready_context(FakeDevice::new());
        let mut recorder = FrameRecorder::new();
        let mut pump = ScriptPump::new(vec![PumpStatus::Quit(0)]);

        let code = run(&mut ctx, &mut recorder, &mut pump).unwrap();

        assert_eq!(code, 0);
        assert_eq!(recorder.frames_retired(), 0);
        let log = gpu.borrow();
        assert!(log.windowed_restored);
        assert_eq!(log.presents, 0);
    }
}
