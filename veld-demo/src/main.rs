//! Veld demo: opens an 800x600 window and clears it to the veld background
//! color every frame through the full device/fence/surface lifecycle.
//! Run: cargo run --bin veld-demo
//! Set VELD_VALIDATION=1 to enable the Vulkan validation layer.

use std::process::ExitCode;
use std::time::Duration;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus as WinitPumpStatus};
use winit::window::{Window, WindowId};

use veld_host::{EventPump, FrameRecorder, PumpStatus, RenderConfig, RenderContext};
use veld_rhi::VulkanDevice;

#[derive(Default)]
struct App {
    window: Option<Window>,
    /// Set when any window event arrived during the current pump.
    dispatched: bool,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::WindowAttributes::default()
            .with_title("Veld Demo")
            .with_inner_size(winit::dpi::PhysicalSize::new(800, 600))
            .with_resizable(false)
            // Shown only once the render context is ready, so the first
            // visible frame is already cleared.
            .with_visible(false);
        match event_loop.create_window(attrs) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                log::error!("window creation failed: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        self.dispatched = true;
        if let WindowEvent::CloseRequested = event {
            event_loop.exit();
        }
    }
}

/// Non-blocking drain of the winit queue: events first, render when idle.
struct WinitPump<'a> {
    event_loop: &'a mut EventLoop<()>,
    app: &'a mut App,
}

impl EventPump for WinitPump<'_> {
    fn pump(&mut self) -> PumpStatus {
        self.app.dispatched = false;
        match self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), self.app)
        {
            WinitPumpStatus::Exit(code) => PumpStatus::Quit(code),
            WinitPumpStatus::Continue if self.app.dispatched => PumpStatus::Dispatched,
            WinitPumpStatus::Continue => PumpStatus::Idle,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let mut event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("event loop creation failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut app = App::default();

    // Pump until `resumed` has produced the window.
    while app.window.is_none() {
        if let WinitPumpStatus::Exit(_) =
            event_loop.pump_app_events(Some(Duration::ZERO), &mut app)
        {
            return ExitCode::FAILURE;
        }
    }

    let device = {
        let window = match app.window.as_ref() {
            Some(window) => window,
            None => return ExitCode::FAILURE,
        };
        match VulkanDevice::new(window) {
            Ok(device) => device,
            Err(e) => {
                log::error!("device creation failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    let mut ctx = RenderContext::new(Box::new(device), RenderConfig::default());
    if let Err(e) = ctx.init() {
        log::error!("render context initialization failed: {e}");
        ctx.uninit();
        return ExitCode::FAILURE;
    }
    if let Some(window) = app.window.as_ref() {
        window.set_visible(true);
    }

    let mut recorder = FrameRecorder::new();
    let mut pump = WinitPump {
        event_loop: &mut event_loop,
        app: &mut app,
    };
    match veld_host::run(&mut ctx, &mut recorder, &mut pump) {
        Ok(code) => {
            log::info!("exited cleanly with code {code}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        Err(e) => {
            log::error!("render loop failed: {e}");
            ExitCode::FAILURE
        }
    }
}
