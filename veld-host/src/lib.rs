//! Veld host: the frame lifecycle and CPU/GPU synchronization engine.
//!
//! Drives the `veld-rhi` traits through one frame after another: acquire the
//! live buffer slot, record the clear + transitions, submit, present, then
//! flush the fence so the allocator is safe to reuse. Single frame in
//! flight, single thread of control; the only concurrency is the CPU↔GPU
//! relationship, mediated entirely by the fence.

pub mod config;
pub mod context;
pub mod frame;
pub mod schedule;

#[cfg(test)]
pub(crate) mod fake;

pub use config::RenderConfig;
pub use context::RenderContext;
pub use frame::{FrameRecorder, FrameState};
pub use schedule::{run, EventPump, PumpStatus};
