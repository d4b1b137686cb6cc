//! Host configuration: surface size, ring length, clear values, formats.

use veld_rhi::{ClearValues, DepthFormat, SurfaceFormat};

#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Presentation ring length N. Double buffering by default.
    pub buffer_count: u32,
    pub format: SurfaceFormat,
    pub depth_format: DepthFormat,
    /// Per-frame clear values for the render target and depth-stencil view.
    pub clear: ClearValues,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            buffer_count: 2,
            format: SurfaceFormat::Rgba8Unorm,
            depth_format: DepthFormat::D24UnormS8,
            clear: ClearValues {
                color: [0.0, 0.117_647_06, 0.149_019_61, 1.0],
                depth: 1.0,
                stencil: 0,
            },
        }
    }
}
