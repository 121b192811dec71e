// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized client area.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Everything a renderer needs at construction time.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub size: RenderSize,
    /// FIFO when true; mailbox is only considered when false.
    pub limit_frame_rate: bool,
    pub frames_in_flight: usize,
    pub compute_queue: bool,
    pub clear_color: [f32; 4],
    /// Precompiled SPIR-V overriding the built-in triangle shaders.
    pub vertex_shader: Option<PathBuf>,
    pub fragment_shader: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            size: RenderSize::new(1280, 720),
            limit_frame_rate: true,
            frames_in_flight: 1,
            compute_queue: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    /// Draws and presents one frame. Returns `Ok(false)` when the frame was
    /// skipped because there was nothing to present to.
    fn render(&mut self) -> Result<bool>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}
