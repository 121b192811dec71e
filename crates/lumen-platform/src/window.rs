// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Window, WindowAttributes};

#[derive(Clone, Debug)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub resizable: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "EasyVK".to_owned(),
            width: 1280,
            height: 720,
            fullscreen: false,
            resizable: true,
        }
    }
}

pub fn window_attributes(settings: &WindowSettings) -> WindowAttributes {
    let attrs = Window::default_attributes()
        .with_title(settings.title.clone())
        .with_inner_size(PhysicalSize::new(settings.width, settings.height))
        .with_resizable(settings.resizable);
    if settings.fullscreen {
        attrs.with_fullscreen(Some(Fullscreen::Borderless(None)))
    } else {
        attrs
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, settings: &WindowSettings) -> Result<Window> {
    let window = event_loop
        .create_window(window_attributes(settings))
        .context("create_window")?;
    let size = window.inner_size();
    info!(
        target: "window",
        "Window created: {}x{} (fullscreen={})",
        size.width, size.height, settings.fullscreen
    );
    Ok(window)
}

/// Borderless fullscreen on whichever monitor the window currently sits on.
pub fn make_fullscreen(window: &Window) {
    window.set_fullscreen(Some(Fullscreen::Borderless(window.current_monitor())));
}

pub fn make_windowed(window: &Window, position: PhysicalPosition<i32>, size: PhysicalSize<u32>) {
    window.set_fullscreen(None);
    window.set_outer_position(position);
    let _ = window.request_inner_size(size);
}

pub fn is_minimized(window: &Window) -> bool {
    let size = window.inner_size();
    window.is_minimized().unwrap_or(false) || size.width == 0 || size.height == 0
}

/// Writes the frame rate into the window title about once per second.
#[derive(Debug)]
pub struct TitleFps {
    base: String,
    frames: u32,
    since: Instant,
}

impl TitleFps {
    pub fn new(base: impl Into<String>) -> Self {
        Self::starting_at(base, Instant::now())
    }

    fn starting_at(base: impl Into<String>, now: Instant) -> Self {
        Self {
            base: base.into(),
            frames: 0,
            since: now,
        }
    }

    /// Count one presented frame and refresh the title when a second has passed.
    pub fn frame(&mut self, window: &Window) {
        if let Some(fps) = self.tick(Instant::now()) {
            window.set_title(&self.title(fps));
        }
    }

    fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.frames = 0;
        self.since = now;
        Some(fps)
    }

    fn title(&self, fps: f64) -> String {
        format!("{}    {:.1} FPS", self.base, fps)
    }
}
