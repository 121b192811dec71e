// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue. The rest of the workspace reaches winit through the
//! re-export here so there is exactly one winit version in play.

pub use winit;

mod window;

pub use window::{
    create_window, is_minimized, make_fullscreen, make_windowed, window_attributes, TitleFps,
    WindowSettings,
};
