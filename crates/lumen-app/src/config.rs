// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use lumen_platform::WindowSettings;
use lumen_render::{RenderSettings, RenderSize};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file
    #[arg(long, default_value = "lumen.toml")]
    pub config: PathBuf,
    /// Start in borderless fullscreen
    #[arg(long)]
    pub fullscreen: bool,
    /// Prefer mailbox presentation over FIFO
    #[arg(long)]
    pub uncapped: bool,
    /// Number of frames the CPU may record ahead of the GPU
    #[arg(long)]
    pub frames_in_flight: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let defaults = WindowSettings::default();
        Self {
            title: defaults.title,
            width: defaults.width,
            height: defaults.height,
            fullscreen: defaults.fullscreen,
            resizable: defaults.resizable,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub limit_frame_rate: bool,
    pub frames_in_flight: usize,
    pub compute_queue: bool,
    pub vertex_shader: Option<PathBuf>,
    pub fragment_shader: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let defaults = RenderSettings::default();
        Self {
            clear_color: defaults.clear_color,
            limit_frame_rate: defaults.limit_frame_rate,
            frames_in_flight: defaults.frames_in_flight,
            compute_queue: defaults.compute_queue,
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogCfg {
    pub filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub log: LogCfg,
}

impl AppCfg {
    /// Command line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if args.fullscreen {
            self.window.fullscreen = true;
        }
        if args.uncapped {
            self.render.limit_frame_rate = false;
        }
        if let Some(n) = args.frames_in_flight {
            self.render.frames_in_flight = n;
        }
    }

    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
            fullscreen: self.window.fullscreen,
            resizable: self.window.resizable,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            size: RenderSize::new(self.window.width, self.window.height),
            limit_frame_rate: self.render.limit_frame_rate,
            frames_in_flight: self.render.frames_in_flight.max(1),
            compute_queue: self.render.compute_queue,
            clear_color: self.render.clear_color,
            vertex_shader: self.render.vertex_shader.clone(),
            fragment_shader: self.render.fragment_shader.clone(),
        }
    }
}

pub fn parse(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Reads `path`. A missing file means defaults; an unreadable or malformed
/// one also means defaults, plus a message to log once logging is up.
pub fn load(path: &Path) -> (AppCfg, Option<String>) {
    match fs::read_to_string(path) {
        Ok(text) => match parse(&text) {
            Ok(cfg) => (cfg, None),
            Err(err) => (
                AppCfg::default(),
                Some(format!("Ignoring {}: {err}", path.display())),
            ),
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => (AppCfg::default(), None),
        Err(err) => (
            AppCfg::default(),
            Some(format!("Failed to read {}: {err}", path.display())),
        ),
    }
}
