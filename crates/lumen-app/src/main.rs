// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use lumen_core::init_tracing;
use lumen_platform::winit::{
    application::ApplicationHandler,
    dpi::{PhysicalPosition, PhysicalSize},
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};
use lumen_platform::{
    create_window, is_minimized, make_fullscreen, make_windowed, TitleFps, WindowSettings,
};
use lumen_render::{RenderSettings, RenderSize, Renderer};
use lumen_render_vk::VkRenderer;
use tracing::{error, info, warn};

mod config;

use config::{AppCfg, Args};

struct App<R: Renderer> {
    window_settings: WindowSettings,
    render_settings: RenderSettings,
    // renderer before window: it must drop first
    renderer: Option<R>,
    window: Option<Window>,
    fps: TitleFps,
    windowed: Option<(PhysicalPosition<i32>, PhysicalSize<u32>)>,
    minimized: bool,
    init_failed: bool,
}

impl<R: Renderer> App<R> {
    fn new(cfg: &AppCfg) -> Self {
        let window_settings = cfg.window_settings();
        Self {
            fps: TitleFps::new(window_settings.title.clone()),
            window_settings,
            render_settings: cfg.render_settings(),
            renderer: None,
            window: None,
            windowed: None,
            minimized: false,
            init_failed: false,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, &self.window_settings)?;
        let size = window.inner_size();
        self.render_settings.size = RenderSize::new(size.width, size.height);
        let renderer = R::new(&window, &window, &self.render_settings)?;
        self.minimized = is_minimized(&window);
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };
        if window.fullscreen().is_some() {
            let (position, size) = self.windowed.take().unwrap_or((
                PhysicalPosition::new(0, 0),
                PhysicalSize::new(self.window_settings.width, self.window_settings.height),
            ));
            make_windowed(window, position, size);
            info!(target: "app", "Windowed {}x{}", size.width, size.height);
        } else {
            let position = window.outer_position().unwrap_or_default();
            self.windowed = Some((position, window.inner_size()));
            make_fullscreen(window);
            info!(target: "app", "Fullscreen");
        }
    }

    fn shut_down(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl<R: Renderer> ApplicationHandler for App<R> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(err) = self.init(event_loop) {
                error!(target: "app", "Initialization failed: {err:#}");
                self.init_failed = true;
                self.shut_down(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(if self.render_settings.limit_frame_rate {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!(target: "app", "CloseRequested");
                self.shut_down(event_loop);
            }

            WindowEvent::Resized(size) => {
                self.minimized = size.width == 0 || size.height == 0;
                if let Some(renderer) = &mut self.renderer {
                    if let Err(err) = renderer.resize(RenderSize::new(size.width, size.height)) {
                        error!(target: "app", "Resize failed: {err:#}");
                    }
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::F11),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.toggle_fullscreen(),

            WindowEvent::RedrawRequested => {
                if self.minimized {
                    return;
                }
                let (Some(renderer), Some(window)) = (&mut self.renderer, &self.window) else {
                    return;
                };
                match renderer.render() {
                    Ok(true) => self.fps.frame(window),
                    Ok(false) => {}
                    Err(err) => error!(target: "app", "Frame skipped: {err:#}"),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.minimized {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn run(cfg: &AppCfg) -> Result<bool> {
    let event_loop = EventLoop::new()?;
    let mut app = App::<VkRenderer>::new(cfg);
    event_loop.run_app(&mut app)?;
    Ok(!app.init_failed)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let (mut cfg, problem) = config::load(&args.config);
    cfg.apply_args(&args);
    init_tracing(&cfg.log.filter);
    if let Some(problem) = problem {
        warn!(target: "config", "{problem}");
    }

    match run(&cfg) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(target: "app", "{err:#}");
            ExitCode::FAILURE
        }
    }
}
