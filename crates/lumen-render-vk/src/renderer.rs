// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{RenderSettings, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use crate::context::DeviceContext;
use crate::error::Error;
use crate::frame::{run_frame, FrameRing, FrameSteps, FrameSync};
use crate::handles::{CommandBuffer, Pipeline, PipelineLayout, ShaderModule};
use crate::screen::{create_screen_targets, ScreenTargets};

const TRIANGLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv"));
const TRIANGLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv"));

fn extent_of(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

fn full_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn load_shader(
    device: &Arc<ash::Device>,
    path: Option<&std::path::Path>,
    builtin: &[u8],
) -> crate::Result<ShaderModule> {
    match path {
        Some(path) => ShaderModule::from_file(device, path),
        None => ShaderModule::from_bytes(device, builtin),
    }
}

/// Hard-coded triangle with dynamic viewport and scissor, so swapchain
/// recreation leaves it valid.
fn triangle_pipeline(
    device: &Arc<ash::Device>,
    render_pass: vk::RenderPass,
    settings: &RenderSettings,
) -> crate::Result<(PipelineLayout, Pipeline)> {
    let vert = load_shader(device, settings.vertex_shader.as_deref(), TRIANGLE_VERT)?;
    let frag = load_shader(device, settings.fragment_shader.as_deref(), TRIANGLE_FRAG)?;
    let layout = PipelineLayout::with_info(device, &vk::PipelineLayoutCreateInfo::default())?;

    let stages = [
        vert.stage_create_info(vk::ShaderStageFlags::VERTEX),
        frag.stage_create_info(vk::ShaderStageFlags::FRAGMENT),
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(layout.handle())
        .render_pass(render_pass)
        .subpass(0);
    let pipeline = Pipeline::graphics(device, &info)?;
    Ok((layout, pipeline))
}

/// Drives one window: acquire, record, submit, present.
///
/// Fields drop top to bottom, so everything created from the device goes
/// before `ctx`.
pub struct VkRenderer {
    frames: FrameRing<FrameSync>,
    pipeline: Pipeline,
    _layout: PipelineLayout,
    screen: ScreenTargets,
    device: Arc<ash::Device>,
    clear: [f32; 4],
    size: RenderSize,
    /// The current frame's graphics batch went in, so the acquire semaphore
    /// is consumed and `render_finished` is pending.
    graphics_submitted: bool,
    ctx: DeviceContext,
}

impl VkRenderer {
    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    fn record_frame(&self, frame: &FrameSync, image_index: u32) -> crate::Result<()> {
        let cmd = &frame.cmd;
        let screen = self.screen.get();
        let framebuffer = screen
            .framebuffer(image_index)
            .ok_or(Error::NotCreated("framebuffer"))?;
        let extent = self.ctx.swapchain().extent();
        let area = full_area(extent);
        let clear = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear,
            },
        }];

        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;
        screen.render_pass().cmd_begin(
            cmd,
            framebuffer.handle(),
            area,
            &clear,
            vk::SubpassContents::INLINE,
        )?;
        unsafe {
            let raw = cmd.handle();
            self.device
                .cmd_bind_pipeline(raw, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
            self.device.cmd_set_viewport(raw, 0, &[viewport(extent)]);
            self.device.cmd_set_scissor(raw, 0, &[area]);
            self.device.cmd_draw(raw, 3, 1, 0, 0);
        }
        screen.render_pass().cmd_end(cmd)?;
        self.ctx.cmd_transfer_image_ownership(cmd)?;
        cmd.end()?;

        if let Some(transfer) = &frame.ownership {
            transfer
                .cmd
                .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;
            self.ctx.cmd_transfer_image_ownership(&transfer.cmd)?;
            transfer.cmd.end()?;
        }
        Ok(())
    }

    /// Empty batch on the graphics queue that consumes whatever semaphore is
    /// still pending and signals the in-flight fence.
    fn drain_frame(&self, fence_reset: bool) -> crate::Result<()> {
        let frame = self.frames.current();
        if !fence_reset {
            frame.in_flight.reset()?;
        }
        let pending = if self.graphics_submitted {
            frame.render_finished.handle()
        } else {
            frame.image_available.handle()
        };
        self.ctx.submit_graphics(
            &CommandBuffer::default(),
            pending,
            vk::Semaphore::null(),
            frame.in_flight.handle(),
        )
    }
}

impl FrameSteps for VkRenderer {
    fn wait_in_flight(&mut self) -> crate::Result<()> {
        self.frames.current().in_flight.wait()
    }

    fn acquire(&mut self) -> crate::Result<Option<u32>> {
        self.graphics_submitted = false;
        let signal = self.frames.current().image_available.handle();
        self.ctx.acquire_next_image(signal)
    }

    fn record(&mut self, image_index: u32) -> crate::Result<()> {
        self.record_frame(self.frames.current(), image_index)
    }

    fn reset_in_flight(&mut self) -> crate::Result<()> {
        self.frames.current().in_flight.reset()
    }

    fn submit(&mut self) -> crate::Result<()> {
        let frame = self.frames.current();
        match &frame.ownership {
            Some(transfer) => {
                self.ctx.submit_graphics(
                    &frame.cmd,
                    frame.image_available.handle(),
                    frame.render_finished.handle(),
                    vk::Fence::null(),
                )?;
                self.graphics_submitted = true;
                self.ctx.submit_presentation(
                    &transfer.cmd,
                    frame.render_finished.handle(),
                    transfer.transferred.handle(),
                    frame.in_flight.handle(),
                )
            }
            None => self.ctx.submit_graphics(
                &frame.cmd,
                frame.image_available.handle(),
                frame.render_finished.handle(),
                frame.in_flight.handle(),
            ),
        }
    }

    fn present(&mut self) -> crate::Result<()> {
        let frame = self.frames.current();
        let wait = match &frame.ownership {
            Some(transfer) => transfer.transferred.handle(),
            None => frame.render_finished.handle(),
        };
        self.ctx.present_image(wait)
    }

    fn restore(&mut self, fence_reset: bool) -> crate::Result<()> {
        let Err(err) = self.drain_frame(fence_reset) else {
            return Ok(());
        };
        warn!(target: "renderer", "Frame sync could not be drained ({err}), replacing it");
        self.ctx.wait_idle()?;
        self.frames.current_mut().replace_sync(&self.device)
    }

    fn advance(&mut self) {
        self.frames.advance();
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let mut ctx = DeviceContext::new();
        ctx.use_latest_api_version()?;
        ctx.push_window_extensions(display)?;
        ctx.create_instance(vk::InstanceCreateFlags::empty())
            .context("create_instance")?;
        ctx.create_surface(display, window).context("create_surface")?;
        ctx.enumerate_physical_devices()?;
        ctx.select_physical_device(true, settings.compute_queue)?;
        ctx.push_device_extension(ash::khr::swapchain::NAME);
        ctx.create_device(vk::DeviceCreateFlags::empty())
            .context("create_device")?;

        ctx.set_window_extent(extent_of(settings.size));
        ctx.create_swapchain(
            settings.limit_frame_rate,
            vk::SwapchainCreateFlagsKHR::empty(),
        )
        .context("create_swapchain")?;

        let mut slot = None;
        let screen = create_screen_targets(&mut ctx, &mut slot)?;
        let device = Arc::clone(ctx.device()?.raw());
        let render_pass = screen.get().render_pass().handle();
        let (layout, pipeline) = triangle_pipeline(&device, render_pass, settings)?;

        let count = settings.frames_in_flight.max(1);
        let logical = ctx.device()?;
        let frames = (0..count)
            .map(|_| FrameSync::new(logical))
            .collect::<crate::Result<Vec<_>>>()?;

        let extent = ctx.swapchain().extent();
        info!(
            target: "renderer",
            "Vulkan renderer ready ({}x{}, {} frame(s) in flight)",
            extent.width,
            extent.height,
            count
        );
        Ok(Self {
            frames: FrameRing::new(frames),
            pipeline,
            _layout: layout,
            screen,
            device,
            clear: settings.clear_color,
            size: settings.size,
            graphics_submitted: false,
            ctx,
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        self.ctx.set_window_extent(extent_of(size));
        if size.is_empty() {
            return Ok(());
        }
        self.ctx.recreate_swapchain()?;
        Ok(())
    }

    fn render(&mut self) -> Result<bool> {
        if self.size.is_empty() {
            return Ok(false);
        }
        Ok(run_frame(self)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn set_vsync(&mut self, on: bool) {
        if let Err(err) = self.ctx.set_limit_frame_rate(on) {
            warn!(target: "renderer", "Failed to switch the present mode: {err}");
        }
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(err) = self.ctx.wait_idle() {
            warn!(target: "renderer", "Failed to wait for the device before teardown: {err}");
        }
    }
}
