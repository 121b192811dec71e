// SPDX-License-Identifier: CEPL-1.0
//! Render pass drawing straight into the swapchain images, with one
//! framebuffer per image view kept in step through the context callbacks.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::context::DeviceContext;
use crate::error::{Error, Result};
use crate::handles::{Framebuffer, RenderPass};
use crate::swapchain::Swapchain;

#[derive(Default)]
pub struct RenderPassWithFramebuffers {
    device: Option<Arc<ash::Device>>,
    format: vk::Format,
    render_pass: RenderPass,
    framebuffers: Vec<Framebuffer>,
}

impl RenderPassWithFramebuffers {
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn framebuffers(&self) -> &[Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<&Framebuffer> {
        self.framebuffers.get(image_index as usize)
    }

    /// Swapchain images went away; the render pass stays.
    fn release_framebuffers(&mut self) {
        self.framebuffers.clear();
    }

    /// The device is going away; nothing may outlive it.
    fn release_all(&mut self) {
        self.framebuffers.clear();
        self.render_pass = RenderPass::default();
        self.device = None;
    }

    fn rebuild(&mut self, swapchain: &Swapchain) -> Result<()> {
        let device = self.device.clone().ok_or(Error::NotCreated("device"))?;
        self.framebuffers.clear();
        if self.render_pass.is_null() || self.format != swapchain.format() {
            self.render_pass = screen_render_pass(&device, swapchain.format())?;
            self.format = swapchain.format();
        }
        let extent = swapchain.extent();
        let mut framebuffers = Vec::with_capacity(swapchain.image_views().len());
        for view in swapchain.image_views() {
            let attachments = [*view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            framebuffers.push(Framebuffer::with_info(&device, &info)?);
        }
        self.framebuffers = framebuffers;
        debug!(
            target: "render_pass",
            "Screen framebuffers rebuilt: {} at {}x{}",
            self.framebuffers.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }
}

impl fmt::Debug for RenderPassWithFramebuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPassWithFramebuffers")
            .field("format", &self.format)
            .field("render_pass", &self.render_pass)
            .field("framebuffers", &self.framebuffers)
            .finish()
    }
}

/// Shared handle to the screen targets; the context callbacks hold clones.
#[derive(Clone, Debug)]
pub struct ScreenTargets(Rc<RefCell<RenderPassWithFramebuffers>>);

impl ScreenTargets {
    pub fn get(&self) -> Ref<'_, RenderPassWithFramebuffers> {
        self.0.borrow()
    }
}

fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dependency_flags(vk::DependencyFlags::BY_REGION)
}

fn screen_render_pass(device: &Arc<ash::Device>, format: vk::Format) -> Result<RenderPass> {
    let attachments = [color_attachment(format)];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    let dependencies = [external_dependency()];
    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    RenderPass::with_info(device, &info)
}

/// Builds the screen render pass and framebuffers once and hooks them to the
/// swapchain and device lifecycles. Later calls warn and hand back `slot`.
pub fn create_screen_targets(
    ctx: &mut DeviceContext,
    slot: &mut Option<ScreenTargets>,
) -> Result<ScreenTargets> {
    if let Some(existing) = slot {
        warn!(
            target: "render_pass",
            "Screen targets already exist, create_screen_targets() was ignored!"
        );
        return Ok(existing.clone());
    }

    let device = Arc::clone(ctx.device()?.raw());
    let mut targets = RenderPassWithFramebuffers {
        device: Some(device),
        ..Default::default()
    };
    targets.rebuild(ctx.swapchain())?;
    let shared = Rc::new(RefCell::new(targets));

    let on_create = Rc::clone(&shared);
    ctx.on_swapchain_create(move |swapchain| on_create.borrow_mut().rebuild(swapchain));
    let on_destroy = Rc::clone(&shared);
    ctx.on_swapchain_destroy(move |_| {
        on_destroy.borrow_mut().release_framebuffers();
        Ok(())
    });
    let on_device_create = Rc::clone(&shared);
    ctx.on_device_create(move |device| {
        on_device_create.borrow_mut().device = Some(Arc::clone(device.raw()));
        Ok(())
    });
    let on_device_destroy = Rc::clone(&shared);
    ctx.on_device_destroy(move |_| {
        on_device_destroy.borrow_mut().release_all();
        Ok(())
    });

    let targets = ScreenTargets(shared);
    *slot = Some(targets.clone());
    Ok(targets)
}
