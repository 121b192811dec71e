// SPDX-License-Identifier: CEPL-1.0
//! Owning wrappers for the leaf Vulkan objects.
//!
//! Every wrapper holds one handle and a shared reference to the device that
//! created it. A default wrapper is null and dropping it does nothing, so a
//! half-built struct can always be dropped. Moving is plain Rust ownership;
//! `take()` hands the handle over and leaves a null wrapper behind.

use std::ffi::CStr;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use tracing::error;

use crate::error::{vk_check, Error, Result};
use crate::status::VkStatus;

/// Entry point name used for every shader stage.
pub const SHADER_ENTRY: &CStr = c"main";

pub trait DeviceHandle: vk::Handle + Copy + Default + PartialEq + fmt::Debug {
    /// Used in diagnostics.
    const KIND: &'static str;

    /// # Safety
    /// `self` was created from `device` and no pending GPU work uses it.
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_handle {
    ($ty:ty, $kind:literal, $destroy:ident) => {
        impl DeviceHandle for $ty {
            const KIND: &'static str = $kind;

            unsafe fn destroy(self, device: &ash::Device) {
                unsafe { device.$destroy(self, None) }
            }
        }
    };
}

device_handle!(vk::Semaphore, "semaphore", destroy_semaphore);
device_handle!(vk::Fence, "fence", destroy_fence);
device_handle!(vk::ShaderModule, "shader module", destroy_shader_module);
device_handle!(vk::PipelineLayout, "pipeline layout", destroy_pipeline_layout);
device_handle!(vk::Pipeline, "pipeline", destroy_pipeline);
device_handle!(vk::RenderPass, "render pass", destroy_render_pass);
device_handle!(vk::Framebuffer, "framebuffer", destroy_framebuffer);
device_handle!(vk::CommandPool, "command pool", destroy_command_pool);

pub struct Owned<H: DeviceHandle> {
    handle: H,
    device: Option<Arc<ash::Device>>,
}

pub type Semaphore = Owned<vk::Semaphore>;
pub type Fence = Owned<vk::Fence>;
pub type ShaderModule = Owned<vk::ShaderModule>;
pub type PipelineLayout = Owned<vk::PipelineLayout>;
pub type Pipeline = Owned<vk::Pipeline>;
pub type RenderPass = Owned<vk::RenderPass>;
pub type Framebuffer = Owned<vk::Framebuffer>;
pub type CommandPool = Owned<vk::CommandPool>;

impl<H: DeviceHandle> Default for Owned<H> {
    fn default() -> Self {
        Self {
            handle: H::default(),
            device: None,
        }
    }
}

impl<H: DeviceHandle> Owned<H> {
    fn adopt(device: &Arc<ash::Device>, handle: H) -> Self {
        Self {
            handle,
            device: Some(Arc::clone(device)),
        }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    /// For APIs that want a pointer to the handle, e.g. `std::slice::from_ref(x.address())`.
    pub fn address(&self) -> &H {
        &self.handle
    }

    pub fn is_null(&self) -> bool {
        self.handle == H::default()
    }

    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    fn live(&self) -> Result<&Arc<ash::Device>> {
        match &self.device {
            Some(device) if !self.is_null() => Ok(device),
            _ => Err(Error::NotCreated(H::KIND)),
        }
    }
}

impl<H: DeviceHandle> Drop for Owned<H> {
    fn drop(&mut self) {
        if self.is_null() {
            return;
        }
        if let Some(device) = self.device.take() {
            // SAFETY: the handle came from this device; owners drop wrappers
            // only after the GPU is done with them.
            unsafe { self.handle.destroy(&device) };
        }
    }
}

impl<H: DeviceHandle> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(H::KIND).field(&self.handle).finish()
    }
}

impl Owned<vk::Semaphore> {
    pub fn new(device: &Arc<ash::Device>) -> Result<Self> {
        Self::with_info(device, &vk::SemaphoreCreateInfo::default())
    }

    pub fn with_info(device: &Arc<ash::Device>, info: &vk::SemaphoreCreateInfo) -> Result<Self> {
        let handle = vk_check!(
            unsafe { device.create_semaphore(info, None) },
            "semaphore",
            "create a semaphore"
        )?;
        Ok(Self::adopt(device, handle))
    }
}

impl Owned<vk::Fence> {
    pub fn new(device: &Arc<ash::Device>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        Self::with_info(device, &vk::FenceCreateInfo::default().flags(flags))
    }

    pub fn with_info(device: &Arc<ash::Device>, info: &vk::FenceCreateInfo) -> Result<Self> {
        let handle = vk_check!(
            unsafe { device.create_fence(info, None) },
            "fence",
            "create a fence"
        )?;
        Ok(Self::adopt(device, handle))
    }

    pub fn wait(&self) -> Result<()> {
        let device = self.live()?;
        vk_check!(
            unsafe { device.wait_for_fences(self.address_slice(), false, u64::MAX) },
            "fence",
            "wait for the fence"
        )
    }

    pub fn reset(&self) -> Result<()> {
        let device = self.live()?;
        vk_check!(
            unsafe { device.reset_fences(self.address_slice()) },
            "fence",
            "reset the fence"
        )
    }

    /// Block until signaled, then unsignal for the next submission.
    pub fn wait_and_reset(&self) -> Result<()> {
        self.wait()?;
        self.reset()
    }

    /// `SUCCESS` when signaled, `NOT_READY` when not, a failure code otherwise.
    pub fn status(&self) -> VkStatus {
        let device = match self.live() {
            Ok(device) => device,
            Err(err) => return VkStatus::new(err.code()),
        };
        match unsafe { device.get_fence_status(self.handle) } {
            Ok(true) => VkStatus::new(vk::Result::SUCCESS),
            Ok(false) => VkStatus::new(vk::Result::NOT_READY),
            Err(code) => {
                error!(
                    target: "fence",
                    "Failed to get the status of a fence!\nError code: {}",
                    code.as_raw()
                );
                VkStatus::new(code)
            }
        }
    }

    fn address_slice(&self) -> &[vk::Fence] {
        std::slice::from_ref(&self.handle)
    }
}

impl Owned<vk::ShaderModule> {
    pub fn with_info(device: &Arc<ash::Device>, info: &vk::ShaderModuleCreateInfo) -> Result<Self> {
        let handle = vk_check!(
            unsafe { device.create_shader_module(info, None) },
            "shader",
            "create a shader module"
        )?;
        Ok(Self::adopt(device, handle))
    }

    pub fn from_code(device: &Arc<ash::Device>, code: &[u32]) -> Result<Self> {
        Self::with_info(device, &vk::ShaderModuleCreateInfo::default().code(code))
    }

    /// SPIR-V as raw bytes. Only alignment and endianness are handled; the
    /// module itself is passed through untouched.
    pub fn from_bytes(device: &Arc<ash::Device>, bytes: &[u8]) -> Result<Self> {
        let code = read_spv(&mut Cursor::new(bytes)).map_err(Error::InvalidSpirv)?;
        Self::from_code(device, &code)
    }

    pub fn from_file(device: &Arc<ash::Device>, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| {
            error!(
                target: "shader",
                "Failed to open the file: {}",
                path.display()
            );
            Error::ShaderFile {
                path: path.to_owned(),
                source,
            }
        })?;
        Self::from_bytes(device, &bytes)
    }

    pub fn stage_create_info(
        &self,
        stage: vk::ShaderStageFlags,
    ) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(stage)
            .module(self.handle)
            .name(SHADER_ENTRY)
    }
}

impl Owned<vk::PipelineLayout> {
    pub fn with_info(
        device: &Arc<ash::Device>,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> Result<Self> {
        let handle = vk_check!(
            unsafe { device.create_pipeline_layout(info, None) },
            "pipeline",
            "create a pipeline layout"
        )?;
        Ok(Self::adopt(device, handle))
    }
}

impl Owned<vk::Pipeline> {
    pub fn graphics(
        device: &Arc<ash::Device>,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<Self> {
        let created = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        };
        let handle = vk_check!(
            created.map(|p| p[0]).map_err(|(_, code)| code),
            "pipeline",
            "create a graphics pipeline"
        )?;
        Ok(Self::adopt(device, handle))
    }

    pub fn compute(device: &Arc<ash::Device>, info: &vk::ComputePipelineCreateInfo) -> Result<Self> {
        let created = unsafe {
            device.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        };
        let handle = vk_check!(
            created.map(|p| p[0]).map_err(|(_, code)| code),
            "pipeline",
            "create a compute pipeline"
        )?;
        Ok(Self::adopt(device, handle))
    }
}

impl Owned<vk::RenderPass> {
    pub fn with_info(device: &Arc<ash::Device>, info: &vk::RenderPassCreateInfo) -> Result<Self> {
        let handle = vk_check!(
            unsafe { device.create_render_pass(info, None) },
            "render_pass",
            "create a render pass"
        )?;
        Ok(Self::adopt(device, handle))
    }

    pub fn cmd_begin(
        &self,
        cmd: &CommandBuffer,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> Result<()> {
        let device = self.live()?;
        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);
        unsafe { device.cmd_begin_render_pass(cmd.handle(), &begin, contents) };
        Ok(())
    }

    pub fn cmd_next(&self, cmd: &CommandBuffer, contents: vk::SubpassContents) -> Result<()> {
        let device = self.live()?;
        unsafe { device.cmd_next_subpass(cmd.handle(), contents) };
        Ok(())
    }

    pub fn cmd_end(&self, cmd: &CommandBuffer) -> Result<()> {
        let device = self.live()?;
        unsafe { device.cmd_end_render_pass(cmd.handle()) };
        Ok(())
    }
}

impl Owned<vk::Framebuffer> {
    pub fn with_info(device: &Arc<ash::Device>, info: &vk::FramebufferCreateInfo) -> Result<Self> {
        let handle = vk_check!(
            unsafe { device.create_framebuffer(info, None) },
            "render_pass",
            "create a framebuffer"
        )?;
        Ok(Self::adopt(device, handle))
    }
}

impl Owned<vk::CommandPool> {
    pub fn new(
        device: &Arc<ash::Device>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);
        Self::with_info(device, &info)
    }

    pub fn with_info(device: &Arc<ash::Device>, info: &vk::CommandPoolCreateInfo) -> Result<Self> {
        let handle = vk_check!(
            unsafe { device.create_command_pool(info, None) },
            "command",
            "create a command pool"
        )?;
        Ok(Self::adopt(device, handle))
    }

    pub fn allocate_buffers(
        &self,
        count: u32,
        level: vk::CommandBufferLevel,
    ) -> Result<Vec<CommandBuffer>> {
        let device = self.live()?;
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(level)
            .command_buffer_count(count);
        let raw = vk_check!(
            unsafe { device.allocate_command_buffers(&info) },
            "command",
            "allocate command buffers"
        )?;
        Ok(raw
            .into_iter()
            .map(|handle| CommandBuffer {
                handle,
                device: Some(Arc::clone(device)),
            })
            .collect())
    }

    /// Returns the buffers to the pool and nulls them.
    pub fn free_buffers(&self, buffers: &mut [CommandBuffer]) -> Result<()> {
        let device = self.live()?;
        let raw: Vec<vk::CommandBuffer> = buffers
            .iter()
            .map(CommandBuffer::handle)
            .filter(|h| *h != vk::CommandBuffer::null())
            .collect();
        if !raw.is_empty() {
            unsafe { device.free_command_buffers(self.handle, &raw) };
        }
        for buffer in buffers {
            *buffer = CommandBuffer::default();
        }
        Ok(())
    }
}

/// Allocated from and released by a [`CommandPool`]; dropping one does not
/// free it, destroying the pool does.
#[derive(Default)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    device: Option<Arc<ash::Device>>,
}

impl CommandBuffer {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn address(&self) -> &vk::CommandBuffer {
        &self.handle
    }

    fn live(&self) -> Result<&ash::Device> {
        match &self.device {
            Some(device) if self.handle != vk::CommandBuffer::null() => Ok(device),
            _ => Err(Error::NotCreated("command buffer")),
        }
    }

    /// `inheritance` is only read for secondary command buffers.
    pub fn begin(
        &self,
        usage: vk::CommandBufferUsageFlags,
        inheritance: Option<&vk::CommandBufferInheritanceInfo>,
    ) -> Result<()> {
        let device = self.live()?;
        let mut info = vk::CommandBufferBeginInfo::default().flags(usage);
        if let Some(inheritance) = inheritance {
            info = info.inheritance_info(inheritance);
        }
        vk_check!(
            unsafe { device.begin_command_buffer(self.handle, &info) },
            "command",
            "begin a command buffer"
        )
    }

    pub fn end(&self) -> Result<()> {
        let device = self.live()?;
        vk_check!(
            unsafe { device.end_command_buffer(self.handle) },
            "command",
            "end a command buffer"
        )
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("command buffer").field(&self.handle).finish()
    }
}
