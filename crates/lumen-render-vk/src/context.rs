// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical/logical device and swapchain, created in that
//! order and torn down in reverse.
//!
//! `DeviceContext` is constructed explicitly and owned by the renderer. It is
//! `!Send`: dependent resources register `Rc`-backed callbacks on it.

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::callbacks::CallbackList;
use crate::error::{vk_check, Error, Result};
use crate::handles::CommandBuffer;
use crate::queue::{select_queue_families, QueueCapabilities, QueueFamilyCache, QueueFamilyIndices};
use crate::swapchain::{
    PresentationDriver, Recreate, Swapchain, SwapchainCallbacks, SwapchainParams,
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// The logical device with the queues that were fetched from it.
pub struct LogicalDevice {
    device: Arc<ash::Device>,
    swapchain_loader: swapchain::Device,
    families: QueueFamilyIndices,
    graphics: vk::Queue,
    present: vk::Queue,
    compute: vk::Queue,
}

impl LogicalDevice {
    pub fn raw(&self) -> &Arc<ash::Device> {
        &self.device
    }

    pub fn families(&self) -> QueueFamilyIndices {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.compute
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    /// True when presenting needs a queue family ownership transfer.
    pub fn present_is_separate(&self) -> bool {
        self.families.present.is_some() && self.families.present != self.families.graphics
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        // SAFETY: every child object was destroyed by the context before the
        // device is dropped.
        unsafe { self.device.destroy_device(None) };
        debug!(target: "device", "Logical device destroyed");
    }
}

#[derive(Debug, Default)]
pub struct DeviceCallbacks {
    pub on_create: CallbackList<LogicalDevice>,
    pub on_destroy: CallbackList<LogicalDevice>,
}

/// `PresentationDriver` over ash, borrowing what it needs from the context.
pub struct AshPresentation<'a> {
    physical_device: vk::PhysicalDevice,
    surface_loader: &'a surface::Instance,
    surface: vk::SurfaceKHR,
    device: &'a LogicalDevice,
}

impl PresentationDriver for AshPresentation<'_> {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
    }

    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
    }

    fn create_swapchain(
        &self,
        params: &SwapchainParams,
        old: vk::SwapchainKHR,
    ) -> VkResult<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR::default()
            .flags(params.flags)
            .surface(self.surface)
            .min_image_count(params.min_image_count)
            .image_format(params.format)
            .image_color_space(params.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(params.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(params.pre_transform)
            .composite_alpha(params.composite_alpha)
            .present_mode(params.present_mode)
            .clipped(true)
            .old_swapchain(old);
        unsafe { self.device.swapchain_loader.create_swapchain(&info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.device.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(COLOR_RANGE);
        unsafe { self.device.device.create_image_view(&info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.device.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.device.swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let swapchains = [swapchain];
        let indices = [image_index];
        let waits = [wait];
        let mut info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&indices);
        if wait != vk::Semaphore::null() {
            info = info.wait_semaphores(&waits);
        }
        unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present, &info)
        }
    }

    fn wait_queues_idle(&self) -> VkResult<()> {
        let device = &self.device.device;
        unsafe { device.queue_wait_idle(self.device.graphics)? };
        if self.device.present != vk::Queue::null() && self.device.present != self.device.graphics {
            unsafe { device.queue_wait_idle(self.device.present)? };
        }
        Ok(())
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

fn push_unique(list: &mut Vec<CString>, name: &CStr) {
    if !list.iter().any(|existing| existing.as_c_str() == name) {
        list.push(name.to_owned());
    }
}

fn as_ptrs(names: &[CString]) -> Vec<*const c_char> {
    names.iter().map(|name| name.as_ptr()).collect()
}

fn available_subset<'a>(wanted: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|name| available.contains(name))
        .collect()
}

fn submit(
    device: &LogicalDevice,
    queue: vk::Queue,
    cmd: &CommandBuffer,
    wait: vk::Semaphore,
    wait_stage: vk::PipelineStageFlags,
    signal: vk::Semaphore,
    fence: vk::Fence,
) -> VkResult<()> {
    let cmds = [cmd.handle()];
    let waits = [wait];
    let stages = [wait_stage];
    let signals = [signal];
    let mut info = vk::SubmitInfo::default();
    if cmd.handle() != vk::CommandBuffer::null() {
        info = info.command_buffers(&cmds);
    }
    if wait != vk::Semaphore::null() {
        info = info.wait_semaphores(&waits).wait_dst_stage_mask(&stages);
    }
    if signal != vk::Semaphore::null() {
        info = info.signal_semaphores(&signals);
    }
    unsafe {
        device
            .device
            .queue_submit(queue, std::slice::from_ref(&info), fence)
    }
}

unsafe extern "system" fn validation_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback data struct whose message,
    // when present, is a NUL-terminated string.
    let message = unsafe {
        let data = &*data;
        if data.p_message.is_null() {
            std::borrow::Cow::Borrowed("")
        } else {
            CStr::from_ptr(data.p_message).to_string_lossy()
        }
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "validation", "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "validation", "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "validation", "{message}");
    } else {
        trace!(target: "validation", "{message}");
    }
    vk::FALSE
}

pub struct DeviceContext {
    entry: ash::Entry,
    api_version: u32,
    instance_layers: Vec<CString>,
    instance_extensions: Vec<CString>,
    device_extensions: Vec<CString>,

    instance: Option<ash::Instance>,
    debug_messenger: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Option<surface::Instance>,
    surface: vk::SurfaceKHR,

    physical_devices: Vec<vk::PhysicalDevice>,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_cache: QueueFamilyCache,
    families: QueueFamilyIndices,

    device: Option<LogicalDevice>,
    swapchain: Swapchain,
    swapchain_callbacks: SwapchainCallbacks,
    device_callbacks: DeviceCallbacks,
}

impl DeviceContext {
    /// Loads the Vulkan entry points. Nothing is created yet.
    pub fn new() -> Self {
        Self {
            entry: ash::Entry::linked(),
            api_version: vk::API_VERSION_1_0,
            instance_layers: Vec::new(),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            instance: None,
            debug_messenger: None,
            surface_loader: None,
            surface: vk::SurfaceKHR::null(),
            physical_devices: Vec::new(),
            physical_device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties::default(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_cache: QueueFamilyCache::default(),
            families: QueueFamilyIndices::default(),
            device: None,
            swapchain: Swapchain::new(),
            swapchain_callbacks: SwapchainCallbacks::default(),
            device_callbacks: DeviceCallbacks::default(),
        }
    }

    // ---- instance ----

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Asks the loader for the highest instance version it supports. Loaders
    /// older than 1.1 leave the version at 1.0.
    pub fn use_latest_api_version(&mut self) -> Result<u32> {
        let version = vk_check!(
            unsafe { self.entry.try_enumerate_instance_version() },
            "instance",
            "get the latest Vulkan API version"
        )?;
        self.api_version = version.unwrap_or(vk::API_VERSION_1_0);
        Ok(self.api_version)
    }

    pub fn push_instance_layer(&mut self, name: &CStr) {
        push_unique(&mut self.instance_layers, name);
    }

    pub fn push_instance_extension(&mut self, name: &CStr) {
        push_unique(&mut self.instance_extensions, name);
    }

    pub fn push_device_extension(&mut self, name: &CStr) {
        push_unique(&mut self.device_extensions, name);
    }

    pub fn instance_layers(&self) -> &[CString] {
        &self.instance_layers
    }

    pub fn instance_extensions(&self) -> &[CString] {
        &self.instance_extensions
    }

    pub fn device_extensions(&self) -> &[CString] {
        &self.device_extensions
    }

    /// Extensions the platform's window system needs.
    pub fn push_window_extensions(&mut self, display: &dyn HasDisplayHandle) -> Result<()> {
        let raw = display.display_handle()?.as_raw();
        let names = vk_check!(
            ash_window::enumerate_required_extensions(raw),
            "instance",
            "get the required window extensions"
        )?;
        for &name in names {
            // SAFETY: ash-window returns pointers to static NUL-terminated names.
            self.push_instance_extension(unsafe { CStr::from_ptr(name) });
        }
        Ok(())
    }

    /// The subset of `wanted` the loader offers.
    pub fn check_instance_layers<'a>(&self, wanted: &[&'a CStr]) -> Result<Vec<&'a CStr>> {
        let props = vk_check!(
            unsafe { self.entry.enumerate_instance_layer_properties() },
            "instance",
            "get instance layer properties"
        )?;
        let available: Vec<&CStr> = props
            .iter()
            .filter_map(|p| p.layer_name_as_c_str().ok())
            .collect();
        Ok(available_subset(wanted, &available))
    }

    /// The subset of `wanted` the loader (or `layer`) offers.
    pub fn check_instance_extensions<'a>(
        &self,
        layer: Option<&CStr>,
        wanted: &[&'a CStr],
    ) -> Result<Vec<&'a CStr>> {
        let props = vk_check!(
            unsafe { self.entry.enumerate_instance_extension_properties(layer) },
            "instance",
            "get instance extension properties"
        )?;
        let available: Vec<&CStr> = props
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .collect();
        Ok(available_subset(wanted, &available))
    }

    /// The subset of `wanted` the selected physical device offers.
    pub fn check_device_extensions<'a>(&self, wanted: &[&'a CStr]) -> Result<Vec<&'a CStr>> {
        let instance = self.instance()?;
        if self.physical_device == vk::PhysicalDevice::null() {
            return Err(Error::NotCreated("physical device"));
        }
        let props = vk_check!(
            unsafe { instance.enumerate_device_extension_properties(self.physical_device) },
            "device",
            "get device extension properties"
        )?;
        let available: Vec<&CStr> = props
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .collect();
        Ok(available_subset(wanted, &available))
    }

    pub fn create_instance(&mut self, flags: vk::InstanceCreateFlags) -> Result<()> {
        if self.instance.is_some() {
            warn!(target: "instance", "The instance already exists, create_instance() was ignored!");
            return Ok(());
        }
        let debug = cfg!(debug_assertions);
        if debug {
            if self.check_instance_layers(&[VALIDATION_LAYER])?.is_empty() {
                warn!(target: "instance", "{} is not available", VALIDATION_LAYER.to_string_lossy());
            } else {
                self.push_instance_layer(VALIDATION_LAYER);
            }
            self.push_instance_extension(debug_utils::NAME);
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"lumen")
            .engine_name(c"lumen")
            .api_version(self.api_version);
        let layers = as_ptrs(&self.instance_layers);
        let extensions = as_ptrs(&self.instance_extensions);
        let info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        let instance = vk_check!(
            unsafe { self.entry.create_instance(&info, None) },
            "instance",
            "create a vulkan instance"
        )?;
        info!(
            target: "instance",
            "Vulkan API version: {}.{}.{}",
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version)
        );

        self.surface_loader = Some(surface::Instance::new(&self.entry, &instance));
        if debug {
            let loader = debug_utils::Instance::new(&self.entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(validation_message));
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => self.debug_messenger = Some((loader, messenger)),
                Err(code) => error!(
                    target: "instance",
                    "Failed to create a debug messenger!\nError code: {}",
                    code.as_raw()
                ),
            }
        }
        self.instance = Some(instance);
        Ok(())
    }

    pub fn instance(&self) -> Result<&ash::Instance> {
        self.instance.as_ref().ok_or(Error::NotCreated("instance"))
    }

    // ---- surface ----

    pub fn create_surface(
        &mut self,
        display: &dyn HasDisplayHandle,
        window: &dyn HasWindowHandle,
    ) -> Result<()> {
        let instance = self.instance()?;
        let display = display.display_handle()?.as_raw();
        let window = window.window_handle()?.as_raw();
        let surface = vk_check!(
            unsafe { ash_window::create_surface(&self.entry, instance, display, window, None) },
            "instance",
            "create a window surface"
        )?;
        if !self.set_surface(surface) {
            if let Some(loader) = &self.surface_loader {
                unsafe { loader.destroy_surface(surface, None) };
            }
        }
        Ok(())
    }

    /// Takes ownership of `surface`. A surface can be set once; later calls
    /// warn and return false.
    pub fn set_surface(&mut self, surface: vk::SurfaceKHR) -> bool {
        if self.surface != vk::SurfaceKHR::null() {
            warn!(target: "instance", "The surface is already set, set_surface() was ignored!");
            return false;
        }
        self.surface = surface;
        true
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    // ---- physical device ----

    pub fn enumerate_physical_devices(&mut self) -> Result<&[vk::PhysicalDevice]> {
        let instance = self.instance()?;
        let devices = vk_check!(
            unsafe { instance.enumerate_physical_devices() },
            "device",
            "enumerate physical devices"
        )?;
        if devices.is_empty() {
            error!(target: "device", "Failed to find any physical device supports vulkan!");
            return Err(Error::NoPhysicalDevice);
        }
        self.physical_devices = devices;
        self.queue_cache.clear();
        Ok(&self.physical_devices)
    }

    pub fn physical_devices(&self) -> &[vk::PhysicalDevice] {
        &self.physical_devices
    }

    fn wanted_capabilities(&self, graphics: bool, compute: bool) -> QueueCapabilities {
        let mut wanted = QueueCapabilities::empty();
        wanted.set(QueueCapabilities::GRAPHICS, graphics);
        wanted.set(QueueCapabilities::COMPUTE, compute);
        wanted.set(
            QueueCapabilities::PRESENT,
            self.surface != vk::SurfaceKHR::null(),
        );
        wanted
    }

    /// Queue families device `index` would use. Presentation is required
    /// exactly when a surface exists. Results are cached per device.
    pub fn determine_physical_device(
        &mut self,
        index: usize,
        graphics: bool,
        compute: bool,
    ) -> Result<QueueFamilyIndices> {
        let wanted = self.wanted_capabilities(graphics, compute);
        let count = self.physical_devices.len();
        let physical_device = *self
            .physical_devices
            .get(index)
            .ok_or(Error::DeviceIndexOutOfRange { index, count })?;
        let instance = self.instance.as_ref().ok_or(Error::NotCreated("instance"))?;
        let surface_loader = self.surface_loader.as_ref();
        let surface = self.surface;

        let found = vk_check!(
            self.queue_cache.resolve(index, wanted, || {
                let families = unsafe {
                    instance.get_physical_device_queue_family_properties(physical_device)
                };
                select_queue_families(&families, wanted, |family| match surface_loader {
                    Some(loader) => unsafe {
                        loader.get_physical_device_surface_support(physical_device, family, surface)
                    },
                    None => Ok(false),
                })
            }),
            "queue",
            "determine queue family indices"
        )?;
        found.ok_or_else(|| {
            debug!(target: "queue", "Physical device {index} lacks {:?}", wanted);
            Error::NoSuitableQueueFamily(index)
        })
    }

    /// Picks the first device whose queue families cover the request.
    pub fn select_physical_device(&mut self, graphics: bool, compute: bool) -> Result<usize> {
        for index in 0..self.physical_devices.len() {
            match self.determine_physical_device(index, graphics, compute) {
                Ok(families) => {
                    self.use_physical_device(index, families)?;
                    return Ok(index);
                }
                Err(Error::NoSuitableQueueFamily(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        error!(
            target: "device",
            "Failed to find any physical device satisfies all required queue family indices!"
        );
        Err(Error::NoSuitablePhysicalDevice)
    }

    fn use_physical_device(&mut self, index: usize, families: QueueFamilyIndices) -> Result<()> {
        let instance = self.instance()?;
        let physical_device = self.physical_devices[index];
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        self.physical_device = physical_device;
        self.properties = properties;
        self.memory_properties = memory_properties;
        self.families = families;
        Ok(())
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.families
    }

    // ---- logical device ----

    pub fn create_device(&mut self, flags: vk::DeviceCreateFlags) -> Result<()> {
        if self.device.is_some() {
            warn!(target: "device", "The device already exists, create_device() was ignored!");
            return Ok(());
        }
        let instance = self.instance.as_ref().ok_or(Error::NotCreated("instance"))?;
        if self.physical_device == vk::PhysicalDevice::null() {
            return Err(Error::NotCreated("physical device"));
        }
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = self
            .families
            .distinct()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();
        let features = unsafe { instance.get_physical_device_features(self.physical_device) };
        let extensions = as_ptrs(&self.device_extensions);
        let info = vk::DeviceCreateInfo::default()
            .flags(flags)
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);
        let device = vk_check!(
            unsafe { instance.create_device(self.physical_device, &info, None) },
            "device",
            "create a vulkan logical device"
        )?;

        let queue = |family: Option<u32>| match family {
            Some(family) => unsafe { device.get_device_queue(family, 0) },
            None => vk::Queue::null(),
        };
        let graphics = queue(self.families.graphics);
        let present = queue(self.families.present);
        let compute = queue(self.families.compute);
        let swapchain_loader = swapchain::Device::new(instance, &device);
        let logical = LogicalDevice {
            device: Arc::new(device),
            swapchain_loader,
            families: self.families,
            graphics,
            present,
            compute,
        };

        let name = self
            .properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(target: "device", "Renderer: {name}");

        self.device_callbacks.on_create.run(&logical)?;
        self.device = Some(logical);
        Ok(())
    }

    /// Waits idle, tears the swapchain and device down, and builds a new
    /// device. The swapchain has to be created again afterwards.
    pub fn recreate_device(&mut self, flags: vk::DeviceCreateFlags) -> Result<()> {
        if let Some(device) = self.device.as_ref() {
            vk_check!(
                unsafe { device.device.device_wait_idle() },
                "device",
                "wait for the device to be idle"
            )?;
        }
        if let Ok((drv, swapchain, callbacks)) = self.split() {
            swapchain.reset(&drv, callbacks);
        }
        if let Some(device) = self.device.take() {
            if let Err(err) = self.device_callbacks.on_destroy.run(&device) {
                warn!(target: "device", "A device destroy callback failed: {err}");
            }
        }
        self.create_device(flags)
    }

    pub fn device(&self) -> Result<&LogicalDevice> {
        self.device.as_ref().ok_or(Error::NotCreated("device"))
    }

    pub fn on_device_create(
        &mut self,
        callback: impl FnMut(&LogicalDevice) -> Result<()> + 'static,
    ) {
        self.device_callbacks.on_create.push(callback);
    }

    pub fn on_device_destroy(
        &mut self,
        callback: impl FnMut(&LogicalDevice) -> Result<()> + 'static,
    ) {
        self.device_callbacks.on_destroy.push(callback);
    }

    pub fn wait_idle(&self) -> Result<()> {
        let device = self.device()?;
        vk_check!(
            unsafe { device.device.device_wait_idle() },
            "device",
            "wait for the device to be idle"
        )
    }

    // ---- swapchain ----

    /// The presentation driver plus the swapchain state it operates on.
    fn split(&mut self) -> Result<(AshPresentation<'_>, &mut Swapchain, &mut SwapchainCallbacks)> {
        let device = self.device.as_ref().ok_or(Error::NotCreated("device"))?;
        let surface_loader = self
            .surface_loader
            .as_ref()
            .ok_or(Error::NotCreated("instance"))?;
        if self.surface == vk::SurfaceKHR::null() {
            return Err(Error::NotCreated("surface"));
        }
        let drv = AshPresentation {
            physical_device: self.physical_device,
            surface_loader,
            surface: self.surface,
            device,
        };
        Ok((drv, &mut self.swapchain, &mut self.swapchain_callbacks))
    }

    pub fn create_swapchain(
        &mut self,
        limit_frame_rate: bool,
        flags: vk::SwapchainCreateFlagsKHR,
    ) -> Result<()> {
        let (drv, swapchain, callbacks) = self.split()?;
        swapchain.create(&drv, callbacks, limit_frame_rate, flags)
    }

    pub fn recreate_swapchain(&mut self) -> Result<Recreate> {
        let (drv, swapchain, callbacks) = self.split()?;
        swapchain.recreate(&drv, callbacks)
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn on_swapchain_create(&mut self, callback: impl FnMut(&Swapchain) -> Result<()> + 'static) {
        self.swapchain_callbacks.on_create.push(callback);
    }

    pub fn on_swapchain_destroy(
        &mut self,
        callback: impl FnMut(&Swapchain) -> Result<()> + 'static,
    ) {
        self.swapchain_callbacks.on_destroy.push(callback);
    }

    pub fn set_surface_format(&mut self, format: vk::SurfaceFormatKHR) -> Result<()> {
        let (drv, swapchain, callbacks) = self.split()?;
        swapchain.set_surface_format(&drv, callbacks, format)
    }

    pub fn set_limit_frame_rate(&mut self, limit_frame_rate: bool) -> Result<()> {
        let (drv, swapchain, callbacks) = self.split()?;
        swapchain.set_limit_frame_rate(&drv, callbacks, limit_frame_rate)
    }

    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.swapchain.set_window_extent(extent);
    }

    /// `Ok(None)` while the window has no area.
    pub fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<Option<u32>> {
        let (drv, swapchain, callbacks) = self.split()?;
        swapchain.acquire(&drv, callbacks, signal)
    }

    pub fn present_image(&mut self, wait: vk::Semaphore) -> Result<()> {
        let (drv, swapchain, callbacks) = self.split()?;
        swapchain.present(&drv, callbacks, wait)
    }

    // ---- submission ----

    /// A null `cmd` submits an empty batch that only waits and signals.
    pub fn submit_graphics(
        &self,
        cmd: &CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let device = self.device()?;
        vk_check!(
            submit(
                device,
                device.graphics,
                cmd,
                wait,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal,
                fence,
            ),
            "device",
            "submit the command buffer"
        )
    }

    pub fn submit_compute(&self, cmd: &CommandBuffer, fence: vk::Fence) -> Result<()> {
        let device = self.device()?;
        if device.compute == vk::Queue::null() {
            return Err(Error::NotCreated("compute queue"));
        }
        vk_check!(
            submit(
                device,
                device.compute,
                cmd,
                vk::Semaphore::null(),
                vk::PipelineStageFlags::empty(),
                vk::Semaphore::null(),
                fence,
            ),
            "device",
            "submit the command buffer"
        )
    }

    /// Runs the ownership-acquire side on the presentation queue.
    pub fn submit_presentation(
        &self,
        cmd: &CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let device = self.device()?;
        vk_check!(
            submit(
                device,
                device.present,
                cmd,
                wait,
                vk::PipelineStageFlags::ALL_COMMANDS,
                signal,
                fence,
            ),
            "device",
            "submit the presentation command buffer"
        )
    }

    /// Graphics to presentation ownership barrier for the current image.
    /// Recorded on both queues; does nothing when they share a family.
    pub fn cmd_transfer_image_ownership(&self, cmd: &CommandBuffer) -> Result<()> {
        let device = self.device()?;
        let (Some(graphics), Some(present)) = (device.families.graphics, device.families.present)
        else {
            return Ok(());
        };
        if graphics == present {
            return Ok(());
        }
        let image = self
            .swapchain
            .current_image()
            .ok_or(Error::NotCreated("swapchain"))?;
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(graphics)
            .dst_queue_family_index(present)
            .image(image)
            .subresource_range(COLOR_RANGE);
        unsafe {
            device.device.cmd_pipeline_barrier(
                cmd.handle(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            )
        };
        Ok(())
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Some(device) = self.device.as_ref() {
            if let Err(code) = unsafe { device.device.device_wait_idle() } {
                error!(
                    target: "device",
                    "Failed to wait for the device to be idle!\nError code: {}",
                    code.as_raw()
                );
            }
        }
        if let Ok((drv, swapchain, callbacks)) = self.split() {
            swapchain.destroy(&drv, callbacks);
        }
        if let Some(device) = self.device.take() {
            if let Err(err) = self.device_callbacks.on_destroy.run(&device) {
                warn!(target: "device", "A device destroy callback failed: {err}");
            }
        }
        if let Some(loader) = &self.surface_loader {
            if self.surface != vk::SurfaceKHR::null() {
                unsafe { loader.destroy_surface(self.surface, None) };
            }
        }
        if let Some((loader, messenger)) = self.debug_messenger.take() {
            unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
        }
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
    }
}
