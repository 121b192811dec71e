// SPDX-License-Identifier: CEPL-1.0
//! Swapchain lifecycle.
//!
//! `Swapchain` owns the swapchain handle, its images and image views, and the
//! parameters it was built with. It talks to the presentation engine only
//! through [`PresentationDriver`]; [`crate::context::DeviceContext`] supplies
//! the ash-backed driver.
//!
//! A swapchain replaced by `recreate` is retired rather than destroyed: the
//! presentation engine may still be reading its images. Retired handles are
//! destroyed at the start of the next `acquire`.

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, error, info, warn};

use crate::callbacks::CallbackList;
use crate::error::{vk_check, Error, Result};

/// Used when the surface leaves the extent up to the swapchain.
pub const DEFAULT_WINDOW_SIZE: vk::Extent2D = vk::Extent2D {
    width: 1280,
    height: 720,
};

/// Tried in order when no format was asked for.
const PREFERRED_FORMATS: [vk::SurfaceFormatKHR; 2] = [
    vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Created,
    /// The surface reported the swapchain out of date; it will be rebuilt
    /// before the next image is handed out.
    Stale,
    Recreating,
    Destroyed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recreate {
    Rebuilt,
    /// The surface has no area (minimized window); nothing was touched.
    Skipped,
}

/// The parts of `VkSwapchainCreateInfoKHR` that persist across recreation.
/// Array layers, sharing mode and clipping are fixed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapchainParams {
    pub flags: vk::SwapchainCreateFlagsKHR,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
}

impl SwapchainParams {
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: self.format,
            color_space: self.color_space,
        }
    }
}

/// What the swapchain needs from the presentation engine.
pub trait PresentationDriver {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
    fn create_swapchain(
        &self,
        params: &SwapchainParams,
        old: vk::SwapchainKHR,
    ) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Waits without a timeout. Returns `(index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Returns `true` when the surface reports suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
    /// The graphics queue, and the presentation queue if it is a different one.
    fn wait_queues_idle(&self) -> VkResult<()>;
}

/// Hooks for resources that depend on the swapchain images, such as framebuffers.
#[derive(Debug, Default)]
pub struct SwapchainCallbacks {
    pub on_create: CallbackList<Swapchain>,
    pub on_destroy: CallbackList<Swapchain>,
}

/// One image above the minimum, only when a positive maximum leaves room for it.
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    caps.min_image_count + u32::from(caps.max_image_count > caps.min_image_count)
}

pub fn swapchain_extent(caps: &vk::SurfaceCapabilitiesKHR, fallback: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: fallback
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: fallback
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub fn composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    let supported = caps.supported_composite_alpha;
    if supported.contains(vk::CompositeAlphaFlagsKHR::INHERIT) {
        return vk::CompositeAlphaFlagsKHR::INHERIT;
    }
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|bit| supported.contains(*bit))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

pub fn image_usage(caps: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let supported = caps.supported_usage_flags;
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if supported.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if supported.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    } else {
        warn!(
            target: "swapchain",
            "VK_IMAGE_USAGE_TRANSFER_DST_BIT isn't supported!"
        );
    }
    usage
}

pub fn present_mode(modes: &[vk::PresentModeKHR], limit_frame_rate: bool) -> vk::PresentModeKHR {
    if !limit_frame_rate && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// `wanted.format == UNDEFINED` matches on the color space alone.
pub fn match_surface_format(
    available: &[vk::SurfaceFormatKHR],
    wanted: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            f.color_space == wanted.color_space
                && (wanted.format == vk::Format::UNDEFINED || f.format == wanted.format)
        })
        .copied()
}

pub fn default_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let Some(found) = PREFERRED_FORMATS
        .into_iter()
        .find_map(|preferred| match_surface_format(available, preferred))
    {
        return Some(found);
    }
    let first = available.first().copied()?;
    warn!(
        target: "swapchain",
        "Failed to select a four-component UNORM surface format!\nUsing {:?} / {:?}",
        first.format,
        first.color_space
    );
    Some(first)
}

#[derive(Debug)]
pub struct Swapchain {
    state: SwapchainState,
    handle: vk::SwapchainKHR,
    retired: Vec<vk::SwapchainKHR>,
    params: SwapchainParams,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    current_image: u32,
    available_formats: Vec<vk::SurfaceFormatKHR>,
    limit_frame_rate: bool,
    window_extent: vk::Extent2D,
}

impl Default for Swapchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Swapchain {
    pub fn new() -> Self {
        Self {
            state: SwapchainState::Uninitialized,
            handle: vk::SwapchainKHR::null(),
            retired: Vec::new(),
            params: SwapchainParams::default(),
            images: Vec::new(),
            views: Vec::new(),
            current_image: 0,
            available_formats: Vec::new(),
            limit_frame_rate: true,
            window_extent: DEFAULT_WINDOW_SIZE,
        }
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn params(&self) -> &SwapchainParams {
        &self.params
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.params.extent
    }

    pub fn format(&self) -> vk::Format {
        self.params.format
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn current_image_index(&self) -> u32 {
        self.current_image
    }

    pub fn current_image(&self) -> Option<vk::Image> {
        self.images.get(self.current_image as usize).copied()
    }

    /// Replaced swapchains still waiting for the next acquire.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn available_formats(&self) -> &[vk::SurfaceFormatKHR] {
        &self.available_formats
    }

    fn exists(&self) -> bool {
        self.handle != vk::SwapchainKHR::null()
    }

    /// Size to use when the surface does not dictate one.
    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }

    fn surface_formats(&mut self, drv: &dyn PresentationDriver) -> Result<&[vk::SurfaceFormatKHR]> {
        if self.available_formats.is_empty() {
            let formats = vk_check!(
                drv.surface_formats(),
                "swapchain",
                "get surface formats"
            )?;
            if formats.is_empty() {
                error!(target: "swapchain", "Failed to find any supported surface format!");
                return Err(Error::NoSurfaceFormat);
            }
            self.available_formats = formats;
        }
        Ok(&self.available_formats)
    }

    pub fn create(
        &mut self,
        drv: &dyn PresentationDriver,
        callbacks: &mut SwapchainCallbacks,
        limit_frame_rate: bool,
        flags: vk::SwapchainCreateFlagsKHR,
    ) -> Result<()> {
        if self.exists() {
            warn!(
                target: "swapchain",
                "The swapchain already exists, create() was ignored!"
            );
            return Ok(());
        }
        if let Err(err) = self.create_inner(drv, limit_frame_rate, flags) {
            self.state = SwapchainState::Uninitialized;
            return Err(err);
        }
        self.state = SwapchainState::Created;
        self.log_choices("Swapchain ready");
        callbacks.on_create.run(self)
    }

    fn create_inner(
        &mut self,
        drv: &dyn PresentationDriver,
        limit_frame_rate: bool,
        flags: vk::SwapchainCreateFlagsKHR,
    ) -> Result<()> {
        let caps = vk_check!(
            drv.surface_capabilities(),
            "swapchain",
            "get physical device surface capabilities"
        )?;
        self.params.min_image_count = image_count(&caps);
        self.params.extent = swapchain_extent(&caps, self.window_extent);
        self.params.pre_transform = caps.current_transform;
        self.params.composite_alpha = composite_alpha(&caps);
        self.params.usage = image_usage(&caps);

        if self.params.format == vk::Format::UNDEFINED {
            let chosen = default_surface_format(self.surface_formats(drv)?)
                .ok_or(Error::NoSurfaceFormat)?;
            self.params.format = chosen.format;
            self.params.color_space = chosen.color_space;
        }

        let modes = vk_check!(drv.present_modes(), "swapchain", "get surface present modes")?;
        if modes.is_empty() {
            error!(target: "swapchain", "Failed to find any surface present mode!");
            return Err(Error::NoPresentMode);
        }
        self.limit_frame_rate = limit_frame_rate;
        self.params.present_mode = present_mode(&modes, limit_frame_rate);
        self.params.flags = flags;

        self.build(drv, vk::SwapchainKHR::null())
    }

    /// Swapchain, images, views. Either all of them land in `self` or none do.
    fn build(&mut self, drv: &dyn PresentationDriver, old: vk::SwapchainKHR) -> Result<()> {
        let handle = vk_check!(
            drv.create_swapchain(&self.params, old),
            "swapchain",
            "create a swapchain"
        )?;
        let images = match vk_check!(
            drv.swapchain_images(handle),
            "swapchain",
            "get swapchain images"
        ) {
            Ok(images) => images,
            Err(err) => {
                drv.destroy_swapchain(handle);
                return Err(err);
            }
        };
        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match vk_check!(
                drv.create_image_view(image, self.params.format),
                "swapchain",
                "create a swapchain image view"
            ) {
                Ok(view) => views.push(view),
                Err(err) => {
                    for view in views {
                        drv.destroy_image_view(view);
                    }
                    drv.destroy_swapchain(handle);
                    return Err(err);
                }
            }
        }
        self.handle = handle;
        self.images = images;
        self.views = views;
        Ok(())
    }

    /// Rebuilds against the surface's current size. A zero-area surface makes
    /// this a no-op.
    pub fn recreate(
        &mut self,
        drv: &dyn PresentationDriver,
        callbacks: &mut SwapchainCallbacks,
    ) -> Result<Recreate> {
        let previous = self.state;
        if !matches!(previous, SwapchainState::Created | SwapchainState::Stale) {
            return Err(Error::NotCreated("swapchain"));
        }
        let caps = vk_check!(
            drv.surface_capabilities(),
            "swapchain",
            "get physical device surface capabilities"
        )?;
        if caps.current_extent.width == 0 || caps.current_extent.height == 0 {
            return Ok(Recreate::Skipped);
        }

        self.state = SwapchainState::Recreating;
        if let Err(err) = vk_check!(
            drv.wait_queues_idle(),
            "swapchain",
            "wait for the queues to be idle"
        ) {
            self.state = previous;
            return Err(err);
        }
        if let Err(err) = callbacks.on_destroy.run(self) {
            self.state = previous;
            return Err(err);
        }
        for view in self.views.drain(..) {
            drv.destroy_image_view(view);
        }
        self.images.clear();

        self.params.extent = swapchain_extent(&caps, self.window_extent);
        let old = std::mem::replace(&mut self.handle, vk::SwapchainKHR::null());
        let built = self.build(drv, old);
        if old != vk::SwapchainKHR::null() {
            self.retired.push(old);
        }
        if let Err(err) = built {
            self.state = SwapchainState::Stale;
            return Err(err);
        }
        self.state = SwapchainState::Created;
        self.log_choices("Swapchain recreated");
        callbacks.on_create.run(self)?;
        Ok(Recreate::Rebuilt)
    }

    /// Next presentable image, rebuilding the swapchain as often as the
    /// surface asks for it. `Ok(None)` means the window has no area and
    /// nothing should be drawn this frame.
    pub fn acquire(
        &mut self,
        drv: &dyn PresentationDriver,
        callbacks: &mut SwapchainCallbacks,
        signal: vk::Semaphore,
    ) -> Result<Option<u32>> {
        if matches!(
            self.state,
            SwapchainState::Uninitialized | SwapchainState::Destroyed
        ) {
            return Err(Error::NotCreated("swapchain"));
        }
        self.destroy_retired(drv);
        loop {
            if self.state == SwapchainState::Stale {
                if self.recreate(drv, callbacks)? == Recreate::Skipped {
                    return Ok(None);
                }
                continue;
            }
            match drv.acquire_next_image(self.handle, signal) {
                Ok((index, false)) => {
                    self.current_image = index;
                    return Ok(Some(index));
                }
                Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.state = SwapchainState::Stale;
                }
                Err(code) => {
                    error!(
                        target: "swapchain",
                        "Failed to acquire the next image!\nError code: {}",
                        code.as_raw()
                    );
                    return Err(Error::Vulkan {
                        op: "acquire the next image",
                        code,
                    });
                }
            }
        }
    }

    pub fn present(
        &mut self,
        drv: &dyn PresentationDriver,
        callbacks: &mut SwapchainCallbacks,
        wait: vk::Semaphore,
    ) -> Result<()> {
        if !self.exists() {
            return Err(Error::NotCreated("swapchain"));
        }
        match drv.queue_present(self.handle, self.current_image, wait) {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = SwapchainState::Stale;
                self.recreate(drv, callbacks).map(|_| ())
            }
            Err(code) => {
                error!(
                    target: "swapchain",
                    "Failed to queue the image for presentation!\nError code: {}",
                    code.as_raw()
                );
                Err(Error::Vulkan {
                    op: "queue the image for presentation",
                    code,
                })
            }
        }
    }

    /// Picks `wanted` from the surface's formats and rebuilds the swapchain
    /// if there is one.
    pub fn set_surface_format(
        &mut self,
        drv: &dyn PresentationDriver,
        callbacks: &mut SwapchainCallbacks,
        wanted: vk::SurfaceFormatKHR,
    ) -> Result<()> {
        let Some(found) = match_surface_format(self.surface_formats(drv)?, wanted) else {
            warn!(
                target: "swapchain",
                "Surface format {:?} / {:?} is not supported!",
                wanted.format,
                wanted.color_space
            );
            return Err(Error::FormatNotSupported(wanted));
        };
        self.params.format = found.format;
        self.params.color_space = found.color_space;
        if self.exists() {
            self.recreate(drv, callbacks)?;
        }
        Ok(())
    }

    /// Switches between FIFO and (if available) mailbox.
    pub fn set_limit_frame_rate(
        &mut self,
        drv: &dyn PresentationDriver,
        callbacks: &mut SwapchainCallbacks,
        limit_frame_rate: bool,
    ) -> Result<()> {
        self.limit_frame_rate = limit_frame_rate;
        if !self.exists() {
            return Ok(());
        }
        let modes = vk_check!(drv.present_modes(), "swapchain", "get surface present modes")?;
        let mode = present_mode(&modes, limit_frame_rate);
        if mode != self.params.present_mode {
            self.params.present_mode = mode;
            self.recreate(drv, callbacks)?;
        }
        Ok(())
    }

    fn destroy_retired(&mut self, drv: &dyn PresentationDriver) {
        for old in self.retired.drain(..) {
            debug!(target: "swapchain", "Destroying retired swapchain {:?}", old);
            drv.destroy_swapchain(old);
        }
    }

    /// Tears everything down. The caller makes sure the device is idle.
    pub fn destroy(&mut self, drv: &dyn PresentationDriver, callbacks: &mut SwapchainCallbacks) {
        if self.exists() || !self.views.is_empty() {
            if let Err(err) = callbacks.on_destroy.run(self) {
                warn!(target: "swapchain", "A swapchain destroy callback failed: {err}");
            }
        }
        for view in self.views.drain(..) {
            drv.destroy_image_view(view);
        }
        self.images.clear();
        if self.exists() {
            drv.destroy_swapchain(std::mem::replace(
                &mut self.handle,
                vk::SwapchainKHR::null(),
            ));
        }
        self.destroy_retired(drv);
        self.state = SwapchainState::Destroyed;
    }

    /// Destroys everything and forgets the parameters, so the next `create`
    /// starts over. Used when the logical device is rebuilt.
    pub fn reset(&mut self, drv: &dyn PresentationDriver, callbacks: &mut SwapchainCallbacks) {
        self.destroy(drv, callbacks);
        let window_extent = self.window_extent;
        *self = Swapchain::new();
        self.window_extent = window_extent;
    }

    fn log_choices(&self, what: &str) {
        let p = &self.params;
        info!(
            target: "swapchain",
            "{what}: format={:?} color_space={:?} present_mode={:?} extent={}x{} images={}",
            p.format,
            p.color_space,
            p.present_mode,
            p.extent.width,
            p.extent.height,
            self.images.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDriver};
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::rc::Rc;

    const NO_SEMAPHORE: vk::Semaphore = vk::Semaphore::null();

    fn created(drv: &MockDriver) -> (Swapchain, SwapchainCallbacks) {
        let mut swapchain = Swapchain::new();
        let mut callbacks = SwapchainCallbacks::default();
        swapchain
            .create(drv, &mut callbacks, true, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap();
        (swapchain, callbacks)
    }

    fn record_callbacks(callbacks: &mut SwapchainCallbacks) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let on_destroy = Rc::clone(&log);
        callbacks.on_destroy.push(move |sc: &Swapchain| {
            on_destroy
                .borrow_mut()
                .push(format!("destroy {}", sc.image_views().len()));
            Ok(())
        });
        let on_create = Rc::clone(&log);
        callbacks.on_create.push(move |sc: &Swapchain| {
            on_create
                .borrow_mut()
                .push(format!("create {}", sc.image_views().len()));
            Ok(())
        });
        log
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn image_count_adds_one_within_the_limit() {
        assert_eq!(image_count(&caps(2, 3)), 3);
        assert_eq!(image_count(&caps(2, 8)), 3);
        assert_eq!(image_count(&caps(3, 3)), 3);
        assert_eq!(image_count(&caps(2, 0)), 2);
    }

    #[test]
    fn undefined_extent_clamps_the_default_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1000,
                height: 1000,
            },
            ..Default::default()
        };
        assert_eq!(
            swapchain_extent(&caps, DEFAULT_WINDOW_SIZE),
            vk::Extent2D {
                width: 1000,
                height: 720
            }
        );
        let defined = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..caps
        };
        assert_eq!(swapchain_extent(&defined, DEFAULT_WINDOW_SIZE).width, 800);
    }

    #[test]
    fn composite_alpha_prefers_inherit_then_lowest_bit() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::INHERIT
                | vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        };
        assert_eq!(composite_alpha(&c), vk::CompositeAlphaFlagsKHR::INHERIT);
        c.supported_composite_alpha = vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
            | vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED;
        assert_eq!(composite_alpha(&c), vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED);
    }

    #[test]
    fn usage_adds_transfer_bits_when_supported() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
            ..Default::default()
        };
        assert_eq!(
            image_usage(&c),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
        );
        c.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        assert_eq!(image_usage(&c), vk::ImageUsageFlags::COLOR_ATTACHMENT);
    }

    #[test]
    fn mailbox_only_when_uncapped_and_available() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(present_mode(&both, true), vk::PresentModeKHR::FIFO);
        assert_eq!(present_mode(&both, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn default_format_order() {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let f = |format| vk::SurfaceFormatKHR {
            format,
            color_space: srgb,
        };
        let both = [f(vk::Format::B8G8R8A8_UNORM), f(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            default_surface_format(&both).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        let odd = [f(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert_eq!(default_surface_format(&odd), Some(odd[0]));
        assert_eq!(default_surface_format(&[]), None);
    }

    #[test]
    fn format_match_on_color_space_alone() {
        let available = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let any_srgb = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(match_surface_format(&available, any_srgb), Some(available[0]));
        let hdr = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        };
        assert_eq!(match_surface_format(&available, hdr), None);
    }

    #[test]
    fn create_fills_images_and_views_together() {
        let drv = MockDriver::new();
        let (sc, _) = created(&drv);
        assert_eq!(sc.state(), SwapchainState::Created);
        assert_eq!(sc.params().min_image_count, 3);
        assert_eq!(sc.images().len(), 3);
        assert_eq!(sc.image_views().len(), 3);
        assert_eq!(sc.extent(), DEFAULT_WINDOW_SIZE);
        assert_eq!(sc.format(), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(sc.params().present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(sc.params().composite_alpha, vk::CompositeAlphaFlagsKHR::INHERIT);
    }

    #[test]
    fn image_count_when_max_equals_min() {
        let drv = MockDriver::new();
        {
            let mut caps = drv.caps.borrow_mut();
            caps.min_image_count = 3;
            caps.max_image_count = 3;
        }
        let (sc, _) = created(&drv);
        assert_eq!(sc.image_count(), 3);
        assert_eq!(sc.image_views().len(), 3);
    }

    #[test]
    fn image_count_without_a_maximum_stays_at_the_minimum() {
        let drv = MockDriver::new();
        drv.caps.borrow_mut().max_image_count = 0;
        let (sc, _) = created(&drv);
        assert_eq!(sc.params().min_image_count, 2);
        assert_eq!(sc.image_views().len(), 2);
    }

    #[test]
    fn init_on_one_family_picks_shared_queues_and_image_count() {
        use crate::queue::{select_queue_families, QueueCapabilities};

        let families = [vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            queue_count: 1,
            ..Default::default()
        }];
        let wanted = QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENT;

        for ((min, max), expected) in [((2, 3), 3), ((3, 3), 3)] {
            let indices = select_queue_families(&families, wanted, |_| Ok(true))
                .unwrap()
                .unwrap();
            assert_eq!(indices.graphics, Some(0));
            assert_eq!(indices.present, indices.graphics);
            assert_eq!(indices.compute, None);

            let drv = MockDriver::new();
            {
                let mut caps = drv.caps.borrow_mut();
                caps.min_image_count = min;
                caps.max_image_count = max;
            }
            let (sc, _) = created(&drv);
            assert_eq!(
                sc.extent(),
                vk::Extent2D {
                    width: 1280,
                    height: 720
                }
            );
            assert_eq!(sc.image_count(), expected);
        }
    }

    #[test]
    fn create_runs_create_callbacks() {
        let drv = MockDriver::new();
        let mut sc = Swapchain::new();
        let mut callbacks = SwapchainCallbacks::default();
        let log = record_callbacks(&mut callbacks);
        sc.create(&drv, &mut callbacks, false, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap();
        assert_eq!(*log.borrow(), ["create 3"]);
        assert_eq!(sc.params().present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn second_create_is_ignored() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let handle = sc.handle();
        sc.create(&drv, &mut callbacks, true, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap();
        assert_eq!(sc.handle(), handle);
        assert_eq!(drv.live_swapchains().len(), 1);
    }

    #[test]
    fn failed_create_leaves_nothing_behind() {
        let drv = MockDriver::new();
        drv.fail_create
            .set(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        let mut sc = Swapchain::new();
        let mut callbacks = SwapchainCallbacks::default();
        let log = record_callbacks(&mut callbacks);
        let err = sc
            .create(&drv, &mut callbacks, true, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap_err();
        assert_eq!(err.code(), vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(sc.state(), SwapchainState::Uninitialized);
        assert!(sc.images().is_empty() && sc.image_views().is_empty());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn failed_view_rolls_back_the_whole_build() {
        let drv = MockDriver::new();
        drv.fail_view_at.set(Some(1));
        let mut sc = Swapchain::new();
        let mut callbacks = SwapchainCallbacks::default();
        assert!(sc
            .create(&drv, &mut callbacks, true, vk::SwapchainCreateFlagsKHR::empty())
            .is_err());
        assert!(sc.images().is_empty());
        assert!(sc.image_views().is_empty());
        assert_eq!(drv.live_views(), 0);
        assert!(drv.live_swapchains().is_empty());
        assert_eq!(sc.state(), SwapchainState::Uninitialized);
    }

    #[test]
    fn missing_formats_or_modes_are_unrecoverable() {
        let drv = MockDriver::new();
        drv.formats.borrow_mut().clear();
        let mut sc = Swapchain::new();
        let mut cb = SwapchainCallbacks::default();
        let err = sc
            .create(&drv, &mut cb, true, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap_err();
        assert!(matches!(err, Error::NoSurfaceFormat));
        assert!(err.is_unrecoverable());

        let drv = MockDriver::new();
        drv.modes.borrow_mut().clear();
        let mut sc = Swapchain::new();
        let err = sc
            .create(&drv, &mut cb, true, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap_err();
        assert!(matches!(err, Error::NoPresentMode));
    }

    #[test]
    fn zero_extent_recreate_is_a_no_op() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let log = record_callbacks(&mut callbacks);
        let before = sc.handle();
        drv.set_extent(0, 720);
        drv.clear_calls();
        assert_eq!(sc.recreate(&drv, &mut callbacks).unwrap(), Recreate::Skipped);
        assert_eq!(sc.handle(), before);
        assert_eq!(sc.state(), SwapchainState::Created);
        assert_eq!(drv.calls(), [Call::Capabilities]);
        assert!(log.borrow().is_empty());

        drv.set_extent(1280, 0);
        assert_eq!(sc.recreate(&drv, &mut callbacks).unwrap(), Recreate::Skipped);
        assert_eq!(sc.handle(), before);
    }

    #[test]
    fn recreate_passes_the_old_handle_and_waits_first() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let old = sc.handle();
        drv.set_extent(800, 600);
        drv.clear_calls();
        sc.recreate(&drv, &mut callbacks).unwrap();
        let calls = drv.calls();
        assert_eq!(calls[0], Call::Capabilities);
        assert_eq!(calls[1], Call::WaitIdle);
        assert!(matches!(calls[2], Call::DestroyView(_)));
        assert!(calls.contains(&Call::CreateSwapchain {
            handle: sc.handle().as_raw(),
            old: old.as_raw(),
        }));
        assert_eq!(
            sc.extent(),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        assert_eq!(sc.images().len(), sc.image_views().len());
        assert_eq!(drv.live_views(), 3);
        assert!(!drv.destroyed_swapchains().contains(&old.as_raw()));
    }

    #[test]
    fn replaced_swapchain_dies_at_the_next_acquire() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let first = sc.handle();
        assert_eq!(sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap(), Some(0));

        drv.push_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        sc.present(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
        let second = sc.handle();
        assert_ne!(first, second);
        assert_eq!(sc.retired_count(), 1);
        assert!(drv.destroyed_swapchains().is_empty());

        drv.clear_calls();
        sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
        assert_eq!(
            drv.calls(),
            [
                Call::DestroySwapchain(first.as_raw()),
                Call::Acquire(second.as_raw()),
            ]
        );
        assert_eq!(sc.retired_count(), 0);
        assert_eq!(drv.live_swapchains(), [second.as_raw()]);
    }

    #[test]
    fn retired_handles_live_exactly_one_acquire_cycle() {
        // Per cycle: how many recreations happen between two acquires.
        for pattern in [vec![0, 1, 0, 2], vec![3, 0, 1], vec![1, 1, 1, 1]] {
            let drv = MockDriver::new();
            let (mut sc, mut callbacks) = created(&drv);
            let mut replaced: Vec<u64> = Vec::new();
            for recreations in pattern {
                sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
                for handle in replaced.drain(..) {
                    assert!(drv.destroyed_swapchains().contains(&handle));
                }
                for _ in 0..recreations {
                    let old = sc.handle().as_raw();
                    sc.recreate(&drv, &mut callbacks).unwrap();
                    replaced.push(old);
                }
                sc.present(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
                for handle in &replaced {
                    assert!(!drv.destroyed_swapchains().contains(handle));
                }
            }
        }
    }

    #[test]
    fn out_of_date_present_heals_before_the_next_acquire() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let log = record_callbacks(&mut callbacks);
        sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
        drv.push_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        sc.present(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
        let next = sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE);
        assert!(matches!(next, Ok(Some(_))));
        assert_eq!(*log.borrow(), ["destroy 3", "create 3"]);
    }

    #[test]
    fn suboptimal_present_recreates_too() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let before = sc.handle();
        sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
        drv.push_present(Ok(true));
        sc.present(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
        assert_ne!(sc.handle(), before);
        assert_eq!(sc.state(), SwapchainState::Created);
    }

    #[test]
    fn acquire_retries_after_out_of_date() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let log = record_callbacks(&mut callbacks);
        let before = sc.handle();
        drv.push_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        drv.push_acquire(Ok((2, false)));
        assert_eq!(sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap(), Some(2));
        assert_eq!(sc.current_image_index(), 2);
        assert_ne!(sc.handle(), before);
        assert_eq!(sc.retired_count(), 1);
        assert_eq!(*log.borrow(), ["destroy 3", "create 3"]);
    }

    #[test]
    fn acquire_retries_after_suboptimal() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        drv.push_acquire(Ok((1, true)));
        assert_eq!(sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap(), Some(0));
        assert_eq!(sc.retired_count(), 1);
    }

    #[test]
    fn minimized_window_skips_the_frame_then_recovers() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        drv.push_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        drv.set_extent(0, 0);
        assert_eq!(sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap(), None);
        assert_eq!(sc.state(), SwapchainState::Stale);

        drv.set_extent(640, 480);
        assert_eq!(sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap(), Some(0));
        assert_eq!(sc.state(), SwapchainState::Created);
        assert_eq!(sc.extent().width, 640);
    }

    #[test]
    fn other_acquire_failures_propagate() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        drv.push_acquire(Err(vk::Result::ERROR_DEVICE_LOST));
        let err = sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap_err();
        assert_eq!(err.code(), vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(sc.state(), SwapchainState::Created);
    }

    #[test]
    fn other_present_failures_propagate() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let before = sc.handle();
        sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE).unwrap();
        drv.push_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        let err = sc.present(&drv, &mut callbacks, NO_SEMAPHORE).unwrap_err();
        assert_eq!(err.code(), vk::Result::ERROR_SURFACE_LOST_KHR);
        assert_eq!(sc.handle(), before);
    }

    #[test]
    fn acquire_before_create_is_an_error() {
        let drv = MockDriver::new();
        let mut sc = Swapchain::new();
        let mut callbacks = SwapchainCallbacks::default();
        assert!(matches!(
            sc.acquire(&drv, &mut callbacks, NO_SEMAPHORE),
            Err(Error::NotCreated("swapchain"))
        ));
        assert!(drv.calls().is_empty());
    }

    #[test]
    fn set_surface_format_recreates_an_existing_swapchain() {
        let drv = MockDriver::new();
        drv.formats.borrow_mut().push(vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        });
        let (mut sc, mut callbacks) = created(&drv);
        let before = sc.handle();

        let missing = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let err = sc
            .set_surface_format(&drv, &mut callbacks, missing)
            .unwrap_err();
        assert_eq!(err.code(), vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        assert_eq!(sc.handle(), before);

        let scrgb = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        sc.set_surface_format(&drv, &mut callbacks, scrgb).unwrap();
        assert_eq!(sc.format(), vk::Format::R16G16B16A16_SFLOAT);
        assert_ne!(sc.handle(), before);
    }

    #[test]
    fn format_chosen_before_create_is_kept() {
        let drv = MockDriver::new();
        let mut sc = Swapchain::new();
        let mut callbacks = SwapchainCallbacks::default();
        let bgra = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        sc.set_surface_format(&drv, &mut callbacks, bgra).unwrap();
        assert!(drv.live_swapchains().is_empty());
        sc.create(&drv, &mut callbacks, true, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap();
        assert_eq!(sc.params().surface_format(), bgra);
        // formats were only asked for once
        let formats = drv.calls().iter().filter(|c| **c == Call::Formats).count();
        assert_eq!(formats, 1);
    }

    #[test]
    fn frame_rate_toggle_rebuilds_only_on_change() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let before = sc.handle();
        sc.set_limit_frame_rate(&drv, &mut callbacks, true).unwrap();
        assert_eq!(sc.handle(), before);
        sc.set_limit_frame_rate(&drv, &mut callbacks, false).unwrap();
        assert_eq!(sc.params().present_mode, vk::PresentModeKHR::MAILBOX);
        assert_ne!(sc.handle(), before);
    }

    #[test]
    fn destroy_releases_everything() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        let log = record_callbacks(&mut callbacks);
        sc.recreate(&drv, &mut callbacks).unwrap();
        sc.destroy(&drv, &mut callbacks);
        assert_eq!(sc.state(), SwapchainState::Destroyed);
        assert!(drv.live_swapchains().is_empty());
        assert_eq!(drv.live_views(), 0);
        assert_eq!(sc.retired_count(), 0);
        assert_eq!(*log.borrow(), ["destroy 3", "create 3", "destroy 3"]);
    }

    #[test]
    fn reset_allows_a_fresh_create() {
        let drv = MockDriver::new();
        let (mut sc, mut callbacks) = created(&drv);
        sc.set_window_extent(vk::Extent2D {
            width: 640,
            height: 480,
        });
        sc.reset(&drv, &mut callbacks);
        assert_eq!(sc.state(), SwapchainState::Uninitialized);
        assert_eq!(sc.params(), &SwapchainParams::default());
        sc.create(&drv, &mut callbacks, true, vk::SwapchainCreateFlagsKHR::empty())
            .unwrap();
        assert_eq!(sc.state(), SwapchainState::Created);
    }
}
