// SPDX-License-Identifier: CEPL-1.0
//! Scripted stand-in for the presentation engine, used by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::swapchain::{PresentationDriver, SwapchainParams};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Capabilities,
    Formats,
    PresentModes,
    CreateSwapchain { handle: u64, old: u64 },
    Images(u64),
    CreateView(u64),
    DestroyView(u64),
    DestroySwapchain(u64),
    Acquire(u64),
    Present(u64, u32),
    WaitIdle,
}

pub struct MockDriver {
    pub caps: RefCell<vk::SurfaceCapabilitiesKHR>,
    pub formats: RefCell<Vec<vk::SurfaceFormatKHR>>,
    pub modes: RefCell<Vec<vk::PresentModeKHR>>,
    pub fail_create: Cell<Option<vk::Result>>,
    /// Fails the n-th image view creation (0-based, counted across the whole run).
    pub fail_view_at: Cell<Option<usize>>,
    acquire_results: RefCell<VecDeque<VkResult<(u32, bool)>>>,
    present_results: RefCell<VecDeque<VkResult<bool>>>,
    calls: RefCell<Vec<Call>>,
    next_handle: Cell<u64>,
    views_created: Cell<usize>,
    image_counts: RefCell<HashMap<u64, u32>>,
    live_swapchains: RefCell<Vec<u64>>,
    live_views: RefCell<Vec<u64>>,
    destroyed_swapchains: RefCell<Vec<u64>>,
}

impl MockDriver {
    /// 1280x720 surface, 2..=3 images, one BGRA format, FIFO and mailbox.
    pub fn new() -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE
                | vk::CompositeAlphaFlagsKHR::INHERIT,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        };
        Self {
            caps: RefCell::new(caps),
            formats: RefCell::new(vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }]),
            modes: RefCell::new(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            fail_create: Cell::new(None),
            fail_view_at: Cell::new(None),
            acquire_results: RefCell::new(VecDeque::new()),
            present_results: RefCell::new(VecDeque::new()),
            calls: RefCell::new(Vec::new()),
            next_handle: Cell::new(0x100),
            views_created: Cell::new(0),
            image_counts: RefCell::new(HashMap::new()),
            live_swapchains: RefCell::new(Vec::new()),
            live_views: RefCell::new(Vec::new()),
            destroyed_swapchains: RefCell::new(Vec::new()),
        }
    }

    pub fn set_extent(&self, width: u32, height: u32) {
        self.caps.borrow_mut().current_extent = vk::Extent2D { width, height };
    }

    /// Queued results are consumed first; afterwards acquisition yields image 0.
    pub fn push_acquire(&self, result: VkResult<(u32, bool)>) {
        self.acquire_results.borrow_mut().push_back(result);
    }

    /// Queued results are consumed first; afterwards presentation succeeds.
    pub fn push_present(&self, result: VkResult<bool>) {
        self.present_results.borrow_mut().push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn destroyed_swapchains(&self) -> Vec<u64> {
        self.destroyed_swapchains.borrow().clone()
    }

    pub fn live_swapchains(&self) -> Vec<u64> {
        self.live_swapchains.borrow().clone()
    }

    pub fn live_views(&self) -> usize {
        self.live_views.borrow().len()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn fresh(&self) -> u64 {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        raw
    }
}

impl PresentationDriver for MockDriver {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.record(Call::Capabilities);
        Ok(*self.caps.borrow())
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        self.record(Call::Formats);
        Ok(self.formats.borrow().clone())
    }

    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        self.record(Call::PresentModes);
        Ok(self.modes.borrow().clone())
    }

    fn create_swapchain(
        &self,
        params: &SwapchainParams,
        old: vk::SwapchainKHR,
    ) -> VkResult<vk::SwapchainKHR> {
        if let Some(code) = self.fail_create.get() {
            return Err(code);
        }
        let raw = self.fresh();
        self.record(Call::CreateSwapchain {
            handle: raw,
            old: old.as_raw(),
        });
        self.image_counts
            .borrow_mut()
            .insert(raw, params.min_image_count);
        self.live_swapchains.borrow_mut().push(raw);
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.record(Call::Images(swapchain.as_raw()));
        let count = self.image_counts.borrow()[&swapchain.as_raw()];
        Ok((0..count)
            .map(|i| vk::Image::from_raw((swapchain.as_raw() << 8) | u64::from(i)))
            .collect())
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let nth = self.views_created.get();
        self.views_created.set(nth + 1);
        if self.fail_view_at.get() == Some(nth) {
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        let raw = self.fresh();
        self.record(Call::CreateView(raw));
        self.live_views.borrow_mut().push(raw);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.record(Call::DestroyView(view.as_raw()));
        self.live_views.borrow_mut().retain(|v| *v != view.as_raw());
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let raw = swapchain.as_raw();
        self.record(Call::DestroySwapchain(raw));
        self.live_swapchains.borrow_mut().retain(|s| *s != raw);
        self.destroyed_swapchains.borrow_mut().push(raw);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.record(Call::Acquire(swapchain.as_raw()));
        self.acquire_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok((0, false)))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.record(Call::Present(swapchain.as_raw(), image_index));
        self.present_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(false))
    }

    fn wait_queues_idle(&self) -> VkResult<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }
}
