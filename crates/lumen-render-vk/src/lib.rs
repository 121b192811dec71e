// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: owning handle wrappers, the device context and swapchain
//! lifecycle, and a renderer that drives them.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod callbacks;
pub mod context;
pub mod error;
pub mod frame;
pub mod handles;
pub mod queue;
pub mod renderer;
pub mod screen;
pub mod status;
pub mod swapchain;

#[cfg(test)]
mod mock;

pub use callbacks::CallbackList;
pub use context::{DeviceContext, LogicalDevice};
pub use error::{Error, Result};
pub use queue::{QueueCapabilities, QueueFamilyIndices};
pub use renderer::VkRenderer;
pub use screen::{create_screen_targets, RenderPassWithFramebuffers, ScreenTargets};
pub use status::{clear_failure_hook, set_failure_hook, VkStatus};
pub use swapchain::{Recreate, Swapchain, SwapchainState};
