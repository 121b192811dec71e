// SPDX-License-Identifier: CEPL-1.0
//! Raw status codes that must not be dropped on the floor.
//!
//! Most of the crate returns [`crate::Result`], which the compiler already
//! forces callers to look at. `VkStatus` is for the places where a bare
//! `vk::Result` is the value (fence polling, for one): if it carries a failure
//! and is dropped without being examined, the registered failure hook runs and
//! then the thread panics with the code as payload.

use std::sync::{PoisonError, RwLock};

use ash::vk;
use tracing::error;

use crate::error::{Error, Result};

/// `VK_RESULT_MAX_ENUM`, used as the code for failures with no native code.
pub const RESULT_MAX_ENUM: vk::Result = vk::Result::from_raw(i32::MAX);

type FailureHook = Box<dyn Fn(vk::Result) + Send + Sync>;

static FAILURE_HOOK: RwLock<Option<FailureHook>> = RwLock::new(None);

/// Runs right before an unexamined failure escalates.
pub fn set_failure_hook(hook: impl Fn(vk::Result) + Send + Sync + 'static) {
    *FAILURE_HOOK.write().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
}

pub fn clear_failure_hook() {
    *FAILURE_HOOK.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Negative codes are errors. Positive ones (`NOT_READY`, `SUBOPTIMAL_KHR`, ...)
/// are not.
pub fn is_failure(code: vk::Result) -> bool {
    code.as_raw() < 0 || code == RESULT_MAX_ENUM
}

#[must_use = "an unexamined failing VkStatus panics when dropped"]
#[derive(Debug)]
pub struct VkStatus {
    code: vk::Result,
}

impl VkStatus {
    pub fn new(code: vk::Result) -> Self {
        Self { code }
    }

    /// Takes the code out, which counts as examining it.
    pub fn code(mut self) -> vk::Result {
        std::mem::replace(&mut self.code, vk::Result::SUCCESS)
    }

    /// Success codes come back as `Ok` (they may still be `NOT_READY` and friends).
    pub fn into_result(self) -> Result<vk::Result> {
        let code = self.code();
        if is_failure(code) {
            Err(Error::Vulkan {
                op: "complete the operation",
                code,
            })
        } else {
            Ok(code)
        }
    }
}

impl From<VkStatus> for vk::Result {
    fn from(status: VkStatus) -> Self {
        status.code()
    }
}

impl<T> From<Result<T>> for VkStatus {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => VkStatus::new(vk::Result::SUCCESS),
            Err(err) => VkStatus::new(err.code()),
        }
    }
}

impl Drop for VkStatus {
    fn drop(&mut self) {
        let code = self.code;
        if !is_failure(code) {
            return;
        }
        error!(
            target: "status",
            "Unchecked failure escalated!\nError code: {}",
            code.as_raw()
        );
        {
            let hook = FAILURE_HOOK.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hook) = hook.as_ref() {
                hook(code);
            }
        }
        if !std::thread::panicking() {
            std::panic::panic_any(code);
        }
    }
}
