// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

use crate::status::RESULT_MAX_ENUM;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to {op}: {code}")]
    Vulkan { op: &'static str, code: vk::Result },

    #[error("no physical device supports Vulkan")]
    NoPhysicalDevice,

    #[error("physical device index {index} is out of range ({count} available)")]
    DeviceIndexOutOfRange { index: usize, count: usize },

    #[error("physical device {0} has no suitable queue family combination")]
    NoSuitableQueueFamily(usize),

    #[error("no physical device satisfies the requested queue capabilities")]
    NoSuitablePhysicalDevice,

    #[error("surface reports no supported format")]
    NoSurfaceFormat,

    #[error("surface format {0:?} is not supported")]
    FormatNotSupported(vk::SurfaceFormatKHR),

    #[error("surface reports no present mode")]
    NoPresentMode,

    #[error("{0} has not been created")]
    NotCreated(&'static str),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("failed to read shader binary {path}: {source}")]
    ShaderFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid SPIR-V: {0}")]
    InvalidSpirv(#[source] std::io::Error),
}

impl Error {
    /// The native code closest to this error. Errors without a native
    /// counterpart report `VK_RESULT_MAX_ENUM`.
    pub fn code(&self) -> vk::Result {
        match self {
            Error::Vulkan { code, .. } => *code,
            Error::FormatNotSupported(_) => vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            _ => RESULT_MAX_ENUM,
        }
    }

    /// Setup failures with no fallback; the process should give up.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            Error::NoPhysicalDevice
                | Error::NoSuitableQueueFamily(_)
                | Error::NoSuitablePhysicalDevice
                | Error::NoSurfaceFormat
                | Error::NoPresentMode
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Wraps a native `VkResult` once at the call site: logs the failure under
/// `$component` and turns it into [`Error::Vulkan`].
macro_rules! vk_check {
    ($result:expr, $component:literal, $what:literal) => {
        ($result).map_err(|code: ::ash::vk::Result| {
            ::tracing::error!(
                target: $component,
                "Failed to {}!\nError code: {}",
                $what,
                code.as_raw()
            );
            $crate::error::Error::Vulkan { op: $what, code }
        })
    };
}
pub(crate) use vk_check;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_variant() {
        let err = Error::Vulkan {
            op: "create a fence",
            code: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        };
        assert_eq!(err.code(), vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(err.to_string().starts_with("failed to create a fence: "));
        assert_eq!(
            Error::FormatNotSupported(vk::SurfaceFormatKHR::default()).code(),
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED
        );
        assert_eq!(Error::NoPhysicalDevice.code(), RESULT_MAX_ENUM);
    }

    #[test]
    fn only_setup_dead_ends_are_unrecoverable() {
        assert!(Error::NoPhysicalDevice.is_unrecoverable());
        assert!(Error::NoPresentMode.is_unrecoverable());
        assert!(!Error::NotCreated("swapchain").is_unrecoverable());
        let transient = Error::Vulkan {
            op: "present",
            code: vk::Result::ERROR_DEVICE_LOST,
        };
        assert!(!transient.is_unrecoverable());
    }

    #[test]
    fn window_handle_errors_keep_their_source() {
        use std::error::Error as _;

        let err = Error::from(raw_window_handle::HandleError::Unavailable);
        assert!(err.to_string().starts_with("window handle unavailable: "));
        assert!(err.source().is_some());
        assert!(!err.is_unrecoverable());
    }

    #[test]
    fn vk_check_maps_failures() {
        fn call(r: ash::prelude::VkResult<u32>) -> Result<u32> {
            vk_check!(r, "test", "do the thing")
        }
        assert_eq!(call(Ok(3)).unwrap(), 3);
        let err = call(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert!(matches!(
            err,
            Error::Vulkan { op: "do the thing", code } if code == vk::Result::ERROR_DEVICE_LOST
        ));
    }
}
