// SPDX-License-Identifier: CEPL-1.0
//! Per-frame synchronization: the fence guarding a command buffer and the two
//! semaphores ordering acquire, render and present.

use std::sync::Arc;

use ash::vk;
use tracing::error;

use crate::context::LogicalDevice;
use crate::error::{Error, Result};
use crate::handles::{CommandBuffer, CommandPool, Fence, Semaphore};

/// Presentation-queue side of a queue family ownership transfer.
#[derive(Debug)]
pub struct OwnershipTransfer {
    pub cmd: CommandBuffer,
    pub transferred: Semaphore,
    _pool: CommandPool,
}

#[derive(Debug)]
pub struct FrameSync {
    /// Created signaled so the first wait returns at once.
    pub in_flight: Fence,
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    pub cmd: CommandBuffer,
    pub ownership: Option<OwnershipTransfer>,
    _pool: CommandPool,
}

fn one_buffer(pool: &CommandPool) -> Result<CommandBuffer> {
    pool.allocate_buffers(1, vk::CommandBufferLevel::PRIMARY)?
        .pop()
        .ok_or(Error::NotCreated("command buffer"))
}

impl FrameSync {
    pub fn new(device: &LogicalDevice) -> Result<Self> {
        let raw = device.raw();
        let families = device.families();
        let graphics = families.graphics.ok_or(Error::NotCreated("graphics queue"))?;
        let pool = CommandPool::new(
            raw,
            graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let cmd = one_buffer(&pool)?;

        let ownership = match families.present {
            Some(present) if device.present_is_separate() => {
                let pool = CommandPool::new(
                    raw,
                    present,
                    vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                )?;
                Some(OwnershipTransfer {
                    cmd: one_buffer(&pool)?,
                    transferred: Semaphore::new(raw)?,
                    _pool: pool,
                })
            }
            _ => None,
        };

        Ok(Self {
            in_flight: Fence::new(raw, true)?,
            image_available: Semaphore::new(raw)?,
            render_finished: Semaphore::new(raw)?,
            cmd,
            ownership,
            _pool: pool,
        })
    }

    /// Swaps in a signaled fence and an unsignaled acquire semaphore. The
    /// device must be idle.
    pub fn replace_sync(&mut self, device: &Arc<ash::Device>) -> Result<()> {
        self.in_flight = Fence::new(device, true)?;
        self.image_available = Semaphore::new(device)?;
        Ok(())
    }
}

/// The steps of one frame, driven in order by [`run_frame`].
pub trait FrameSteps {
    fn wait_in_flight(&mut self) -> Result<()>;
    /// `None` when no image could be acquired this frame.
    fn acquire(&mut self) -> Result<Option<u32>>;
    fn record(&mut self, image_index: u32) -> Result<()>;
    fn reset_in_flight(&mut self) -> Result<()>;
    /// Consumes the acquire semaphore and signals the in-flight fence on completion.
    fn submit(&mut self) -> Result<()>;
    fn present(&mut self) -> Result<()>;
    /// Called when a step between acquire and submit failed. Must leave the
    /// acquire semaphore unsignaled and the in-flight fence signaled or pending.
    /// `fence_reset` tells whether the fence was already reset.
    fn restore(&mut self, fence_reset: bool) -> Result<()>;
    fn advance(&mut self);
}

fn record_and_submit<S: FrameSteps + ?Sized>(
    steps: &mut S,
    image_index: u32,
    fence_reset: &mut bool,
) -> Result<()> {
    steps.record(image_index)?;
    steps.reset_in_flight()?;
    *fence_reset = true;
    steps.submit()
}

/// Wait, acquire, record, reset, submit, present, advance.
///
/// Returns `Ok(false)` when the frame was skipped. A failure after a
/// successful acquire restores the frame first, so the next call can still
/// wait on its fence.
pub fn run_frame<S: FrameSteps + ?Sized>(steps: &mut S) -> Result<bool> {
    steps.wait_in_flight()?;
    let Some(image_index) = steps.acquire()? else {
        return Ok(false);
    };

    let mut fence_reset = false;
    if let Err(err) = record_and_submit(steps, image_index, &mut fence_reset) {
        if let Err(restore_err) = steps.restore(fence_reset) {
            error!(target: "renderer", "Failed to restore the frame after an error: {restore_err}");
        }
        return Err(err);
    }

    let presented = steps.present();
    steps.advance();
    presented.map(|()| true)
}

/// Fixed set of per-frame resources used round-robin.
#[derive(Debug)]
pub struct FrameRing<T> {
    items: Vec<T>,
    next: usize,
}

impl<T> FrameRing<T> {
    /// Panics on an empty set; callers clamp the count to at least one.
    pub fn new(items: Vec<T>) -> Self {
        assert!(!items.is_empty(), "a frame ring needs at least one frame");
        Self { items, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current(&self) -> &T {
        &self.items[self.next]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.items[self.next]
    }

    pub fn index(&self) -> usize {
        self.next
    }

    pub fn advance(&mut self) {
        self.next = (self.next + 1) % self.items.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_is_reused() {
        let mut ring = FrameRing::new(vec!['a']);
        for _ in 0..3 {
            assert_eq!(*ring.current(), 'a');
            ring.advance();
        }
        assert_eq!(ring.index(), 0);
    }

    #[test]
    fn frames_cycle_in_order() {
        let mut ring = FrameRing::new(vec![0, 1, 2]);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(*ring.current());
            ring.advance();
        }
        assert_eq!(seen, [0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    #[should_panic(expected = "at least one frame")]
    fn empty_ring_is_rejected() {
        let _ = FrameRing::<u8>::new(Vec::new());
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Step {
        Record,
        Reset,
        Submit,
        Present,
    }

    /// Tracks the fence and acquire semaphore the way the device would.
    struct ScriptedFrame {
        fence_signaled: bool,
        /// A submitted batch will signal the fence.
        fence_pending: bool,
        semaphore_pending: bool,
        acquire_skips: bool,
        fail_at: Option<Step>,
        restore_fails: bool,
        advanced: usize,
        restored: Vec<bool>,
    }

    impl ScriptedFrame {
        fn new() -> Self {
            Self {
                fence_signaled: true,
                fence_pending: false,
                semaphore_pending: false,
                acquire_skips: false,
                fail_at: None,
                restore_fails: false,
                advanced: 0,
                restored: Vec::new(),
            }
        }

        fn step(&self, step: Step) -> Result<()> {
            if self.fail_at == Some(step) {
                return Err(Error::Vulkan {
                    op: "run a frame step",
                    code: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            Ok(())
        }

        /// Lets the GPU finish whatever was submitted.
        fn complete(&mut self) {
            if self.fence_pending {
                self.fence_pending = false;
                self.fence_signaled = true;
            }
        }
    }

    impl FrameSteps for ScriptedFrame {
        fn wait_in_flight(&mut self) -> Result<()> {
            self.complete();
            assert!(self.fence_signaled, "waiting on a fence nothing will signal");
            Ok(())
        }

        fn acquire(&mut self) -> Result<Option<u32>> {
            if self.acquire_skips {
                return Ok(None);
            }
            assert!(!self.semaphore_pending, "acquire semaphore reused while pending");
            self.semaphore_pending = true;
            Ok(Some(0))
        }

        fn record(&mut self, _image_index: u32) -> Result<()> {
            self.step(Step::Record)
        }

        fn reset_in_flight(&mut self) -> Result<()> {
            self.step(Step::Reset)?;
            self.fence_signaled = false;
            Ok(())
        }

        fn submit(&mut self) -> Result<()> {
            self.step(Step::Submit)?;
            self.semaphore_pending = false;
            self.fence_pending = true;
            Ok(())
        }

        fn present(&mut self) -> Result<()> {
            self.step(Step::Present)
        }

        fn restore(&mut self, fence_reset: bool) -> Result<()> {
            self.restored.push(fence_reset);
            if self.restore_fails {
                return Err(Error::NotCreated("device"));
            }
            self.fence_signaled = false;
            self.semaphore_pending = false;
            self.fence_pending = true;
            Ok(())
        }

        fn advance(&mut self) {
            self.advanced += 1;
        }
    }

    #[test]
    fn a_full_frame_submits_presents_and_advances() {
        let mut frame = ScriptedFrame::new();
        assert!(run_frame(&mut frame).unwrap());
        assert!(run_frame(&mut frame).unwrap());
        assert_eq!(frame.advanced, 2);
        assert!(frame.restored.is_empty());
    }

    #[test]
    fn skipped_acquire_leaves_the_fence_signaled() {
        let mut frame = ScriptedFrame::new();
        frame.acquire_skips = true;
        assert!(!run_frame(&mut frame).unwrap());
        assert!(frame.fence_signaled);
        assert_eq!(frame.advanced, 0);
        frame.acquire_skips = false;
        assert!(run_frame(&mut frame).unwrap());
    }

    #[test]
    fn failed_submit_leaves_the_frame_waitable() {
        let mut frame = ScriptedFrame::new();
        frame.fail_at = Some(Step::Submit);
        assert!(run_frame(&mut frame).is_err());
        assert_eq!(frame.restored, [true]);
        assert!(!frame.semaphore_pending);
        assert_eq!(frame.advanced, 0);

        frame.fail_at = None;
        assert!(run_frame(&mut frame).unwrap());
    }

    #[test]
    fn failed_record_restores_before_the_fence_is_reset() {
        let mut frame = ScriptedFrame::new();
        frame.fail_at = Some(Step::Record);
        assert!(run_frame(&mut frame).is_err());
        assert_eq!(frame.restored, [false]);
        frame.fail_at = None;
        assert!(run_frame(&mut frame).unwrap());
    }

    #[test]
    fn failed_present_still_advances() {
        let mut frame = ScriptedFrame::new();
        frame.fail_at = Some(Step::Present);
        assert!(run_frame(&mut frame).is_err());
        assert!(frame.restored.is_empty());
        assert_eq!(frame.advanced, 1);
        frame.fail_at = None;
        assert!(run_frame(&mut frame).unwrap());
    }

    #[test]
    fn the_original_error_wins_over_a_failed_restore() {
        let mut frame = ScriptedFrame::new();
        frame.fail_at = Some(Step::Submit);
        frame.restore_fails = true;
        assert!(matches!(
            run_frame(&mut frame),
            Err(Error::Vulkan { op: "run a frame step", .. })
        ));
    }
}
