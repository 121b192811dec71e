// SPDX-License-Identifier: CEPL-1.0
//! Queue family selection.
//!
//! The scan itself is pure: it takes the family properties and a probe for
//! surface support, so the driver queries stay at the call site and can be
//! counted in tests.

use std::collections::HashMap;

use ash::prelude::VkResult;
use ash::vk;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct QueueCapabilities: u8 {
        const GRAPHICS = 1;
        const PRESENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

/// `None` plays the role of `VK_QUEUE_FAMILY_IGNORED`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    fn slot(&mut self, cap: QueueCapabilities) -> &mut Option<u32> {
        if cap == QueueCapabilities::GRAPHICS {
            &mut self.graphics
        } else if cap == QueueCapabilities::PRESENT {
            &mut self.present
        } else {
            &mut self.compute
        }
    }

    fn get(&self, cap: QueueCapabilities) -> Option<u32> {
        if cap == QueueCapabilities::GRAPHICS {
            self.graphics
        } else if cap == QueueCapabilities::PRESENT {
            self.present
        } else {
            self.compute
        }
    }

    pub fn satisfies(&self, wanted: QueueCapabilities) -> bool {
        wanted.iter().all(|cap| self.get(cap).is_some())
    }

    /// Each family once, in ascending order.
    pub fn distinct(&self) -> Vec<u32> {
        let mut families: Vec<u32> = [self.graphics, self.present, self.compute]
            .into_iter()
            .flatten()
            .collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Scans `families` once.
///
/// A family that can do everything requested wins outright. Otherwise each
/// capability goes to the first family offering it, and a family offering
/// several requested capabilities takes them all over unless they already
/// share one family. `Ok(None)` means no combination covers the request.
pub fn select_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    wanted: QueueCapabilities,
    mut supports_present: F,
) -> VkResult<Option<QueueFamilyIndices>>
where
    F: FnMut(u32) -> VkResult<bool>,
{
    let mut chosen = QueueFamilyIndices::default();
    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let mut offers = QueueCapabilities::empty();
        if wanted.contains(QueueCapabilities::GRAPHICS)
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            offers |= QueueCapabilities::GRAPHICS;
        }
        if wanted.contains(QueueCapabilities::COMPUTE)
            && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
        {
            offers |= QueueCapabilities::COMPUTE;
        }
        if wanted.contains(QueueCapabilities::PRESENT) && supports_present(index)? {
            offers |= QueueCapabilities::PRESENT;
        }
        if offers.is_empty() {
            continue;
        }
        if offers == wanted {
            for cap in wanted.iter() {
                *chosen.slot(cap) = Some(index);
            }
            break;
        }

        let mut held = offers.iter().map(|cap| chosen.get(cap));
        let first = held.next().flatten();
        let shared = first.is_some() && held.all(|other| other == first);
        if offers.bits().count_ones() > 1 && !shared {
            for cap in offers.iter() {
                *chosen.slot(cap) = Some(index);
            }
        } else {
            for cap in offers.iter() {
                if chosen.get(cap).is_none() {
                    *chosen.slot(cap) = Some(index);
                }
            }
        }
    }
    Ok(chosen.satisfies(wanted).then_some(chosen))
}

/// Remembers selections per physical device index and capability set,
/// including the ones that found nothing.
#[derive(Debug, Default)]
pub struct QueueFamilyCache {
    entries: HashMap<(usize, QueueCapabilities), Option<QueueFamilyIndices>>,
}

impl QueueFamilyCache {
    /// Returns the cached answer, or runs `select` and remembers what it found.
    /// Driver errors are not cached.
    pub fn resolve<F>(
        &mut self,
        device_index: usize,
        wanted: QueueCapabilities,
        select: F,
    ) -> VkResult<Option<QueueFamilyIndices>>
    where
        F: FnOnce() -> VkResult<Option<QueueFamilyIndices>>,
    {
        if let Some(hit) = self.entries.get(&(device_index, wanted)) {
            return Ok(*hit);
        }
        let found = select()?;
        self.entries.insert((device_index, wanted), found);
        Ok(found)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
