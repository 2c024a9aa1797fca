// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Queue
//!
//! Every engine owns a transfer queue for its one-shot scratch work plus one queue for each
//! capability its profile requests.  Capabilities that land in the same family share a single
//! `DeviceQueueCreateInfo` and are spread over that family's queues as far as priorities allow.
//!

use ash::vk;
use smallvec::SmallVec;

use crate::VulkanError;
use crate::device::family_with;

/// Priorities handed to every queue create info.  Also the cap on queues per family.
pub static QUEUE_PRIORITIES: [f32; 4] = [1.0; 4];

/// Order in which capabilities claim queues.  Transfer goes first so scratch work gets index 0.
const CLAIM_ORDER: [vk::QueueFlags; 5] = [
    vk::QueueFlags::TRANSFER,
    vk::QueueFlags::GRAPHICS,
    vk::QueueFlags::COMPUTE,
    vk::QueueFlags::VIDEO_ENCODE_KHR,
    vk::QueueFlags::VIDEO_DECODE_KHR,
];

/// Where one capability's queue lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSlot {
    pub capability: vk::QueueFlags,
    pub family: u32,
    pub index: u32,
}

/// Deduplicated queue requests, computed before the device exists.
#[derive(Debug)]
pub struct QueuePlan {
    slots: SmallVec<QueueSlot, 5>,
    /// `(family, queue count)` in first-claim order.
    families: SmallVec<(u32, u32), 5>,
}

impl QueuePlan {
    /// Assign every requested capability, plus transfer, to a queue.
    pub fn new(
        families: &[vk::QueueFamilyProperties],
        requested: vk::QueueFlags,
    ) -> Result<Self, VulkanError> {
        let wanted = requested | vk::QueueFlags::TRANSFER;
        let mut plan = QueuePlan {
            slots: SmallVec::new(),
            families: SmallVec::new(),
        };

        for capability in CLAIM_ORDER.into_iter().filter(|c| wanted.contains(*c)) {
            let family = family_with(families, capability)
                .ok_or(VulkanError::QueueNotFound(capability))?;
            let cap = (families[family as usize].queue_count as usize).min(QUEUE_PRIORITIES.len())
                as u32;

            let index = match plan.families.iter_mut().find(|(f, _)| *f == family) {
                Some((_, count)) if *count < cap => {
                    *count += 1;
                    *count - 1
                }
                // NOTE out of queues in this family, share the last one
                Some((_, count)) => *count - 1,
                None => {
                    plan.families.push((family, 1));
                    0
                }
            };

            plan.slots.push(QueueSlot {
                capability,
                family,
                index,
            });
        }

        Ok(plan)
    }

    pub fn slots(&self) -> &[QueueSlot] {
        &self.slots
    }

    /// `(family, queue count)` pairs, one per distinct family.
    pub fn families(&self) -> &[(u32, u32)] {
        &self.families
    }

    pub fn queue_cis(&self) -> Vec<vk::DeviceQueueCreateInfo<'static>> {
        self.families
            .iter()
            .map(|(family, count)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(*family)
                    .queue_priorities(&QUEUE_PRIORITIES[..*count as usize])
            })
            .collect()
    }
}

/// A retrieved device queue.
#[derive(Clone, Copy, Debug)]
pub struct Queue {
    pub queue: vk::Queue,
    pub family: u32,
    pub capability: vk::QueueFlags,
}

/// Capability to queue mapping for a live device.
pub struct QueueTable {
    queues: SmallVec<Queue, 5>,
}

impl QueueTable {
    pub fn new(device: &ash::Device, plan: &QueuePlan) -> Self {
        let queues = plan
            .slots()
            .iter()
            .map(|slot| Queue {
                queue: unsafe { device.get_device_queue(slot.family, slot.index) },
                family: slot.family,
                capability: slot.capability,
            })
            .collect();
        // NOTE device owns queues.  Handles are just dropped with the table.
        QueueTable { queues }
    }

    /// The queue serving `capability`.
    pub fn get(&self, capability: vk::QueueFlags) -> Result<Queue, VulkanError> {
        self.queues
            .iter()
            .find(|q| q.capability.contains(capability))
            .copied()
            .ok_or(VulkanError::QueueNotFound(capability))
    }

    pub fn transfer(&self) -> Result<Queue, VulkanError> {
        self.get(vk::QueueFlags::TRANSFER)
    }

    pub fn graphics(&self) -> Result<Queue, VulkanError> {
        self.get(vk::QueueFlags::GRAPHICS)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn shared_family_gets_one_entry() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            16,
        )];
        let plan = QueuePlan::new(
            &families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap();

        assert_eq!(plan.families(), &[(0, 3)]);
        let indices: Vec<_> = plan.slots().iter().map(|s| (s.capability, s.index)).collect();
        assert_eq!(
            indices,
            vec![
                (vk::QueueFlags::TRANSFER, 0),
                (vk::QueueFlags::GRAPHICS, 1),
                (vk::QueueFlags::COMPUTE, 2),
            ]
        );
        let cis = plan.queue_cis();
        assert_eq!(cis.len(), 1);
        assert_eq!(cis[0].queue_count, 3);
    }

    #[test]
    fn count_capped_by_family() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            1,
        )];
        let plan = QueuePlan::new(
            &families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap();
        assert_eq!(plan.families(), &[(0, 1)]);
        assert!(plan.slots().iter().all(|s| s.index == 0));
    }

    #[test]
    fn distinct_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let plan = QueuePlan::new(&families, vk::QueueFlags::GRAPHICS).unwrap();
        assert_eq!(plan.families(), &[(1, 1), (0, 1)]);
        assert_eq!(
            plan.slots()[1],
            QueueSlot {
                capability: vk::QueueFlags::GRAPHICS,
                family: 0,
                index: 0
            }
        );
    }

    #[test]
    fn missing_capability_fails() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1)];
        assert!(matches!(
            QueuePlan::new(&families, vk::QueueFlags::VIDEO_DECODE_KHR),
            Err(VulkanError::QueueNotFound(f)) if f == vk::QueueFlags::VIDEO_DECODE_KHR
        ));
    }
}
