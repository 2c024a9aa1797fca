// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Device Selection
//!
//! Physical devices are reduced to plain `DeviceCandidate` values before any choice is made.
//! Selection is then a pure function over the candidates, which keeps the ranking testable
//! without a driver.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::util::fixed_name;
use crate::{VkResultExt, VulkanError};

/// What selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<CString>,
}

impl DeviceCandidate {
    /// Query the properties selection cares about.
    pub fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, VulkanError> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .during("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .map(|e| fixed_name(&e.extension_name).to_owned())
            .collect();

        Ok(Self {
            name: fixed_name(&properties.device_name)
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            queue_families,
            extensions,
        })
    }

    /// Every requested capability bit is exposed by some populated family and every extension is
    /// supported.
    pub fn is_suitable(&self, flags: vk::QueueFlags, extensions: &[&CStr]) -> bool {
        let has_queues = capability_bits(flags)
            .all(|bit| family_with(&self.queue_families, bit).is_some());
        let has_extensions = extensions
            .iter()
            .all(|want| self.extensions.iter().any(|have| have.as_c_str() == *want));
        has_queues && has_extensions
    }
}

/// Lower is better.
pub fn type_rank(device_type: vk::PhysicalDeviceType) -> usize {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        vk::PhysicalDeviceType::OTHER => 4,
        _ => 5,
    }
}

/// Pick the index of the best suitable candidate.  Ties go to the earliest candidate.
pub fn select_device(
    candidates: &[DeviceCandidate],
    flags: vk::QueueFlags,
    extensions: &[&CStr],
) -> Result<usize, VulkanError> {
    if candidates.is_empty() {
        return Err(VulkanError::NoPhysicalDevices);
    }

    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_suitable(flags, extensions))
        .min_by_key(|(i, c)| (type_rank(c.device_type), *i))
        .map(|(i, _)| i)
        .ok_or(VulkanError::NoSuitableDevice)
}

/// First family with at least one queue that exposes `bit`.
pub fn family_with(families: &[vk::QueueFamilyProperties], bit: vk::QueueFlags) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(bit))
        .map(|i| i as u32)
}

/// Split a mask into its individual set bits.
pub fn capability_bits(flags: vk::QueueFlags) -> impl Iterator<Item = vk::QueueFlags> {
    let raw = flags.as_raw();
    (0..u32::BITS)
        .map(|i| 1u32 << i)
        .filter(move |bit| raw & bit != 0)
        .map(vk::QueueFlags::from_raw)
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

    fn candidate(device_type: vk::PhysicalDeviceType, exts: &[&CStr]) -> DeviceCandidate {
        DeviceCandidate {
            name: format!("{device_type:?}"),
            device_type,
            queue_families: vec![family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                4,
            )],
            extensions: exts.iter().map(|e| (*e).to_owned()).collect(),
        }
    }

    const GFX: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw() | vk::QueueFlags::TRANSFER.as_raw(),
    );

    #[test]
    fn discrete_beats_integrated() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, &[]),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, &[]),
        ];
        for _ in 0..8 {
            assert_eq!(select_device(&candidates, GFX, &[]).unwrap(), 1);
        }
    }

    #[test]
    fn rank_order() {
        let ranks: Vec<_> = [
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::OTHER,
            vk::PhysicalDeviceType::from_raw(77),
        ]
        .into_iter()
        .map(type_rank)
        .collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_list_has_no_devices() {
        assert!(matches!(
            select_device(&[], GFX, &[]),
            Err(VulkanError::NoPhysicalDevices)
        ));
    }

    #[test]
    fn filter_rejects_everything() {
        let candidates = [candidate(vk::PhysicalDeviceType::DISCRETE_GPU, &[])];
        assert!(matches!(
            select_device(&candidates, vk::QueueFlags::VIDEO_ENCODE_KHR, &[]),
            Err(VulkanError::NoSuitableDevice)
        ));
        assert!(matches!(
            select_device(&candidates, GFX, &[c"VK_KHR_video_queue"]),
            Err(VulkanError::NoSuitableDevice)
        ));
    }

    #[test]
    fn extension_filter_prefers_capable_device() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, &[]),
            candidate(vk::PhysicalDeviceType::CPU, &[c"VK_KHR_video_queue"]),
        ];
        let picked = select_device(&candidates, GFX, &[c"VK_KHR_video_queue"]).unwrap();
        assert_eq!(picked, 1);
    }

    #[test]
    fn empty_family_does_not_count() {
        let mut c = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, &[]);
        c.queue_families = vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 0),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        assert!(!c.is_suitable(GFX, &[]));
        assert!(c.is_suitable(vk::QueueFlags::TRANSFER, &[]));
        assert_eq!(family_with(&c.queue_families, vk::QueueFlags::TRANSFER), Some(1));
    }

    #[test]
    fn bits_split() {
        let bits: Vec<_> = capability_bits(GFX).collect();
        assert_eq!(bits, vec![vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER]);
    }
}
