// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Vulkan Utils
//!
//! Junk drawer.  Move things out when there is a place for them to belong.
//!

use std::ffi::{CStr, c_char};

use ash::vk;

/// Read a fixed-size, nul-terminated name out of a Vulkan properties struct.
pub fn fixed_name(raw: &[c_char]) -> &CStr {
    // SAFETY the driver fills these arrays with nul-terminated strings.  A missing terminator
    // falls back to the empty string rather than reading past the array.
    let bytes: &[u8] = unsafe { std::slice::from_raw_parts(raw.as_ptr().cast(), raw.len()) };
    CStr::from_bytes_until_nul(bytes).unwrap_or(c"")
}

/// Keep only the features that were both requested and are available.
pub fn intersect_features(
    requested: &vk::PhysicalDeviceFeatures,
    available: &vk::PhysicalDeviceFeatures,
) -> vk::PhysicalDeviceFeatures {
    const N: usize =
        std::mem::size_of::<vk::PhysicalDeviceFeatures>() / std::mem::size_of::<vk::Bool32>();

    let mut out = vk::PhysicalDeviceFeatures::default();
    // NOTE PhysicalDeviceFeatures is a repr(C) struct made only of Bool32 fields.
    unsafe {
        let req = &*(requested as *const _ as *const [vk::Bool32; N]);
        let avail = &*(available as *const _ as *const [vk::Bool32; N]);
        let dst = &mut *(&mut out as *mut _ as *mut [vk::Bool32; N]);
        for i in 0..N {
            dst[i] = (req[i] != vk::FALSE && avail[i] != vk::FALSE) as vk::Bool32;
        }
    }
    out
}

/// Whole-image subresource range for one mip level.
pub fn full_range(aspect_mask: vk::ImageAspectFlags, layer_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count,
    }
}
