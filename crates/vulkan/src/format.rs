// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Formats
//!
//! Texel sizes and aspect rules for the formats images are created with.

use ash::vk;

use crate::VulkanError;

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect used for views and copies of a whole image.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_format(format) {
        if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Formats stored as 4x4 texel blocks.
pub fn is_block_compressed(format: vk::Format) -> bool {
    let raw = format.as_raw();
    (vk::Format::BC1_RGB_UNORM_BLOCK.as_raw()..=vk::Format::ASTC_12X12_SRGB_BLOCK.as_raw())
        .contains(&raw)
}

/// Bytes needed to hold every texel of `layers` layers of an image, tightly packed.
pub fn image_bytes(
    format: vk::Format,
    extent: vk::Extent3D,
    layers: u32,
) -> Result<vk::DeviceSize, VulkanError> {
    let unit = pixel_size(format)?;
    let (w, h) = if is_block_compressed(format) {
        (extent.width.div_ceil(4), extent.height.div_ceil(4))
    } else {
        (extent.width, extent.height)
    };
    Ok(w as u64 * h as u64 * extent.depth as u64 * layers as u64 * unit)
}

/// Bytes per texel in a buffer copy.  Depth formats copy only their depth aspect, which buffers
/// hold as 2 bytes for 16-bit depth and 4 bytes otherwise.
pub fn copy_texel_size(format: vk::Format) -> Result<u64, VulkanError> {
    use vk::Format as F;
    match format {
        F::D16_UNORM | F::D16_UNORM_S8_UINT => Ok(2),
        F::X8_D24_UNORM_PACK32 | F::D24_UNORM_S8_UINT | F::D32_SFLOAT | F::D32_SFLOAT_S8_UINT => {
            Ok(4)
        }
        other => pixel_size(other),
    }
}

/// Buffer bytes for a tightly packed copy of `layers` layers, one aspect per texel.
pub fn copy_bytes(
    format: vk::Format,
    extent: vk::Extent3D,
    layers: u32,
) -> Result<vk::DeviceSize, VulkanError> {
    let whole = image_bytes(format, extent, layers)?;
    Ok(whole / pixel_size(format)? * copy_texel_size(format)?)
}

/// Bytes per texel.  Block-compressed formats report bytes per 4x4 block.
pub fn pixel_size(format: vk::Format) -> Result<u64, VulkanError> {
    use vk::Format as F;
    let size = match format {
        F::R4G4_UNORM_PACK8 | F::S8_UINT => 1,
        F::R8_UNORM | F::R8_SNORM | F::R8_USCALED | F::R8_SSCALED | F::R8_UINT | F::R8_SINT
        | F::R8_SRGB => 1,

        F::R4G4B4A4_UNORM_PACK16
        | F::B4G4R4A4_UNORM_PACK16
        | F::R5G6B5_UNORM_PACK16
        | F::B5G6R5_UNORM_PACK16
        | F::R5G5B5A1_UNORM_PACK16
        | F::B5G5R5A1_UNORM_PACK16
        | F::A1R5G5B5_UNORM_PACK16 => 2,
        F::R8G8_UNORM | F::R8G8_SNORM | F::R8G8_USCALED | F::R8G8_SSCALED | F::R8G8_UINT
        | F::R8G8_SINT | F::R8G8_SRGB => 2,
        F::R16_UNORM | F::R16_SNORM | F::R16_USCALED | F::R16_SSCALED | F::R16_UINT
        | F::R16_SINT | F::R16_SFLOAT | F::D16_UNORM => 2,

        F::R8G8B8_UNORM | F::R8G8B8_SNORM | F::R8G8B8_USCALED | F::R8G8B8_SSCALED
        | F::R8G8B8_UINT | F::R8G8B8_SINT | F::R8G8B8_SRGB => 3,
        F::B8G8R8_UNORM | F::B8G8R8_SNORM | F::B8G8R8_USCALED | F::B8G8R8_SSCALED
        | F::B8G8R8_UINT | F::B8G8R8_SINT | F::B8G8R8_SRGB => 3,
        F::D16_UNORM_S8_UINT => 3,

        F::R8G8B8A8_UNORM | F::R8G8B8A8_SNORM | F::R8G8B8A8_USCALED | F::R8G8B8A8_SSCALED
        | F::R8G8B8A8_UINT | F::R8G8B8A8_SINT | F::R8G8B8A8_SRGB => 4,
        F::B8G8R8A8_UNORM | F::B8G8R8A8_SNORM | F::B8G8R8A8_USCALED | F::B8G8R8A8_SSCALED
        | F::B8G8R8A8_UINT | F::B8G8R8A8_SINT | F::B8G8R8A8_SRGB => 4,
        F::A8B8G8R8_UNORM_PACK32
        | F::A8B8G8R8_SNORM_PACK32
        | F::A8B8G8R8_UINT_PACK32
        | F::A8B8G8R8_SINT_PACK32
        | F::A8B8G8R8_SRGB_PACK32
        | F::A2R10G10B10_UNORM_PACK32
        | F::A2B10G10R10_UNORM_PACK32
        | F::A2B10G10R10_UINT_PACK32
        | F::B10G11R11_UFLOAT_PACK32
        | F::E5B9G9R9_UFLOAT_PACK32 => 4,
        F::R16G16_UNORM | F::R16G16_SNORM | F::R16G16_USCALED | F::R16G16_SSCALED
        | F::R16G16_UINT | F::R16G16_SINT | F::R16G16_SFLOAT => 4,
        F::R32_UINT | F::R32_SINT | F::R32_SFLOAT => 4,
        F::D32_SFLOAT | F::X8_D24_UNORM_PACK32 | F::D24_UNORM_S8_UINT => 4,

        F::D32_SFLOAT_S8_UINT => 5,

        F::R16G16B16_UNORM | F::R16G16B16_SNORM | F::R16G16B16_USCALED
        | F::R16G16B16_SSCALED | F::R16G16B16_UINT | F::R16G16B16_SINT
        | F::R16G16B16_SFLOAT => 6,

        F::R16G16B16A16_UNORM | F::R16G16B16A16_SNORM | F::R16G16B16A16_USCALED
        | F::R16G16B16A16_SSCALED | F::R16G16B16A16_UINT | F::R16G16B16A16_SINT
        | F::R16G16B16A16_SFLOAT => 8,
        F::R32G32_UINT | F::R32G32_SINT | F::R32G32_SFLOAT => 8,
        F::R64_UINT | F::R64_SINT | F::R64_SFLOAT => 8,

        F::R32G32B32_UINT | F::R32G32B32_SINT | F::R32G32B32_SFLOAT => 12,

        F::R32G32B32A32_UINT | F::R32G32B32A32_SINT | F::R32G32B32A32_SFLOAT => 16,
        F::R64G64_UINT | F::R64G64_SINT | F::R64G64_SFLOAT => 16,

        F::R64G64B64_UINT | F::R64G64B64_SINT | F::R64G64B64_SFLOAT => 24,

        F::R64G64B64A64_UINT | F::R64G64B64A64_SINT | F::R64G64B64A64_SFLOAT => 32,

        F::BC1_RGB_UNORM_BLOCK
        | F::BC1_RGB_SRGB_BLOCK
        | F::BC1_RGBA_UNORM_BLOCK
        | F::BC1_RGBA_SRGB_BLOCK
        | F::BC4_UNORM_BLOCK
        | F::BC4_SNORM_BLOCK
        | F::ETC2_R8G8B8_UNORM_BLOCK
        | F::ETC2_R8G8B8_SRGB_BLOCK
        | F::ETC2_R8G8B8A1_UNORM_BLOCK
        | F::ETC2_R8G8B8A1_SRGB_BLOCK
        | F::EAC_R11_UNORM_BLOCK
        | F::EAC_R11_SNORM_BLOCK => 8,
        F::BC2_UNORM_BLOCK
        | F::BC2_SRGB_BLOCK
        | F::BC3_UNORM_BLOCK
        | F::BC3_SRGB_BLOCK
        | F::BC5_UNORM_BLOCK
        | F::BC5_SNORM_BLOCK
        | F::BC6H_UFLOAT_BLOCK
        | F::BC6H_SFLOAT_BLOCK
        | F::BC7_UNORM_BLOCK
        | F::BC7_SRGB_BLOCK
        | F::ETC2_R8G8B8A8_UNORM_BLOCK
        | F::ETC2_R8G8B8A8_SRGB_BLOCK
        | F::EAC_R11G11_UNORM_BLOCK
        | F::EAC_R11G11_SNORM_BLOCK
        | F::ASTC_4X4_UNORM_BLOCK
        | F::ASTC_4X4_SRGB_BLOCK => 16,

        other => return Err(VulkanError::UnsupportedFormat(other)),
    };
    Ok(size)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn common_sizes() {
        let table = [
            (vk::Format::R8_UNORM, 1),
            (vk::Format::R8G8_UNORM, 2),
            (vk::Format::D16_UNORM, 2),
            (vk::Format::R8G8B8_SRGB, 3),
            (vk::Format::R8G8B8A8_SRGB, 4),
            (vk::Format::B8G8R8A8_UNORM, 4),
            (vk::Format::D24_UNORM_S8_UINT, 4),
            (vk::Format::D32_SFLOAT_S8_UINT, 5),
            (vk::Format::R16G16B16_SFLOAT, 6),
            (vk::Format::R16G16B16A16_SFLOAT, 8),
            (vk::Format::R32G32B32_SFLOAT, 12),
            (vk::Format::R32G32B32A32_SFLOAT, 16),
            (vk::Format::R64G64B64_SFLOAT, 24),
            (vk::Format::R64G64B64A64_SFLOAT, 32),
            (vk::Format::BC1_RGB_UNORM_BLOCK, 8),
            (vk::Format::BC7_SRGB_BLOCK, 16),
        ];
        for (format, size) in table {
            assert_eq!(pixel_size(format).unwrap(), size, "{format:?}");
        }
    }

    #[test]
    fn undefined_has_no_size() {
        assert!(matches!(
            pixel_size(vk::Format::UNDEFINED),
            Err(VulkanError::UnsupportedFormat(vk::Format::UNDEFINED))
        ));
    }

    #[test]
    fn byte_counts() {
        let extent = vk::Extent3D {
            width: 10,
            height: 6,
            depth: 1,
        };
        assert_eq!(
            image_bytes(vk::Format::R8G8B8A8_UNORM, extent, 1).unwrap(),
            240
        );
        assert_eq!(
            image_bytes(vk::Format::R8G8B8A8_UNORM, extent, 6).unwrap(),
            1440
        );
        // 3x2 blocks of 8 bytes
        assert!(is_block_compressed(vk::Format::BC1_RGB_UNORM_BLOCK));
        assert!(!is_block_compressed(vk::Format::R8G8B8A8_UNORM));
        assert_eq!(
            image_bytes(vk::Format::BC1_RGB_UNORM_BLOCK, extent, 1).unwrap(),
            48
        );
    }

    #[test]
    fn depth_copies_hold_one_aspect() {
        let extent = vk::Extent3D {
            width: 4,
            height: 4,
            depth: 1,
        };
        assert_eq!(copy_texel_size(vk::Format::D32_SFLOAT_S8_UINT).unwrap(), 4);
        assert_eq!(copy_texel_size(vk::Format::D16_UNORM_S8_UINT).unwrap(), 2);
        assert_eq!(copy_texel_size(vk::Format::D24_UNORM_S8_UINT).unwrap(), 4);
        assert_eq!(
            copy_bytes(vk::Format::D32_SFLOAT_S8_UINT, extent, 1).unwrap(),
            64
        );
        assert_eq!(
            image_bytes(vk::Format::D32_SFLOAT_S8_UINT, extent, 1).unwrap(),
            80
        );
        assert_eq!(
            copy_bytes(vk::Format::R8G8B8A8_UNORM, extent, 2).unwrap(),
            image_bytes(vk::Format::R8G8B8A8_UNORM, extent, 2).unwrap()
        );
        assert_eq!(
            copy_bytes(vk::Format::BC1_RGB_UNORM_BLOCK, extent, 1).unwrap(),
            8
        );
    }

    #[test]
    fn aspects() {
        assert_eq!(
            aspect_for_format(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
