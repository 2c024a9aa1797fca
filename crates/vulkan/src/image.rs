// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Image
//!
//! 2D and cube-map images with one view and, for sampled images, one sampler.
//!
//! The image tracks its current layout.  Every transition derives its access masks from the
//! old and new layouts, and its stage masks from those access masks, through the fixed tables
//! below.  Transitions without a caller command buffer run on the engine's scratch buffer and
//! block.  Transitions into a caller's buffer are only recorded and the tracked layout moves
//! immediately, so the caller is responsible for submitting in recording order.

use ash::vk;
use vk_mem::Alloc;

use crate::bound::Terminable;
use crate::buffer::{record_host_read_barrier, Buffer, BufferType};
use crate::command::CommandBuffer;
use crate::engine::Engine;
use crate::format::{aspect_for_format, copy_bytes, is_depth_format};
use crate::util::full_range;
use crate::{VkResultExt, VulkanError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageType {
    Texture2D,
    CubeMap,
}

/// Access and stage masks for one layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Writes that must be made available before leaving `old`.
pub fn src_access(old: vk::ImageLayout) -> Option<vk::AccessFlags> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    Some(match old {
        L::UNDEFINED | L::GENERAL | L::PRESENT_SRC_KHR => A::empty(),
        L::PREINITIALIZED => A::HOST_WRITE,
        L::COLOR_ATTACHMENT_OPTIMAL => A::COLOR_ATTACHMENT_WRITE,
        L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        L::DEPTH_STENCIL_READ_ONLY_OPTIMAL => A::DEPTH_STENCIL_ATTACHMENT_READ,
        L::TRANSFER_SRC_OPTIMAL => A::TRANSFER_READ,
        L::TRANSFER_DST_OPTIMAL => A::TRANSFER_WRITE,
        L::SHADER_READ_ONLY_OPTIMAL => A::SHADER_READ,
        _ => return None,
    })
}

/// `(extra source access, destination access)` for entering `new`.
pub fn dst_access(new: vk::ImageLayout) -> Option<(vk::AccessFlags, vk::AccessFlags)> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    Some(match new {
        L::UNDEFINED | L::GENERAL | L::PRESENT_SRC_KHR => (A::empty(), A::empty()),
        L::TRANSFER_DST_OPTIMAL => (A::empty(), A::TRANSFER_WRITE),
        L::TRANSFER_SRC_OPTIMAL => (A::empty(), A::TRANSFER_READ),
        L::COLOR_ATTACHMENT_OPTIMAL => (A::empty(), A::COLOR_ATTACHMENT_WRITE),
        L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (A::empty(), A::DEPTH_STENCIL_ATTACHMENT_WRITE),
        L::DEPTH_STENCIL_READ_ONLY_OPTIMAL => (A::empty(), A::DEPTH_STENCIL_ATTACHMENT_READ),
        // Uploads may have come from the host or a transfer.
        L::SHADER_READ_ONLY_OPTIMAL => (A::HOST_WRITE | A::TRANSFER_WRITE, A::SHADER_READ),
        _ => return None,
    })
}

/// Stage for a single access bit.  Empty and combined masks cover all commands.
pub fn stage_for_access(access: vk::AccessFlags) -> vk::PipelineStageFlags {
    use vk::AccessFlags as A;
    use vk::PipelineStageFlags as P;
    match access {
        A::INDIRECT_COMMAND_READ => P::DRAW_INDIRECT,
        A::INDEX_READ | A::VERTEX_ATTRIBUTE_READ => P::VERTEX_INPUT,
        A::UNIFORM_READ | A::SHADER_READ | A::SHADER_WRITE => P::ALL_GRAPHICS | P::COMPUTE_SHADER,
        A::INPUT_ATTACHMENT_READ => P::FRAGMENT_SHADER,
        A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE => P::COLOR_ATTACHMENT_OUTPUT,
        A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE => {
            P::EARLY_FRAGMENT_TESTS | P::LATE_FRAGMENT_TESTS
        }
        A::TRANSFER_READ | A::TRANSFER_WRITE => P::TRANSFER,
        A::HOST_READ | A::HOST_WRITE => P::HOST,
        _ => P::ALL_COMMANDS,
    }
}

/// Barrier masks for `old -> new`.  Fails for layouts outside the table.
pub fn layout_barrier(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<LayoutBarrier, VulkanError> {
    let unsupported = VulkanError::UnsupportedLayoutTransition { old, new };
    let src = src_access(old).ok_or(unsupported)?;
    let (extra, dst) =
        dst_access(new).ok_or(VulkanError::UnsupportedLayoutTransition { old, new })?;
    let src = src | extra;

    let mut src_stage = stage_for_access(src);
    // ALL_COMMANDS does not cover host writes
    if src.intersects(vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE) {
        src_stage |= vk::PipelineStageFlags::HOST;
    }
    Ok(LayoutBarrier {
        src_access: src,
        dst_access: dst,
        src_stage,
        dst_stage: stage_for_access(dst),
    })
}

fn view_type(ty: ImageType, layers: u32) -> vk::ImageViewType {
    match (ty, layers) {
        (ImageType::Texture2D, 1) => vk::ImageViewType::TYPE_2D,
        (ImageType::Texture2D, _) => vk::ImageViewType::TYPE_2D_ARRAY,
        (ImageType::CubeMap, 6) => vk::ImageViewType::CUBE,
        (ImageType::CubeMap, _) => vk::ImageViewType::CUBE_ARRAY,
    }
}

fn check_shape(extent: vk::Extent3D, ty: ImageType, layers: u32) -> Result<(), VulkanError> {
    if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
        return Err(VulkanError::Precondition("image extent must be non-zero"));
    }
    if extent.depth != 1 {
        return Err(VulkanError::Precondition("2D image extent must have depth 1"));
    }
    if layers == 0 {
        return Err(VulkanError::Precondition("image must have at least one layer"));
    }
    if ty == ImageType::CubeMap && layers % 6 != 0 {
        return Err(VulkanError::Precondition("cube map layers must be a multiple of 6"));
    }
    Ok(())
}

pub struct Image<'e> {
    engine: &'e Engine,
    handle: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    sampler: Option<vk::Sampler>,
    extent: vk::Extent3D,
    format: vk::Format,
    ty: ImageType,
    layers: u32,
    usage: vk::ImageUsageFlags,
    layout: vk::ImageLayout,
    terminated: bool,
}

impl<'e> Image<'e> {
    pub fn new(
        engine: &'e Engine,
        extent: vk::Extent3D,
        format: vk::Format,
        ty: ImageType,
        layers: u32,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self, VulkanError> {
        check_shape(extent, ty, layers)?;

        let flags = match ty {
            ImageType::CubeMap => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ImageType::Texture2D => vk::ImageCreateFlags::empty(),
        };
        let image_ci = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (handle, allocation) =
            unsafe { engine.allocator().create_image(&image_ci, &alloc_ci) }
                .during("vmaCreateImage")?;

        // From here on Drop releases whatever has been created.
        let mut image = Image {
            engine,
            handle,
            allocation,
            view: vk::ImageView::null(),
            sampler: None,
            extent,
            format,
            ty,
            layers,
            usage,
            layout: vk::ImageLayout::UNDEFINED,
            terminated: false,
        };

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(view_type(ty, layers))
            .format(format)
            .subresource_range(full_range(aspect_for_format(format), layers));
        image.view = unsafe { engine.device().create_image_view(&view_ci, None) }
            .during("vkCreateImageView")?;

        if usage.contains(vk::ImageUsageFlags::SAMPLED) {
            image.sampler = Some(image.create_sampler()?);
        } else if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
            // NOTE render passes leave depth attachments here, no barrier needed up front
            image.layout = vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL;
        }

        log::trace!(
            "{ty:?} image {}x{} {format:?} x{layers}",
            extent.width,
            extent.height
        );
        Ok(image)
    }

    fn create_sampler(&self) -> Result<vk::Sampler, VulkanError> {
        let anisotropy = self.engine.enabled_features().sampler_anisotropy == vk::TRUE;
        let max_anisotropy = if anisotropy {
            self.engine.properties().limits.max_sampler_anisotropy
        } else {
            1.0
        };
        let address = match self.ty {
            ImageType::CubeMap => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ImageType::Texture2D => vk::SamplerAddressMode::REPEAT,
        };
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(1.0);
        unsafe { self.engine.device().create_sampler(&sampler_ci, None) }
            .during("vkCreateSampler")
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn image_type(&self) -> ImageType {
        self.ty
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    /// Bytes of a tightly packed buffer copy of every layer.  Depth formats copy only the
    /// depth aspect, so a `D32_SFLOAT_S8_UINT` image takes 4 bytes per texel.
    pub fn byte_size(&self) -> Result<vk::DeviceSize, VulkanError> {
        copy_bytes(self.format, self.extent, self.layers)
    }

    /// Move the image to `new`.  Without `cb` the barrier runs on the scratch buffer and this
    /// blocks.  With `cb` the barrier is only recorded into it.  Moving to the current layout
    /// does nothing.
    pub fn change_image_layout(
        &mut self,
        new: vk::ImageLayout,
        cb: Option<&CommandBuffer<'_>>,
    ) -> Result<(), VulkanError> {
        self.ensure_live("image")?;
        if new == self.layout {
            return Ok(());
        }
        match cb {
            Some(cb) => {
                cb.ensure_recording()?;
                self.record_transition(cb.handle(), new)
            }
            None => {
                let cb = self.engine.begin_command_buffer_recording()?;
                self.record_transition(cb, new)?;
                self.engine.execute_recorded_commands(true)
            }
        }
    }

    fn record_transition(
        &mut self,
        cb: vk::CommandBuffer,
        new: vk::ImageLayout,
    ) -> Result<(), VulkanError> {
        let old = self.layout;
        if old == new {
            return Ok(());
        }
        let masks = layout_barrier(old, new)?;
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.handle)
            .subresource_range(full_range(aspect_for_format(self.format), self.layers))
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        unsafe {
            self.engine.device().cmd_pipeline_barrier(
                cb,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            )
        };
        self.layout = new;
        Ok(())
    }

    /// Layout to return to after a copy.  Undefined contents are not worth restoring.
    fn restorable(layout: vk::ImageLayout) -> bool {
        !matches!(
            layout,
            vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED
        )
    }

    fn copy_region(&self) -> vk::BufferImageCopy {
        // Copies address one aspect at a time.
        let aspect = if is_depth_format(self.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: self.extent.width,
            buffer_image_height: self.extent.height,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: self.layers,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: self.extent,
        }
    }

    /// Fill every layer from `buffer`, tightly packed.  Blocks until the copy completes and
    /// leaves the image in the layout it started in.
    pub fn from_buffer(&mut self, buffer: &Buffer<'_>) -> Result<(), VulkanError> {
        self.ensure_live("image")?;
        buffer.ensure_live("buffer")?;
        if buffer.size() < self.byte_size()? {
            return Err(VulkanError::Precondition("buffer is smaller than the image"));
        }

        let old = self.layout;
        let cb = self.engine.begin_command_buffer_recording()?;
        self.record_transition(cb, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        unsafe {
            self.engine.device().cmd_copy_buffer_to_image(
                cb,
                buffer.handle(),
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[self.copy_region()],
            )
        };
        if Self::restorable(old) {
            self.record_transition(cb, old)?;
        }
        self.engine.execute_recorded_commands(true)
    }

    /// Copy every layer into a new staging buffer, laid out as [`Image::byte_size`] describes.
    /// Blocks until the copy completes and leaves the image in the layout it started in.
    pub fn to_buffer(&mut self) -> Result<Buffer<'e>, VulkanError> {
        self.ensure_live("image")?;
        let staging = Buffer::new(self.engine, self.byte_size()?, BufferType::Staging)?;

        let old = self.layout;
        let cb = self.engine.begin_command_buffer_recording()?;
        self.record_transition(cb, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        unsafe {
            self.engine.device().cmd_copy_image_to_buffer(
                cb,
                self.handle,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.handle(),
                &[self.copy_region()],
            )
        };
        record_host_read_barrier(self.engine, cb);
        if Self::restorable(old) {
            self.record_transition(cb, old)?;
        }
        self.engine.execute_recorded_commands(true)?;
        Ok(staging)
    }
}

impl Terminable for Image<'_> {
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        let device = self.engine.device();
        unsafe {
            if let Some(sampler) = self.sampler.take() {
                device.destroy_sampler(sampler, None);
            }
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            self.engine
                .allocator()
                .destroy_image(self.handle, &mut self.allocation);
        }
        self.terminated = true;
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for Image<'_> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as P;

    const TARGETS: [L; 8] = [
        L::TRANSFER_DST_OPTIMAL,
        L::TRANSFER_SRC_OPTIMAL,
        L::COLOR_ATTACHMENT_OPTIMAL,
        L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        L::SHADER_READ_ONLY_OPTIMAL,
        L::PRESENT_SRC_KHR,
        L::GENERAL,
    ];

    #[test]
    fn every_target_reachable_from_undefined() {
        for new in TARGETS {
            let barrier = layout_barrier(L::UNDEFINED, new).unwrap();
            assert!(!barrier.src_stage.is_empty(), "{new:?}");
            assert!(!barrier.dst_stage.is_empty(), "{new:?}");
        }
    }

    #[test]
    fn every_pair_in_table_resolves() {
        for old in TARGETS {
            for new in TARGETS {
                assert!(layout_barrier(old, new).is_ok(), "{old:?} -> {new:?}");
            }
        }
    }

    #[test]
    fn upload_barriers() {
        let to_dst = layout_barrier(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_dst.src_access, A::empty());
        assert_eq!(to_dst.dst_access, A::TRANSFER_WRITE);
        assert_eq!(to_dst.src_stage, P::ALL_COMMANDS);
        assert_eq!(to_dst.dst_stage, P::TRANSFER);

        let to_read = layout_barrier(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(to_read.src_access, A::TRANSFER_WRITE | A::HOST_WRITE);
        assert_eq!(to_read.dst_access, A::SHADER_READ);
        assert!(to_read.src_stage.contains(P::HOST | P::ALL_COMMANDS));
        assert_eq!(to_read.dst_stage, P::ALL_GRAPHICS | P::COMPUTE_SHADER);
    }

    #[test]
    fn attachment_barriers() {
        let b = layout_barrier(L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL).unwrap();
        assert_eq!(b.src_access, A::COLOR_ATTACHMENT_WRITE);
        assert_eq!(b.src_stage, P::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(b.dst_access, A::TRANSFER_READ);

        let b = layout_barrier(
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(b.src_access, A::DEPTH_STENCIL_ATTACHMENT_WRITE);
        assert_eq!(b.dst_access, A::DEPTH_STENCIL_ATTACHMENT_READ);
        assert_eq!(b.dst_stage, P::EARLY_FRAGMENT_TESTS | P::LATE_FRAGMENT_TESTS);
    }

    #[test]
    fn unsupported_layouts_fail() {
        assert!(matches!(
            layout_barrier(L::UNDEFINED, L::PREINITIALIZED),
            Err(VulkanError::UnsupportedLayoutTransition { .. })
        ));
        assert!(matches!(
            layout_barrier(L::DEPTH_ATTACHMENT_OPTIMAL, L::GENERAL),
            Err(VulkanError::UnsupportedLayoutTransition { old, .. }) if old == L::DEPTH_ATTACHMENT_OPTIMAL
        ));
    }

    #[test]
    fn stage_lookup() {
        assert_eq!(stage_for_access(A::INDEX_READ), P::VERTEX_INPUT);
        assert_eq!(stage_for_access(A::VERTEX_ATTRIBUTE_READ), P::VERTEX_INPUT);
        assert_eq!(stage_for_access(A::INDIRECT_COMMAND_READ), P::DRAW_INDIRECT);
        assert_eq!(stage_for_access(A::INPUT_ATTACHMENT_READ), P::FRAGMENT_SHADER);
        assert_eq!(stage_for_access(A::HOST_READ), P::HOST);
        assert_eq!(stage_for_access(A::MEMORY_WRITE), P::ALL_COMMANDS);
        assert_eq!(stage_for_access(A::empty()), P::ALL_COMMANDS);
        assert_eq!(
            stage_for_access(A::TRANSFER_READ | A::SHADER_READ),
            P::ALL_COMMANDS
        );
    }

    #[test]
    fn round_trip_masks_are_symmetric() {
        // A -> B -> A uses the same tables as a single A -> B and back.
        let there = layout_barrier(L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL).unwrap();
        let back = layout_barrier(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(there.dst_access, A::TRANSFER_WRITE);
        assert!(back.src_access.contains(there.dst_access));
    }

    #[test]
    fn shapes() {
        let extent = vk::Extent3D {
            width: 4,
            height: 4,
            depth: 1,
        };
        assert!(check_shape(extent, ImageType::Texture2D, 1).is_ok());
        assert!(check_shape(extent, ImageType::CubeMap, 6).is_ok());
        assert!(check_shape(extent, ImageType::CubeMap, 4).is_err());
        assert!(check_shape(extent, ImageType::Texture2D, 0).is_err());
        let flat = vk::Extent3D { depth: 0, ..extent };
        assert!(check_shape(flat, ImageType::Texture2D, 1).is_err());
        let deep = vk::Extent3D { depth: 8, ..extent };
        assert!(matches!(
            check_shape(deep, ImageType::Texture2D, 1),
            Err(VulkanError::Precondition("2D image extent must have depth 1"))
        ));
        assert!(check_shape(deep, ImageType::CubeMap, 6).is_err());

        assert_eq!(view_type(ImageType::Texture2D, 1), vk::ImageViewType::TYPE_2D);
        assert_eq!(view_type(ImageType::Texture2D, 3), vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(view_type(ImageType::CubeMap, 6), vk::ImageViewType::CUBE);
        assert_eq!(view_type(ImageType::CubeMap, 12), vk::ImageViewType::CUBE_ARRAY);
    }
}
