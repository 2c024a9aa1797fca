// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Render Target
//!
//! Color and depth attachments with one render pass and a ring of frames.  Each frame has its own
//! framebuffer and command buffer.  `setup_frame` opens the render pass on the current frame and
//! `submit_frame` closes it, submits, and moves the cursor on.
//!
//! Every frame renders into the same attachments.  Recording frame N+1 while N is in flight is
//! allowed, ordering attachment access between them is not handled here.

use ash::vk;

use crate::bound::Terminable;
use crate::command::CommandBuffer;
use crate::engine::Engine;
use crate::image::{Image, ImageType};
use crate::{VkResultExt, VulkanError};

/// Position in a ring of `count` frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCursor {
    index: u32,
    count: u32,
}

impl FrameCursor {
    pub fn new(count: u32) -> Result<Self, VulkanError> {
        if count == 0 {
            return Err(VulkanError::Precondition("frame count must be at least 1"));
        }
        Ok(FrameCursor { index: 0, count })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.count;
    }
}

/// Clear values in attachment order: color, then depth and stencil.
pub fn clear_values(r: f32, g: f32, b: f32, a: f32, depth: f32, stencil: u32) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [r, g, b, a],
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    ]
}

pub struct RenderTarget<'e> {
    engine: &'e Engine,
    extent: vk::Extent2D,
    color: Image<'e>,
    depth: Image<'e>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    pool: vk::CommandPool,
    command_buffers: Vec<CommandBuffer<'e>>,
    cursor: FrameCursor,
    in_pass: bool,
    terminated: bool,
}

impl<'e> RenderTarget<'e> {
    pub fn new(
        engine: &'e Engine,
        extent: vk::Extent2D,
        color_format: vk::Format,
        frame_count: u32,
    ) -> Result<Self, VulkanError> {
        let cursor = FrameCursor::new(frame_count)?;
        let extent_3d = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let mut color = Image::new(
            engine,
            extent_3d,
            color_format,
            ImageType::Texture2D,
            1,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        color.change_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, None)?;

        let depth_format = engine.find_best_depth_format()?;
        let depth = Image::new(
            engine,
            extent_3d,
            depth_format,
            ImageType::Texture2D,
            1,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        // Drop releases whatever exists if a later step fails.
        let mut target = RenderTarget {
            engine,
            extent,
            color,
            depth,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::with_capacity(frame_count as usize),
            pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            cursor,
            in_pass: false,
            terminated: false,
        };
        target.render_pass = target.create_render_pass(color_format, depth_format)?;

        let device = engine.device();
        let attachments = [target.color.view(), target.depth.view()];
        for _ in 0..frame_count {
            let framebuffer_ci = vk::FramebufferCreateInfo::default()
                .render_pass(target.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_ci, None) }
                .during("vkCreateFramebuffer")?;
            target.framebuffers.push(framebuffer);
        }

        let pool_ci = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(engine.queue_family(vk::QueueFlags::GRAPHICS)?);
        target.pool = unsafe { device.create_command_pool(&pool_ci, None) }
            .during("vkCreateCommandPool")?;
        target.command_buffers = CommandBuffer::allocate(engine, target.pool, frame_count)?;

        log::debug!(
            "render target {}x{} {color_format:?}/{depth_format:?}, {frame_count} frames",
            extent.width,
            extent.height
        );
        Ok(target)
    }

    /// Double-buffered target for rendering without a surface.
    pub fn offscreen(
        engine: &'e Engine,
        extent: vk::Extent2D,
        color_format: vk::Format,
    ) -> Result<Self, VulkanError> {
        Self::new(engine, extent, color_format, 2)
    }

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<vk::RenderPass, VulkanError> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
        ];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: attachment_stages,
                dst_stage_mask: attachment_stages,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dependency_flags: vk::DependencyFlags::empty(),
            },
            // Readback of the color attachment waits for the pass.
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::TRANSFER,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::TRANSFER_READ,
                dependency_flags: vk::DependencyFlags::empty(),
            },
        ];

        let render_pass_ci = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { self.engine.device().create_render_pass(&render_pass_ci, None) }
            .during("vkCreateRenderPass")
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn color_image(&self) -> &Image<'e> {
        &self.color
    }

    /// For readback.  Only touch the attachment between frames.
    pub fn color_image_mut(&mut self) -> &mut Image<'e> {
        &mut self.color
    }

    pub fn depth_image(&self) -> &Image<'e> {
        &self.depth
    }

    pub fn frame_index(&self) -> u32 {
        self.cursor.index()
    }

    pub fn frame_count(&self) -> u32 {
        self.cursor.count()
    }

    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize).copied()
    }

    pub fn command_buffer(&self, index: u32) -> Option<&CommandBuffer<'e>> {
        self.command_buffers.get(index as usize)
    }

    /// Begin recording the current frame and open the render pass with `clear`.  Viewport and
    /// scissor are set to the full extent.  Draws go into the returned command buffer.
    pub fn setup_frame(&mut self, clear: &[vk::ClearValue]) -> Result<&CommandBuffer<'e>, VulkanError> {
        self.ensure_live("render target")?;
        if self.in_pass {
            return Err(VulkanError::Precondition("frame already set up"));
        }
        let index = self.cursor.index() as usize;
        let framebuffer = self.framebuffers[index];
        let extent = self.extent;
        let render_pass = self.render_pass;
        let device = self.engine.device();

        let cb = &mut self.command_buffers[index];
        cb.begin()?;
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear);
        unsafe { device.cmd_begin_render_pass(cb.handle(), &begin_info, vk::SubpassContents::INLINE) };
        cb.bind_viewport(extent)?;
        cb.bind_scissor(extent)?;
        self.in_pass = true;
        Ok(&self.command_buffers[index])
    }

    /// Close the render pass, submit, and advance to the next frame.
    pub fn submit_frame(&mut self, wait: bool) -> Result<(), VulkanError> {
        self.ensure_live("render target")?;
        if !self.in_pass {
            return Err(VulkanError::Precondition("no frame set up"));
        }
        let index = self.cursor.index() as usize;
        let device = self.engine.device();
        let cb = &mut self.command_buffers[index];
        unsafe { device.cmd_end_render_pass(cb.handle()) };
        self.in_pass = false;
        cb.submit(wait)?;
        self.cursor.advance();
        Ok(())
    }
}

impl Terminable for RenderTarget<'_> {
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        for cb in &mut self.command_buffers {
            cb.terminate();
        }
        let device = self.engine.device();
        unsafe {
            if self.pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.pool, None);
            }
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
        }
        self.depth.terminate();
        self.color.terminate();
        self.terminated = true;
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for RenderTarget<'_> {
    fn drop(&mut self) {
        self.terminate();
    }
}
