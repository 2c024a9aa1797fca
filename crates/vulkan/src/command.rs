// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Command Buffers
//!
//! A `CommandBuffer` records into one native handle and submits to the graphics queue.  Each
//! buffer owns a fence created in the signaled state.  Submission resets it and the GPU signals
//! it again on completion, so callers of a non-blocking `submit` can still poll or wait, and
//! `begin` never resets a buffer the GPU is still reading.

use ash::vk;

use crate::bound::Terminable;
use crate::engine::Engine;
use crate::{VkResultExt, VulkanError};

/// Host-side recording state.  GPU completion is tracked by the fence, not here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordingState {
    /// Nothing recorded since the last submit.
    #[default]
    Idle,
    Recording,
    /// Recording ended but not yet submitted.
    Recorded,
}

impl RecordingState {
    pub fn is_recording(self) -> bool {
        self == RecordingState::Recording
    }

    /// Commands may only be recorded while recording.
    pub fn require_recording(self) -> Result<(), VulkanError> {
        if self.is_recording() {
            Ok(())
        } else {
            Err(VulkanError::Precondition("command buffer is not recording"))
        }
    }

    /// Whether a submit has anything to send.
    pub fn has_commands(self) -> bool {
        self != RecordingState::Idle
    }

    /// State after `end`.  Ending an idle or finished recording changes nothing.
    pub fn ended(self) -> Self {
        match self {
            RecordingState::Recording => RecordingState::Recorded,
            other => other,
        }
    }
}

pub struct CommandBuffer<'e> {
    engine: &'e Engine,
    pool: vk::CommandPool,
    handle: vk::CommandBuffer,
    in_flight: vk::Semaphore,
    render_finished: vk::Semaphore,
    fence: vk::Fence,
    state: RecordingState,
    terminated: bool,
}

impl<'e> CommandBuffer<'e> {
    /// Allocate `count` primary command buffers from `pool`.  The pool stays owned by the caller
    /// and must outlive the buffers.
    pub fn allocate(
        engine: &'e Engine,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<Self>, VulkanError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let handles = unsafe { engine.device().allocate_command_buffers(&alloc_info) }
            .during("vkAllocateCommandBuffers")?;

        let mut out = Vec::with_capacity(handles.len());
        let mut handles = handles.into_iter();
        while let Some(handle) = handles.next() {
            match Self::wrap(engine, pool, handle) {
                Ok(cb) => out.push(cb),
                Err(e) => {
                    let rest: Vec<_> = handles.collect();
                    unsafe { engine.device().free_command_buffers(pool, &rest) };
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    /// Take ownership of an allocated handle.
    pub fn wrap(
        engine: &'e Engine,
        pool: vk::CommandPool,
        handle: vk::CommandBuffer,
    ) -> Result<Self, VulkanError> {
        let device = engine.device();
        let semaphore_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        // Partially built so Drop cleans up whatever was created before a failure.
        let mut cb = CommandBuffer {
            engine,
            pool,
            handle,
            in_flight: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            fence: vk::Fence::null(),
            state: RecordingState::Idle,
            terminated: false,
        };
        cb.in_flight =
            unsafe { device.create_semaphore(&semaphore_ci, None) }.during("vkCreateSemaphore")?;
        cb.render_finished =
            unsafe { device.create_semaphore(&semaphore_ci, None) }.during("vkCreateSemaphore")?;
        cb.fence = unsafe { device.create_fence(&fence_ci, None) }.during("vkCreateFence")?;
        Ok(cb)
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    /// Fail unless the buffer is live and between `begin` and `end`.
    pub fn ensure_recording(&self) -> Result<(), VulkanError> {
        self.ensure_live("command buffer")?;
        self.state.require_recording()
    }

    /// Not used by `submit`.  Available to callers building their own cross-queue sync.
    pub fn in_flight_semaphore(&self) -> vk::Semaphore {
        self.in_flight
    }

    pub fn render_finished_semaphore(&self) -> vk::Semaphore {
        self.render_finished
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Start a fresh one-time recording.  Ends any recording in progress and waits for the
    /// previous submission to retire before the buffer is reset.
    pub fn begin(&mut self) -> Result<(), VulkanError> {
        self.ensure_live("command buffer")?;
        self.end()?;
        self.wait()?;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.engine
                .device()
                .begin_command_buffer(self.handle, &begin_info)
        }
        .during("vkBeginCommandBuffer")?;
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// No-op when not recording.
    pub fn end(&mut self) -> Result<(), VulkanError> {
        if !self.state.is_recording() {
            return Ok(());
        }
        unsafe { self.engine.device().end_command_buffer(self.handle) }
            .during("vkEndCommandBuffer")?;
        self.state = self.state.ended();
        Ok(())
    }

    /// End recording and submit to the graphics queue.  With `wait`, block until the GPU is done.
    /// Without it, use `is_complete` or `wait` before touching anything the commands reference.
    pub fn submit(&mut self, wait: bool) -> Result<(), VulkanError> {
        self.ensure_live("command buffer")?;
        self.end()?;
        if !self.state.has_commands() {
            return Ok(());
        }

        let device = self.engine.device();
        let queue = self.engine.queues().graphics()?;
        let buffers = [self.handle];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);

        unsafe {
            device
                .reset_fences(&[self.fence])
                .during("vkResetFences")?;
            device
                .queue_submit(queue.queue, &[submit_info], self.fence)
                .during("vkQueueSubmit")?;
        }
        self.state = RecordingState::Idle;

        if wait {
            self.wait()?;
        }
        Ok(())
    }

    /// Block until the last submission retires.  Returns at once if nothing is in flight.
    pub fn wait(&self) -> Result<(), VulkanError> {
        unsafe {
            self.engine
                .device()
                .wait_for_fences(&[self.fence], true, u64::MAX)
        }
        .during("vkWaitForFences")
    }

    /// Whether the last submission has retired.
    pub fn is_complete(&self) -> Result<bool, VulkanError> {
        unsafe { self.engine.device().get_fence_status(self.fence) }.during("vkGetFenceStatus")
    }

    /// Viewport covering `extent`, depth 0 to 1.
    pub fn bind_viewport(&self, extent: vk::Extent2D) -> Result<(), VulkanError> {
        self.ensure_recording()?;
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.engine
                .device()
                .cmd_set_viewport(self.handle, 0, &[viewport])
        };
        Ok(())
    }

    pub fn bind_scissor(&self, extent: vk::Extent2D) -> Result<(), VulkanError> {
        self.ensure_recording()?;
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.engine
                .device()
                .cmd_set_scissor(self.handle, 0, &[scissor])
        };
        Ok(())
    }

    pub fn draw_vertices(&self, vertex_count: u32) -> Result<(), VulkanError> {
        self.ensure_recording()?;
        unsafe {
            self.engine
                .device()
                .cmd_draw(self.handle, vertex_count, 1, 0, 0)
        };
        Ok(())
    }

    pub fn draw_indices(&self, index_count: u32, vertex_offset: i32) -> Result<(), VulkanError> {
        self.ensure_recording()?;
        unsafe {
            self.engine
                .device()
                .cmd_draw_indexed(self.handle, index_count, 1, 0, vertex_offset, 0)
        };
        Ok(())
    }
}

impl Terminable for CommandBuffer<'_> {
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        let device = self.engine.device();
        unsafe {
            // Blocking here keeps the handle from being freed mid-flight.
            if self.fence != vk::Fence::null() {
                let _ = device.wait_for_fences(&[self.fence], true, u64::MAX);
                device.destroy_fence(self.fence, None);
            }
            device.free_command_buffers(self.pool, &[self.handle]);
            if self.in_flight != vk::Semaphore::null() {
                device.destroy_semaphore(self.in_flight, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(self.render_finished, None);
            }
        }
        self.terminated = true;
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for CommandBuffer<'_> {
    fn drop(&mut self) {
        self.terminate();
    }
}
