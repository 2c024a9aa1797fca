// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Buffer
//!
//! Linear memory with a type tag fixed at creation.  The tag picks usage flags and residency:
//! vertex and index data lives in device-local memory, uniform and staging data in host-visible
//! memory written sequentially.
//!
//! Copies between buffers go through the engine's scratch command buffer and block until the
//! GPU is done.

use std::ptr::NonNull;

use ash::vk;
use vk_mem::Alloc;

use crate::bound::Terminable;
use crate::command::CommandBuffer;
use crate::engine::Engine;
use crate::{VkResultExt, VulkanError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferType {
    /// Not a valid creation type.  Exists so raw tags from outside can be rejected.
    Unknown,
    Vertex,
    Index,
    Uniform,
    Staging,
}

impl BufferType {
    pub fn usage(self) -> Option<vk::BufferUsageFlags> {
        use vk::BufferUsageFlags as U;
        match self {
            BufferType::Unknown => None,
            BufferType::Vertex => Some(U::VERTEX_BUFFER | U::TRANSFER_DST | U::TRANSFER_SRC),
            BufferType::Index => Some(U::INDEX_BUFFER | U::TRANSFER_DST | U::TRANSFER_SRC),
            BufferType::Uniform => Some(U::UNIFORM_BUFFER | U::TRANSFER_SRC | U::TRANSFER_DST),
            BufferType::Staging => Some(U::TRANSFER_SRC | U::TRANSFER_DST),
        }
    }

    pub fn is_host_visible(self) -> bool {
        matches!(self, BufferType::Uniform | BufferType::Staging)
    }

    fn allocation_info(self) -> vk_mem::AllocationCreateInfo {
        if self.is_host_visible() {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                // NOTE coherent memory keeps host writes visible without explicit flushes
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            }
        } else {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            }
        }
    }
}

/// Makes transfer writes visible to host reads once the submission's fence signals.
pub fn host_read_barrier() -> vk::MemoryBarrier<'static> {
    vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
}

/// Record [`host_read_barrier`] into `cb` after a copy into host-visible memory.
pub(crate) fn record_host_read_barrier(engine: &Engine, cb: vk::CommandBuffer) {
    unsafe {
        engine.device().cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[host_read_barrier()],
            &[],
            &[],
        )
    };
}

/// Fail unless a buffer tagged `actual` may be bound in the `expected` role.
pub fn check_role(actual: BufferType, expected: BufferType) -> Result<(), VulkanError> {
    if actual == expected {
        Ok(())
    } else {
        Err(VulkanError::BufferRole { expected, actual })
    }
}

pub struct Buffer<'e> {
    engine: &'e Engine,
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    ty: BufferType,
    mapped: Option<NonNull<u8>>,
    terminated: bool,
}

impl<'e> Buffer<'e> {
    pub fn new(engine: &'e Engine, size: vk::DeviceSize, ty: BufferType) -> Result<Self, VulkanError> {
        if size == 0 {
            return Err(VulkanError::Precondition("cannot create a buffer with 0 size"));
        }
        let usage = ty
            .usage()
            .ok_or(VulkanError::Precondition("invalid buffer type"))?;

        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (handle, allocation) = unsafe {
            engine
                .allocator()
                .create_buffer(&buffer_ci, &ty.allocation_info())
        }
        .during("vmaCreateBuffer")?;

        log::trace!("{ty:?} buffer of {size} bytes");
        Ok(Buffer {
            engine,
            handle,
            allocation,
            size,
            ty,
            mapped: None,
            terminated: false,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn buffer_type(&self) -> BufferType {
        self.ty
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Map the allocation and return the host pointer.  A buffer has at most one mapping, so
    /// mapping again returns the active pointer.  Valid for `size()` bytes until `unmap_memory`.
    pub fn map_memory(&mut self) -> Result<*mut u8, VulkanError> {
        self.ensure_live("buffer")?;
        if let Some(ptr) = self.mapped {
            return Ok(ptr.as_ptr());
        }
        let ptr = unsafe { self.engine.allocator().map_memory(&mut self.allocation) }
            .during("vmaMapMemory")?;
        let ptr = NonNull::new(ptr).ok_or(VulkanError::Native {
            call: "vmaMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
            location: std::panic::Location::caller(),
        })?;
        self.mapped = Some(ptr);
        Ok(ptr.as_ptr())
    }

    /// Idempotent.
    pub fn unmap_memory(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.engine.allocator().unmap_memory(&mut self.allocation) };
        }
    }

    /// Copy `bytes` into the buffer at `offset` through a host mapping.  The buffer stays mapped
    /// only if it was mapped before the call.
    pub fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<(), VulkanError> {
        offset
            .checked_add(bytes.len() as vk::DeviceSize)
            .filter(|end| *end <= self.size)
            .ok_or(VulkanError::Precondition("write past the end of the buffer"))?;

        let was_mapped = self.is_mapped();
        let ptr = self.map_memory()?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset as usize), bytes.len());
        }
        if !was_mapped {
            self.unmap_memory();
        }
        Ok(())
    }

    pub fn write_pod<T: bytemuck::Pod>(
        &mut self,
        offset: vk::DeviceSize,
        data: &[T],
    ) -> Result<(), VulkanError> {
        self.write(offset, bytemuck::cast_slice(data))
    }

    /// Read the whole buffer back through a host mapping.
    pub fn read_vec(&mut self) -> Result<Vec<u8>, VulkanError> {
        let was_mapped = self.is_mapped();
        let ptr = self.map_memory()?;
        let read = unsafe { std::slice::from_raw_parts(ptr, self.size as usize) }.to_vec();
        if !was_mapped {
            self.unmap_memory();
        }
        Ok(read)
    }

    /// Copy all of `src` into the start of this buffer.  Blocks until the copy completes.
    pub fn from_buffer(&mut self, src: &Buffer<'_>) -> Result<(), VulkanError> {
        self.ensure_live("buffer")?;
        src.ensure_live("source buffer")?;
        if src.size > self.size {
            return Err(VulkanError::SourceTooLarge {
                src: src.size,
                dst: self.size,
            });
        }

        let cb = self.engine.begin_command_buffer_recording()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: src.size,
        };
        unsafe {
            self.engine
                .device()
                .cmd_copy_buffer(cb, src.handle, self.handle, &[region])
        };
        if self.ty.is_host_visible() {
            record_host_read_barrier(self.engine, cb);
        }
        self.engine.execute_recorded_commands(true)
    }

    /// Copy the whole buffer into a new staging buffer.  Blocks until the copy completes.
    pub fn to_buffer(&self) -> Result<Buffer<'e>, VulkanError> {
        self.ensure_live("buffer")?;
        let mut staging = Buffer::new(self.engine, self.size, BufferType::Staging)?;
        staging.from_buffer(self)?;
        Ok(staging)
    }

    /// Bind as vertex buffer 0.  Only vertex buffers may be bound this way.
    pub fn bind_as_vertex_buffer(
        &self,
        cb: &CommandBuffer<'_>,
        offset: vk::DeviceSize,
    ) -> Result<(), VulkanError> {
        self.ensure_live("buffer")?;
        check_role(self.ty, BufferType::Vertex)?;
        cb.ensure_recording()?;
        unsafe {
            self.engine
                .device()
                .cmd_bind_vertex_buffers(cb.handle(), 0, &[self.handle], &[offset])
        };
        Ok(())
    }

    /// Only index buffers may be bound this way.
    pub fn bind_as_index_buffer(
        &self,
        cb: &CommandBuffer<'_>,
        index_type: vk::IndexType,
    ) -> Result<(), VulkanError> {
        self.ensure_live("buffer")?;
        check_role(self.ty, BufferType::Index)?;
        cb.ensure_recording()?;
        unsafe {
            self.engine
                .device()
                .cmd_bind_index_buffer(cb.handle(), self.handle, 0, index_type)
        };
        Ok(())
    }
}

impl Terminable for Buffer<'_> {
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.unmap_memory();
        unsafe {
            self.engine
                .allocator()
                .destroy_buffer(self.handle, &mut self.allocation)
        };
        self.terminated = true;
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        self.terminate();
    }
}
