// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Vulkan
//!
//! Resource lifetimes and command submission for a single Vulkan device.
//!
//! Ownership runs in one direction.  The `Instance` is shared by every `Engine` created from it.
//! Everything allocated against an `Engine` borrows it for `'e`, so an engine cannot be dropped
//! while a buffer, image, shader, pipeline or render target still refers to it.
//!
//! - `Instance`
//! - `Engine`
//!   * `EngineProfile` (graphics, encode, decode)
//!   * `QueueTable`
//! - **Resources** (all `Terminable`)
//!   * `Buffer`
//!   * `Image`
//!   * `Shader`
//!   * `Pipeline`
//!     + `Package`
//!   * `RenderTarget`
//!   * `CommandBuffer`
//!
//! Blocking calls wait on fences without a timeout.  A stalled GPU hangs the calling thread.

pub mod bound;
pub mod buffer;
pub mod command;
pub mod device;
pub mod engine;
pub mod format;
pub mod image;
pub mod instance;
pub mod package;
pub mod pipeline;
pub mod queue;
pub mod render_target;
pub mod shader;
pub mod util;

use std::panic::Location;

use ash::vk;

pub mod prelude {
    pub use super::{VkResultExt, VulkanError};
    pub use crate::bound::Terminable;
    pub use crate::buffer::{Buffer, BufferType};
    pub use crate::command::CommandBuffer;
    pub use crate::engine::{Engine, EngineProfile};
    pub use crate::image::{Image, ImageType};
    pub use crate::instance::{Category, DebugSink, Instance, InstanceConfig, LogSink, Severity};
    pub use crate::package::Package;
    pub use crate::pipeline::{PackageId, Pipeline, PipelineSpec};
    pub use crate::render_target::RenderTarget;
    pub use crate::shader::Shader;
}

#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    #[error("{call} failed: {result} [{location}]")]
    Native {
        call: &'static str,
        result: vk::Result,
        location: &'static Location<'static>,
    },

    #[error("unable to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("shader reflection failed: {0}")]
    Reflection(String),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("no physical devices found")]
    NoPhysicalDevices,

    #[error("unable to find a suitable physical device")]
    NoSuitableDevice,

    #[error("no queue was found with the required flags {0:?}")]
    QueueNotFound(vk::QueueFlags),

    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("unsupported format {0:?}")]
    UnsupportedFormat(vk::Format),

    #[error("failed to find a supported format")]
    NoSupportedFormat,

    #[error("cannot bind a {actual:?} buffer as a {expected:?} buffer")]
    BufferRole {
        expected: buffer::BufferType,
        actual: buffer::BufferType,
    },

    #[error("source buffer of {src} bytes does not fit into {dst} bytes")]
    SourceTooLarge { src: vk::DeviceSize, dst: vk::DeviceSize },

    #[error("the shader does not belong to pipeline {0}")]
    ShaderNotInPipeline(String),

    #[error("unsupported shader stage {0:?}")]
    UnsupportedShaderStage(vk::ShaderStageFlags),

    #[error("unsupported vertex attribute of {0} bytes")]
    UnsupportedAttributeSize(u32),

    #[error("image bound as {0:?} has no sampler")]
    MissingSampler(vk::DescriptorType),

    #[error("{0} used after termination")]
    Terminated(&'static str),
}

/// Attach the call description and call site to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn during(self, call: &'static str) -> Result<T, VulkanError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[track_caller]
    fn during(self, call: &'static str) -> Result<T, VulkanError> {
        let location = Location::caller();
        self.map_err(|result| VulkanError::Native {
            call,
            result,
            location,
        })
    }
}
