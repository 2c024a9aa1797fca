// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Engine
//!
//! One logical device for one workload domain (graphics, video encode or video decode).  The
//! engine owns the device, the memory allocator, the queue table, and a scratch command buffer
//! that buffers and images use for one-shot copies and layout transitions.
//!
//! Teardown order is fixed: wait for idle, release scratch objects, drop the allocator, then
//! destroy the device.

use std::cell::Cell;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;

use crate::command::RecordingState;
use crate::device::{DeviceCandidate, select_device};
use crate::instance::{Instance, VALIDATION_LAYER};
use crate::queue::{QueuePlan, QueueTable};
use crate::util::intersect_features;
use crate::{VkResultExt, VulkanError};

/// Depth formats in order of preference.
pub const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT,
];

/// What an engine needs from its physical device.
#[derive(Clone, Debug)]
pub struct EngineProfile {
    pub name: &'static str,
    pub queue_flags: vk::QueueFlags,
    pub extensions: Vec<&'static CStr>,
    /// Requested features.  Only those the device supports get enabled.
    pub features: vk::PhysicalDeviceFeatures,
}

impl EngineProfile {
    pub fn graphics() -> Self {
        EngineProfile {
            name: "graphics",
            queue_flags: vk::QueueFlags::GRAPHICS,
            extensions: vec![],
            features: vk::PhysicalDeviceFeatures {
                sampler_anisotropy: vk::TRUE,
                sample_rate_shading: vk::TRUE,
                tessellation_shader: vk::TRUE,
                ..Default::default()
            },
        }
    }

    pub fn encode() -> Self {
        EngineProfile {
            name: "encode",
            queue_flags: vk::QueueFlags::VIDEO_ENCODE_KHR,
            extensions: vec![
                c"VK_KHR_video_queue",
                c"VK_KHR_synchronization2",
                c"VK_KHR_video_encode_queue",
                c"VK_KHR_video_encode_h264",
            ],
            features: vk::PhysicalDeviceFeatures::default(),
        }
    }

    pub fn decode() -> Self {
        EngineProfile {
            name: "decode",
            queue_flags: vk::QueueFlags::VIDEO_DECODE_KHR,
            extensions: vec![
                c"VK_KHR_video_queue",
                c"VK_KHR_synchronization2",
                c"VK_KHR_video_decode_queue",
                c"VK_KHR_video_decode_h264",
            ],
            features: vk::PhysicalDeviceFeatures::default(),
        }
    }
}

struct Scratch {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    fence: vk::Fence,
    state: Cell<RecordingState>,
}

pub struct Engine {
    instance: Arc<Instance>,
    profile: EngineProfile,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    device: ash::Device,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    queues: QueueTable,
    scratch: Scratch,
}

impl Engine {
    /// Select a physical device for `profile` and build the logical device around it.
    pub fn new(instance: Arc<Instance>, profile: EngineProfile) -> Result<Self, VulkanError> {
        let handle = instance.handle();
        let physical_devices =
            unsafe { handle.enumerate_physical_devices() }.during("vkEnumeratePhysicalDevices")?;
        let candidates = physical_devices
            .iter()
            .map(|pd| DeviceCandidate::query(handle, *pd))
            .collect::<Result<Vec<_>, _>>()?;

        let required = profile.queue_flags | vk::QueueFlags::TRANSFER;
        let chosen = select_device(&candidates, required, &profile.extensions)?;
        let physical_device = physical_devices[chosen];
        let candidate = &candidates[chosen];
        log::info!(
            "{} engine using {} ({:?})",
            profile.name,
            candidate.name,
            candidate.device_type
        );

        let plan = QueuePlan::new(&candidate.queue_families, profile.queue_flags)?;
        log::debug!("queue plan {:?}", plan.slots());

        let available = unsafe { handle.get_physical_device_features(physical_device) };
        let features = intersect_features(&profile.features, &available);
        let properties = unsafe { handle.get_physical_device_properties(physical_device) };

        let queue_cis = plan.queue_cis();
        let extensions: Vec<_> = profile.extensions.iter().map(|e| e.as_ptr()).collect();
        let layers = if instance.validation_enabled() {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };
        #[allow(deprecated)]
        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_cis)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe { handle.create_device(physical_device, &device_ci, None) }
            .during("vkCreateDevice")?;

        let parts = Self::device_parts(&instance, physical_device, &device, &plan);
        let (allocator, queues, scratch) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        Ok(Engine {
            instance,
            profile,
            physical_device,
            properties,
            features,
            device,
            allocator: ManuallyDrop::new(allocator),
            queues,
            scratch,
        })
    }

    /// Graphics queue with anisotropy, sample shading and tessellation when available.
    pub fn graphics(instance: Arc<Instance>) -> Result<Self, VulkanError> {
        Self::new(instance, EngineProfile::graphics())
    }

    pub fn encoder(instance: Arc<Instance>) -> Result<Self, VulkanError> {
        Self::new(instance, EngineProfile::encode())
    }

    pub fn decoder(instance: Arc<Instance>) -> Result<Self, VulkanError> {
        Self::new(instance, EngineProfile::decode())
    }

    fn device_parts(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        plan: &QueuePlan,
    ) -> Result<(vk_mem::Allocator, QueueTable, Scratch), VulkanError> {
        let allocator_ci =
            vk_mem::AllocatorCreateInfo::new(instance.handle(), device, physical_device);
        let allocator =
            unsafe { vk_mem::Allocator::new(allocator_ci) }.during("vmaCreateAllocator")?;

        let queues = QueueTable::new(device, plan);
        let transfer = queues.transfer()?;

        let pool_ci = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(transfer.family);
        let pool =
            unsafe { device.create_command_pool(&pool_ci, None) }.during("vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let fence_ci = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let scratch = unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .during("vkAllocateCommandBuffers")
                .and_then(|buffers| {
                    let fence = device
                        .create_fence(&fence_ci, None)
                        .during("vkCreateFence")?;
                    Ok(Scratch {
                        pool,
                        buffer: buffers[0],
                        fence,
                        state: Cell::new(RecordingState::Idle),
                    })
                })
        };
        match scratch {
            Ok(scratch) => Ok((allocator, queues, scratch)),
            Err(e) => {
                // NOTE destroying the pool frees its buffers
                unsafe { device.destroy_command_pool(pool, None) };
                Err(e)
            }
        }
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Features actually enabled on the device.
    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    pub fn queues(&self) -> &QueueTable {
        &self.queues
    }

    /// Queue handle for a capability, for presentation checks and external submission.
    pub fn queue(&self, capability: vk::QueueFlags) -> Result<vk::Queue, VulkanError> {
        Ok(self.queues.get(capability)?.queue)
    }

    pub fn queue_family(&self, capability: vk::QueueFlags) -> Result<u32, VulkanError> {
        Ok(self.queues.get(capability)?.family)
    }

    /// Open the scratch command buffer.  Returns the same buffer if already recording.  Waits for
    /// any earlier scratch submission to retire before re-recording.
    pub fn begin_command_buffer_recording(&self) -> Result<vk::CommandBuffer, VulkanError> {
        let scratch = &self.scratch;
        if scratch.state.get().is_recording() {
            return Ok(scratch.buffer);
        }
        self.wait_scratch()?;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(scratch.buffer, &begin_info) }
            .during("vkBeginCommandBuffer")?;
        scratch.state.set(RecordingState::Recording);
        Ok(scratch.buffer)
    }

    /// No-op when not recording.
    pub fn end_command_buffer_recording(&self) -> Result<(), VulkanError> {
        let scratch = &self.scratch;
        if !scratch.state.get().is_recording() {
            return Ok(());
        }
        unsafe { self.device.end_command_buffer(scratch.buffer) }.during("vkEndCommandBuffer")?;
        scratch.state.set(scratch.state.get().ended());
        Ok(())
    }

    /// Submit the scratch recording to the transfer queue.  With `wait`, block until it retires.
    /// Without it, the next `begin_command_buffer_recording` or `wait_scratch` does the waiting.
    pub fn execute_recorded_commands(&self, wait: bool) -> Result<(), VulkanError> {
        self.end_command_buffer_recording()?;
        let scratch = &self.scratch;
        if !scratch.state.get().has_commands() {
            return Ok(());
        }

        let queue = self.queues.transfer()?;
        let buffers = [scratch.buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        unsafe {
            self.device
                .reset_fences(&[scratch.fence])
                .during("vkResetFences")?;
            self.device
                .queue_submit(queue.queue, &[submit_info], scratch.fence)
                .during("vkQueueSubmit")?;
        }
        scratch.state.set(RecordingState::Idle);

        if wait {
            self.wait_scratch()?;
        }
        Ok(())
    }

    /// Block until the last scratch submission retires.
    pub fn wait_scratch(&self) -> Result<(), VulkanError> {
        unsafe {
            self.device
                .wait_for_fences(&[self.scratch.fence], true, u64::MAX)
        }
        .during("vkWaitForFences")
    }

    pub fn is_scratch_idle(&self) -> Result<bool, VulkanError> {
        unsafe { self.device.get_fence_status(self.scratch.fence) }.during("vkGetFenceStatus")
    }

    /// First candidate whose properties for `tiling` include `features`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format, VulkanError> {
        pick_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .handle()
                .get_physical_device_format_properties(self.physical_device, format)
        })
    }

    pub fn find_best_depth_format(&self) -> Result<vk::Format, VulkanError> {
        self.find_supported_format(
            &DEPTH_FORMATS,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_fence(self.scratch.fence, None);
            self.device
                .free_command_buffers(self.scratch.pool, &[self.scratch.buffer]);
            self.device.destroy_command_pool(self.scratch.pool, None);
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        log::debug!("{} engine destroyed", self.profile.name);
    }
}

/// Format choice with the property query injected.
pub fn pick_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format, VulkanError> {
    candidates
        .iter()
        .copied()
        .find(|format| {
            let props = properties(*format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or(VulkanError::NoSupportedFormat)
}
