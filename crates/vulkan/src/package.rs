// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Package
//!
//! One descriptor set allocated from a pipeline's pool, plus a record of everything bound into
//! it.  The record is what lets a pipeline move the package to a bigger pool: the new set is
//! filled by copying each recorded binding out of the old set.
//!
//! Resources are recorded by handle.  Binding a buffer or image does not borrow it, so the caller
//! keeps it alive while the package may be used in a draw.

use std::collections::BTreeMap;

use ash::vk;

use crate::bound::Terminable;
use crate::buffer::Buffer;
use crate::command::CommandBuffer;
use crate::engine::Engine;
use crate::image::Image;
use crate::VulkanError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundResource {
    Buffer {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    Image {
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundResources {
    pub descriptor_type: vk::DescriptorType,
    pub array_element: u32,
    pub resources: Vec<BoundResource>,
}

/// A run of descriptors to carry from one set to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorCopy {
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
}

/// One copy per recorded binding, in binding order.
pub fn copy_plan(bindings: &BTreeMap<u32, BoundResources>) -> Vec<DescriptorCopy> {
    bindings
        .iter()
        .map(|(binding, bound)| DescriptorCopy {
            binding: *binding,
            array_element: bound.array_element,
            count: bound.resources.len() as u32,
        })
        .collect()
}

fn samples(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::SAMPLER | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    )
}

pub struct Package<'e> {
    engine: &'e Engine,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    set_index: u32,
    bindings: BTreeMap<u32, BoundResources>,
    terminated: bool,
}

impl<'e> Package<'e> {
    /// Wrap a set already allocated from `pool` with `set_layout`.  `set_index` is the slot the
    /// set occupies in the pipeline layout.
    pub(crate) fn new(
        engine: &'e Engine,
        set_layout: vk::DescriptorSetLayout,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
        set_index: u32,
    ) -> Self {
        Package {
            engine,
            set_layout,
            pool,
            set,
            set_index,
            bindings: BTreeMap::new(),
            terminated: false,
        }
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    pub fn bindings(&self) -> &BTreeMap<u32, BoundResources> {
        &self.bindings
    }

    /// Write `buffers` into `binding` starting at `array_element`.  Replaces whatever was recorded
    /// for the binding.
    pub fn bind_buffers(
        &mut self,
        binding: u32,
        buffers: &[&Buffer<'_>],
        descriptor_type: vk::DescriptorType,
        array_element: u32,
    ) -> Result<(), VulkanError> {
        self.ensure_live("package")?;
        if buffers.is_empty() {
            return Err(VulkanError::Precondition("no buffers to bind"));
        }
        for buffer in buffers {
            buffer.ensure_live("bound buffer")?;
        }

        let infos: Vec<_> = buffers
            .iter()
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.handle(),
                offset: 0,
                range: b.size(),
            })
            .collect();
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(array_element)
            .descriptor_type(descriptor_type)
            .buffer_info(&infos);
        unsafe { self.engine.device().update_descriptor_sets(&[write], &[]) };

        let resources = infos
            .iter()
            .map(|i| BoundResource::Buffer {
                buffer: i.buffer,
                range: i.range,
            })
            .collect();
        self.record(binding, descriptor_type, array_element, resources);
        Ok(())
    }

    /// Write `images` into `binding` with their current layouts.  Sampler descriptor types need
    /// images created with sampled usage.
    pub fn bind_images(
        &mut self,
        binding: u32,
        images: &[&Image<'_>],
        descriptor_type: vk::DescriptorType,
        array_element: u32,
    ) -> Result<(), VulkanError> {
        self.ensure_live("package")?;
        if images.is_empty() {
            return Err(VulkanError::Precondition("no images to bind"));
        }

        let mut infos = Vec::with_capacity(images.len());
        for image in images {
            image.ensure_live("bound image")?;
            let sampler = match image.sampler() {
                Some(sampler) => sampler,
                None if samples(descriptor_type) => {
                    return Err(VulkanError::MissingSampler(descriptor_type));
                }
                None => vk::Sampler::null(),
            };
            infos.push(vk::DescriptorImageInfo {
                sampler,
                image_view: image.view(),
                image_layout: image.layout(),
            });
        }
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(array_element)
            .descriptor_type(descriptor_type)
            .image_info(&infos);
        unsafe { self.engine.device().update_descriptor_sets(&[write], &[]) };

        let resources = infos
            .iter()
            .map(|i| BoundResource::Image {
                sampler: i.sampler,
                view: i.image_view,
                layout: i.image_layout,
            })
            .collect();
        self.record(binding, descriptor_type, array_element, resources);
        Ok(())
    }

    fn record(
        &mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        array_element: u32,
        resources: Vec<BoundResource>,
    ) {
        self.bindings.insert(
            binding,
            BoundResources {
                descriptor_type,
                array_element,
                resources,
            },
        );
    }

    /// Copies that carry every recorded binding into a fresh set.
    pub fn copy_plan(&self) -> Vec<DescriptorCopy> {
        copy_plan(&self.bindings)
    }

    /// Copy every recorded binding into `set` and adopt it.  `set` must have been allocated from
    /// `pool` with this package's layout.  The old set is left to its pool.
    pub fn swap_descriptors(
        &mut self,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    ) -> Result<(), VulkanError> {
        self.ensure_live("package")?;
        let copies: Vec<_> = self
            .copy_plan()
            .into_iter()
            .map(|c| {
                vk::CopyDescriptorSet::default()
                    .src_set(self.set)
                    .src_binding(c.binding)
                    .src_array_element(c.array_element)
                    .dst_set(set)
                    .dst_binding(c.binding)
                    .dst_array_element(c.array_element)
                    .descriptor_count(c.count)
            })
            .collect();
        if !copies.is_empty() {
            unsafe { self.engine.device().update_descriptor_sets(&[], &copies) };
        }
        log::trace!("package moved {} bindings to a new set", copies.len());
        self.pool = pool;
        self.set = set;
        Ok(())
    }

    /// Bind the set at its slot in `layout`.
    pub fn bind(
        &self,
        cb: &CommandBuffer<'_>,
        layout: vk::PipelineLayout,
    ) -> Result<(), VulkanError> {
        self.ensure_live("package")?;
        cb.ensure_recording()?;
        unsafe {
            self.engine.device().cmd_bind_descriptor_sets(
                cb.handle(),
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                self.set_index,
                &[self.set],
                &[],
            )
        };
        Ok(())
    }
}

impl Terminable for Package<'_> {
    /// The set itself is returned when the owning pool is destroyed.
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.bindings.clear();
        self.set = vk::DescriptorSet::null();
        self.terminated = true;
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
