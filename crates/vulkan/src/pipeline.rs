// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Pipeline
//!
//! A graphics pipeline built from reflected shaders and a render target.  Shader `i` owns
//! descriptor set `i` of the pipeline layout.  Vertex input comes from the vertex shader's
//! reflected inputs, packed tightly into binding 0.
//!
//! The pipeline hands out [`Package`]s from a descriptor pool sized for exactly the packages
//! issued so far.  Asking for one more grows the pool by replacing it: every live package is
//! moved into the new pool with its bindings intact before the old pool is destroyed.
//!
//! A pipeline borrows its shaders, whose set layouts back every package it issues.  Shaders
//! can be neither terminated nor dropped while the pipeline lives:
//!
//! ```no_run
//! # use lantern_vulkan::prelude::*;
//! # fn issue(engine: &Engine, target: &RenderTarget<'_>, shader: Shader<'_>) -> Result<(), VulkanError> {
//! let mut pipeline = Pipeline::new(engine, "lit", &[&shader], target, PipelineSpec::default())?;
//! pipeline.create_package(&shader)?;
//! # Ok(())
//! # }
//! ```
//!
//! ```compile_fail
//! # use lantern_vulkan::prelude::*;
//! # fn issue(engine: &Engine, target: &RenderTarget<'_>, mut shader: Shader<'_>) -> Result<(), VulkanError> {
//! let mut pipeline = Pipeline::new(engine, "lit", &[&shader], target, PipelineSpec::default())?;
//! shader.terminate();
//! pipeline.create_package(&shader)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::ffi::CString;

use ash::vk;

use crate::bound::Terminable;
use crate::command::CommandBuffer;
use crate::engine::Engine;
use crate::package::Package;
use crate::render_target::RenderTarget;
use crate::shader::{Attribute, Binding, Shader};
use crate::{VkResultExt, VulkanError};

/// Fixed-function rasterizer choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bon::Builder)]
pub struct PipelineSpec {
    #[builder(default = vk::CullModeFlags::BACK)]
    pub cull_mode: vk::CullModeFlags,

    #[builder(default = vk::FrontFace::COUNTER_CLOCKWISE)]
    pub front_face: vk::FrontFace,

    #[builder(default = vk::PolygonMode::FILL)]
    pub polygon_mode: vk::PolygonMode,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        PipelineSpec::builder().build()
    }
}

/// Index of a package issued by one pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackageId(usize);

/// The single stage bit a shader is compiled into.
pub fn stage_bit(flags: vk::ShaderStageFlags) -> Result<vk::ShaderStageFlags, VulkanError> {
    use vk::ShaderStageFlags as S;
    [
        S::VERTEX,
        S::TESSELLATION_CONTROL,
        S::TESSELLATION_EVALUATION,
        S::GEOMETRY,
        S::FRAGMENT,
    ]
    .into_iter()
    .find(|bit| flags.contains(*bit))
    .ok_or(VulkanError::UnsupportedShaderStage(flags))
}

pub fn attribute_format(size: u32) -> Result<vk::Format, VulkanError> {
    match size {
        4 => Ok(vk::Format::R32_UINT),
        8 => Ok(vk::Format::R32G32_SFLOAT),
        12 => Ok(vk::Format::R32G32B32_SFLOAT),
        16 => Ok(vk::Format::R32G32B32A32_SFLOAT),
        other => Err(VulkanError::UnsupportedAttributeSize(other)),
    }
}

/// Attribute descriptions for binding 0 and the stride.  `attributes` must be sorted by location.
pub fn vertex_input(
    attributes: &[Attribute],
) -> Result<(Vec<vk::VertexInputAttributeDescription>, u32), VulkanError> {
    let mut offset = 0;
    let mut descriptions = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        descriptions.push(vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding: 0,
            format: attribute_format(attribute.size)?,
            offset,
        });
        offset += attribute.size;
    }
    Ok((descriptions, offset))
}

/// Descriptor counts per type, scaled so `max_sets` sets of every layout fit.
pub fn pool_sizes<'a>(
    bindings: impl IntoIterator<Item = &'a Binding>,
    max_sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for binding in bindings {
        *counts.entry(binding.descriptor_type.as_raw()).or_default() += binding.count;
    }
    counts
        .into_iter()
        .map(|(ty, count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count: count * max_sets,
        })
        .collect()
}

pub struct Pipeline<'e, 's> {
    engine: &'e Engine,
    name: String,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    /// Shader `i` owns descriptor set `i`.
    shaders: Vec<&'s Shader<'e>>,
    bindings: Vec<Binding>,
    pool: vk::DescriptorPool,
    packages: Vec<Package<'e>>,
    terminated: bool,
}

impl<'e, 's> Pipeline<'e, 's> {
    pub fn new(
        engine: &'e Engine,
        name: impl Into<String>,
        shaders: &[&'s Shader<'e>],
        target: &RenderTarget<'_>,
        spec: PipelineSpec,
    ) -> Result<Self, VulkanError> {
        let name = name.into();
        if shaders.is_empty() {
            return Err(VulkanError::Precondition("a pipeline needs at least one shader"));
        }
        for shader in shaders {
            shader.ensure_live("shader")?;
        }
        target.ensure_live("render target")?;
        let device = engine.device();

        let set_layouts: Vec<_> = shaders.iter().map(|s| s.set_layout()).collect();
        let push_constants: Vec<_> = shaders
            .iter()
            .flat_map(|s| s.push_constants().iter().copied())
            .collect();
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constants);
        let layout = unsafe { device.create_pipeline_layout(&layout_ci, None) }
            .during("vkCreatePipelineLayout")?;

        let pipeline = match Self::build(engine, shaders, target, spec, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let bindings: Vec<Binding> = shaders
            .iter()
            .flat_map(|s| s.bindings().values().copied())
            .collect();

        log::debug!(
            "pipeline {name}: {} shaders, {} bindings",
            shaders.len(),
            bindings.len()
        );
        Ok(Pipeline {
            engine,
            name,
            layout,
            pipeline,
            shaders: shaders.to_vec(),
            bindings,
            pool: vk::DescriptorPool::null(),
            packages: Vec::new(),
            terminated: false,
        })
    }

    fn build(
        engine: &Engine,
        shaders: &[&Shader<'_>],
        target: &RenderTarget<'_>,
        spec: PipelineSpec,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline, VulkanError> {
        let mut bits = Vec::with_capacity(shaders.len());
        for shader in shaders {
            bits.push(stage_bit(shader.stage())?);
        }
        let entry_points: Vec<&CString> = shaders.iter().map(|s| s.entry_point()).collect();
        let stage_cis: Vec<_> = shaders
            .iter()
            .zip(&bits)
            .zip(&entry_points)
            .map(|((shader, bit), entry)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*bit)
                    .module(shader.module())
                    .name(entry.as_c_str())
            })
            .collect();

        let vertex_attributes = shaders
            .iter()
            .zip(&bits)
            .find(|(_, bit)| **bit == vk::ShaderStageFlags::VERTEX)
            .map(|(s, _)| s.inputs())
            .unwrap_or(&[]);
        let (attributes, stride) = vertex_input(vertex_attributes)?;
        let vertex_bindings = if attributes.is_empty() {
            vec![]
        } else {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&attributes);

        let tessellated = bits.iter().any(|b| {
            b.intersects(
                vk::ShaderStageFlags::TESSELLATION_CONTROL
                    | vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            )
        });
        let topology = if tessellated {
            vk::PrimitiveTopology::PATCH_LIST
        } else {
            vk::PrimitiveTopology::TRIANGLE_LIST
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology)
            .primitive_restart_enable(false);
        let tessellation =
            vk::PipelineTessellationStateCreateInfo::default().patch_control_points(3);

        // Sized to the target but dynamic, so draws set the real values.
        let extent = target.extent();
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(spec.polygon_mode)
            .cull_mode(spec.cull_mode)
            .front_face(spec.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        // NOTE sample shading is a device feature and stays off when the engine could not enable it
        let sample_shading = engine.enabled_features().sample_rate_shading == vk::TRUE;
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(sample_shading)
            .min_sample_shading(1.0);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let mut pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_cis)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(target.render_pass())
            .subpass(0);
        if tessellated {
            pipeline_ci = pipeline_ci.tessellation_state(&tessellation);
        }

        let pipelines = unsafe {
            engine.device().create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_ci],
                None,
            )
        }
        .map_err(|(_, e)| e)
        .during("vkCreateGraphicsPipelines")?;
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Native {
                call: "vkCreateGraphicsPipelines",
                result: vk::Result::ERROR_UNKNOWN,
                location: std::panic::Location::caller(),
            })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Issue an empty package for `shader`'s descriptor set.  Returns `None` when no shader in
    /// the pipeline declares a binding.
    ///
    /// Every package issued earlier moves to a new pool during this call.  Their descriptor set
    /// handles change; their bindings do not.
    pub fn create_package(&mut self, shader: &Shader<'_>) -> Result<Option<PackageId>, VulkanError> {
        self.ensure_live("pipeline")?;
        shader.ensure_live("shader")?;
        let set_index = self
            .shaders
            .iter()
            .position(|s| s.module() == shader.module())
            .ok_or_else(|| VulkanError::ShaderNotInPipeline(format!("{:?}", shader.stage())))?;
        if self.bindings.is_empty() {
            return Ok(None);
        }

        let engine = self.engine;
        let device = engine.device();
        let max_sets = self.packages.len() as u32 + 1;
        let sizes = pool_sizes(&self.bindings, max_sets);
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .during("vkCreateDescriptorPool")?;

        // Every set is allocated before any package moves, so a failure leaves them all in place.
        let live: Vec<usize> = (0..self.packages.len())
            .filter(|i| !self.packages[*i].is_terminated())
            .collect();
        let mut layouts: Vec<_> = live
            .iter()
            .map(|i| self.packages[*i].set_layout())
            .collect();
        let shader_layout = self.shaders[set_index].set_layout();
        layouts.push(shader_layout);
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(e) => {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                return Err(e).during("vkAllocateDescriptorSets");
            }
        };

        for (i, set) in live.iter().zip(&sets) {
            self.packages[*i].swap_descriptors(pool, *set)?;
        }
        let new_set = sets[sets.len() - 1];
        self.packages.push(Package::new(
            engine,
            shader_layout,
            pool,
            new_set,
            set_index as u32,
        ));

        if self.pool != vk::DescriptorPool::null() {
            unsafe { device.destroy_descriptor_pool(self.pool, None) };
        }
        self.pool = pool;
        log::debug!(
            "pipeline {}: pool grown to {max_sets} sets, {} packages moved",
            self.name,
            live.len()
        );
        Ok(Some(PackageId(self.packages.len() - 1)))
    }

    pub fn package(&self, id: PackageId) -> Result<&Package<'e>, VulkanError> {
        self.packages
            .get(id.0)
            .ok_or(VulkanError::Precondition("package not issued by this pipeline"))
    }

    pub fn package_mut(&mut self, id: PackageId) -> Result<&mut Package<'e>, VulkanError> {
        self.packages
            .get_mut(id.0)
            .ok_or(VulkanError::Precondition("package not issued by this pipeline"))
    }

    pub fn bind(&self, cb: &CommandBuffer<'_>) -> Result<(), VulkanError> {
        self.ensure_live("pipeline")?;
        cb.ensure_recording()?;
        unsafe {
            self.engine.device().cmd_bind_pipeline(
                cb.handle(),
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            )
        };
        Ok(())
    }

    pub fn bind_package(&self, cb: &CommandBuffer<'_>, id: PackageId) -> Result<(), VulkanError> {
        self.ensure_live("pipeline")?;
        self.package(id)?.bind(cb, self.layout)
    }

    pub fn push_constants(
        &self,
        cb: &CommandBuffer<'_>,
        stage: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), VulkanError> {
        self.ensure_live("pipeline")?;
        cb.ensure_recording()?;
        unsafe {
            self.engine
                .device()
                .cmd_push_constants(cb.handle(), self.layout, stage, offset, bytes)
        };
        Ok(())
    }
}

impl Terminable for Pipeline<'_, '_> {
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        for package in &mut self.packages {
            package.terminate();
        }
        let device = self.engine.device();
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.pool, None);
            }
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
        log::trace!("pipeline {} terminated", self.name);
        self.terminated = true;
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for Pipeline<'_, '_> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vk::ShaderStageFlags as S;

    fn attr(location: u32, size: u32) -> Attribute {
        Attribute {
            location,
            size,
            name: None,
        }
    }

    #[test]
    fn stage_priority() {
        assert_eq!(stage_bit(S::FRAGMENT).unwrap(), S::FRAGMENT);
        assert_eq!(stage_bit(S::VERTEX | S::FRAGMENT).unwrap(), S::VERTEX);
        assert_eq!(
            stage_bit(S::GEOMETRY | S::TESSELLATION_EVALUATION).unwrap(),
            S::TESSELLATION_EVALUATION
        );
        assert!(matches!(
            stage_bit(S::COMPUTE),
            Err(VulkanError::UnsupportedShaderStage(S::COMPUTE))
        ));
    }

    #[test]
    fn packed_vertex_input() {
        let (descriptions, stride) =
            vertex_input(&[attr(0, 12), attr(1, 8), attr(2, 16), attr(3, 4)]).unwrap();
        assert_eq!(stride, 40);
        let offsets: Vec<_> = descriptions.iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20, 36]);
        let formats: Vec<_> = descriptions.iter().map(|d| d.format).collect();
        assert_eq!(
            formats,
            vec![
                vk::Format::R32G32B32_SFLOAT,
                vk::Format::R32G32_SFLOAT,
                vk::Format::R32G32B32A32_SFLOAT,
                vk::Format::R32_UINT,
            ]
        );
        assert!(descriptions.iter().all(|d| d.binding == 0));

        let (none, stride) = vertex_input(&[]).unwrap();
        assert!(none.is_empty());
        assert_eq!(stride, 0);
    }

    #[test]
    fn odd_attribute_sizes_fail() {
        assert!(matches!(
            vertex_input(&[attr(0, 16), attr(1, 6)]),
            Err(VulkanError::UnsupportedAttributeSize(6))
        ));
    }

    #[test]
    fn pool_sizes_grouped() {
        let binding = |binding, count, descriptor_type| Binding {
            set: 0,
            binding,
            count,
            descriptor_type,
        };
        let bindings = [
            binding(0, 1, vk::DescriptorType::UNIFORM_BUFFER),
            binding(1, 4, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            binding(0, 2, vk::DescriptorType::UNIFORM_BUFFER),
        ];
        let sizes = pool_sizes(&bindings, 3);
        assert_eq!(sizes.len(), 2);
        let count = |ty| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(9));
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(12));
        assert!(pool_sizes(&[], 1).is_empty());
    }

    #[test]
    fn spec_defaults() {
        let spec = PipelineSpec::default();
        assert_eq!(spec.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(spec.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(spec.polygon_mode, vk::PolygonMode::FILL);
        let wire = PipelineSpec::builder()
            .polygon_mode(vk::PolygonMode::LINE)
            .cull_mode(vk::CullModeFlags::NONE)
            .build();
        assert_eq!(wire.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(wire.polygon_mode, vk::PolygonMode::LINE);
    }
}
