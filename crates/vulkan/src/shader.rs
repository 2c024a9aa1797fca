// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Shader
//!
//! A shader module plus what reflection recovers from its SPIR-V: interface attributes, named
//! descriptor bindings and push-constant ranges.  Each shader builds one descriptor-set layout
//! from its bindings.  Pipelines place that layout at the set index equal to the shader's
//! position in the pipeline's shader list.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::Path;

use ash::vk;
use spirq::ty::DescriptorType as SpirqDescriptor;
use spirq::var::Variable;

use crate::bound::Terminable;
use crate::engine::Engine;
use crate::{VkResultExt, VulkanError};

const SPIRV_MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

/// Fail unless `code` opens with a complete SPIR-V header.
pub fn check_header(code: &[u32]) -> Result<(), VulkanError> {
    if code.len() < HEADER_WORDS {
        return Err(VulkanError::Reflection(format!(
            "truncated SPIR-V header: {} of {HEADER_WORDS} words",
            code.len()
        )));
    }
    if code[0] != SPIRV_MAGIC {
        return Err(VulkanError::Reflection(format!(
            "not SPIR-V: magic number {:#010x}",
            code[0]
        )));
    }
    Ok(())
}

/// One input or output interface variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub location: u32,
    /// Bytes per element: scalar width times component count.
    pub size: u32,
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub set: u32,
    pub binding: u32,
    pub count: u32,
    pub descriptor_type: vk::DescriptorType,
}

#[derive(Clone, Debug, Default)]
pub struct ShaderReflection {
    pub entry_point: String,
    /// Sorted by location.
    pub inputs: Vec<Attribute>,
    /// Sorted by location.
    pub outputs: Vec<Attribute>,
    pub bindings: BTreeMap<String, Binding>,
    pub push_constants: Vec<vk::PushConstantRange>,
}

impl ShaderReflection {
    /// Reflect the first entry point of `code`.
    pub fn reflect(code: &[u32], stage: vk::ShaderStageFlags) -> Result<Self, VulkanError> {
        check_header(code)?;
        let entry_points = spirq::ReflectConfig::new()
            .spv(code)
            .ref_all_rscs(true)
            .reflect()
            .map_err(|e| VulkanError::Reflection(format!("{e:?}")))?;
        let entry = entry_points
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::Reflection("no entry point".to_owned()))?;

        let mut out = ShaderReflection {
            entry_point: entry.name.clone(),
            ..Default::default()
        };

        for var in entry.vars {
            match var {
                Variable::Input {
                    name,
                    location,
                    ty,
                    ..
                } => {
                    // Built-ins and opaque types have no byte size.
                    if let Some(size) = ty.nbyte() {
                        out.inputs.push(Attribute {
                            location: location.loc(),
                            size: size as u32,
                            name,
                        });
                    }
                }
                Variable::Output {
                    name,
                    location,
                    ty,
                    ..
                } => {
                    if let Some(size) = ty.nbyte() {
                        out.outputs.push(Attribute {
                            location: location.loc(),
                            size: size as u32,
                            name,
                        });
                    }
                }
                Variable::Descriptor {
                    name,
                    desc_bind,
                    desc_ty,
                    nbind,
                    ..
                } => {
                    let binding = Binding {
                        set: desc_bind.set(),
                        binding: desc_bind.bind(),
                        count: nbind.max(1),
                        descriptor_type: descriptor_type(&desc_ty)?,
                    };
                    let name = name.unwrap_or_else(|| {
                        format!("set{}_binding{}", binding.set, binding.binding)
                    });
                    out.bindings.insert(name, binding);
                }
                Variable::PushConstant { ty, .. } => {
                    let size = ty.nbyte().ok_or_else(|| {
                        VulkanError::Reflection("push constant block has no size".to_owned())
                    })?;
                    let offset = match &ty {
                        spirq::ty::Type::Struct(st) => {
                            st.members.iter().filter_map(|m| m.offset).min().unwrap_or(0)
                        }
                        _ => 0,
                    };
                    out.push_constants.push(vk::PushConstantRange {
                        stage_flags: stage,
                        offset: offset as u32,
                        size: (size - offset) as u32,
                    });
                }
                _ => {}
            }
        }

        out.inputs.sort_by_key(|a| a.location);
        out.outputs.sort_by_key(|a| a.location);
        Ok(out)
    }

    /// Native layout bindings in binding order.
    pub fn layout_bindings(
        &self,
        stage: vk::ShaderStageFlags,
    ) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        let mut bindings: Vec<_> = self
            .bindings
            .values()
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                descriptor_count: b.count,
                stage_flags: stage,
                p_immutable_samplers: std::ptr::null(),
                ..Default::default()
            })
            .collect();
        bindings.sort_by_key(|b| b.binding);
        bindings
    }
}

fn descriptor_type(desc_ty: &SpirqDescriptor) -> Result<vk::DescriptorType, VulkanError> {
    #[allow(unreachable_patterns)]
    let ty = match desc_ty {
        SpirqDescriptor::Sampler(..) => vk::DescriptorType::SAMPLER,
        SpirqDescriptor::CombinedImageSampler(..) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        SpirqDescriptor::SampledImage(..) => vk::DescriptorType::SAMPLED_IMAGE,
        SpirqDescriptor::StorageImage(..) => vk::DescriptorType::STORAGE_IMAGE,
        SpirqDescriptor::UniformTexelBuffer(..) => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        SpirqDescriptor::StorageTexelBuffer(..) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        SpirqDescriptor::UniformBuffer(..) => vk::DescriptorType::UNIFORM_BUFFER,
        SpirqDescriptor::StorageBuffer(..) => vk::DescriptorType::STORAGE_BUFFER,
        SpirqDescriptor::InputAttachment(..) => vk::DescriptorType::INPUT_ATTACHMENT,
        SpirqDescriptor::AccelStruct(..) => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        other => {
            return Err(VulkanError::Reflection(format!(
                "unsupported descriptor type {other:?}"
            )));
        }
    };
    Ok(ty)
}

/// Little-endian words, zero padded up to a multiple of four bytes.
pub fn code_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

pub struct Shader<'e> {
    engine: &'e Engine,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
    reflection: ShaderReflection,
    set_layout: vk::DescriptorSetLayout,
    terminated: bool,
}

impl<'e> Shader<'e> {
    pub fn from_file(
        engine: &'e Engine,
        path: impl AsRef<Path>,
        stage: vk::ShaderStageFlags,
    ) -> Result<Self, VulkanError> {
        let bytes = std::fs::read(path.as_ref())?;
        log::debug!("loaded shader {:?}", path.as_ref());
        Self::from_bytes(engine, &bytes, stage)
    }

    pub fn from_bytes(
        engine: &'e Engine,
        bytes: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> Result<Self, VulkanError> {
        Self::from_words(engine, &code_words(bytes), stage)
    }

    pub fn from_words(
        engine: &'e Engine,
        code: &[u32],
        stage: vk::ShaderStageFlags,
    ) -> Result<Self, VulkanError> {
        if code.is_empty() {
            return Err(VulkanError::Precondition("shader code is empty"));
        }
        // Reflect first so malformed code never reaches the driver.
        let reflection = ShaderReflection::reflect(code, stage)?;
        let entry_point = CString::new(reflection.entry_point.as_str())
            .map_err(|_| VulkanError::Reflection("entry point name contains a nul".to_owned()))?;

        let device = engine.device();
        let module_ci = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { device.create_shader_module(&module_ci, None) }
            .during("vkCreateShaderModule")?;

        let layout_bindings = reflection.layout_bindings(stage);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        let set_layout = match unsafe { device.create_descriptor_set_layout(&layout_ci, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_shader_module(module, None) };
                return Err(e).during("vkCreateDescriptorSetLayout");
            }
        };

        log::debug!(
            "{stage:?} shader: {} inputs, {} bindings, {} push constant ranges",
            reflection.inputs.len(),
            reflection.bindings.len(),
            reflection.push_constants.len()
        );
        Ok(Shader {
            engine,
            module,
            stage,
            entry_point,
            reflection,
            set_layout,
            terminated: false,
        })
    }

    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &CString {
        &self.entry_point
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn inputs(&self) -> &[Attribute] {
        &self.reflection.inputs
    }

    pub fn outputs(&self) -> &[Attribute] {
        &self.reflection.outputs
    }

    pub fn bindings(&self) -> &BTreeMap<String, Binding> {
        &self.reflection.bindings
    }

    pub fn push_constants(&self) -> &[vk::PushConstantRange] {
        &self.reflection.push_constants
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }
}

impl Terminable for Shader<'_> {
    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        let device = self.engine.device();
        unsafe {
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_shader_module(self.module, None);
        }
        self.terminated = true;
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for Shader<'_> {
    fn drop(&mut self) {
        self.terminate();
    }
}
