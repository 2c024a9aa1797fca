// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end checks against a real driver.  Run with `cargo test -- --ignored`.

use std::collections::HashSet;
use std::sync::Arc;

use ash::vk;

use lantern_vulkan::prelude::*;
use lantern_vulkan::render_target::clear_values;

fn engine() -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = InstanceConfig::builder().graphics(false).build();
    let instance = Arc::new(Instance::new(&config, None).unwrap());
    Engine::graphics(instance).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

const fn op(word_count: u32, opcode: u32) -> u32 {
    (word_count << 16) | opcode
}

/// Vertex shader with a vec4 input at location 0 and a uniform block at set 0, binding 2.
const VERTEX: &[u32] = &[
    0x0723_0203,
    0x0001_0000,
    0,
    12,
    0,
    op(2, 17), 1,
    op(3, 14), 0, 1,
    op(6, 15), 0, 1, 0x6e69_616d, 0, 7,
    op(4, 71), 7, 30, 0,
    op(3, 71), 9, 2,
    op(5, 72), 9, 0, 35, 0,
    op(4, 71), 11, 34, 0,
    op(4, 71), 11, 33, 2,
    op(2, 19), 2,
    op(3, 33), 3, 2,
    op(3, 22), 4, 32,
    op(4, 23), 5, 4, 4,
    op(4, 32), 6, 1, 5,
    op(4, 59), 6, 7, 1,
    op(3, 30), 9, 5,
    op(4, 32), 10, 2, 9,
    op(4, 59), 10, 11, 2,
    op(5, 54), 2, 1, 0, 3,
    op(2, 248), 8,
    op(1, 253),
    op(1, 56),
];

#[test]
#[ignore = "requires a Vulkan device"]
fn buffer_round_trip() {
    let engine = engine();
    for len in [1usize, 4096, 1000] {
        let data = pattern(len);
        let size = len as vk::DeviceSize;

        let mut staging = Buffer::new(&engine, size, BufferType::Staging).unwrap();
        staging.write(0, &data).unwrap();
        let mut device_local = Buffer::new(&engine, size, BufferType::Vertex).unwrap();
        device_local.from_buffer(&staging).unwrap();

        let mut readback = device_local.to_buffer().unwrap();
        assert_eq!(readback.read_vec().unwrap(), data, "{len} bytes");
    }
}

#[test]
#[ignore = "requires a Vulkan device"]
fn oversized_source_rejected() {
    let engine = engine();
    let big = Buffer::new(&engine, 64, BufferType::Staging).unwrap();
    let mut small = Buffer::new(&engine, 32, BufferType::Staging).unwrap();
    assert!(matches!(
        small.from_buffer(&big),
        Err(VulkanError::SourceTooLarge { src: 64, dst: 32 })
    ));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn layout_round_trip_keeps_contents() {
    let engine = engine();
    let extent = vk::Extent3D {
        width: 4,
        height: 4,
        depth: 1,
    };
    let mut image = Image::new(
        &engine,
        extent,
        vk::Format::R8G8B8A8_UNORM,
        ImageType::Texture2D,
        1,
        vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST,
    )
    .unwrap();

    let data = pattern(64);
    let mut staging = Buffer::new(&engine, 64, BufferType::Staging).unwrap();
    staging.write(0, &data).unwrap();
    image
        .change_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL, None)
        .unwrap();
    image.from_buffer(&staging).unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);

    image
        .change_image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, None)
        .unwrap();
    image
        .change_image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, None)
        .unwrap();
    image
        .change_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL, None)
        .unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);

    let mut readback = image.to_buffer().unwrap();
    assert_eq!(readback.size(), 64);
    assert_eq!(readback.read_vec().unwrap(), data);
    assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn binding_roles_checked() {
    let engine = engine();
    let target = RenderTarget::offscreen(
        &engine,
        vk::Extent2D {
            width: 8,
            height: 8,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .unwrap();
    let cb = target.command_buffer(0).unwrap();

    let index = Buffer::new(&engine, 64, BufferType::Index).unwrap();
    let vertex = Buffer::new(&engine, 64, BufferType::Vertex).unwrap();
    assert!(matches!(
        index.bind_as_vertex_buffer(cb, 0),
        Err(VulkanError::BufferRole {
            expected: BufferType::Vertex,
            actual: BufferType::Index
        })
    ));
    assert!(matches!(
        vertex.bind_as_index_buffer(cb, vk::IndexType::UINT32),
        Err(VulkanError::BufferRole {
            expected: BufferType::Index,
            actual: BufferType::Vertex
        })
    ));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn frames_cycle_in_order() {
    let engine = engine();
    let mut target = RenderTarget::new(
        &engine,
        vk::Extent2D {
            width: 16,
            height: 16,
        },
        vk::Format::R8G8B8A8_UNORM,
        3,
    )
    .unwrap();
    let start = target.frame_index();
    let clear = clear_values(0.0, 0.0, 0.0, 1.0, 1.0, 0);

    let mut used = Vec::new();
    for i in 0..target.frame_count() {
        let expected = target.command_buffer(i).unwrap().handle();
        let cb = target.setup_frame(&clear).unwrap().handle();
        assert_eq!(cb, expected);
        used.push(cb);
        target.submit_frame(true).unwrap();
    }
    assert_eq!(target.frame_index(), start);
    let distinct: HashSet<_> = used.iter().collect();
    assert_eq!(distinct.len(), 3);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn clear_color_reads_back() {
    let engine = engine();
    let mut target = RenderTarget::offscreen(
        &engine,
        vk::Extent2D {
            width: 4,
            height: 4,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .unwrap();
    target
        .setup_frame(&clear_values(1.0, 0.0, 1.0, 1.0, 1.0, 0))
        .unwrap();
    target.submit_frame(true).unwrap();

    let pixels = target.color_image_mut().to_buffer().unwrap().read_vec().unwrap();
    assert_eq!(pixels.len(), 64);
    assert!(pixels.chunks(4).all(|p| p == [255, 0, 255, 255]));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn packages_survive_pool_growth() {
    let engine = engine();
    let target = RenderTarget::offscreen(
        &engine,
        vk::Extent2D {
            width: 8,
            height: 8,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .unwrap();
    let shader = Shader::from_bytes(
        &engine,
        &VERTEX.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<_>>(),
        vk::ShaderStageFlags::VERTEX,
    )
    .unwrap();
    let mut pipeline =
        Pipeline::new(&engine, "grow", &[&shader], &target, PipelineSpec::default()).unwrap();
    let uniform = Buffer::new(&engine, 16, BufferType::Uniform).unwrap();

    let first = pipeline.create_package(&shader).unwrap().unwrap();
    pipeline
        .package_mut(first)
        .unwrap()
        .bind_buffers(2, &[&uniform], vk::DescriptorType::UNIFORM_BUFFER, 0)
        .unwrap();
    let old_set = pipeline.package(first).unwrap().descriptor_set();
    let old_pool = pipeline.descriptor_pool();

    let second = pipeline.create_package(&shader).unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(pipeline.package_count(), 2);

    let moved = pipeline.package(first).unwrap();
    assert_ne!(moved.descriptor_set(), old_set);
    assert_ne!(pipeline.descriptor_pool(), old_pool);
    assert_eq!(moved.pool(), pipeline.descriptor_pool());
    let bound = &moved.bindings()[&2];
    assert_eq!(bound.resources.len(), 1);
    assert!(matches!(
        bound.resources[0],
        lantern_vulkan::package::BoundResource::Buffer { buffer, range: 16 }
            if buffer == uniform.handle()
    ));
    assert!(pipeline.package(second).unwrap().bindings().is_empty());
}

#[test]
#[ignore = "requires a Vulkan device"]
fn foreign_shader_rejected() {
    let engine = engine();
    let target = RenderTarget::offscreen(
        &engine,
        vk::Extent2D {
            width: 8,
            height: 8,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .unwrap();
    let own = Shader::from_words(&engine, VERTEX, vk::ShaderStageFlags::VERTEX).unwrap();
    let mut other = Shader::from_words(&engine, VERTEX, vk::ShaderStageFlags::VERTEX).unwrap();
    let mut pipeline =
        Pipeline::new(&engine, "own", &[&own], &target, PipelineSpec::default()).unwrap();
    assert!(matches!(
        pipeline.create_package(&other),
        Err(VulkanError::ShaderNotInPipeline(_))
    ));

    other.terminate();
    assert!(matches!(
        pipeline.create_package(&other),
        Err(VulkanError::Terminated("shader"))
    ));
    assert_eq!(pipeline.package_count(), 0);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn recording_required_for_commands() {
    let engine = engine();
    let mut target = RenderTarget::offscreen(
        &engine,
        vk::Extent2D {
            width: 8,
            height: 8,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .unwrap();
    let extent = vk::Extent3D {
        width: 4,
        height: 4,
        depth: 1,
    };
    let mut image = Image::new(
        &engine,
        extent,
        vk::Format::R8G8B8A8_UNORM,
        ImageType::Texture2D,
        1,
        vk::ImageUsageFlags::TRANSFER_DST,
    )
    .unwrap();
    let vertex = Buffer::new(&engine, 64, BufferType::Vertex).unwrap();

    let idle = target.command_buffer(0).unwrap();
    assert!(!idle.is_recording());
    let before = image.layout();
    assert!(matches!(
        image.change_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL, Some(idle)),
        Err(VulkanError::Precondition(_))
    ));
    assert_eq!(image.layout(), before);
    assert!(vertex.bind_as_vertex_buffer(idle, 0).is_err());
    assert!(idle.draw_vertices(3).is_err());

    let cb = target
        .setup_frame(&clear_values(0.0, 0.0, 0.0, 1.0, 1.0, 0))
        .unwrap();
    vertex.bind_as_vertex_buffer(cb, 0).unwrap();
    target.submit_frame(true).unwrap();
}

#[test]
#[ignore = "requires a Vulkan device"]
fn uniform_lifecycle() {
    let engine = engine();
    let mut buffer = Buffer::new(&engine, 256, BufferType::Uniform).unwrap();
    let ptr = buffer.map_memory().unwrap();
    unsafe { std::ptr::write_bytes(ptr, 0x42, 256) };
    buffer.unmap_memory();
    buffer.unmap_memory();
    assert!(!buffer.is_terminated());
    assert_eq!(buffer.read_vec().unwrap(), vec![0x42; 256]);

    buffer.terminate();
    assert!(buffer.is_terminated());
    assert!(matches!(
        buffer.map_memory(),
        Err(VulkanError::Terminated(_))
    ));
    buffer.terminate();
    drop(buffer);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn non_blocking_submit_is_observable() {
    let engine = engine();
    let mut target = RenderTarget::offscreen(
        &engine,
        vk::Extent2D {
            width: 8,
            height: 8,
        },
        vk::Format::R8G8B8A8_UNORM,
    )
    .unwrap();
    target
        .setup_frame(&clear_values(0.0, 0.0, 0.0, 1.0, 1.0, 0))
        .unwrap();
    target.submit_frame(false).unwrap();
    let cb = target.command_buffer(0).unwrap();
    cb.wait().unwrap();
    assert!(cb.is_complete().unwrap());

    let staging = Buffer::new(&engine, 16, BufferType::Staging).unwrap();
    let mut dst = Buffer::new(&engine, 16, BufferType::Staging).unwrap();
    let raw = engine.begin_command_buffer_recording().unwrap();
    unsafe {
        engine.device().cmd_copy_buffer(
            raw,
            staging.handle(),
            dst.handle(),
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 16,
            }],
        )
    };
    engine.execute_recorded_commands(false).unwrap();
    engine.wait_scratch().unwrap();
    assert!(engine.is_scratch_idle().unwrap());
    assert_eq!(dst.read_vec().unwrap().len(), 16);
}
