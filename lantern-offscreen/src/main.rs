// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use ash::vk;
use clap::Parser;

use lantern_vulkan::prelude::*;
use lantern_vulkan::render_target::clear_values;
use lantern_vulkan::util::fixed_name;

#[derive(Parser, Debug)]
struct Args {
    /// Enable the Khronos validation layer
    #[arg(short = 'v', long = "validation")]
    validation: bool,

    /// Frames to render
    #[arg(short = 'n', long = "frames", default_value_t = 4)]
    frames: u32,

    #[arg(long = "width", default_value_t = 64)]
    width: u32,

    #[arg(long = "height", default_value_t = 64)]
    height: u32,
}

fn buffer_round_trip(engine: &Engine) -> Result<(), VulkanError> {
    let pattern: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
    let size = pattern.len() as vk::DeviceSize;

    let mut staging = Buffer::new(engine, size, BufferType::Staging)?;
    staging.write(0, &pattern)?;
    let mut device_local = Buffer::new(engine, size, BufferType::Vertex)?;
    device_local.from_buffer(&staging)?;

    let read = device_local.to_buffer()?.read_vec()?;
    if read != pattern {
        return Err(VulkanError::Precondition("buffer round trip changed the data"));
    }
    log::info!("buffer round trip of {size} bytes ok");
    Ok(())
}

fn render(engine: &Engine, args: &Args) -> Result<(), VulkanError> {
    let extent = vk::Extent2D {
        width: args.width,
        height: args.height,
    };
    if args.frames == 0 {
        return Err(VulkanError::Precondition("render at least one frame"));
    }
    let mut target = RenderTarget::offscreen(engine, extent, vk::Format::R8G8B8A8_UNORM)?;

    let mut last = [0.0f32; 4];
    for frame in 0..args.frames {
        let shade = (frame + 1) as f32 / args.frames as f32;
        last = [shade, 0.5, 1.0 - shade, 1.0];
        let clear = clear_values(last[0], last[1], last[2], last[3], 1.0, 0);
        let index = target.frame_index();
        target.setup_frame(&clear)?;
        target.submit_frame(true)?;
        log::debug!("frame {frame} rendered on slot {index}");
    }

    let pixels = target.color_image_mut().to_buffer()?.read_vec()?;
    let expected: Vec<u8> = last.iter().map(|c| (c * 255.0).round() as u8).collect();
    let first = &pixels[..4];
    // UNORM conversion may round either way.
    let close = first
        .iter()
        .zip(&expected)
        .all(|(got, want)| got.abs_diff(*want) <= 1);
    if !close {
        log::error!("first pixel {first:?}, expected {expected:?}");
        return Err(VulkanError::Precondition("color readback does not match clear color"));
    }
    log::info!(
        "{} frames over {} slots, readback {first:?}",
        args.frames,
        target.frame_count()
    );
    Ok(())
}

fn main() -> Result<(), VulkanError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = InstanceConfig::builder()
        .application_name("lantern-offscreen")
        .validation(args.validation)
        .graphics(false)
        .build();
    let instance = Arc::new(Instance::new(&config, None)?);
    let engine = Engine::graphics(instance)?;
    log::info!(
        "running on {:?}",
        fixed_name(&engine.properties().device_name)
    );

    buffer_round_trip(&engine)?;
    render(&engine, &args)?;
    Ok(())
}
