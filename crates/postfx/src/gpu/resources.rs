use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::error::BackendError;
use crate::types::{LookupImage, TextureFilter};

use super::context::TARGET_FORMAT;

/// A sampled texture together with the view and sampler bound for it.
pub(crate) struct TextureResource {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
}

fn check_size(label: &str, width: u32, height: u32, max: u32) -> Result<(), BackendError> {
    if width == 0 || height == 0 || width > max || height > max {
        return Err(BackendError::Allocation {
            label: label.to_string(),
            width,
            height,
            reason: format!("dimensions must be within 1..={max}"),
        });
    }
    Ok(())
}

fn sampler(device: &wgpu::Device, label: &str, filter: TextureFilter) -> wgpu::Sampler {
    let mode = match filter {
        TextureFilter::Linear => wgpu::FilterMode::Linear,
        TextureFilter::Nearest => wgpu::FilterMode::Nearest,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: mode,
        min_filter: mode,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// Color attachment that is also sampled by later passes.
pub(crate) fn create_render_target(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    max_dimension: u32,
) -> Result<TextureResource, BackendError> {
    check_size(label, width, height, max_dimension)?;
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = sampler(device, label, TextureFilter::Linear);
    Ok(TextureResource {
        texture,
        view,
        sampler,
        width,
        height,
    })
}

/// Static RGBA8 texture uploaded in one go.
pub(crate) fn create_lookup_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: &LookupImage,
    filter: TextureFilter,
    max_dimension: u32,
) -> Result<TextureResource, BackendError> {
    check_size(label, image.width, image.height, max_dimension)?;
    if !image.is_consistent() {
        return Err(BackendError::Allocation {
            label: label.to_string(),
            width: image.width,
            height: image.height,
            reason: format!("expected RGBA8 data, got {} bytes", image.pixels.len()),
        });
    }
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        &image.pixels,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = sampler(device, label, filter);
    Ok(TextureResource {
        texture,
        view,
        sampler,
        width: image.width,
        height: image.height,
    })
}

pub(crate) fn create_vertex_buffer(
    device: &wgpu::Device,
    label: &str,
    data: &[f32],
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::VERTEX,
    })
}

/// Copies `texture` into tightly packed RGBA8 rows.
pub(crate) fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &TextureResource,
) -> Result<Vec<u8>, BackendError> {
    let (width, height) = (texture.width, texture.height);
    let row_bytes = width * 4;
    let padded_bytes_per_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("display readback"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = readback.slice(..);
    let (sender, receiver) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = sender.send(res);
    });
    loop {
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| BackendError::Readback(err.to_string()))?;
        match receiver.try_recv() {
            Ok(res) => {
                res.map_err(|err| BackendError::Readback(err.to_string()))?;
                break;
            }
            Err(crossbeam_channel::TryRecvError::Empty) => continue,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                return Err(BackendError::Readback(
                    "map callback dropped before completing".to_string(),
                ));
            }
        }
    }

    let mapped = slice.get_mapped_range();
    let mut pixels = vec![0u8; (row_bytes as usize) * (height as usize)];
    for row in 0..height as usize {
        let src = row * padded_bytes_per_row as usize;
        let dst = row * row_bytes as usize;
        pixels[dst..dst + row_bytes as usize]
            .copy_from_slice(&mapped[src..src + row_bytes as usize]);
    }
    drop(mapped);
    readback.unmap();
    Ok(pixels)
}
