use std::collections::HashMap;

use wgpu::naga::ShaderStage;

use crate::backend::ProgramDescriptor;
use crate::error::BackendError;
use crate::types::{BlendFactor, BlendMode};

use super::compile::{compile_stage, UniformBlock};
use super::context::TARGET_FORMAT;

/// Everything that selects one `wgpu::RenderPipeline` for a program.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub blend: BlendMode,
    /// `(location, components)` per bound attribute, ascending by location.
    pub attributes: Vec<(u32, u32)>,
}

/// Compiled stages plus the bind state shared by every draw of one program.
pub(crate) struct ProgramResource {
    pub label: String,
    pub attributes: Vec<String>,
    pub uniform_names: Vec<String>,
    pub uniforms: UniformBlock,
    /// CPU mirror of the uniform block, copied into `uniform_buffer` before each draw.
    pub uniform_data: Vec<u8>,
    pub uniform_buffer: wgpu::Buffer,
    pub uniform_bind_group: wgpu::BindGroup,
    pub texture_layout: Option<wgpu::BindGroupLayout>,
    pub sampler_count: u32,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl ProgramResource {
    pub fn new(
        device: &wgpu::Device,
        descriptor: &ProgramDescriptor<'_>,
    ) -> Result<Self, BackendError> {
        let vertex = compile_stage(device, descriptor, ShaderStage::Vertex)?;
        let fragment = compile_stage(device, descriptor, ShaderStage::Fragment)?;

        let uniforms = UniformBlock::layout(descriptor.uniforms);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(descriptor.label),
            size: u64::from(uniforms.size),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let sampler_count = descriptor.samplers.len() as u32;
        let texture_layout = (sampler_count > 0).then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture unit layout"),
                entries: &texture_layout_entries(sampler_count),
            })
        });

        let mut bind_group_layouts = vec![&uniform_layout];
        if let Some(layout) = texture_layout.as_ref() {
            bind_group_layouts.push(layout);
        }
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(descriptor.label),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });

        Ok(Self {
            label: descriptor.label.to_string(),
            attributes: descriptor
                .attributes
                .iter()
                .map(|attribute| attribute.name.to_string())
                .collect(),
            uniform_names: descriptor
                .uniforms
                .iter()
                .map(|(name, _)| name.to_string())
                .collect(),
            uniform_data: vec![0; uniforms.size as usize],
            uniforms,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            sampler_count,
            vertex,
            fragment,
            layout,
            pipelines: HashMap::new(),
        })
    }

    /// Builds and caches the pipeline for `key` unless it already exists.
    pub fn prepare(&mut self, device: &wgpu::Device, key: &PipelineKey) -> Result<(), BackendError> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let pipeline = self.build(device, key)?;
        tracing::debug!(program = %self.label, blend = ?key.blend, "built render pipeline");
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    pub fn cached(&self, key: &PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(key)
    }

    fn build(
        &self,
        device: &wgpu::Device,
        key: &PipelineKey,
    ) -> Result<wgpu::RenderPipeline, BackendError> {
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
            .attributes
            .iter()
            .map(|(location, components)| {
                [wgpu::VertexAttribute {
                    format: vertex_format(*components),
                    offset: 0,
                    shader_location: *location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
            .attributes
            .iter()
            .zip(&attributes)
            .map(|((_, components), attribute)| wgpu::VertexBufferLayout {
                array_stride: u64::from(*components) * 4,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&self.label),
            layout: Some(&self.layout),
            vertex: wgpu::VertexState {
                module: &self.vertex,
                entry_point: Some("main"),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &self.fragment,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(blend_state(key.blend)),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::Program {
                label: self.label.clone(),
                reason: err.to_string(),
            });
        }
        Ok(pipeline)
    }

    pub fn attribute_index(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .position(|attribute| attribute == name)
            .map(|index| index as u32)
    }

    pub fn uniform_index(&self, name: &str) -> Option<u32> {
        self.uniform_names
            .iter()
            .position(|uniform| uniform == name)
            .map(|index| index as u32)
    }
}

fn texture_layout_entries(sampler_count: u32) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(sampler_count as usize * 2);
    for unit in 0..sampler_count {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: unit * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: unit * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
    }
}

fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(mode.src),
        dst_factor: blend_factor(mode.dst),
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_blend_maps_to_one_zero() {
        let state = blend_state(BlendMode::REPLACE);
        assert_eq!(state.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(state.color.dst_factor, wgpu::BlendFactor::Zero);
        assert_eq!(state, wgpu::BlendState::REPLACE);
    }

    #[test]
    fn unit_layout_pairs_texture_and_sampler() {
        let entries = texture_layout_entries(3);
        let bindings: Vec<u32> = entries.iter().map(|entry| entry.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3, 4, 5]);
        assert!(matches!(entries[5].ty, wgpu::BindingType::Sampler(_)));
    }
}
