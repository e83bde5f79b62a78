use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use wgpu::util::DeviceExt;

use crate::backend::{ProgramDescriptor, RenderBackend};
use crate::error::BackendError;
use crate::types::{
    AttributeLocation, BlendMode, BufferId, FramebufferId, LookupImage, ProgramId,
    RenderTargetStorage, TextureFilter, TextureId, UniformLocation,
};
use crate::uniform::UniformValue;

use super::context::{AdapterProfile, GpuContext, GpuOptions};
use super::pipeline::{PipelineKey, ProgramResource};
use super::resources::{self, TextureResource};

#[derive(Clone, Copy, Debug)]
struct PendingClear {
    target: Option<FramebufferId>,
    color: [f32; 4],
}

/// Bind state accumulated by the command calls and consumed by each draw.
#[derive(Default)]
struct DrawState {
    program: Option<ProgramId>,
    framebuffer: Option<FramebufferId>,
    clear: Option<PendingClear>,
    blend: BlendMode,
    attributes: BTreeMap<u32, (BufferId, u32)>,
    units: BTreeMap<u32, TextureId>,
}

/// [`RenderBackend`] on a headless wgpu device.
///
/// The display is an offscreen RGBA8 texture that can be read back with
/// [`read_display`](Self::read_display). Draws are recorded into one command encoder that
/// [`submit`](RenderBackend::submit) hands to the queue.
pub struct WgpuBackend {
    context: GpuContext,
    display: TextureResource,
    textures: HashMap<TextureId, TextureResource>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    programs: HashMap<ProgramId, ProgramResource>,
    next_handle: u32,
    state: DrawState,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    pub fn new(options: GpuOptions, width: u32, height: u32) -> Result<Self> {
        let context = GpuContext::new(options)?;
        let display = resources::create_render_target(
            &context.device,
            "display",
            width,
            height,
            context.max_dimension(),
        )?;
        Ok(Self {
            context,
            display,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            next_handle: 1,
            state: DrawState::default(),
            encoder: None,
        })
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.context.adapter_profile
    }

    /// Submits outstanding work and copies the display into an image.
    pub fn read_display(&mut self) -> Result<image::RgbaImage, BackendError> {
        self.submit()?;
        let pixels = resources::read_texture(&self.context.device, &self.context.queue, &self.display)?;
        image::RgbaImage::from_raw(self.display.width, self.display.height, pixels)
            .ok_or_else(|| BackendError::Readback("readback size mismatch".to_string()))
    }

    /// Reads back the texture behind a render target, for inspecting intermediate passes.
    pub fn read_texture(&mut self, texture: TextureId) -> Result<image::RgbaImage, BackendError> {
        self.submit()?;
        let resource = self
            .textures
            .get(&texture)
            .ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })?;
        let pixels = resources::read_texture(&self.context.device, &self.context.queue, resource)?;
        image::RgbaImage::from_raw(resource.width, resource.height, pixels)
            .ok_or_else(|| BackendError::Readback("readback size mismatch".to_string()))
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn ensure_live(&self) -> Result<(), BackendError> {
        if self.context.is_lost() {
            return Err(BackendError::ContextLost);
        }
        Ok(())
    }

    /// Encodes a clear that no draw picked up.
    fn flush_clear(&mut self) {
        let Some(clear) = self.state.clear.take() else {
            return;
        };
        let encoder = self.encoder.get_or_insert_with(|| {
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("postfx frame encoder"),
                })
        });
        let view = match clear.target {
            None => &self.display.view,
            Some(framebuffer) => {
                let view = self
                    .framebuffers
                    .get(&framebuffer)
                    .and_then(|texture| self.textures.get(texture))
                    .map(|resource| &resource.view);
                match view {
                    Some(view) => view,
                    None => {
                        tracing::warn!(%framebuffer, "dropping clear of a destroyed framebuffer");
                        return;
                    }
                }
            }
        };
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(to_color(clear.color)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
    }
}

fn to_color(color: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(color[0]),
        g: f64::from(color[1]),
        b: f64::from(color[2]),
        a: f64::from(color[3]),
    }
}

impl RenderBackend for WgpuBackend {
    fn is_context_lost(&self) -> bool {
        self.context.is_lost()
    }

    fn display_size(&self) -> (u32, u32) {
        (self.display.width, self.display.height)
    }

    fn resize_display(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.ensure_live()?;
        if self.display_size() == (width, height) {
            return Ok(());
        }
        if self.state.clear.is_some_and(|clear| clear.target.is_none()) {
            self.state.clear = None;
        }
        self.display = resources::create_render_target(
            &self.context.device,
            "display",
            width,
            height,
            self.context.max_dimension(),
        )?;
        tracing::debug!(width, height, "resized display");
        Ok(())
    }

    fn create_render_target(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<RenderTargetStorage, BackendError> {
        self.ensure_live()?;
        let resource = resources::create_render_target(
            &self.context.device,
            label,
            width,
            height,
            self.context.max_dimension(),
        )?;
        let texture = TextureId(self.next_id());
        let framebuffer = FramebufferId(self.next_id());
        self.textures.insert(texture, resource);
        self.framebuffers.insert(framebuffer, texture);
        Ok(RenderTargetStorage {
            texture,
            framebuffer,
        })
    }

    fn destroy_render_target(&mut self, storage: RenderTargetStorage) {
        if self
            .state
            .clear
            .is_some_and(|clear| clear.target == Some(storage.framebuffer))
        {
            self.state.clear = None;
        }
        if self.state.framebuffer == Some(storage.framebuffer) {
            self.state.framebuffer = None;
        }
        self.framebuffers.remove(&storage.framebuffer);
        self.textures.remove(&storage.texture);
    }

    fn create_texture(
        &mut self,
        label: &str,
        image: &LookupImage,
        filter: TextureFilter,
    ) -> Result<TextureId, BackendError> {
        self.ensure_live()?;
        let resource = resources::create_lookup_texture(
            &self.context.device,
            &self.context.queue,
            label,
            image,
            filter,
            self.context.max_dimension(),
        )?;
        let texture = TextureId(self.next_id());
        self.textures.insert(texture, resource);
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.state.units.retain(|_, bound| *bound != texture);
    }

    fn create_vertex_buffer(&mut self, label: &str, data: &[f32]) -> Result<BufferId, BackendError> {
        self.ensure_live()?;
        let buffer = resources::create_vertex_buffer(&self.context.device, label, data);
        let id = BufferId(self.next_id());
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn destroy_vertex_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        self.state.attributes.retain(|_, (bound, _)| *bound != buffer);
    }

    fn create_program(&mut self, descriptor: &ProgramDescriptor<'_>) -> Result<ProgramId, BackendError> {
        self.ensure_live()?;
        let resource = ProgramResource::new(&self.context.device, descriptor)?;
        let program = ProgramId(self.next_id());
        tracing::debug!(%program, label = descriptor.label, "compiled program");
        self.programs.insert(program, resource);
        Ok(program)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        self.programs
            .get(&program)?
            .attribute_index(name)
            .map(AttributeLocation)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .uniform_index(name)
            .map(UniformLocation)
    }

    fn use_program(&mut self, program: ProgramId) {
        self.state.program = Some(program);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if self
            .state
            .clear
            .is_some_and(|clear| clear.target != framebuffer)
        {
            self.flush_clear();
        }
        self.state.framebuffer = framebuffer;
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.state.clear = Some(PendingClear {
            target: self.state.framebuffer,
            color,
        });
    }

    fn set_blend(&mut self, blend: BlendMode) {
        self.state.blend = blend;
    }

    fn bind_attribute(&mut self, location: AttributeLocation, buffer: BufferId, components: u32) {
        self.state
            .attributes
            .insert(location.0, (buffer, components));
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) -> Result<(), BackendError> {
        let program = self.state.program.ok_or(BackendError::NoProgram)?;
        let resource = self
            .programs
            .get_mut(&program)
            .ok_or(BackendError::UnknownHandle {
                kind: "program",
                id: program.0,
            })?;
        let slot = resource
            .uniforms
            .slots
            .get(location.0 as usize)
            .copied()
            .ok_or(BackendError::UnknownHandle {
                kind: "uniform",
                id: location.0,
            })?;
        if slot.ty != value.ty() {
            return Err(BackendError::UniformMismatch {
                program,
                location,
                expected: slot.ty,
                actual: value.ty(),
            });
        }
        let bytes = value.to_bytes();
        let start = slot.offset as usize;
        resource.uniform_data[start..start + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.state.units.insert(unit, texture);
    }

    fn draw_triangles(&mut self, first: u32, count: u32) -> Result<(), BackendError> {
        self.ensure_live()?;
        let program = self.state.program.ok_or(BackendError::NoProgram)?;
        let target = self.state.framebuffer;

        let Self {
            context,
            display,
            textures,
            framebuffers,
            buffers,
            programs,
            state,
            encoder,
            ..
        } = self;

        let resource = programs
            .get_mut(&program)
            .ok_or(BackendError::UnknownHandle {
                kind: "program",
                id: program.0,
            })?;
        let declared = resource.attributes.len() as u32;
        let key = PipelineKey {
            blend: state.blend,
            attributes: state
                .attributes
                .iter()
                .filter(|(location, _)| **location < declared)
                .map(|(location, (_, components))| (*location, *components))
                .collect(),
        };
        resource.prepare(&context.device, &key)?;
        let resource = &*resource;

        let mut vertex_buffers = Vec::with_capacity(key.attributes.len());
        for (location, _) in &key.attributes {
            let Some((buffer_id, _)) = state.attributes.get(location) else {
                continue;
            };
            let buffer = buffers.get(buffer_id).ok_or(BackendError::UnknownHandle {
                kind: "buffer",
                id: buffer_id.0,
            })?;
            vertex_buffers.push(buffer);
        }

        let texture_group = match resource.texture_layout.as_ref() {
            Some(layout) => {
                let mut entries = Vec::with_capacity(resource.sampler_count as usize * 2);
                for unit in 0..resource.sampler_count {
                    let texture = state
                        .units
                        .get(&unit)
                        .ok_or(BackendError::UnboundTexture { unit })?;
                    let bound = textures.get(texture).ok_or(BackendError::UnknownHandle {
                        kind: "texture",
                        id: texture.0,
                    })?;
                    entries.push(wgpu::BindGroupEntry {
                        binding: unit * 2,
                        resource: wgpu::BindingResource::TextureView(&bound.view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: unit * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(&bound.sampler),
                    });
                }
                Some(context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("texture unit bind group"),
                    layout,
                    entries: &entries,
                }))
            }
            None => None,
        };

        let view = match target {
            None => &display.view,
            Some(framebuffer) => {
                let texture = framebuffers
                    .get(&framebuffer)
                    .ok_or(BackendError::UnknownHandle {
                        kind: "framebuffer",
                        id: framebuffer.0,
                    })?;
                &textures
                    .get(texture)
                    .ok_or(BackendError::UnknownHandle {
                        kind: "texture",
                        id: texture.0,
                    })?
                    .view
            }
        };

        let load = match state.clear.take() {
            Some(clear) if clear.target == target => wgpu::LoadOp::Clear(to_color(clear.color)),
            other => {
                state.clear = other;
                wgpu::LoadOp::Load
            }
        };

        let encoder = encoder.get_or_insert_with(|| {
            context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("postfx frame encoder"),
                })
        });

        // Per-draw staging copy keeps every pass on its own uniform values.
        let staging = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniform staging"),
                contents: &resource.uniform_data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        encoder.copy_buffer_to_buffer(
            &staging,
            0,
            &resource.uniform_buffer,
            0,
            resource.uniform_data.len() as u64,
        );

        let pipeline = resource.cached(&key).ok_or_else(|| BackendError::Program {
            label: resource.label.clone(),
            reason: "render pipeline missing after preparation".to_string(),
        })?;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&resource.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &resource.uniform_bind_group, &[]);
        if let Some(group) = texture_group.as_ref() {
            pass.set_bind_group(1, group, &[]);
        }
        for (slot, buffer) in vertex_buffers.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }
        pass.draw(first..first + count, 0..1);
        Ok(())
    }

    fn submit(&mut self) -> Result<(), BackendError> {
        self.ensure_live()?;
        self.flush_clear();
        if let Some(encoder) = self.encoder.take() {
            self.context.queue.submit(Some(encoder.finish()));
        }
        Ok(())
    }
}
