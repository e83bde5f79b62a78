//! In-memory [`RenderBackend`] that records every command and draw.
//!
//! Used by the test suites and by embedders that want to inspect pass ordering
//! without a GPU.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::backend::{ProgramDescriptor, RenderBackend};
use crate::error::BackendError;
use crate::types::{
    AttributeLocation, BlendMode, BufferId, FramebufferId, LookupImage, ProgramId,
    RenderTargetStorage, TextureFilter, TextureId, UniformLocation,
};
use crate::uniform::{UniformType, UniformValue};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    UseProgram(ProgramId),
    BindFramebuffer(Option<FramebufferId>),
    Clear([f32; 4]),
    SetBlend(BlendMode),
    BindAttribute {
        location: AttributeLocation,
        buffer: BufferId,
        components: u32,
    },
    SetUniform {
        location: UniformLocation,
        value: UniformValue,
    },
    BindTexture {
        unit: u32,
        texture: TextureId,
    },
    Draw {
        first: u32,
        count: u32,
    },
    Submit,
}

/// Snapshot of the bound state at the moment of a draw.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub label: String,
    /// `None` is the display.
    pub target: Option<FramebufferId>,
    pub target_size: (u32, u32),
    pub textures: Vec<(u32, TextureId)>,
    pub texture_sizes: Vec<(u32, u32)>,
    pub uniforms: Vec<(String, UniformValue)>,
    pub blend: BlendMode,
    pub first: u32,
    pub count: u32,
}

impl DrawCall {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .iter()
            .find(|(uniform, _)| uniform == name)
            .map(|(_, value)| *value)
    }

    pub fn texture(&self, unit: u32) -> Option<TextureId> {
        self.textures
            .iter()
            .find(|(bound, _)| *bound == unit)
            .map(|(_, texture)| *texture)
    }

    pub fn targets_display(&self) -> bool {
        self.target.is_none()
    }
}

#[derive(Debug)]
struct RecordedProgram {
    label: String,
    attributes: Vec<String>,
    uniforms: Vec<(String, UniformType)>,
    samplers: usize,
    values: HashMap<u32, UniformValue>,
}

#[derive(Debug, Default)]
struct BoundState {
    program: Option<ProgramId>,
    framebuffer: Option<FramebufferId>,
    blend: BlendMode,
    textures: BTreeMap<u32, TextureId>,
}

#[derive(Debug)]
pub struct RecordingBackend {
    next_id: u32,
    display: (u32, u32),
    lost: bool,
    fail_allocations: bool,
    failing_labels: HashSet<String>,
    hidden_attributes: HashSet<String>,
    textures: HashMap<TextureId, (u32, u32)>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    buffers: HashSet<BufferId>,
    programs: HashMap<ProgramId, RecordedProgram>,
    render_target_allocations: usize,
    state: BoundState,
    commands: Vec<Command>,
    draws: Vec<DrawCall>,
    submits: usize,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_display(800, 600)
    }

    pub fn with_display(width: u32, height: u32) -> Self {
        Self {
            next_id: 1,
            display: (width, height),
            lost: false,
            fail_allocations: false,
            failing_labels: HashSet::new(),
            hidden_attributes: HashSet::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashSet::new(),
            programs: HashMap::new(),
            render_target_allocations: 0,
            state: BoundState::default(),
            commands: Vec::new(),
            draws: Vec::new(),
            submits: 0,
        }
    }

    /// Simulates device loss; later draws and submits fail.
    pub fn lose_context(&mut self) {
        self.lost = true;
    }

    /// Makes subsequent render-target and texture allocations fail.
    pub fn fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    /// Makes subsequent allocations labelled `label` fail; others still succeed.
    pub fn fail_allocations_for(&mut self, label: &str) {
        self.failing_labels.insert(label.to_string());
    }

    /// Pretends programs do not expose `name`, as if the compiler stripped it.
    pub fn hide_attribute(&mut self, name: &str) {
        self.hidden_attributes.insert(name.to_string());
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|command| predicate(command)).count()
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn draw_labels(&self) -> Vec<&str> {
        self.draws.iter().map(|draw| draw.label.as_str()).collect()
    }

    pub fn submits(&self) -> usize {
        self.submits
    }

    /// Forgets recorded commands and draws; resources are kept.
    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.draws.clear();
        self.submits = 0;
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).copied()
    }

    pub fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).copied()
    }

    pub fn live_render_targets(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Total render targets ever created.
    pub fn render_target_allocations(&self) -> usize {
        self.render_target_allocations
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocation_error(&self, label: &str, width: u32, height: u32) -> Option<BackendError> {
        if self.lost {
            return Some(BackendError::ContextLost);
        }
        if self.fail_allocations || self.failing_labels.contains(label) {
            return Some(BackendError::Allocation {
                label: label.to_string(),
                width,
                height,
                reason: "allocation failure injected".into(),
            });
        }
        None
    }

    fn snapshot(&self, program: ProgramId, first: u32, count: u32) -> Result<DrawCall, BackendError> {
        let recorded = self
            .programs
            .get(&program)
            .ok_or(BackendError::UnknownHandle {
                kind: "program",
                id: program.0,
            })?;
        let target_size = match self.state.framebuffer {
            None => self.display,
            Some(framebuffer) => self
                .framebuffers
                .get(&framebuffer)
                .and_then(|texture| self.textures.get(texture))
                .copied()
                .ok_or(BackendError::UnknownHandle {
                    kind: "framebuffer",
                    id: framebuffer.0,
                })?,
        };
        let textures: Vec<(u32, TextureId)> = self
            .state
            .textures
            .iter()
            .filter(|(unit, _)| (**unit as usize) < recorded.samplers)
            .map(|(unit, texture)| (*unit, *texture))
            .collect();
        let mut texture_sizes = Vec::with_capacity(textures.len());
        for (_, texture) in &textures {
            let size = self
                .textures
                .get(texture)
                .copied()
                .ok_or(BackendError::UnknownHandle {
                    kind: "texture",
                    id: texture.0,
                })?;
            texture_sizes.push(size);
        }
        let uniforms = recorded
            .uniforms
            .iter()
            .enumerate()
            .filter_map(|(index, (name, _))| {
                recorded
                    .values
                    .get(&(index as u32))
                    .map(|value| (name.clone(), *value))
            })
            .collect();

        Ok(DrawCall {
            program,
            label: recorded.label.clone(),
            target: self.state.framebuffer,
            target_size,
            textures,
            texture_sizes,
            uniforms,
            blend: self.state.blend,
            first,
            count,
        })
    }
}

impl RenderBackend for RecordingBackend {
    fn is_context_lost(&self) -> bool {
        self.lost
    }

    fn display_size(&self) -> (u32, u32) {
        self.display
    }

    fn resize_display(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        if self.lost {
            return Err(BackendError::ContextLost);
        }
        self.display = (width, height);
        Ok(())
    }

    fn create_render_target(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<RenderTargetStorage, BackendError> {
        if let Some(err) = self.allocation_error(label, width, height) {
            return Err(err);
        }
        let texture = TextureId(self.next_id());
        let framebuffer = FramebufferId(self.next_id());
        self.textures.insert(texture, (width, height));
        self.framebuffers.insert(framebuffer, texture);
        self.render_target_allocations += 1;
        Ok(RenderTargetStorage {
            texture,
            framebuffer,
        })
    }

    fn destroy_render_target(&mut self, storage: RenderTargetStorage) {
        self.framebuffers.remove(&storage.framebuffer);
        self.textures.remove(&storage.texture);
    }

    fn create_texture(
        &mut self,
        label: &str,
        image: &LookupImage,
        _filter: TextureFilter,
    ) -> Result<TextureId, BackendError> {
        if let Some(err) = self.allocation_error(label, image.width, image.height) {
            return Err(err);
        }
        let texture = TextureId(self.next_id());
        self.textures.insert(texture, (image.width, image.height));
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn create_vertex_buffer(&mut self, label: &str, data: &[f32]) -> Result<BufferId, BackendError> {
        if let Some(err) = self.allocation_error(label, data.len() as u32, 1) {
            return Err(err);
        }
        let buffer = BufferId(self.next_id());
        self.buffers.insert(buffer);
        Ok(buffer)
    }

    fn destroy_vertex_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn create_program(&mut self, descriptor: &ProgramDescriptor<'_>) -> Result<ProgramId, BackendError> {
        if self.lost {
            return Err(BackendError::ContextLost);
        }
        let program = ProgramId(self.next_id());
        let attributes = descriptor
            .attributes
            .iter()
            .map(|attribute| attribute.name.to_string())
            .collect();
        let uniforms = descriptor
            .uniforms
            .iter()
            .map(|(name, ty)| (name.to_string(), *ty))
            .collect();
        self.programs.insert(
            program,
            RecordedProgram {
                label: descriptor.label.to_string(),
                attributes,
                uniforms,
                samplers: descriptor.samplers.len(),
                values: HashMap::new(),
            },
        );
        Ok(program)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        if self.hidden_attributes.contains(name) {
            return None;
        }
        self.programs
            .get(&program)?
            .attributes
            .iter()
            .position(|attribute| attribute == name)
            .map(|index| AttributeLocation(index as u32))
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .uniforms
            .iter()
            .position(|(uniform, _)| uniform == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn use_program(&mut self, program: ProgramId) {
        self.commands.push(Command::UseProgram(program));
        self.state.program = Some(program);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.commands.push(Command::BindFramebuffer(framebuffer));
        self.state.framebuffer = framebuffer;
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.commands.push(Command::Clear(color));
    }

    fn set_blend(&mut self, blend: BlendMode) {
        self.commands.push(Command::SetBlend(blend));
        self.state.blend = blend;
    }

    fn bind_attribute(&mut self, location: AttributeLocation, buffer: BufferId, components: u32) {
        self.commands.push(Command::BindAttribute {
            location,
            buffer,
            components,
        });
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) -> Result<(), BackendError> {
        self.commands.push(Command::SetUniform {
            location,
            value: *value,
        });
        let program = self.state.program.ok_or(BackendError::NoProgram)?;
        let recorded = self
            .programs
            .get_mut(&program)
            .ok_or(BackendError::UnknownHandle {
                kind: "program",
                id: program.0,
            })?;
        let expected = recorded
            .uniforms
            .get(location.0 as usize)
            .map(|(_, ty)| *ty)
            .ok_or(BackendError::UnknownHandle {
                kind: "uniform",
                id: location.0,
            })?;
        if expected != value.ty() {
            return Err(BackendError::UniformMismatch {
                program,
                location,
                expected,
                actual: value.ty(),
            });
        }
        recorded.values.insert(location.0, *value);
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.commands.push(Command::BindTexture { unit, texture });
        self.state.textures.insert(unit, texture);
    }

    fn draw_triangles(&mut self, first: u32, count: u32) -> Result<(), BackendError> {
        self.commands.push(Command::Draw { first, count });
        if self.lost {
            return Err(BackendError::ContextLost);
        }
        let program = self.state.program.ok_or(BackendError::NoProgram)?;
        let draw = self.snapshot(program, first, count)?;
        self.draws.push(draw);
        Ok(())
    }

    fn submit(&mut self) -> Result<(), BackendError> {
        self.commands.push(Command::Submit);
        if self.lost {
            return Err(BackendError::ContextLost);
        }
        self.submits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AttributeDecl;

    #[test]
    fn draw_snapshots_bound_state() {
        let mut backend = RecordingBackend::with_display(640, 480);
        let program = backend
            .create_program(&ProgramDescriptor {
                label: "edge",
                vertex_source: "",
                fragment_source: "",
                attributes: &[AttributeDecl::new("aPosition", 2)],
                uniforms: &[("uResolution", UniformType::Vec2)],
                samplers: &["uRenderTexture"],
            })
            .expect("program");
        let target = backend
            .create_render_target("edges", 320, 240)
            .expect("target");
        let location = backend
            .uniform_location(program, "uResolution")
            .expect("location");

        backend.use_program(program);
        backend.bind_framebuffer(Some(target.framebuffer));
        backend
            .set_uniform(location, &UniformValue::Vec2([320.0, 240.0]))
            .expect("uniform");
        backend.bind_texture(0, target.texture);
        backend.bind_texture(3, target.texture);
        backend.draw_triangles(0, 6).expect("draw");

        let draw = &backend.draws()[0];
        assert_eq!(draw.label, "edge");
        assert_eq!(draw.target_size, (320, 240));
        assert_eq!(draw.textures, vec![(0, target.texture)]);
        assert_eq!(draw.uniform("uResolution"), Some(UniformValue::Vec2([320.0, 240.0])));
    }

    #[test]
    fn set_uniform_checks_declared_type() {
        let mut backend = RecordingBackend::new();
        let program = backend
            .create_program(&ProgramDescriptor {
                label: "weights",
                vertex_source: "",
                fragment_source: "",
                attributes: &[],
                uniforms: &[("uSearchSteps", UniformType::Int)],
                samplers: &[],
            })
            .expect("program");
        backend.use_program(program);
        let err = backend
            .set_uniform(UniformLocation(0), &UniformValue::Float(1.0))
            .expect_err("type mismatch");
        assert!(matches!(err, BackendError::UniformMismatch { .. }));
    }

    #[test]
    fn lost_context_fails_draws_and_allocations() {
        let mut backend = RecordingBackend::new();
        backend.lose_context();
        assert!(backend.is_context_lost());
        assert!(matches!(
            backend.create_render_target("x", 1, 1),
            Err(BackendError::ContextLost)
        ));
        assert!(matches!(backend.submit(), Err(BackendError::ContextLost)));
    }
}
