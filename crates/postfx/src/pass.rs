use std::borrow::Cow;
use std::fmt;

use tracing::debug;

use crate::backend::{AttributeDecl, ProgramDescriptor, RenderBackend};
use crate::error::{PipelineError, Result};
use crate::geometry::GeometryBinding;
use crate::types::{
    AttributeLocation, BlendMode, FramebufferId, ProgramId, TextureId, OPAQUE_BLACK,
};
use crate::uniform::{UniformSet, UniformType, UniformValue};

pub const POSITION_ATTRIBUTE: &str = "aPosition";
pub const NORMAL_ATTRIBUTE: &str = "aNormal";

/// The fixed set of passes a frame can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    Scene,
    Edge,
    Weights,
    Blend,
}

impl PassKind {
    /// Post-process passes in execution order.
    pub const AA_ORDER: [PassKind; 3] = [PassKind::Edge, PassKind::Weights, PassKind::Blend];

    pub fn name(self) -> &'static str {
        match self {
            PassKind::Scene => "background",
            PassKind::Edge => "edge",
            PassKind::Weights => "weights",
            PassKind::Blend => "blend",
        }
    }

    /// Input textures in texture-unit order.
    pub fn inputs(self) -> &'static [TextureInput] {
        match self {
            PassKind::Scene => &[],
            PassKind::Edge => &[TextureInput::Source],
            PassKind::Weights => &[
                TextureInput::AreaTable,
                TextureInput::SearchTable,
                TextureInput::EdgeOutput,
            ],
            PassKind::Blend => &[TextureInput::WeightsOutput, TextureInput::Source],
        }
    }

    pub fn sampler_names(self) -> Vec<&'static str> {
        self.inputs()
            .iter()
            .map(|input| input.sampler_name())
            .collect()
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Texture a pass samples from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureInput {
    Source,
    AreaTable,
    SearchTable,
    EdgeOutput,
    WeightsOutput,
}

impl TextureInput {
    pub fn sampler_name(self) -> &'static str {
        match self {
            TextureInput::Source => "uRenderTexture",
            TextureInput::AreaTable => "uAreaTexture",
            TextureInput::SearchTable => "uSearchTexture",
            TextureInput::EdgeOutput => "uEdgeTexture",
            TextureInput::WeightsOutput => "uWeightsTexture",
        }
    }
}

/// Surfaces a pass may render into, resolved to framebuffers at draw time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceSlot {
    Source,
    Edges,
    Weights,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputTarget {
    Display,
    Surface(SurfaceSlot),
}

/// Registration data for one pass: opaque program sources plus its uniform table.
#[derive(Clone, Debug)]
pub struct PassProgram {
    pub kind: PassKind,
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
    pub uniforms: Vec<(&'static str, UniformValue)>,
    pub uses_normals: bool,
}

impl PassProgram {
    pub fn new(
        kind: PassKind,
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            vertex: vertex.into(),
            fragment: fragment.into(),
            uniforms: Vec::new(),
            uses_normals: false,
        }
    }

    pub fn with_uniform(mut self, name: &'static str, value: UniformValue) -> Self {
        self.uniforms.push((name, value));
        self
    }

    pub fn with_normals(mut self) -> Self {
        self.uses_normals = true;
        self
    }
}

/// One program invocation over the shared quad.
///
/// Only `active` and `output` change after creation.
#[derive(Debug)]
pub struct Pass {
    kind: PassKind,
    active: bool,
    program: ProgramId,
    geometry: GeometryBinding,
    position: AttributeLocation,
    normal: Option<AttributeLocation>,
    uniforms: UniformSet,
    output: OutputTarget,
}

impl Pass {
    /// Builds the program and resolves attribute and uniform locations.
    ///
    /// A program without a usable position attribute, or without a normal attribute when
    /// normals are declared, is rejected.
    pub fn create<B: RenderBackend + ?Sized>(
        backend: &mut B,
        registration: &PassProgram,
        geometry: GeometryBinding,
        output: OutputTarget,
    ) -> Result<Self> {
        let kind = registration.kind;
        let uniform_table: Vec<(&str, UniformType)> = registration
            .uniforms
            .iter()
            .map(|(name, value)| (*name, value.ty()))
            .collect();
        let samplers = kind.sampler_names();
        let mut attributes = vec![AttributeDecl::new(POSITION_ATTRIBUTE, geometry.components())];
        if registration.uses_normals {
            attributes.push(AttributeDecl::new(NORMAL_ATTRIBUTE, geometry.components()));
        }

        let program = backend.create_program(&ProgramDescriptor {
            label: kind.name(),
            vertex_source: &registration.vertex,
            fragment_source: &registration.fragment,
            attributes: &attributes,
            uniforms: &uniform_table,
            samplers: &samplers,
        })?;

        let resolved = resolve_attributes(&*backend, kind, program, registration.uses_normals);
        let (position, normal) = match resolved {
            Ok(locations) => locations,
            Err(err) => {
                backend.destroy_program(program);
                return Err(err);
            }
        };

        let mut uniforms = UniformSet::new(registration.uniforms.iter().copied());
        uniforms.resolve(&*backend, program);
        debug!(pass = %kind, %program, uniforms = uniforms.len(), "created pass");

        Ok(Self {
            kind,
            active: true,
            program,
            geometry,
            position,
            normal,
            uniforms,
            output,
        })
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn output(&self) -> OutputTarget {
        self.output
    }

    pub fn set_output(&mut self, output: OutputTarget) {
        self.output = output;
    }

    pub fn uses_normals(&self) -> bool {
        self.normal.is_some()
    }

    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).map(|uniform| uniform.value())
    }

    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<()> {
        self.uniforms.set(self.kind, name, value)
    }

    /// Updates `name` only when the pass declares it.
    pub fn set_uniform_if_present(&mut self, name: &str, value: UniformValue) -> Result<bool> {
        if !self.uniforms.contains(name) {
            return Ok(false);
        }
        self.set_uniform(name, value)?;
        Ok(true)
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_program(self.program);
    }
}

fn resolve_attributes<B: RenderBackend + ?Sized>(
    backend: &B,
    kind: PassKind,
    program: ProgramId,
    uses_normals: bool,
) -> Result<(AttributeLocation, Option<AttributeLocation>)> {
    let position = backend
        .attribute_location(program, POSITION_ATTRIBUTE)
        .ok_or(PipelineError::InvalidAttribute {
            pass: kind,
            attribute: POSITION_ATTRIBUTE,
        })?;
    let normal = if uses_normals {
        Some(
            backend
                .attribute_location(program, NORMAL_ATTRIBUTE)
                .ok_or(PipelineError::InvalidAttribute {
                    pass: kind,
                    attribute: NORMAL_ATTRIBUTE,
                })?,
        )
    } else {
        None
    };
    Ok((position, normal))
}

/// Runs one pass against `target` (`None` is the display).
///
/// `inputs` must hold one texture per entry of [`PassKind::inputs`], in unit order.
/// Returns whether a draw was issued.
pub fn execute<B: RenderBackend + ?Sized>(
    backend: &mut B,
    pass: &mut Pass,
    target: Option<FramebufferId>,
    inputs: &[TextureId],
) -> Result<bool> {
    if !pass.active {
        return Ok(false);
    }
    debug_assert_eq!(
        inputs.len(),
        pass.kind.inputs().len(),
        "{} pass bound with the wrong number of inputs",
        pass.kind
    );

    backend.use_program(pass.program);
    backend.bind_framebuffer(target);
    backend.clear(OPAQUE_BLACK);
    backend.set_blend(BlendMode::REPLACE);

    let components = pass.geometry.components();
    backend.bind_attribute(pass.position, pass.geometry.position(), components);
    if let Some(normal) = pass.normal {
        backend.bind_attribute(normal, pass.geometry.normal(), components);
    }

    pass.uniforms.upload(backend, pass.program)?;

    for (unit, texture) in inputs.iter().enumerate() {
        backend.bind_texture(unit as u32, *texture);
    }

    backend.draw_triangles(0, pass.geometry.vertex_count())?;
    Ok(true)
}
