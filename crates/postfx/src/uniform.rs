use tracing::warn;

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::pass::PassKind;
use crate::types::{ProgramId, UniformLocation};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
}

impl UniformType {
    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformType::Float => "float",
            UniformType::Int => "int",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
        }
    }

    /// Byte size inside a std140 block.
    pub fn std140_size(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
        }
    }

    /// Base alignment inside a std140 block.
    pub fn std140_align(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 | UniformType::Vec4 => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
        }
    }

    /// Little-endian bytes as laid out in a std140 block.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(value) => bytemuck::bytes_of(value).to_vec(),
            UniformValue::Int(value) => bytemuck::bytes_of(value).to_vec(),
            UniformValue::Vec2(value) => bytemuck::cast_slice(value).to_vec(),
            UniformValue::Vec3(value) => bytemuck::cast_slice(value).to_vec(),
            UniformValue::Vec4(value) => bytemuck::cast_slice(value).to_vec(),
        }
    }
}

/// A named, typed uniform with a location cache bound to one program.
#[derive(Clone, Debug)]
pub struct Uniform {
    name: &'static str,
    value: UniformValue,
    location: Option<UniformLocation>,
    resolved_for: Option<ProgramId>,
}

impl Uniform {
    pub fn new(name: &'static str, value: UniformValue) -> Self {
        Self {
            name,
            value,
            location: None,
            resolved_for: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> UniformValue {
        self.value
    }

    pub fn ty(&self) -> UniformType {
        self.value.ty()
    }

    /// Cached location, valid only while `program` matches the program it was resolved for.
    pub fn location_for(&self, program: ProgramId) -> Option<UniformLocation> {
        match self.resolved_for {
            Some(resolved) if resolved == program => self.location,
            _ => None,
        }
    }

    fn resolve<B: RenderBackend + ?Sized>(&mut self, backend: &B, program: ProgramId) {
        if self.resolved_for == Some(program) {
            return;
        }
        self.location = backend.uniform_location(program, self.name);
        self.resolved_for = Some(program);
        if self.location.is_none() {
            warn!(
                uniform = self.name,
                %program,
                "uniform not found in program; value will not be uploaded"
            );
        }
    }
}

/// Uniforms owned by a single pass, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct UniformSet {
    entries: Vec<Uniform>,
}

impl UniformSet {
    pub fn new(entries: impl IntoIterator<Item = (&'static str, UniformValue)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, value)| Uniform::new(name, value))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uniform> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Uniform> {
        self.entries.iter().find(|uniform| uniform.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Assigns a new value; the type must match the declared one.
    pub fn set(&mut self, pass: PassKind, name: &str, value: UniformValue) -> Result<()> {
        let uniform = self
            .entries
            .iter_mut()
            .find(|uniform| uniform.name == name)
            .ok_or_else(|| PipelineError::UnknownUniform {
                pass,
                name: name.to_string(),
            })?;
        if uniform.ty() != value.ty() {
            return Err(PipelineError::UniformType {
                pass,
                name: name.to_string(),
                expected: uniform.ty(),
                actual: value.ty(),
            });
        }
        uniform.value = value;
        Ok(())
    }

    /// Re-resolves every cached location against `program`.
    pub fn resolve<B: RenderBackend + ?Sized>(&mut self, backend: &B, program: ProgramId) {
        for uniform in &mut self.entries {
            uniform.resolve(backend, program);
        }
    }

    /// Pushes current values to the bound program; unresolved uniforms are skipped.
    pub fn upload<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        program: ProgramId,
    ) -> Result<()> {
        for uniform in &mut self.entries {
            uniform.resolve(&*backend, program);
            if let Some(location) = uniform.location_for(program) {
                backend.set_uniform(location, &uniform.value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AttributeDecl, ProgramDescriptor};
    use crate::recording::RecordingBackend;

    fn program(backend: &mut RecordingBackend, label: &str, uniforms: &[(&str, UniformType)]) -> ProgramId {
        backend
            .create_program(&ProgramDescriptor {
                label,
                vertex_source: "",
                fragment_source: "",
                attributes: &[AttributeDecl::new("aPosition", 2)],
                uniforms,
                samplers: &[],
            })
            .expect("program")
    }

    #[test]
    fn set_rejects_type_changes() {
        let mut set = UniformSet::new([("uThreshold", UniformValue::Float(0.1))]);
        let err = set
            .set(PassKind::Edge, "uThreshold", UniformValue::Int(3))
            .expect_err("type mismatch");
        assert!(matches!(err, PipelineError::UniformType { .. }));
        set.set(PassKind::Edge, "uThreshold", UniformValue::Float(0.2))
            .expect("same type");
        assert_eq!(
            set.get("uThreshold").map(Uniform::value),
            Some(UniformValue::Float(0.2))
        );
    }

    #[test]
    fn set_rejects_unknown_names() {
        let mut set = UniformSet::new([("uTime", UniformValue::Float(0.0))]);
        let err = set
            .set(PassKind::Scene, "uMissing", UniformValue::Float(1.0))
            .expect_err("unknown uniform");
        assert!(matches!(err, PipelineError::UnknownUniform { .. }));
    }

    #[test]
    fn cached_location_is_scoped_to_its_program() {
        let mut backend = RecordingBackend::new();
        let first = program(&mut backend, "first", &[("uTime", UniformType::Float)]);
        let second = program(
            &mut backend,
            "second",
            &[("uResolution", UniformType::Vec2), ("uTime", UniformType::Float)],
        );

        let mut set = UniformSet::new([("uTime", UniformValue::Float(1.0))]);
        set.resolve(&backend, first);
        let uniform = set.get("uTime").expect("uniform");
        assert!(uniform.location_for(first).is_some());
        assert!(uniform.location_for(second).is_none());

        set.resolve(&backend, second);
        let uniform = set.get("uTime").expect("uniform");
        assert!(uniform.location_for(first).is_none());
        assert_eq!(
            uniform.location_for(second),
            backend.uniform_location(second, "uTime")
        );
    }

    #[test]
    fn std140_bytes_match_value_width() {
        assert_eq!(UniformValue::Int(16).to_bytes(), 16i32.to_le_bytes().to_vec());
        assert_eq!(UniformValue::Vec2([1.0, 2.0]).to_bytes().len(), 8);
        assert_eq!(UniformType::Vec3.std140_align(), 16);
    }
}
