use std::borrow::Cow;
use std::fmt::Write as _;

use wgpu::naga::ShaderStage;

use crate::backend::ProgramDescriptor;
use crate::error::BackendError;
use crate::uniform::UniformType;

/// Byte offset of one uniform inside the `std140` parameter block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct UniformSlot {
    pub ty: UniformType,
    pub offset: u32,
}

/// `std140` layout of a program's uniform table, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UniformBlock {
    pub slots: Vec<UniformSlot>,
    pub size: u32,
}

impl UniformBlock {
    pub fn layout(uniforms: &[(&str, UniformType)]) -> Self {
        let mut offset = 0u32;
        let mut slots = Vec::with_capacity(uniforms.len());
        for (_, ty) in uniforms {
            offset = offset.next_multiple_of(ty.std140_align());
            slots.push(UniformSlot {
                ty: *ty,
                offset,
            });
            offset += ty.std140_size();
        }
        // Empty blocks still get a padding float so the binding is never zero-sized.
        let size = offset.max(4).next_multiple_of(16);
        Self { slots, size }
    }
}

/// Prepends the generated declarations to a program body.
///
/// Sources arrive as bodies: attributes, the uniform block and samplers are declared here
/// from the registration data so every backend agrees on names and bindings. Uniforms
/// are reached through `#define` aliases into a `std140` block at set 0, binding 0;
/// sampler `n` is a texture/sampler pair at set 1, bindings `2n` and `2n + 1`.
pub(crate) fn wrap_source(descriptor: &ProgramDescriptor<'_>, stage: ShaderStage) -> String {
    let mut prelude = String::from("#version 450\n");

    if stage == ShaderStage::Vertex {
        for (location, attribute) in descriptor.attributes.iter().enumerate() {
            let ty = match attribute.components {
                1 => "float".to_string(),
                n => format!("vec{n}"),
            };
            let _ = writeln!(
                prelude,
                "layout(location = {location}) in {ty} {};",
                attribute.name
            );
        }
    }

    prelude.push_str("layout(std140, set = 0, binding = 0) uniform PassParams {\n");
    if descriptor.uniforms.is_empty() {
        prelude.push_str("    float _aa_pad;\n");
    }
    for (name, ty) in descriptor.uniforms {
        let _ = writeln!(prelude, "    {} _{name};", ty.glsl_name());
    }
    prelude.push_str("} aa_params;\n");
    for (name, _) in descriptor.uniforms {
        let _ = writeln!(prelude, "#define {name} aa_params._{name}");
    }

    if stage == ShaderStage::Fragment {
        for (unit, name) in descriptor.samplers.iter().enumerate() {
            let texture_binding = unit * 2;
            let sampler_binding = texture_binding + 1;
            let _ = writeln!(
                prelude,
                "layout(set = 1, binding = {texture_binding}) uniform texture2D aa_unit{unit}_texture;"
            );
            let _ = writeln!(
                prelude,
                "layout(set = 1, binding = {sampler_binding}) uniform sampler aa_unit{unit}_sampler;"
            );
            let _ = writeln!(
                prelude,
                "#define {name} sampler2D(aa_unit{unit}_texture, aa_unit{unit}_sampler)"
            );
        }
    }

    let body = strip_version(match stage {
        ShaderStage::Vertex => descriptor.vertex_source,
        _ => descriptor.fragment_source,
    });
    format!("{prelude}\n#line 1\n{body}")
}

fn strip_version(source: &str) -> String {
    let mut body = String::with_capacity(source.len());
    for line in source.lines() {
        if line.trim_start().starts_with("#version") {
            body.push('\n');
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    body
}

/// Compiles one stage inside a validation error scope.
pub(crate) fn compile_stage(
    device: &wgpu::Device,
    descriptor: &ProgramDescriptor<'_>,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule, BackendError> {
    let wrapped = wrap_source(descriptor, stage);
    let label = format!("{} {}", descriptor.label, stage_name(stage));

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(wrapped),
            stage,
            defines: &[],
        },
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(BackendError::Program {
            label,
            reason: err.to_string(),
        });
    }
    Ok(module)
}

fn stage_name(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vertex",
        ShaderStage::Fragment => "fragment",
        _ => "shader",
    }
}
