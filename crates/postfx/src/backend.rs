//! Command-level seam between the pass pipeline and a graphics device.
//!
//! The interface is state-machine shaped: a program, a framebuffer,
//! attributes, uniforms and texture units are bound, then a draw consumes that state.
//! [`WgpuBackend`](crate::gpu::WgpuBackend) maps it onto wgpu render passes and
//! [`RecordingBackend`](crate::recording::RecordingBackend) captures it for tests.

use crate::error::BackendError;
use crate::types::{
    AttributeLocation, BlendMode, BufferId, FramebufferId, LookupImage, ProgramId,
    RenderTargetStorage, TextureFilter, TextureId, UniformLocation,
};
use crate::uniform::{UniformType, UniformValue};

/// Vertex input declared by a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeDecl<'a> {
    pub name: &'a str,
    pub components: u32,
}

impl<'a> AttributeDecl<'a> {
    pub const fn new(name: &'a str, components: u32) -> Self {
        Self { name, components }
    }
}

/// Everything a backend needs to build a program.
///
/// `samplers` lists texture unit names in unit order (unit 0 first).
#[derive(Clone, Copy, Debug)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    pub vertex_source: &'a str,
    pub fragment_source: &'a str,
    pub attributes: &'a [AttributeDecl<'a>],
    pub uniforms: &'a [(&'a str, UniformType)],
    pub samplers: &'a [&'a str],
}

pub trait RenderBackend {
    /// True once the underlying device is gone; nothing issued afterwards has any effect.
    fn is_context_lost(&self) -> bool;

    /// Current display size in pixels.
    fn display_size(&self) -> (u32, u32);
    fn resize_display(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    fn create_render_target(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<RenderTargetStorage, BackendError>;
    fn destroy_render_target(&mut self, storage: RenderTargetStorage);

    fn create_texture(
        &mut self,
        label: &str,
        image: &LookupImage,
        filter: TextureFilter,
    ) -> Result<TextureId, BackendError>;
    fn destroy_texture(&mut self, texture: TextureId);

    /// Uploads tightly packed `f32` vertex data.
    fn create_vertex_buffer(&mut self, label: &str, data: &[f32]) -> Result<BufferId, BackendError>;
    fn destroy_vertex_buffer(&mut self, buffer: BufferId);

    fn create_program(&mut self, descriptor: &ProgramDescriptor<'_>) -> Result<ProgramId, BackendError>;
    fn destroy_program(&mut self, program: ProgramId);

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn use_program(&mut self, program: ProgramId);
    /// `None` targets the display.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn clear(&mut self, color: [f32; 4]);
    fn set_blend(&mut self, blend: BlendMode);
    fn bind_attribute(&mut self, location: AttributeLocation, buffer: BufferId, components: u32);
    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) -> Result<(), BackendError>;
    fn bind_texture(&mut self, unit: u32, texture: TextureId);
    fn draw_triangles(&mut self, first: u32, count: u32) -> Result<(), BackendError>;

    /// Hands recorded work to the device without waiting for completion.
    fn submit(&mut self) -> Result<(), BackendError>;
}
