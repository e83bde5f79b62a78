use tracing::debug;

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::types::{FramebufferId, RenderTargetStorage, TextureId};

/// Offscreen render target that keeps its identity across reallocation.
///
/// A surface is either attachable (texture and framebuffer both present) or not at all.
#[derive(Debug)]
pub struct Surface {
    label: String,
    width: u32,
    height: u32,
    storage: Option<RenderTargetStorage>,
}

impl Surface {
    /// Allocates a color attachment of exactly `width` x `height`.
    pub fn create<B: RenderBackend + ?Sized>(
        backend: &mut B,
        label: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        ensure_dimensions(width, height)?;
        let label = label.into();
        let storage = backend.create_render_target(&label, width, height)?;
        debug!(surface = %label, width, height, "allocated surface");
        Ok(Self {
            label,
            width,
            height,
            storage: Some(storage),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_attachable(&self) -> bool {
        self.storage.is_some()
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.storage.map(|storage| storage.texture)
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.storage.map(|storage| storage.framebuffer)
    }

    pub fn storage(&self) -> Option<RenderTargetStorage> {
        self.storage
    }

    /// Reallocates storage in place. Identical dimensions on an attachable surface are a no-op.
    ///
    /// The previous storage is always released. If the new allocation fails the surface
    /// stays unattachable and the error is returned.
    pub fn resize<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<()> {
        ensure_dimensions(width, height)?;
        if self.is_attachable() && self.size() == (width, height) {
            return Ok(());
        }

        if let Some(previous) = self.storage.take() {
            backend.destroy_render_target(previous);
        }
        self.width = width;
        self.height = height;
        let storage = backend.create_render_target(&self.label, width, height)?;
        self.storage = Some(storage);
        debug!(surface = %self.label, width, height, "reallocated surface");
        Ok(())
    }

    /// Destroys the GPU storage; the surface stays unattachable until resized.
    pub fn release<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(storage) = self.storage.take() {
            backend.destroy_render_target(storage);
            debug!(surface = %self.label, "released surface");
        }
    }
}

pub(crate) fn ensure_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidDimensions { width, height });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBackend;

    #[test]
    fn create_allocates_exact_size() {
        let mut backend = RecordingBackend::new();
        let surface = Surface::create(&mut backend, "edges", 800, 600).expect("surface");
        assert!(surface.is_attachable());
        let texture = surface.texture().expect("texture");
        assert_eq!(backend.texture_size(texture), Some((800, 600)));
        assert_eq!(backend.live_render_targets(), 1);
    }

    #[test]
    fn create_rejects_zero_dimensions() {
        let mut backend = RecordingBackend::new();
        let err = Surface::create(&mut backend, "edges", 0, 600).expect_err("zero width");
        assert!(matches!(err, PipelineError::InvalidDimensions { .. }));
        assert_eq!(backend.live_render_targets(), 0);
    }

    #[test]
    fn create_propagates_allocation_failure() {
        let mut backend = RecordingBackend::new();
        backend.fail_allocations(true);
        let err = Surface::create(&mut backend, "edges", 64, 64).expect_err("allocation");
        assert!(matches!(err, PipelineError::Backend(_)));
    }

    #[test]
    fn resize_replaces_storage_without_leaking() {
        let mut backend = RecordingBackend::new();
        let mut surface = Surface::create(&mut backend, "weights", 320, 240).expect("surface");
        let before = surface.texture().expect("texture");

        for step in 1..=16u32 {
            surface
                .resize(&mut backend, 320 + step, 240 + step)
                .expect("resize");
        }

        let after = surface.texture().expect("texture");
        assert_ne!(before, after);
        assert_eq!(surface.size(), (336, 256));
        assert_eq!(backend.texture_size(after), Some((336, 256)));
        assert_eq!(backend.texture_size(before), None);
        assert_eq!(backend.live_render_targets(), 1);
    }

    #[test]
    fn resize_to_same_size_is_a_no_op() {
        let mut backend = RecordingBackend::new();
        let mut surface = Surface::create(&mut backend, "weights", 320, 240).expect("surface");
        let texture = surface.texture();
        let allocations = backend.render_target_allocations();

        surface.resize(&mut backend, 320, 240).expect("resize");

        assert_eq!(surface.texture(), texture);
        assert_eq!(backend.render_target_allocations(), allocations);
    }

    #[test]
    fn failed_resize_leaves_surface_unattachable() {
        let mut backend = RecordingBackend::new();
        let mut surface = Surface::create(&mut backend, "source", 32, 32).expect("surface");
        backend.fail_allocations(true);

        surface.resize(&mut backend, 64, 64).expect_err("allocation");
        assert!(!surface.is_attachable());
        assert_eq!(surface.framebuffer(), None);
        assert_eq!(backend.live_render_targets(), 0);

        backend.fail_allocations(false);
        surface.resize(&mut backend, 64, 64).expect("recovers");
        assert!(surface.is_attachable());
    }

    #[test]
    fn release_is_idempotent() {
        let mut backend = RecordingBackend::new();
        let mut surface = Surface::create(&mut backend, "source", 8, 8).expect("surface");
        surface.release(&mut backend);
        surface.release(&mut backend);
        assert!(!surface.is_attachable());
        assert_eq!(backend.live_render_targets(), 0);
    }
}
