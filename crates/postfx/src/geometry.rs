use crate::backend::RenderBackend;
use crate::error::Result;
use crate::types::BufferId;

/// Two counter-clockwise triangles covering clip space.
pub const QUAD_POSITIONS: [f32; 12] = [
    -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, //
    -1.0, -1.0, 1.0, 1.0, -1.0, 1.0,
];

/// Placeholder normals; post-process programs never read them.
pub const QUAD_NORMALS: [f32; 12] = [0.0; 12];

pub const QUAD_VERTEX_COUNT: u32 = 6;
pub const QUAD_COMPONENTS: u32 = 2;

/// Shared full-screen quad. Copyable handles, owned by whoever created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryBinding {
    position: BufferId,
    normal: BufferId,
}

impl GeometryBinding {
    pub fn fullscreen_quad<B: RenderBackend + ?Sized>(backend: &mut B) -> Result<Self> {
        let position = backend.create_vertex_buffer("quad positions", &QUAD_POSITIONS)?;
        let normal = match backend.create_vertex_buffer("quad normals", &QUAD_NORMALS) {
            Ok(buffer) => buffer,
            Err(err) => {
                backend.destroy_vertex_buffer(position);
                return Err(err.into());
            }
        };
        Ok(Self { position, normal })
    }

    pub fn position(&self) -> BufferId {
        self.position
    }

    pub fn normal(&self) -> BufferId {
        self.normal
    }

    pub fn components(&self) -> u32 {
        QUAD_COMPONENTS
    }

    pub fn vertex_count(&self) -> u32 {
        QUAD_VERTEX_COUNT
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_vertex_buffer(self.position);
        backend.destroy_vertex_buffer(self.normal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_covers_clip_space_with_six_vertices() {
        assert_eq!(
            QUAD_POSITIONS.len() as u32,
            QUAD_VERTEX_COUNT * QUAD_COMPONENTS
        );
        let xs: Vec<f32> = QUAD_POSITIONS.iter().step_by(2).copied().collect();
        let ys: Vec<f32> = QUAD_POSITIONS.iter().skip(1).step_by(2).copied().collect();
        assert!(xs.iter().all(|x| x.abs() == 1.0));
        assert!(ys.iter().all(|y| y.abs() == 1.0));
    }
}
