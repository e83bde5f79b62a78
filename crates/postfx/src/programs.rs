//! Bundled GLSL programs and their uniform tables.
//!
//! Sources are bodies only: the backend prepends attribute, uniform and sampler
//! declarations generated from the registration data.

use crate::pass::{PassKind, PassProgram};
use crate::uniform::UniformValue;

pub const QUAD_VERTEX: &str = include_str!("shaders/quad.vert");
pub const BACKGROUND_FRAGMENT: &str = include_str!("shaders/background.frag");
pub const EDGE_FRAGMENT: &str = include_str!("shaders/edge.frag");
pub const WEIGHTS_FRAGMENT: &str = include_str!("shaders/weights.frag");
pub const BLEND_FRAGMENT: &str = include_str!("shaders/blend.frag");

pub const RESOLUTION_UNIFORM: &str = "uResolution";
pub const TIME_UNIFORM: &str = "uTime";
pub const ROTATION_UNIFORM: &str = "uRotation";

/// Largest search distance the area table encodes.
pub const MAX_SEARCH_STEPS: i32 = 112;

/// Tunables of the three post-process passes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmaaSettings {
    /// Luma delta that counts as an edge.
    pub threshold: f32,
    /// Local contrast adaptation factor.
    pub contrast_factor: f32,
    pub search_steps: i32,
    /// Horizontal split (0..1); pixels left of it show the unprocessed source.
    pub line_position: f32,
}

impl Default for SmaaSettings {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            contrast_factor: 2.0,
            search_steps: 16,
            line_position: 0.5,
        }
    }
}

fn resolution(width: u32, height: u32) -> UniformValue {
    UniformValue::Vec2([width as f32, height as f32])
}

pub fn background(width: u32, height: u32) -> PassProgram {
    PassProgram::new(PassKind::Scene, QUAD_VERTEX, BACKGROUND_FRAGMENT)
        .with_uniform(TIME_UNIFORM, UniformValue::Float(0.0))
        .with_uniform(ROTATION_UNIFORM, UniformValue::Float(0.0))
        .with_uniform(RESOLUTION_UNIFORM, resolution(width, height))
}

/// Registration for one of the three post-process passes.
pub fn smaa(kind: PassKind, settings: &SmaaSettings, width: u32, height: u32) -> PassProgram {
    let resolution = resolution(width, height);
    match kind {
        PassKind::Edge => PassProgram::new(kind, QUAD_VERTEX, EDGE_FRAGMENT)
            .with_uniform(RESOLUTION_UNIFORM, resolution)
            .with_uniform("uThreshold", UniformValue::Float(settings.threshold))
            .with_uniform(
                "uContrastFactor",
                UniformValue::Float(settings.contrast_factor),
            ),
        PassKind::Weights => PassProgram::new(kind, QUAD_VERTEX, WEIGHTS_FRAGMENT)
            .with_uniform(RESOLUTION_UNIFORM, resolution)
            .with_uniform(
                "uSearchSteps",
                UniformValue::Int(settings.search_steps.clamp(1, MAX_SEARCH_STEPS)),
            ),
        PassKind::Blend => PassProgram::new(kind, QUAD_VERTEX, BLEND_FRAGMENT)
            .with_uniform(RESOLUTION_UNIFORM, resolution)
            .with_uniform(
                "uLinePosition",
                UniformValue::Float(settings.line_position),
            ),
        PassKind::Scene => background(width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_program_samples_the_units_it_declares() {
        let settings = SmaaSettings::default();
        for kind in PassKind::AA_ORDER {
            let program = smaa(kind, &settings, 800, 600);
            for sampler in kind.sampler_names() {
                assert!(
                    program.fragment.contains(sampler),
                    "{kind} fragment never reads {sampler}"
                );
            }
            for (name, _) in &program.uniforms {
                assert!(
                    program.fragment.contains(name),
                    "{kind} fragment never reads {name}"
                );
            }
        }
    }

    #[test]
    fn defaults_match_pass_tunables() {
        let edge = smaa(PassKind::Edge, &SmaaSettings::default(), 800, 600);
        assert!(edge
            .uniforms
            .contains(&("uThreshold", UniformValue::Float(0.1))));
        let weights = smaa(
            PassKind::Weights,
            &SmaaSettings {
                search_steps: 500,
                ..SmaaSettings::default()
            },
            800,
            600,
        );
        assert!(weights
            .uniforms
            .contains(&("uSearchSteps", UniformValue::Int(MAX_SEARCH_STEPS))));
    }
}
