//! SMAA post-processing on top of a small render-pass framework.
//!
//! A frame renders a scene into an offscreen [`Surface`], then the [`AaPipeline`] runs
//! edge detection, blending-weight calculation and neighborhood blending over it:
//!
//! ```text
//!   FrameOrchestrator::tick
//!          │ time uniforms
//!          ▼
//!   scene pass ──▶ source surface ──▶ edge ──▶ weights ──▶ blend ──▶ display
//!                                        ▲          ▲
//!                                        │          └── area + search lookup tables
//!                                        └── LookupTableLoader (decoded off-thread)
//! ```
//!
//! Every GPU call goes through [`RenderBackend`]. [`gpu::WgpuBackend`] drives a headless
//! wgpu device; [`recording::RecordingBackend`] captures the command stream for tests.

pub mod backend;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod lookup;
pub mod orchestrator;
pub mod pass;
pub mod pipeline;
pub mod programs;
pub mod recording;
pub mod runtime;
pub mod surface;
pub mod types;
pub mod uniform;

pub use backend::{AttributeDecl, ProgramDescriptor, RenderBackend};
pub use error::{BackendError, LookupError, PipelineError, Result};
pub use geometry::GeometryBinding;
pub use lookup::{decode_table, LookupSender, LookupTable, LookupTableLoader};
pub use orchestrator::{FrameOrchestrator, FrameOutcome, OrchestratorConfig, SkipReason, StopHandle};
pub use pass::{OutputTarget, Pass, PassKind, PassProgram, SurfaceSlot, TextureInput};
pub use pipeline::{AaPipeline, FinalOutput, PipelineState};
pub use programs::SmaaSettings;
pub use runtime::{
    BoxedTimeSource, FixedTimeSource, FramePacer, RenderStats, SystemTimeSource, TimeSample,
    TimeSource,
};
pub use surface::Surface;
pub use types::{DebugView, FrameSettings, GpuPowerPreference, LookupImage};
pub use uniform::{UniformSet, UniformType, UniformValue};
