//! Headless wgpu implementation of [`RenderBackend`](crate::backend::RenderBackend).
//!
//! - `context` acquires the adapter and device and watches for device loss.
//! - `compile` generates the GLSL prelude (attributes, uniform block, texture units)
//!   and compiles each stage under a validation error scope.
//! - `resources` creates render targets, lookup textures and vertex buffers, and reads
//!   textures back to the CPU.
//! - `pipeline` owns per-program state and caches render pipelines per blend mode and
//!   attribute layout.
//! - `backend` replays the bind/draw command stream onto a single command encoder.

mod backend;
mod compile;
mod context;
mod pipeline;
mod resources;

pub use backend::WgpuBackend;
pub use context::{AdapterProfile, GpuOptions};
