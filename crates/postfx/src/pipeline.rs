//! The three-pass SMAA post-process: edge detection, blending weights, final blend.

use std::fmt;

use tracing::{debug, info};

use crate::backend::RenderBackend;
use crate::error::{PipelineError, Result};
use crate::geometry::GeometryBinding;
use crate::lookup::{LookupImages, LookupTable, LookupTableLoader};
use crate::pass::{self, OutputTarget, Pass, PassKind, SurfaceSlot};
use crate::programs::{self, SmaaSettings, RESOLUTION_UNIFORM};
use crate::surface::{ensure_dimensions, Surface};
use crate::types::{DebugView, FramebufferId, RenderTargetStorage, TextureId};
use crate::uniform::UniformValue;

/// Externally visible lifecycle of an [`AaPipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    AwaitingTextures,
    Ready,
}

/// Where the blend pass writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FinalOutput {
    #[default]
    Display,
    /// An offscreen surface owned by the pipeline and sized with it.
    Surface,
}

#[derive(Clone, Copy, Debug)]
struct LookupTextures {
    area: TextureId,
    search: TextureId,
}

enum Readiness {
    Awaiting,
    Ready(LookupTextures),
}

struct Resources {
    edge: Pass,
    weights: Pass,
    blend: Pass,
    edges_surface: Surface,
    weights_surface: Surface,
    output_surface: Option<Surface>,
}

impl Resources {
    fn pass(&self, kind: PassKind) -> Option<&Pass> {
        match kind {
            PassKind::Edge => Some(&self.edge),
            PassKind::Weights => Some(&self.weights),
            PassKind::Blend => Some(&self.blend),
            PassKind::Scene => None,
        }
    }

    fn pass_mut(&mut self, kind: PassKind) -> Option<&mut Pass> {
        match kind {
            PassKind::Edge => Some(&mut self.edge),
            PassKind::Weights => Some(&mut self.weights),
            PassKind::Blend => Some(&mut self.blend),
            PassKind::Scene => None,
        }
    }

    fn release<B: RenderBackend + ?Sized>(mut self, backend: &mut B) {
        self.edges_surface.release(backend);
        self.weights_surface.release(backend);
        if let Some(output) = self.output_surface.as_mut() {
            output.release(backend);
        }
        self.edge.release(backend);
        self.weights.release(backend);
        self.blend.release(backend);
    }
}

/// Storage of every surface a frame touches, captured after checking attachability.
#[derive(Clone, Copy)]
struct FrameTargets {
    source: RenderTargetStorage,
    edges: RenderTargetStorage,
    weights: RenderTargetStorage,
    output: Option<RenderTargetStorage>,
}

impl FrameTargets {
    fn framebuffer(&self, target: OutputTarget) -> Option<FramebufferId> {
        match target {
            OutputTarget::Display => None,
            OutputTarget::Surface(SurfaceSlot::Source) => Some(self.source.framebuffer),
            OutputTarget::Surface(SurfaceSlot::Edges) => Some(self.edges.framebuffer),
            OutputTarget::Surface(SurfaceSlot::Weights) => Some(self.weights.framebuffer),
            OutputTarget::Surface(SurfaceSlot::Output) => {
                self.output.map(|storage| storage.framebuffer)
            }
        }
    }
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Owns the edge, weights and blend passes plus their intermediate surfaces.
///
/// `render` is a no-op until both lookup tables are uploaded and while the effect is
/// disabled through [`AaPipeline::set_active`].
pub struct AaPipeline {
    settings: SmaaSettings,
    final_output: FinalOutput,
    loader: LookupTableLoader,
    resources: Option<Resources>,
    readiness: Readiness,
    user_enabled: bool,
    on_ready: Option<ReadyCallback>,
    size: (u32, u32),
}

impl AaPipeline {
    pub fn new(settings: SmaaSettings, loader: LookupTableLoader) -> Self {
        Self {
            settings,
            final_output: FinalOutput::Display,
            loader,
            resources: None,
            readiness: Readiness::Awaiting,
            user_enabled: true,
            on_ready: None,
            size: (0, 0),
        }
    }

    pub fn with_final_output(mut self, output: FinalOutput) -> Self {
        self.final_output = output;
        self
    }

    /// Registers a callback fired once, right after the lookup tables are uploaded.
    pub fn on_ready(&mut self, callback: impl FnOnce() + Send + 'static) {
        if self.is_ready() {
            callback();
        } else {
            self.on_ready = Some(Box::new(callback));
        }
    }

    pub fn settings(&self) -> &SmaaSettings {
        &self.settings
    }

    pub fn final_output(&self) -> FinalOutput {
        self.final_output
    }

    pub fn state(&self) -> PipelineState {
        match (&self.resources, &self.readiness) {
            (None, _) => PipelineState::Uninitialized,
            (Some(_), Readiness::Awaiting) => PipelineState::AwaitingTextures,
            (Some(_), Readiness::Ready(_)) => PipelineState::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == PipelineState::Ready
    }

    /// Ready and not disabled by the owner.
    pub fn is_active(&self) -> bool {
        self.is_ready() && self.user_enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.user_enabled
    }

    /// Enables or disables the effect without leaving `Ready`.
    pub fn set_active(&mut self, enabled: bool) {
        if self.user_enabled != enabled {
            debug!(enabled, "antialiasing toggled");
        }
        self.user_enabled = enabled;
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Creates surfaces and programs; moves `Uninitialized -> AwaitingTextures`.
    pub fn initialize<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        geometry: GeometryBinding,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if self.resources.is_some() {
            return Err(PipelineError::AlreadyInitialized);
        }
        ensure_dimensions(width, height)?;
        if backend.is_context_lost() {
            return Err(PipelineError::ContextLost);
        }

        let mut edges_surface = Surface::create(backend, "smaa edges", width, height)?;
        let mut weights_surface = match Surface::create(backend, "smaa weights", width, height) {
            Ok(surface) => surface,
            Err(err) => {
                edges_surface.release(backend);
                return Err(err);
            }
        };
        let mut output_surface = None;
        if self.final_output == FinalOutput::Surface {
            match Surface::create(backend, "smaa output", width, height) {
                Ok(surface) => output_surface = Some(surface),
                Err(err) => {
                    edges_surface.release(backend);
                    weights_surface.release(backend);
                    return Err(err);
                }
            }
        }

        let passes = self.create_passes(backend, geometry, width, height);
        let (edge, weights, blend) = match passes {
            Ok(passes) => passes,
            Err(err) => {
                edges_surface.release(backend);
                weights_surface.release(backend);
                if let Some(surface) = output_surface.as_mut() {
                    surface.release(backend);
                }
                return Err(err);
            }
        };

        self.resources = Some(Resources {
            edge,
            weights,
            blend,
            edges_surface,
            weights_surface,
            output_surface,
        });
        self.size = (width, height);
        debug!(width, height, output = ?self.final_output, "smaa pipeline initialised");
        Ok(())
    }

    fn create_passes<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        geometry: GeometryBinding,
        width: u32,
        height: u32,
    ) -> Result<(Pass, Pass, Pass)> {
        let blend_output = match self.final_output {
            FinalOutput::Display => OutputTarget::Display,
            FinalOutput::Surface => OutputTarget::Surface(SurfaceSlot::Output),
        };
        let edge = Pass::create(
            backend,
            &programs::smaa(PassKind::Edge, &self.settings, width, height),
            geometry,
            OutputTarget::Surface(SurfaceSlot::Edges),
        )?;
        let weights = match Pass::create(
            backend,
            &programs::smaa(PassKind::Weights, &self.settings, width, height),
            geometry,
            OutputTarget::Surface(SurfaceSlot::Weights),
        ) {
            Ok(pass) => pass,
            Err(err) => {
                edge.release(backend);
                return Err(err);
            }
        };
        let blend = match Pass::create(
            backend,
            &programs::smaa(PassKind::Blend, &self.settings, width, height),
            geometry,
            blend_output,
        ) {
            Ok(pass) => pass,
            Err(err) => {
                edge.release(backend);
                weights.release(backend);
                return Err(err);
            }
        };
        Ok((edge, weights, blend))
    }

    /// Drains loader completions; uploads the tables once both are in.
    ///
    /// Returns whether the pipeline is ready. Completions that arrive before
    /// [`initialize`](Self::initialize) stay queued.
    pub fn poll_readiness<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> Result<bool> {
        if self.resources.is_none() {
            return Ok(false);
        }
        if let Readiness::Ready(_) = self.readiness {
            return Ok(true);
        }
        let Some(images) = self.loader.poll()? else {
            return Ok(false);
        };
        let textures = upload_tables(backend, &images)?;
        self.readiness = Readiness::Ready(textures);
        info!(
            area = %textures.area,
            search = %textures.search,
            "smaa lookup tables uploaded; pipeline ready"
        );
        if let Some(callback) = self.on_ready.take() {
            callback();
        }
        Ok(true)
    }

    /// Runs edge, weights and blend against `source` and returns the number of draws.
    ///
    /// Lookup completions are drained even while disabled. Not ready, disabled,
    /// [`DebugView::Scene`] or an unattachable surface then yield `Ok(0)` without drawing.
    /// A lost context fails before any command is issued.
    pub fn render<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        source: &Surface,
        view: DebugView,
    ) -> Result<usize> {
        if self.resources.is_none() {
            return Err(PipelineError::Uninitialized);
        }
        if backend.is_context_lost() {
            return Err(PipelineError::ContextLost);
        }
        if !self.poll_readiness(backend)? {
            return Ok(0);
        }
        if !self.user_enabled || view == DebugView::Scene {
            return Ok(0);
        }
        let Readiness::Ready(tables) = self.readiness else {
            return Ok(0);
        };
        let Some(resources) = self.resources.as_mut() else {
            return Err(PipelineError::Uninitialized);
        };

        let Some(targets) = frame_targets(source, resources) else {
            debug!("smaa surfaces not attachable; skipping frame");
            return Ok(0);
        };

        route_passes(resources, view);

        let mut draws = 0;
        let edge_inputs = [targets.source.texture];
        let target = targets.framebuffer(resources.edge.output());
        if pass::execute(backend, &mut resources.edge, target, &edge_inputs)? {
            draws += 1;
        }

        let weights_inputs = [tables.area, tables.search, targets.edges.texture];
        let target = targets.framebuffer(resources.weights.output());
        if pass::execute(backend, &mut resources.weights, target, &weights_inputs)? {
            draws += 1;
        }

        let blend_inputs = [targets.weights.texture, targets.source.texture];
        let target = targets.framebuffer(resources.blend.output());
        if pass::execute(backend, &mut resources.blend, target, &blend_inputs)? {
            draws += 1;
        }

        Ok(draws)
    }

    /// Reallocates the intermediate surfaces and refreshes `uResolution` on every pass.
    pub fn resize<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<()> {
        ensure_dimensions(width, height)?;
        let resources = self
            .resources
            .as_mut()
            .ok_or(PipelineError::Uninitialized)?;

        resources.edges_surface.resize(backend, width, height)?;
        resources.weights_surface.resize(backend, width, height)?;
        if let Some(output) = resources.output_surface.as_mut() {
            output.resize(backend, width, height)?;
        }

        let resolution = UniformValue::Vec2([width as f32, height as f32]);
        for kind in PassKind::AA_ORDER {
            if let Some(pass) = resources.pass_mut(kind) {
                pass.set_uniform_if_present(RESOLUTION_UNIFORM, resolution)?;
            }
        }
        if self.size != (width, height) {
            debug!(width, height, "smaa pipeline resized");
        }
        self.size = (width, height);
        Ok(())
    }

    /// Updates a uniform of one of the owned passes.
    pub fn set_uniform(&mut self, kind: PassKind, name: &str, value: UniformValue) -> Result<()> {
        let resources = self
            .resources
            .as_mut()
            .ok_or(PipelineError::Uninitialized)?;
        let pass = resources
            .pass_mut(kind)
            .ok_or_else(|| PipelineError::UnknownUniform {
                pass: kind,
                name: name.to_string(),
            })?;
        pass.set_uniform(name, value)
    }

    pub fn uniform(&self, kind: PassKind, name: &str) -> Option<UniformValue> {
        self.pass(kind)?.uniform(name)
    }

    pub fn pass(&self, kind: PassKind) -> Option<&Pass> {
        self.resources.as_ref()?.pass(kind)
    }

    /// Whether the edges, weights and (if present) output surfaces can all be bound.
    pub fn surfaces_attachable(&self) -> bool {
        let Some(resources) = self.resources.as_ref() else {
            return false;
        };
        resources.edges_surface.is_attachable()
            && resources.weights_surface.is_attachable()
            && resources
                .output_surface
                .as_ref()
                .map_or(true, Surface::is_attachable)
    }

    pub fn edges_surface(&self) -> Option<&Surface> {
        self.resources.as_ref().map(|resources| &resources.edges_surface)
    }

    pub fn weights_surface(&self) -> Option<&Surface> {
        self.resources
            .as_ref()
            .map(|resources| &resources.weights_surface)
    }

    pub fn output_surface(&self) -> Option<&Surface> {
        self.resources.as_ref()?.output_surface.as_ref()
    }

    /// Frees every GPU resource; the pipeline returns to `Uninitialized`.
    pub fn release<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(resources) = self.resources.take() {
            resources.release(backend);
        }
        if let Readiness::Ready(tables) = std::mem::replace(&mut self.readiness, Readiness::Awaiting)
        {
            backend.destroy_texture(tables.area);
            backend.destroy_texture(tables.search);
        }
    }
}

impl fmt::Debug for AaPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AaPipeline")
            .field("state", &self.state())
            .field("enabled", &self.user_enabled)
            .field("size", &self.size)
            .field("final_output", &self.final_output)
            .field("settings", &self.settings)
            .finish()
    }
}

fn upload_tables<B: RenderBackend + ?Sized>(
    backend: &mut B,
    images: &LookupImages,
) -> Result<LookupTextures> {
    let area = backend.create_texture(
        "smaa area table",
        &images.area,
        LookupTable::Area.filter(),
    )?;
    let search = match backend.create_texture(
        "smaa search table",
        &images.search,
        LookupTable::Search.filter(),
    ) {
        Ok(texture) => texture,
        Err(err) => {
            backend.destroy_texture(area);
            return Err(err.into());
        }
    };
    Ok(LookupTextures { area, search })
}

fn frame_targets(source: &Surface, resources: &Resources) -> Option<FrameTargets> {
    let output = match resources.output_surface.as_ref() {
        Some(surface) => Some(surface.storage()?),
        None => None,
    };
    Some(FrameTargets {
        source: source.storage()?,
        edges: resources.edges_surface.storage()?,
        weights: resources.weights_surface.storage()?,
        output,
    })
}

/// Applies the debug view to pass activity and output routing.
fn route_passes(resources: &mut Resources, view: DebugView) {
    let edge_output = match view {
        DebugView::Edges => OutputTarget::Display,
        _ => OutputTarget::Surface(SurfaceSlot::Edges),
    };
    let weights_output = match view {
        DebugView::Weights => OutputTarget::Display,
        _ => OutputTarget::Surface(SurfaceSlot::Weights),
    };
    resources.edge.set_output(edge_output);
    resources.weights.set_output(weights_output);
    resources.weights.set_active(view != DebugView::Edges);
    resources.blend.set_active(view == DebugView::Final);
}
