use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::RenderBackend;
use crate::error::{LookupError, PipelineError, Result};
use crate::geometry::GeometryBinding;
use crate::lookup::LookupTableLoader;
use crate::pass::{self, OutputTarget, Pass, PassProgram, SurfaceSlot};
use crate::pipeline::{AaPipeline, FinalOutput};
use crate::programs::{self, SmaaSettings, RESOLUTION_UNIFORM, ROTATION_UNIFORM, TIME_UNIFORM};
use crate::runtime::{BoxedTimeSource, RenderStats};
use crate::surface::{ensure_dimensions, Surface};
use crate::types::{DebugView, FrameSettings};
use crate::uniform::UniformValue;

const STATS_LOG_INTERVAL: u64 = 120;

/// Cloneable, idempotent cancellation flag for the frame loop.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            debug!("frame loop stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    SourceUnallocated,
    /// Antialiasing is in effect but one of its intermediate surfaces is unallocated.
    PipelineSurfaceUnallocated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered { scene_draws: usize, post_draws: usize },
    Skipped(SkipReason),
    Stopped,
}

/// Construction parameters for a [`FrameOrchestrator`].
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub width: u32,
    pub height: u32,
    pub smaa: SmaaSettings,
    pub final_output: FinalOutput,
    /// Radians per second fed into `uRotation`.
    pub rotation_speed: f32,
    pub scene: PassProgram,
}

impl OrchestratorConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            smaa: SmaaSettings::default(),
            final_output: FinalOutput::Display,
            rotation_speed: 0.5,
            scene: programs::background(width, height),
        }
    }
}

/// Drives the scene pass and the SMAA pipeline once per external frame tick.
pub struct FrameOrchestrator<B: RenderBackend> {
    backend: B,
    geometry: GeometryBinding,
    scene: Pass,
    source: Surface,
    pipeline: AaPipeline,
    time: BoxedTimeSource,
    stop: StopHandle,
    rotation_speed: f32,
    stats: RenderStats,
    lookup_error: Option<LookupError>,
}

impl<B: RenderBackend> FrameOrchestrator<B> {
    pub fn new(
        mut backend: B,
        config: &OrchestratorConfig,
        loader: LookupTableLoader,
        time: BoxedTimeSource,
    ) -> Result<Self> {
        ensure_dimensions(config.width, config.height)?;
        if backend.is_context_lost() {
            return Err(PipelineError::ContextLost);
        }
        backend.resize_display(config.width, config.height)?;

        let geometry = GeometryBinding::fullscreen_quad(&mut backend)?;
        let source = Surface::create(&mut backend, "scene source", config.width, config.height)?;
        let scene = Pass::create(
            &mut backend,
            &config.scene,
            geometry,
            OutputTarget::Surface(SurfaceSlot::Source),
        )?;
        let mut pipeline =
            AaPipeline::new(config.smaa, loader).with_final_output(config.final_output);
        pipeline.initialize(&mut backend, geometry, config.width, config.height)?;

        info!(
            width = config.width,
            height = config.height,
            "frame orchestrator ready; waiting for lookup tables"
        );

        Ok(Self {
            backend,
            geometry,
            scene,
            source,
            pipeline,
            time,
            stop: StopHandle::new(),
            rotation_speed: config.rotation_speed,
            stats: RenderStats::default(),
            lookup_error: None,
        })
    }

    /// Renders one frame: time uniforms, scene pass, then the post-process chain.
    pub fn tick(&mut self, settings: FrameSettings) -> Result<FrameOutcome> {
        if self.stop.is_stopped() {
            return Ok(FrameOutcome::Stopped);
        }
        if self.backend.is_context_lost() {
            return Err(PipelineError::ContextLost);
        }

        self.pipeline.set_active(settings.aa_enabled);
        if self.lookup_error.is_none() {
            match self.pipeline.poll_readiness(&mut self.backend) {
                Ok(_) => {}
                Err(PipelineError::Lookup(err)) => {
                    warn!(error = %err, "smaa lookup tables unavailable; rendering without antialiasing");
                    self.lookup_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        if !self.source.is_attachable() {
            self.stats.frames_skipped += 1;
            debug!("source surface not allocated; skipping frame");
            return Ok(FrameOutcome::Skipped(SkipReason::SourceUnallocated));
        }
        let post_process = self.pipeline.is_active() && settings.view != DebugView::Scene;
        if post_process && !self.pipeline.surfaces_attachable() {
            self.stats.frames_skipped += 1;
            debug!("smaa surfaces not allocated; skipping frame");
            return Ok(FrameOutcome::Skipped(SkipReason::PipelineSurfaceUnallocated));
        }

        let sample = self.time.sample();
        self.scene
            .set_uniform_if_present(TIME_UNIFORM, UniformValue::Float(sample.seconds))?;
        self.scene.set_uniform_if_present(
            ROTATION_UNIFORM,
            UniformValue::Float(sample.seconds * self.rotation_speed),
        )?;

        let (output, target) = if post_process {
            (
                OutputTarget::Surface(SurfaceSlot::Source),
                self.source.framebuffer(),
            )
        } else {
            (OutputTarget::Display, None)
        };
        self.scene.set_output(output);

        let scene_draws = usize::from(pass::execute(
            &mut self.backend,
            &mut self.scene,
            target,
            &[],
        )?);
        let post_draws = if post_process {
            self.pipeline
                .render(&mut self.backend, &self.source, settings.view)?
        } else {
            0
        };
        self.backend.submit()?;

        self.stats.frames_rendered += 1;
        self.stats.scene_draws += scene_draws as u64;
        self.stats.post_draws += post_draws as u64;
        if self.stats.frames_rendered % STATS_LOG_INTERVAL == 0 {
            debug!(
                frames = self.stats.frames_rendered,
                skipped = self.stats.frames_skipped,
                draws = self.stats.total_draws(),
                time = sample.seconds,
                "render stats"
            );
        }

        Ok(FrameOutcome::Rendered {
            scene_draws,
            post_draws,
        })
    }

    /// Resizes the display, the source surface and the pipeline. Ignored once stopped.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        ensure_dimensions(width, height)?;
        if self.stop.is_stopped() {
            return Ok(());
        }
        if self.backend.is_context_lost() {
            return Err(PipelineError::ContextLost);
        }
        self.backend.resize_display(width, height)?;
        self.source.resize(&mut self.backend, width, height)?;
        self.pipeline.resize(&mut self.backend, width, height)?;
        self.scene.set_uniform_if_present(
            RESOLUTION_UNIFORM,
            UniformValue::Vec2([width as f32, height as f32]),
        )?;
        Ok(())
    }

    /// True until stopped; the driving loop checks it before scheduling the next tick.
    pub fn wants_frame(&self) -> bool {
        !self.stop.is_stopped()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The lookup failure that left the pipeline waiting for its tables, if any.
    pub fn lookup_error(&self) -> Option<&LookupError> {
        self.lookup_error.as_ref()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn pipeline(&self) -> &AaPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut AaPipeline {
        &mut self.pipeline
    }

    pub fn scene(&self) -> &Pass {
        &self.scene
    }

    pub fn source_surface(&self) -> &Surface {
        &self.source
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Stops the loop, frees every GPU resource it owns and hands back the backend.
    pub fn teardown(self) -> B {
        let Self {
            mut backend,
            geometry,
            scene,
            mut source,
            mut pipeline,
            stop,
            ..
        } = self;
        stop.stop();
        pipeline.release(&mut backend);
        scene.release(&mut backend);
        source.release(&mut backend);
        geometry.release(&mut backend);
        debug!("frame orchestrator torn down");
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::lookup::{LookupSender, LookupTable};
    use crate::recording::RecordingBackend;
    use crate::runtime::FixedTimeSource;
    use crate::types::LookupImage;

    fn orchestrator(width: u32, height: u32) -> (LookupSender, FrameOrchestrator<RecordingBackend>) {
        let (sender, loader) = LookupTableLoader::channel();
        let orchestrator = FrameOrchestrator::new(
            RecordingBackend::new(),
            &OrchestratorConfig::new(width, height),
            loader,
            Box::new(FixedTimeSource::stepped(0.0, 0.25)),
        )
        .expect("orchestrator");
        (sender, orchestrator)
    }

    fn complete(sender: &LookupSender) {
        sender.complete(LookupTable::Search, LookupImage::placeholder());
        sender.complete(LookupTable::Area, LookupImage::placeholder());
    }

    #[test]
    fn scene_goes_to_display_until_ready() {
        let (sender, mut frames) = orchestrator(64, 48);
        let outcome = frames.tick(FrameSettings::default()).expect("tick");
        assert_eq!(
            outcome,
            FrameOutcome::Rendered {
                scene_draws: 1,
                post_draws: 0
            }
        );
        assert!(frames.backend().draws()[0].targets_display());

        complete(&sender);
        frames.backend_mut().clear_log();
        let outcome = frames.tick(FrameSettings::default()).expect("tick");
        assert_eq!(
            outcome,
            FrameOutcome::Rendered {
                scene_draws: 1,
                post_draws: 3
            }
        );
        assert_eq!(
            frames.backend().draw_labels(),
            vec!["background", "edge", "weights", "blend"]
        );
        assert_eq!(
            frames.backend().draws()[0].target,
            frames.source_surface().framebuffer()
        );
    }

    #[test]
    fn disabling_aa_costs_no_extra_passes() {
        let (sender, mut frames) = orchestrator(32, 32);
        complete(&sender);
        frames.tick(FrameSettings::default()).expect("warm up");
        frames.backend_mut().clear_log();

        let outcome = frames
            .tick(FrameSettings {
                aa_enabled: false,
                ..FrameSettings::default()
            })
            .expect("tick");
        assert_eq!(
            outcome,
            FrameOutcome::Rendered {
                scene_draws: 1,
                post_draws: 0
            }
        );
        assert_eq!(frames.backend().draw_labels(), vec!["background"]);
        assert!(frames.backend().draws()[0].targets_display());
        assert!(frames.pipeline().is_ready());
    }

    #[test]
    fn time_uniforms_advance_per_frame() {
        let (_sender, mut frames) = orchestrator(16, 16);
        for _ in 0..3 {
            frames.tick(FrameSettings::default()).expect("tick");
        }
        let last = frames.backend().draws().last().expect("draw");
        assert_eq!(last.uniform(TIME_UNIFORM), Some(UniformValue::Float(0.5)));
        assert_eq!(last.uniform(ROTATION_UNIFORM), Some(UniformValue::Float(0.25)));
    }

    #[test]
    fn lookup_failure_keeps_the_scene_on_screen() {
        let (sender, mut frames) = orchestrator(16, 16);
        sender.fail(
            LookupTable::Area,
            LookupError::Disconnected { table: "area" },
        );
        drop(sender);

        for _ in 0..2 {
            let outcome = frames.tick(FrameSettings::default()).expect("tick");
            assert_eq!(
                outcome,
                FrameOutcome::Rendered {
                    scene_draws: 1,
                    post_draws: 0
                }
            );
        }
        assert!(frames.lookup_error().is_some());
        assert!(!frames.pipeline().is_ready());
        assert!(frames.backend().draws().iter().all(|draw| draw.targets_display()));
    }

    #[test]
    fn stop_is_idempotent_and_silences_the_backend() {
        let (sender, mut frames) = orchestrator(16, 16);
        complete(&sender);
        let handle = frames.stop_handle();
        handle.stop();
        handle.stop();
        frames.stop();
        assert!(!frames.wants_frame());

        frames.backend_mut().clear_log();
        assert_eq!(
            frames.tick(FrameSettings::default()).expect("tick"),
            FrameOutcome::Stopped
        );
        frames.resize(32, 32).expect("resize after stop");
        assert!(frames.backend().commands().is_empty());
    }

    #[test]
    fn context_loss_is_fatal_for_the_frame() {
        let (_sender, mut frames) = orchestrator(16, 16);
        frames.backend_mut().lose_context();
        let err = frames
            .tick(FrameSettings::default())
            .expect_err("context lost");
        assert!(matches!(err, PipelineError::ContextLost));
    }

    #[test]
    fn resize_propagates_to_every_surface() {
        let (sender, mut frames) = orchestrator(800, 600);
        complete(&sender);
        frames.resize(1280, 720).expect("resize");
        frames.backend_mut().clear_log();
        frames.tick(FrameSettings::default()).expect("tick");

        assert_eq!(frames.backend().display_size(), (1280, 720));
        for draw in frames.backend().draws() {
            assert_eq!(draw.target_size, (1280, 720));
            assert_eq!(draw.uniform(RESOLUTION_UNIFORM), Some(UniformValue::Vec2([1280.0, 720.0])));
            if draw.label != "weights" {
                assert!(draw.texture_sizes.iter().all(|size| *size == (1280, 720)));
            }
        }
    }

    #[test]
    fn unallocated_smaa_surface_skips_the_frame() {
        let (sender, mut frames) = orchestrator(32, 32);
        complete(&sender);
        frames.tick(FrameSettings::default()).expect("warm up");

        frames.backend_mut().fail_allocations_for("smaa edges");
        let err = frames.resize(64, 64).expect_err("edges allocation fails");
        assert!(matches!(
            err,
            PipelineError::Backend(BackendError::Allocation { ref label, .. }) if label == "smaa edges"
        ));
        assert!(frames.source_surface().is_attachable());
        assert!(!frames.pipeline().surfaces_attachable());

        frames.backend_mut().clear_log();
        let rendered = frames.stats().frames_rendered;
        let outcome = frames.tick(FrameSettings::default()).expect("tick");
        assert_eq!(
            outcome,
            FrameOutcome::Skipped(SkipReason::PipelineSurfaceUnallocated)
        );
        assert!(frames.backend().draws().is_empty());
        assert_eq!(frames.backend().submits(), 0);
        assert_eq!(frames.stats().frames_rendered, rendered);
        assert_eq!(frames.stats().frames_skipped, 1);

        let outcome = frames
            .tick(FrameSettings {
                aa_enabled: false,
                ..FrameSettings::default()
            })
            .expect("tick without aa");
        assert_eq!(
            outcome,
            FrameOutcome::Rendered {
                scene_draws: 1,
                post_draws: 0
            }
        );
        assert!(frames.backend().draws()[0].targets_display());
    }

    #[test]
    fn teardown_releases_all_resources() {
        let (sender, mut frames) = orchestrator(16, 16);
        complete(&sender);
        frames.tick(FrameSettings::default()).expect("tick");
        let backend = frames.teardown();
        assert_eq!(backend.live_render_targets(), 0);
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.live_programs(), 0);
        assert_eq!(backend.live_buffers(), 0);
    }
}
