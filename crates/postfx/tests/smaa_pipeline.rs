use std::fs;

use postfx::recording::{Command, RecordingBackend};
use postfx::{
    AaPipeline, DebugView, FixedTimeSource, FrameOrchestrator, FrameOutcome, FrameSettings,
    GeometryBinding, LookupImage, LookupSender, LookupTable, LookupTableLoader,
    OrchestratorConfig, PipelineError, PipelineState, RenderBackend, SmaaSettings, Surface,
    UniformValue,
};
use tempfile::TempDir;

struct Harness {
    backend: RecordingBackend,
    sender: LookupSender,
    pipeline: AaPipeline,
    source: Surface,
}

impl Harness {
    fn new(width: u32, height: u32) -> Self {
        let mut backend = RecordingBackend::with_display(width, height);
        let (sender, loader) = LookupTableLoader::channel();
        let mut pipeline = AaPipeline::new(SmaaSettings::default(), loader);
        let geometry = GeometryBinding::fullscreen_quad(&mut backend).expect("quad");
        pipeline
            .initialize(&mut backend, geometry, width, height)
            .expect("initialize");
        let source = Surface::create(&mut backend, "scene source", width, height).expect("source");
        backend.clear_log();
        Self {
            backend,
            sender,
            pipeline,
            source,
        }
    }

    fn complete_tables(&self) {
        self.sender.complete(LookupTable::Area, area_table());
        self.sender.complete(LookupTable::Search, search_table());
    }

    fn render(&mut self) -> usize {
        self.pipeline
            .render(&mut self.backend, &self.source, DebugView::Final)
            .expect("render")
    }
}

fn area_table() -> LookupImage {
    LookupImage::new(160, 560, vec![0; 160 * 560 * 4])
}

fn search_table() -> LookupImage {
    LookupImage::new(64, 16, vec![0; 64 * 16 * 4])
}

#[test]
fn full_frame_runs_three_passes_into_the_display() {
    let mut harness = Harness::new(800, 600);
    harness.complete_tables();

    assert_eq!(harness.render(), 3);

    let draws = harness.backend.draws();
    assert_eq!(
        draws.iter().map(|draw| draw.label.as_str()).collect::<Vec<_>>(),
        vec!["edge", "weights", "blend"]
    );

    let edges = harness.pipeline.edges_surface().expect("edges surface");
    let weights = harness.pipeline.weights_surface().expect("weights surface");
    assert_eq!(draws[0].target, edges.framebuffer());
    assert_eq!(draws[0].texture(0), harness.source.texture());
    assert_eq!(draws[1].target, weights.framebuffer());
    assert_eq!(draws[1].texture(2), edges.texture());
    assert_eq!(draws[1].texture_sizes[0], (160, 560));
    assert_eq!(draws[1].texture_sizes[1], (64, 16));
    assert!(draws[2].targets_display());
    assert_eq!(draws[2].texture(0), weights.texture());
    assert_eq!(draws[2].texture(1), harness.source.texture());

    for draw in draws {
        assert_eq!(draw.target_size, (800, 600));
        assert_eq!(draw.count, 6);
        assert_eq!(draw.uniform("uResolution"), Some(UniformValue::Vec2([800.0, 600.0])));
    }
}

#[test]
fn every_pass_clears_to_opaque_black_before_drawing() {
    let mut harness = Harness::new(64, 64);
    harness.complete_tables();
    harness.render();

    let clears = harness
        .backend
        .count(|command| matches!(command, Command::Clear(color) if *color == [0.0, 0.0, 0.0, 1.0]));
    assert_eq!(clears, 3);
}

#[test]
fn readiness_fires_once_whichever_table_lands_first() {
    for order in [
        [LookupTable::Area, LookupTable::Search],
        [LookupTable::Search, LookupTable::Area],
    ] {
        let mut harness = Harness::new(32, 32);
        let tables = |table: LookupTable| match table {
            LookupTable::Area => area_table(),
            LookupTable::Search => search_table(),
        };

        harness.sender.complete(order[0], tables(order[0]));
        assert_eq!(harness.render(), 0);
        assert_eq!(harness.pipeline.state(), PipelineState::AwaitingTextures);

        harness.sender.complete(order[1], tables(order[1]));
        harness.sender.complete(order[1], tables(order[1]));
        assert_eq!(harness.render(), 3);
        assert_eq!(harness.pipeline.state(), PipelineState::Ready);
        assert_eq!(harness.backend.live_textures(), 3 + 2);
    }
}

#[test]
fn pending_tables_mean_no_gpu_work() {
    let mut harness = Harness::new(128, 128);
    for _ in 0..10 {
        assert_eq!(harness.render(), 0);
    }
    assert!(harness.backend.commands().is_empty());
}

#[test]
fn toggling_activity_gates_every_pass() {
    let mut harness = Harness::new(64, 32);
    harness.complete_tables();
    harness
        .pipeline
        .poll_readiness(&mut harness.backend)
        .expect("poll");

    harness.pipeline.set_active(false);
    assert_eq!(harness.render(), 0);
    assert!(harness.backend.draws().is_empty());
    assert_eq!(harness.pipeline.state(), PipelineState::Ready);
    assert!(!harness.pipeline.is_active());

    harness.pipeline.set_active(true);
    assert_eq!(harness.render(), 3);
}

#[test]
fn resized_frame_samples_only_resized_surfaces() {
    let mut harness = Harness::new(800, 600);
    harness.complete_tables();
    harness.render();

    harness
        .pipeline
        .resize(&mut harness.backend, 1024, 512)
        .expect("resize pipeline");
    harness
        .source
        .resize(&mut harness.backend, 1024, 512)
        .expect("resize source");
    harness.backend.clear_log();
    harness.render();

    let draws = harness.backend.draws();
    assert_eq!(draws.len(), 3);
    for draw in draws {
        assert_eq!(draw.target_size, (1024, 512));
        assert_eq!(draw.uniform("uResolution"), Some(UniformValue::Vec2([1024.0, 512.0])));
    }
    assert_eq!(draws[0].texture_sizes, vec![(1024, 512)]);
    assert_eq!(draws[1].texture_sizes[2], (1024, 512));
    assert_eq!(draws[2].texture_sizes, vec![(1024, 512), (1024, 512)]);
}

#[test]
fn resizing_to_the_current_size_allocates_nothing() {
    let mut harness = Harness::new(300, 200);
    let allocations = harness.backend.render_target_allocations();
    let edges = harness.pipeline.edges_surface().and_then(Surface::texture);

    harness
        .pipeline
        .resize(&mut harness.backend, 300, 200)
        .expect("resize");

    assert_eq!(harness.backend.render_target_allocations(), allocations);
    assert_eq!(harness.pipeline.edges_surface().and_then(Surface::texture), edges);
}

#[test]
fn repeated_resizes_do_not_leak_render_targets() {
    let mut harness = Harness::new(100, 100);
    let live = harness.backend.live_render_targets();
    for step in 1..=20 {
        harness
            .pipeline
            .resize(&mut harness.backend, 100 + step, 100 + step * 2)
            .expect("resize");
    }
    assert_eq!(harness.backend.live_render_targets(), live);
}

#[test]
fn lost_context_is_reported_not_swallowed() {
    let mut harness = Harness::new(16, 16);
    harness.complete_tables();
    harness.pipeline.poll_readiness(&mut harness.backend).expect("poll");
    harness.backend.clear_log();
    harness.backend.lose_context();

    let err = harness
        .pipeline
        .render(&mut harness.backend, &harness.source, DebugView::Final)
        .expect_err("context lost");
    assert!(matches!(err, PipelineError::ContextLost));
    assert!(err.is_fatal());
    assert!(harness.backend.commands().is_empty());
}

#[test]
fn disabled_pipeline_still_uploads_tables() {
    let mut harness = Harness::new(16, 16);
    let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = fired.clone();
    harness
        .pipeline
        .on_ready(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));
    harness.pipeline.set_active(false);
    harness.complete_tables();

    assert_eq!(harness.render(), 0);
    assert!(harness.backend.draws().is_empty());
    assert_eq!(harness.pipeline.state(), PipelineState::Ready);
    assert!(fired.load(std::sync::atomic::Ordering::SeqCst));

    harness.pipeline.set_active(true);
    assert_eq!(harness.render(), 3);
}

#[test]
fn tables_decoded_from_disk_reach_the_weights_pass() {
    let dir = TempDir::new().expect("tempdir");
    let area_path = dir.path().join("area.png");
    let search_path = dir.path().join("search.png");
    image::RgbaImage::from_pixel(160, 560, image::Rgba([10, 20, 0, 255]))
        .save(&area_path)
        .expect("write area");
    image::RgbaImage::from_pixel(64, 16, image::Rgba([255, 0, 0, 255]))
        .save(&search_path)
        .expect("write search");
    assert!(fs::metadata(&area_path).expect("area metadata").len() > 0);

    let loader = LookupTableLoader::spawn_from_files(&area_path, &search_path);
    let mut orchestrator = FrameOrchestrator::new(
        RecordingBackend::with_display(48, 48),
        &OrchestratorConfig::new(48, 48),
        loader,
        Box::new(FixedTimeSource::new(1.0)),
    )
    .expect("orchestrator");

    let mut post_draws = 0;
    for _ in 0..500 {
        match orchestrator.tick(FrameSettings::default()).expect("tick") {
            FrameOutcome::Rendered { post_draws: draws, .. } if draws > 0 => {
                post_draws = draws;
                break;
            }
            _ => std::thread::sleep(std::time::Duration::from_millis(2)),
        }
    }
    assert_eq!(post_draws, 3);

    let weights = orchestrator
        .backend()
        .draws()
        .iter()
        .find(|draw| draw.label == "weights")
        .cloned()
        .expect("weights draw");
    assert_eq!(weights.texture_sizes[0], (160, 560));
    assert_eq!(weights.texture_sizes[1], (64, 16));
}

#[test]
fn orchestrated_frames_stop_cleanly() {
    let loader = LookupTableLoader::from_images(area_table(), search_table());
    let mut orchestrator = FrameOrchestrator::new(
        RecordingBackend::new(),
        &OrchestratorConfig::new(200, 100),
        loader,
        Box::new(FixedTimeSource::stepped(0.0, 1.0 / 60.0)),
    )
    .expect("orchestrator");

    let handle = orchestrator.stop_handle();
    let mut rendered = 0;
    while orchestrator.wants_frame() {
        match orchestrator.tick(FrameSettings::default()).expect("tick") {
            FrameOutcome::Rendered { .. } => rendered += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
        if rendered == 5 {
            handle.stop();
        }
    }
    assert_eq!(orchestrator.stats().frames_rendered, 5);
    assert_eq!(orchestrator.stats().post_draws, 15);
    assert_eq!(orchestrator.backend().submits(), 5);

    let backend = orchestrator.teardown();
    assert_eq!(backend.live_render_targets(), 0);
    assert_eq!(backend.live_programs(), 0);
    assert_eq!(backend.display_size(), (200, 100));
}
