use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use postfx::gpu::{GpuOptions, WgpuBackend};
use postfx::{
    FrameOrchestrator, FrameOutcome, FramePacer, LookupTableLoader, OrchestratorConfig,
    RenderStats, SystemTimeSource,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::settings::RunSettings;

/// How long past the frame budget a run may wait for the lookup tables.
const LOOKUP_GRACE: Duration = Duration::from_secs(10);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn run(args: Args) -> Result<()> {
    let settings = RunSettings::resolve(&args)?;
    if args.dry_run {
        let json = serde_json::to_string_pretty(&settings)
            .context("failed to serialise resolved settings")?;
        println!("{json}");
        return Ok(());
    }

    tracing::info!(
        width = settings.width,
        height = settings.height,
        smaa = settings.smaa.enabled,
        view = %settings.view,
        limit = %settings.limit,
        "starting headless render"
    );
    let options = GpuOptions {
        allow_fallback: args.allow_software,
        ..GpuOptions::default()
    };
    let backend = WgpuBackend::new(options, settings.width, settings.height)
        .context("failed to initialise headless GPU backend")?;
    let adapter = AdapterSummary::from_backend(&backend);
    tracing::info!(adapter = %adapter.name, backend = %adapter.backend, "using adapter");

    let loader = if settings.needs_lookup_tables() {
        LookupTableLoader::spawn_from_files(&settings.area, &settings.search)
    } else {
        LookupTableLoader::pending()
    };
    let mut config = OrchestratorConfig::new(settings.width, settings.height);
    config.smaa = settings.smaa_settings();
    config.rotation_speed = settings.rotation_speed;

    let mut orchestrator = FrameOrchestrator::new(
        backend,
        &config,
        loader,
        Box::new(SystemTimeSource::new()),
    )
    .context("failed to build frame orchestrator")?;

    let started = Instant::now();
    drive(&mut orchestrator, &settings, started)?;
    let elapsed = started.elapsed();

    let report = RunReport {
        adapter,
        settings: &settings,
        stats: StatsReport::from(orchestrator.stats()),
        aa_ready: orchestrator.pipeline().is_ready(),
        lookup_error: orchestrator.lookup_error().map(ToString::to_string),
        elapsed_ms: elapsed.as_millis() as u64,
    };
    tracing::info!(
        frames = report.stats.frames_rendered,
        post_draws = report.stats.post_draws,
        elapsed = ?elapsed,
        "render finished"
    );

    if let Some(path) = settings.output.as_deref() {
        let image = orchestrator
            .backend_mut()
            .read_display()
            .context("failed to read back the display")?;
        image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote frame");
    }
    if let Some(path) = settings.report.as_deref() {
        write_report(path, &report)?;
    }

    orchestrator.teardown();
    Ok(())
}

fn drive(
    orchestrator: &mut FrameOrchestrator<WgpuBackend>,
    settings: &RunSettings,
    started: Instant,
) -> Result<()> {
    let frame_settings = settings.frame_settings();
    let mut pacer = FramePacer::new(settings.fps);
    let mut frames = 0u64;
    let mut budget_spent_at: Option<Instant> = None;

    while orchestrator.wants_frame() {
        if settings.budget_spent(frames, started.elapsed()) {
            let waiting = settings.needs_lookup_tables()
                && !orchestrator.pipeline().is_ready()
                && orchestrator.lookup_error().is_none();
            if !waiting {
                break;
            }
            let since = *budget_spent_at.get_or_insert_with(Instant::now);
            if since.elapsed() > LOOKUP_GRACE {
                bail!(
                    "lookup tables {} and {} did not load within {:?}",
                    settings.area.display(),
                    settings.search.display(),
                    LOOKUP_GRACE
                );
            }
        }

        if !pacer.should_render() {
            thread::sleep(pacer.until_next());
            continue;
        }

        match orchestrator.tick(frame_settings)? {
            FrameOutcome::Rendered { .. } => frames += 1,
            FrameOutcome::Skipped(reason) => tracing::warn!(?reason, "frame skipped"),
            FrameOutcome::Stopped => break,
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct AdapterSummary {
    name: String,
    backend: String,
    device_type: String,
    software: bool,
}

impl AdapterSummary {
    fn from_backend(backend: &WgpuBackend) -> Self {
        let profile = backend.adapter_profile();
        Self {
            name: profile.name.clone(),
            backend: format!("{:?}", profile.backend),
            device_type: format!("{:?}", profile.device_type),
            software: profile.is_software(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsReport {
    frames_rendered: u64,
    frames_skipped: u64,
    scene_draws: u64,
    post_draws: u64,
}

impl From<RenderStats> for StatsReport {
    fn from(stats: RenderStats) -> Self {
        Self {
            frames_rendered: stats.frames_rendered,
            frames_skipped: stats.frames_skipped,
            scene_draws: stats.scene_draws,
            post_draws: stats.post_draws,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    adapter: AdapterSummary,
    settings: &'a RunSettings,
    stats: StatsReport,
    aa_ready: bool,
    lookup_error: Option<String>,
    elapsed_ms: u64,
}

fn write_report(path: &Path, report: &RunReport<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialise run report")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote report");
    Ok(())
}
