use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use fxconfig::{DebugViewSetting, FxConfig, RunLimit};
use postfx::{DebugView, FrameSettings, SmaaSettings};
use serde::Serialize;

use crate::cli::Args;

/// Everything a run needs, after the config file and command-line overrides are merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSettings {
    pub config: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub smaa: SmaaReport,
    pub debug_view: String,
    pub area: PathBuf,
    pub search: PathBuf,
    pub frames: Option<u64>,
    pub duration_ms: Option<u64>,
    pub fps: Option<f32>,
    pub rotation_speed: f32,
    pub output: Option<PathBuf>,
    pub report: Option<PathBuf>,
    #[serde(skip)]
    pub view: DebugView,
    #[serde(skip)]
    pub limit: RunLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmaaReport {
    pub enabled: bool,
    pub threshold: f32,
    pub contrast_factor: f32,
    pub search_steps: i32,
    pub line_position: f32,
}

impl RunSettings {
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = match args.config.as_ref() {
            Some(path) => FxConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => FxConfig::default(),
        };
        apply_overrides(&mut config, args);
        config.validate().context("invalid settings after overrides")?;

        let view = args
            .debug_view
            .unwrap_or_else(|| debug_view_from_config(config.smaa.debug_view));
        let limit = config.run_limit();
        let (frames, duration_ms) = match limit {
            RunLimit::Frames(frames) => (Some(frames), None),
            RunLimit::Duration(duration) => (None, Some(duration.as_millis() as u64)),
        };

        Ok(Self {
            config: args.config.clone(),
            width: config.surface.width,
            height: config.surface.height,
            smaa: SmaaReport {
                enabled: config.smaa.enabled,
                threshold: config.smaa.threshold,
                contrast_factor: config.smaa.contrast_factor,
                search_steps: config.smaa.search_steps,
                line_position: config.smaa.line_position,
            },
            debug_view: view.to_string(),
            area: config.lookup.area,
            search: config.lookup.search,
            frames,
            duration_ms,
            fps: config.run.fps,
            rotation_speed: config.scene.rotation_speed,
            output: args.output.clone(),
            report: args.report.clone(),
            view,
            limit,
        })
    }

    pub fn smaa_settings(&self) -> SmaaSettings {
        SmaaSettings {
            threshold: self.smaa.threshold,
            contrast_factor: self.smaa.contrast_factor,
            search_steps: self.smaa.search_steps,
            line_position: self.smaa.line_position,
        }
    }

    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings {
            aa_enabled: self.smaa.enabled,
            view: self.view,
        }
    }

    /// Whether the run should keep going until the lookup tables are uploaded.
    pub fn needs_lookup_tables(&self) -> bool {
        self.smaa.enabled && self.view != DebugView::Scene
    }

    pub fn budget_spent(&self, frames: u64, elapsed: Duration) -> bool {
        match self.limit {
            RunLimit::Frames(limit) => frames >= limit,
            RunLimit::Duration(limit) => elapsed >= limit,
        }
    }
}

fn apply_overrides(config: &mut FxConfig, args: &Args) {
    if let Some((width, height)) = args.size {
        config.surface.width = width;
        config.surface.height = height;
    }
    if let Some(frames) = args.frames {
        config.run.frames = Some(frames);
        config.run.duration = None;
    }
    if let Some(duration) = args.duration {
        config.run.duration = Some(duration);
        config.run.frames = None;
    }
    if let Some(fps) = args.fps {
        config.run.fps = Some(fps);
    }
    if args.no_smaa {
        config.smaa.enabled = false;
    }
    if let Some(area) = args.area.as_ref() {
        config.lookup.area = area.clone();
    }
    if let Some(search) = args.search.as_ref() {
        config.lookup.search = search.clone();
    }
}

fn debug_view_from_config(setting: DebugViewSetting) -> DebugView {
    match setting {
        DebugViewSetting::Final => DebugView::Final,
        DebugViewSetting::Scene => DebugView::Scene,
        DebugViewSetting::Edges => DebugView::Edges,
        DebugViewSetting::Weights => DebugView::Weights,
    }
}
