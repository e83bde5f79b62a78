use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use postfx::DebugView;

#[derive(Parser, Debug)]
#[command(
    name = "aarender",
    author,
    version,
    about = "Render a scene headlessly through the SMAA post-process pipeline"
)]
pub struct Args {
    /// Configuration TOML; lookup paths inside it resolve relative to the file.
    #[arg(long, value_name = "PATH", env = "AARENDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the render resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// Number of frames to render.
    #[arg(long, value_name = "N", conflicts_with = "duration")]
    pub frames: Option<u64>,

    /// Wall-clock budget instead of a frame count (e.g. `2s`, `500ms`).
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Frame rate cap (0=uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Render the scene straight to the display without antialiasing.
    #[arg(long)]
    pub no_smaa: bool,

    /// Intermediate result to show: `final`, `scene`, `edges` or `weights`.
    #[arg(long, value_name = "VIEW", value_parser = parse_debug_view)]
    pub debug_view: Option<DebugView>,

    /// Area lookup table image.
    #[arg(long, value_name = "PATH")]
    pub area: Option<PathBuf>,

    /// Search lookup table image.
    #[arg(long, value_name = "PATH")]
    pub search: Option<PathBuf>,

    /// Write the last displayed frame as PNG.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write run statistics as JSON.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Print the resolved settings as JSON and exit without touching the GPU.
    #[arg(long)]
    pub dry_run: bool,

    /// Accept a software adapter when no hardware GPU is available.
    #[arg(long)]
    pub allow_software: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1920x1080".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size".to_string())?;

    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".to_string());
    }

    Ok((width, height))
}

pub fn parse_debug_view(value: &str) -> Result<DebugView, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("debug view must not be empty".to_string());
    }
    DebugView::parse(trimmed).ok_or_else(|| {
        format!("unknown debug view '{trimmed}'; expected final, scene, edges, or weights")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_size_accepts_common_separators() {
        assert_eq!(parse_surface_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_surface_size(" 64 X 32 "), Ok((64, 32)));
        assert_eq!(parse_surface_size("10×20"), Ok((10, 20)));
    }

    #[test]
    fn surface_size_rejects_zero_and_garbage() {
        assert!(parse_surface_size("0x720").is_err());
        assert!(parse_surface_size("1280").is_err());
        assert!(parse_surface_size("wide x tall").is_err());
    }

    #[test]
    fn debug_view_names_map_onto_views() {
        assert_eq!(parse_debug_view("edges"), Ok(DebugView::Edges));
        assert_eq!(parse_debug_view("Scene"), Ok(DebugView::Scene));
        assert!(parse_debug_view("").is_err());
        assert!(parse_debug_view("depth").is_err());
    }

    #[test]
    fn frames_and_duration_conflict() {
        let result = Args::try_parse_from(["aarender", "--frames", "3", "--duration", "1s"]);
        assert!(result.is_err());
    }

    #[test]
    fn flags_parse_into_args() {
        let args = Args::try_parse_from([
            "aarender",
            "--size",
            "320x200",
            "--duration",
            "250ms",
            "--no-smaa",
            "--debug-view",
            "weights",
        ])
        .expect("parse args");
        assert_eq!(args.size, Some((320, 200)));
        assert_eq!(args.duration, Some(Duration::from_millis(250)));
        assert!(args.no_smaa);
        assert_eq!(args.debug_view, Some(DebugView::Weights));
        assert!(!args.dry_run);
    }
}
