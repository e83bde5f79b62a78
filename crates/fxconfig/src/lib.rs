use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AREA_TABLE: &str = "AreaTexDX10.png";
pub const DEFAULT_SEARCH_TABLE: &str = "SearchTex.png";
pub const DEFAULT_FRAMES: u64 = 120;
pub const MAX_SEARCH_STEPS: i32 = 112;
pub const MIN_FPS: f32 = 0.1;
pub const MAX_FPS: f32 = 1000.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugViewSetting {
    #[default]
    Final,
    Scene,
    Edges,
    Weights,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FxConfig {
    pub version: u32,
    #[serde(default)]
    pub surface: SurfaceSection,
    #[serde(default)]
    pub smaa: SmaaSection,
    #[serde(default)]
    pub lookup: LookupSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub scene: SceneSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SurfaceSection {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SmaaSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_contrast_factor")]
    pub contrast_factor: f32,
    #[serde(default = "default_search_steps")]
    pub search_steps: i32,
    #[serde(default = "default_line_position")]
    pub line_position: f32,
    #[serde(default)]
    pub debug_view: DebugViewSetting,
}

/// Lookup table paths. Relative entries resolve against the config file's directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LookupSection {
    #[serde(default = "default_area")]
    pub area: PathBuf,
    #[serde(default = "default_search")]
    pub search: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct RunSection {
    #[serde(default)]
    pub frames: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub fps: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SceneSection {
    #[serde(default = "default_rotation_speed")]
    pub rotation_speed: f32,
}

/// How long a headless run keeps ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLimit {
    Frames(u64),
    Duration(Duration),
}

impl fmt::Display for RunLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunLimit::Frames(frames) => write!(f, "{frames} frames"),
            RunLimit::Duration(duration) => {
                write!(f, "{}", humantime::format_duration(*duration))
            }
        }
    }
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.1
}

fn default_contrast_factor() -> f32 {
    2.0
}

fn default_search_steps() -> i32 {
    16
}

fn default_line_position() -> f32 {
    0.5
}

fn default_area() -> PathBuf {
    PathBuf::from(DEFAULT_AREA_TABLE)
}

fn default_search() -> PathBuf {
    PathBuf::from(DEFAULT_SEARCH_TABLE)
}

fn default_rotation_speed() -> f32 {
    0.5
}

impl Default for SurfaceSection {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for SmaaSection {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            contrast_factor: default_contrast_factor(),
            search_steps: default_search_steps(),
            line_position: default_line_position(),
            debug_view: DebugViewSetting::Final,
        }
    }
}

impl Default for LookupSection {
    fn default() -> Self {
        Self {
            area: default_area(),
            search: default_search(),
        }
    }
}

impl Default for SceneSection {
    fn default() -> Self {
        Self {
            rotation_speed: default_rotation_speed(),
        }
    }
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            version: 1,
            surface: SurfaceSection::default(),
            smaa: SmaaSection::default(),
            lookup: LookupSection::default(),
            run: RunSection::default(),
            scene: SceneSection::default(),
        }
    }
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(duration) => {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }
        None => serializer.serialize_none(),
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl FxConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: FxConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads, validates and anchors the lookup paths of the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        if let Some(base) = path.parent() {
            config.lookup.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn run_limit(&self) -> RunLimit {
        match (self.run.frames, self.run.duration) {
            (_, Some(duration)) => RunLimit::Duration(duration),
            (Some(frames), None) => RunLimit::Frames(frames),
            (None, None) => RunLimit::Frames(DEFAULT_FRAMES),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface size {}x{} must be non-zero",
                self.surface.width, self.surface.height
            )));
        }

        let smaa = &self.smaa;
        if !(smaa.threshold > 0.0 && smaa.threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "smaa.threshold {} must be within (0, 1]",
                smaa.threshold
            )));
        }

        if !(1..=MAX_SEARCH_STEPS).contains(&smaa.search_steps) {
            return Err(ConfigError::Invalid(format!(
                "smaa.search_steps {} must be within 1..={MAX_SEARCH_STEPS}",
                smaa.search_steps
            )));
        }

        if !(0.0..=1.0).contains(&smaa.line_position) {
            return Err(ConfigError::Invalid(format!(
                "smaa.line_position {} must be within [0, 1]",
                smaa.line_position
            )));
        }

        if !smaa.contrast_factor.is_finite() || smaa.contrast_factor < 0.0 {
            return Err(ConfigError::Invalid(
                "smaa.contrast_factor must be a non-negative number".into(),
            ));
        }

        if let Some(fps) = self.run.fps {
            let capped = (MIN_FPS..=MAX_FPS).contains(&fps);
            if fps != 0.0 && !capped {
                return Err(ConfigError::Invalid(format!(
                    "run.fps must be 0 (uncapped) or between {MIN_FPS} and {MAX_FPS}"
                )));
            }
        }

        if self.run.frames.is_some() && self.run.duration.is_some() {
            return Err(ConfigError::Invalid(
                "run.frames and run.duration are mutually exclusive".into(),
            ));
        }

        if self.run.duration.is_some_and(|duration| duration.is_zero()) {
            return Err(ConfigError::Invalid(
                "run.duration must be greater than zero".into(),
            ));
        }

        if self.lookup.area.as_os_str().is_empty() || self.lookup.search.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "lookup.area and lookup.search may not be empty".into(),
            ));
        }

        Ok(())
    }
}

impl LookupSection {
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if self.area.is_relative() {
            self.area = base.join(&self.area);
        }
        if self.search.is_relative() {
            self.search = base.join(&self.search);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[surface]
width = 1280
height = 720

[smaa]
enabled = false
threshold = 0.05
search_steps = 32
debug_view = "edges"

[lookup]
area = "tables/area.png"
search = "/opt/smaa/search.png"

[run]
duration = "1.5s"
fps = 30

[scene]
rotation_speed = 2.0
"#;

    #[test]
    fn parses_sample_config() {
        let config = FxConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.surface.width, 1280);
        assert!(!config.smaa.enabled);
        assert_eq!(config.smaa.search_steps, 32);
        assert_eq!(config.smaa.contrast_factor, 2.0);
        assert_eq!(config.smaa.debug_view, DebugViewSetting::Edges);
        assert_eq!(config.run.fps, Some(30.0));
        assert_eq!(config.run_limit(), RunLimit::Duration(Duration::from_millis(1500)));
        assert_eq!(config.scene.rotation_speed, 2.0);
    }

    #[test]
    fn empty_sections_fall_back_to_defaults() {
        let config = FxConfig::from_toml_str("version = 1").expect("parse config");
        assert_eq!(config, FxConfig::default());
        assert_eq!(config.run_limit(), RunLimit::Frames(DEFAULT_FRAMES));
        assert_eq!(config.lookup.area, PathBuf::from(DEFAULT_AREA_TABLE));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for body in [
            "version = 2",
            "version = 1\n[surface]\nwidth = 0",
            "version = 1\n[smaa]\nthreshold = 0.0",
            "version = 1\n[smaa]\nthreshold = 1.5",
            "version = 1\n[smaa]\nsearch_steps = 113",
            "version = 1\n[smaa]\nsearch_steps = 0",
            "version = 1\n[smaa]\nline_position = -0.1",
            "version = 1\n[run]\nfps = -1",
            "version = 1\n[run]\nfps = 1e-30",
            "version = 1\n[run]\nfps = 5000",
            "version = 1\n[run]\nfps = inf",
            "version = 1\n[run]\nframes = 10\nduration = \"1s\"",
        ] {
            let err = FxConfig::from_toml_str(body).expect_err(body);
            assert!(matches!(err, ConfigError::Invalid(_)), "{body}: {err}");
        }
    }

    #[test]
    fn rejects_unknown_debug_view() {
        let err = FxConfig::from_toml_str("version = 1\n[smaa]\ndebug_view = \"wireframe\"")
            .expect_err("bad view");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_anchors_relative_lookup_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("smaa.toml");
        fs::write(&path, SAMPLE).expect("write config");

        let config = FxConfig::load(&path).expect("load");
        assert_eq!(config.lookup.area, dir.path().join("tables/area.png"));
        assert_eq!(config.lookup.search, PathBuf::from("/opt/smaa/search.png"));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = FxConfig::load("/definitely/not/here.toml").expect_err("missing");
        match err {
            ConfigError::Io { path, .. } => assert!(path.ends_with("here.toml")),
            other => panic!("unexpected error {other}"),
        }
    }
}
