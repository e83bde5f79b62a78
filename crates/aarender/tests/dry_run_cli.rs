use std::fs;
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn dry_run(args: &[&str]) -> Value {
    let output = Command::new(env!("CARGO_BIN_EXE_aarender"))
        .env_remove("AARENDER_CONFIG")
        .env("RUST_LOG", "off")
        .arg("--dry-run")
        .args(args)
        .output()
        .expect("failed to run aarender --dry-run");
    assert!(
        output.status.success(),
        "aarender failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("dry run prints JSON")
}

#[test]
fn dry_run_prints_defaults() {
    let settings = dry_run(&[]);
    assert_eq!(settings["width"], 800);
    assert_eq!(settings["height"], 600);
    assert_eq!(settings["smaa"]["enabled"], true);
    assert_eq!(settings["smaa"]["search_steps"], 16);
    assert_eq!(settings["debug_view"], "final");
    assert_eq!(settings["frames"], 120);
    assert!(settings["duration_ms"].is_null());
}

#[test]
fn dry_run_merges_config_and_flags() {
    let root = TempDir::new().expect("tempdir");
    let config_path = root.path().join("aarender.toml");
    fs::write(
        &config_path,
        r#"
version = 1

[surface]
width = 1024
height = 768

[smaa]
threshold = 0.2
debug_view = "weights"

[lookup]
area = "tables/AreaTex.png"

[run]
duration = "2s"
fps = 30
"#,
    )
    .expect("write config");

    let config_arg = config_path.to_string_lossy().into_owned();
    let settings = dry_run(&["--config", &config_arg, "--size", "640x360", "--no-smaa"]);

    assert_eq!(settings["width"], 640);
    assert_eq!(settings["height"], 360);
    assert_eq!(settings["smaa"]["enabled"], false);
    assert_eq!(settings["debug_view"], "weights");
    assert_eq!(settings["duration_ms"], 2000);
    assert_eq!(settings["fps"], 30.0);
    let area = settings["area"].as_str().expect("area path");
    assert_eq!(
        std::path::Path::new(area),
        root.path().join("tables/AreaTex.png")
    );
}

#[test]
fn invalid_config_fails_before_rendering() {
    let root = TempDir::new().expect("tempdir");
    let config_path = root.path().join("broken.toml");
    fs::write(&config_path, "version = 1\n[smaa]\nsearch_steps = 500\n").expect("write config");

    let status = Command::new(env!("CARGO_BIN_EXE_aarender"))
        .env("RUST_LOG", "off")
        .arg("--dry-run")
        .arg("--config")
        .arg(&config_path)
        .status()
        .expect("failed to run aarender");

    assert!(!status.success());
}
