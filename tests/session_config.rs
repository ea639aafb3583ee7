use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use scan_session::{ResolutionMode, SessionConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SCAN_SESSION_CONFIG",
        "SCAN_MODEL_ID",
        "SCAN_ACCESS_KEY",
        "SCAN_ENGINE",
        "SCAN_RESOLUTION",
        "SCAN_AUTO_SCAN",
        "SCAN_THROTTLE_MS",
        "SCAN_PREVIEW_ENABLED",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SessionConfig::load().expect("load config");

    assert_eq!(cfg, SessionConfig::default());
    assert_eq!(cfg.resolution, ResolutionMode::SingleShot);
    assert_eq!(cfg.throttle, Duration::from_millis(1000));
    assert!(cfg.preview.enabled);
    assert_eq!(cfg.missing_credentials(), vec!["model_id", "access_key"]);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "model_id": "chair-v2",
        "access_key": "file-key",
        "engine": "scripted",
        "resolution": "continuous",
        "auto_scan": true,
        "throttle_ms": 500,
        "preview": {
            "enabled": true,
            "target_size_m": 0.75,
            "fade_steps": 10,
            "fade_increment": 0.05,
            "hold_ms": 2000,
            "grace_ms": 3000
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SCAN_SESSION_CONFIG", file.path());
    std::env::set_var("SCAN_ACCESS_KEY", "env-key");
    std::env::set_var("SCAN_THROTTLE_MS", "250");
    std::env::set_var("SCAN_PREVIEW_ENABLED", "off");

    let cfg = SessionConfig::load().expect("load config");

    assert_eq!(cfg.model_id, "chair-v2");
    assert_eq!(cfg.access_key, "env-key");
    assert_eq!(cfg.engine.as_deref(), Some("scripted"));
    assert_eq!(cfg.resolution, ResolutionMode::Continuous);
    assert!(cfg.auto_scan);
    assert_eq!(cfg.throttle, Duration::from_millis(250));
    assert!(!cfg.preview.enabled);
    assert_eq!(cfg.preview.target_size_m, 0.75);
    assert_eq!(cfg.preview.fade.steps, 10);
    assert_eq!(cfg.preview.fade.hold, Duration::from_secs(2));
    assert_eq!(cfg.preview.fade.grace, Duration::from_secs(3));
    assert!(cfg.missing_credentials().is_empty());

    clear_env();
}

#[test]
fn loads_toml_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
model_id = "lamp"
access_key = "toml-key"
resolution = "single-shot"

[preview]
fade_steps = 20
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("SCAN_SESSION_CONFIG", file.path());
    std::env::set_var("SCAN_RESOLUTION", "tracking");

    let cfg = SessionConfig::load().expect("load config");

    assert_eq!(cfg.model_id, "lamp");
    assert_eq!(cfg.access_key, "toml-key");
    assert_eq!(cfg.resolution, ResolutionMode::Continuous);
    assert_eq!(cfg.preview.fade.steps, 20);
    assert_eq!(cfg.preview.fade.increment, 0.03);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SCAN_THROTTLE_MS", "0");
    assert!(SessionConfig::load().is_err());
    clear_env();

    std::env::set_var("SCAN_THROTTLE_MS", "soon");
    assert!(SessionConfig::load().is_err());
    clear_env();

    std::env::set_var("SCAN_RESOLUTION", "sometimes");
    assert!(SessionConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "preview": { "fade_steps": 0 } }"#)
        .expect("write config");
    std::env::set_var("SCAN_SESSION_CONFIG", file.path());
    assert!(SessionConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SCAN_SESSION_CONFIG", "/nonexistent/scan-session.json");
    let err = SessionConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
