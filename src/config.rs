use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::gate::DEFAULT_THROTTLE;
use crate::overlay::FadeSettings;
use crate::preview::DEFAULT_TARGET_SIZE_M;
use crate::ResolutionMode;

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    model_id: Option<String>,
    access_key: Option<String>,
    engine: Option<String>,
    resolution: Option<String>,
    auto_scan: Option<bool>,
    throttle_ms: Option<u64>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    enabled: Option<bool>,
    target_size_m: Option<f32>,
    fade_steps: Option<u32>,
    fade_increment: Option<f32>,
    hold_ms: Option<u64>,
    grace_ms: Option<u64>,
}

/// Settings for one detection session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model_id: String,
    pub access_key: String,
    /// Registry name of the detection engine; `None` selects the default.
    pub engine: Option<String>,
    pub resolution: ResolutionMode,
    /// Start scanning as soon as the engine is ready.
    pub auto_scan: bool,
    /// Minimum spacing between frames forwarded to the engine.
    pub throttle: Duration,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSettings {
    pub enabled: bool,
    /// Largest dimension of the fitted preview model, in meters.
    pub target_size_m: f32,
    pub fade: FadeSettings,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target_size_m: DEFAULT_TARGET_SIZE_M,
            fade: FadeSettings::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            access_key: String::new(),
            engine: None,
            resolution: ResolutionMode::default(),
            auto_scan: false,
            throttle: DEFAULT_THROTTLE,
            preview: PreviewSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Load from the file named by `SCAN_SESSION_CONFIG` (if set), then apply
    /// `SCAN_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCAN_SESSION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_credentials(mut self, model_id: &str, access_key: &str) -> Self {
        self.model_id = model_id.to_string();
        self.access_key = access_key.to_string();
        self
    }

    /// Names of the credential settings that are empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.model_id.trim().is_empty() {
            missing.push("model_id");
        }
        if self.access_key.trim().is_empty() {
            missing.push("access_key");
        }
        missing
    }

    fn from_file(file: SessionConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let resolution = match file.resolution.as_deref() {
            Some(name) => name.parse()?,
            None => defaults.resolution,
        };
        let preview = file.preview.unwrap_or_default();
        let default_fade = defaults.preview.fade;
        let fade = FadeSettings {
            steps: preview.fade_steps.unwrap_or(default_fade.steps),
            increment: preview.fade_increment.unwrap_or(default_fade.increment),
            hold: preview
                .hold_ms
                .map(Duration::from_millis)
                .unwrap_or(default_fade.hold),
            grace: preview
                .grace_ms
                .map(Duration::from_millis)
                .unwrap_or(default_fade.grace),
        };
        Ok(Self {
            model_id: file.model_id.unwrap_or_default(),
            access_key: file.access_key.unwrap_or_default(),
            engine: file.engine.filter(|name| !name.trim().is_empty()),
            resolution,
            auto_scan: file.auto_scan.unwrap_or(defaults.auto_scan),
            throttle: file
                .throttle_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.throttle),
            preview: PreviewSettings {
                enabled: preview.enabled.unwrap_or(defaults.preview.enabled),
                target_size_m: preview
                    .target_size_m
                    .unwrap_or(defaults.preview.target_size_m),
                fade,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(model_id) = std::env::var("SCAN_MODEL_ID") {
            if !model_id.trim().is_empty() {
                self.model_id = model_id;
            }
        }
        if let Ok(access_key) = std::env::var("SCAN_ACCESS_KEY") {
            if !access_key.trim().is_empty() {
                self.access_key = access_key;
            }
        }
        if let Ok(engine) = std::env::var("SCAN_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine = Some(engine);
            }
        }
        if let Ok(resolution) = std::env::var("SCAN_RESOLUTION") {
            self.resolution = resolution
                .parse()
                .map_err(|e| anyhow!("SCAN_RESOLUTION: {}", e))?;
        }
        if let Ok(auto_scan) = std::env::var("SCAN_AUTO_SCAN") {
            self.auto_scan = parse_bool("SCAN_AUTO_SCAN", &auto_scan)?;
        }
        if let Ok(throttle) = std::env::var("SCAN_THROTTLE_MS") {
            let millis: u64 = throttle.trim().parse().map_err(|_| {
                anyhow!("SCAN_THROTTLE_MS must be an integer number of milliseconds")
            })?;
            self.throttle = Duration::from_millis(millis);
        }
        if let Ok(enabled) = std::env::var("SCAN_PREVIEW_ENABLED") {
            self.preview.enabled = parse_bool("SCAN_PREVIEW_ENABLED", &enabled)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.throttle.is_zero() {
            return Err(anyhow!("throttle must be greater than zero"));
        }
        let fade = &self.preview.fade;
        if fade.steps == 0 {
            return Err(anyhow!("preview.fade_steps must be greater than zero"));
        }
        if !(fade.increment.is_finite() && fade.increment > 0.0) {
            return Err(anyhow!("preview.fade_increment must be positive"));
        }
        if !(self.preview.target_size_m.is_finite() && self.preview.target_size_m > 0.0) {
            return Err(anyhow!("preview.target_size_m must be positive"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SessionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean (true/false)", key)),
    }
}
