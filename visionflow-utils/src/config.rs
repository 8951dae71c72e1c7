//! Shared configuration types consumed across the visionflow workspace.
//!
//! These structures give the detection and interpolation pipelines a common
//! representation of their tunables that host applications can serialize to
//! disk and load back.

use crate::telemetry;

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Detection post-processing parameters mirroring the RetinaFace defaults.
///
/// These settings directly control score filtering, candidate capping, and
/// non-maximum suppression (NMS).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum face-class probability for a detection to be considered valid.
    /// The comparison is strict: a score equal to the threshold is dropped.
    pub confidence_threshold: f32,
    /// IoU threshold above which overlapping detections are suppressed.
    pub nms_threshold: f32,
    /// Maximum number of candidates (by score) fed into suppression.
    pub top_k: usize,
    /// Maximum number of detections returned after suppression.
    pub keep_top_k: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            nms_threshold: 0.2,
            top_k: 5_000,
            keep_top_k: 750,
        }
    }
}

/// Frame interpolation preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationSettings {
    /// Registry name of the interpolation model to load (see the core
    /// crate's model registry).
    pub model: String,
    /// Frames are zero-padded up to the next multiple of this value before
    /// inference and cropped back afterwards.
    pub pad_multiple: u32,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self {
            model: "rife-v4.6".to_string(),
            pad_multiple: 32,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether telemetry timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }

    /// Update the level string from a `LevelFilter` value.
    pub fn set_level(&mut self, level: LevelFilter) {
        let label = match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };
        self.level = label.to_string();
    }

    /// Push these preferences into the process-wide telemetry switches.
    pub fn apply(&self) {
        telemetry::configure(self.enabled, self.level_filter());
    }
}

/// Persistent application settings consumed by host applications.
///
/// Aggregates all user-configurable parameters so they can be loaded from and
/// saved to a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Optional override for the face detection ONNX model path.
    /// If `None`, a default path is used.
    pub face_model_path: Option<String>,
    /// The parameters for detection post-processing.
    pub detection: DetectionSettings,
    /// The parameters for frame interpolation.
    pub interpolation: InterpolationSettings,
    /// Telemetry and diagnostics preferences.
    pub telemetry: TelemetrySettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            face_model_path: Some("models/retinaface_mobilenet025.onnx".into()),
            detection: DetectionSettings::default(),
            interpolation: InterpolationSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file.
    ///
    /// If the file does not exist or cannot be parsed, an error is returned.
    /// If `face_model_path` is missing from the JSON, it falls back to the
    /// default.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;

        if settings.face_model_path.is_none() {
            settings.face_model_path = AppSettings::default().face_model_path;
        }

        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON.
    ///
    /// This will overwrite the file if it already exists.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}

/// Returns the default path for persisted application settings (`config/settings.json`).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/settings.json"))
        .unwrap_or_else(|_| PathBuf::from("config/settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let settings = AppSettings::default();
        settings.save_to_path(file.path()).expect("save");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.face_model_path, settings.face_model_path);
        assert_eq!(loaded.detection, settings.detection);
        assert_eq!(loaded.interpolation, settings.interpolation);
        assert_eq!(loaded.telemetry.enabled, settings.telemetry.enabled);
        assert_eq!(loaded.telemetry.level, settings.telemetry.level);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "detection": { "confidence_threshold": 0.5, "top_k": 123 },
            "interpolation": { "model": "rife-v4.18" }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.detection.confidence_threshold, 0.5);
        assert_eq!(loaded.detection.top_k, 123);
        assert_eq!(loaded.detection.nms_threshold, 0.2);
        assert_eq!(loaded.detection.keep_top_k, 750);
        assert_eq!(loaded.interpolation.model, "rife-v4.18");
        assert_eq!(loaded.interpolation.pad_multiple, 32);
        assert!(loaded.face_model_path.is_some());
        assert!(!loaded.telemetry.enabled);
        assert_eq!(loaded.telemetry.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn telemetry_level_parses_variants() {
        let telemetry = TelemetrySettings {
            level: "TRACE".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Trace);

        let telemetry = TelemetrySettings {
            level: "Warn".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Warn);

        let mut telemetry = TelemetrySettings::default();
        telemetry.set_level(LevelFilter::Info);
        assert_eq!(telemetry.level, "info");
    }

    #[test]
    fn apply_updates_global_telemetry() {
        let _lock = crate::telemetry::GLOBAL_STATE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let settings = TelemetrySettings {
            enabled: true,
            level: "warn".into(),
        };
        settings.apply();
        assert!(crate::telemetry::telemetry_enabled());
        assert_eq!(crate::telemetry::telemetry_level(), LevelFilter::Warn);

        TelemetrySettings::default().apply();
        assert!(!crate::telemetry::telemetry_enabled());
    }
}
