//! Common helpers shared across visionflow crates.

/// Pipeline configuration types and settings persistence.
pub mod config;
/// Image loading and tensor-layout conversion helpers.
pub mod image_utils;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use anyhow::Result;
use log::LevelFilter;

pub use config::{
    AppSettings, DetectionSettings, InterpolationSettings, TelemetrySettings,
    default_settings_path,
};
pub use image_utils::{load_image, rgb_to_bgr_chw, rgb_to_unit_chw};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, telemetry_allows, telemetry_enabled,
    telemetry_level, timing_guard, timing_guard_if,
};

/// Initialize logging once for host applications and tests.
///
/// Respects `RUST_LOG` when set; otherwise falls back to `default_filter`.
/// The telemetry target is always left wide open so [`TimingGuard`] records
/// are gated by the telemetry switches alone.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module("visionflow::telemetry", LevelFilter::Trace);
    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}
