//! RAII timing instrumentation shared by both pipelines.
//!
//! A [`TimingGuard`] measures a scoped operation and logs the elapsed time
//! when it drops. Guards stay inert unless telemetry has been switched on via
//! [`configure`], so leaving them compiled into hot paths costs a pair of
//! atomic loads.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used for all timing records, so hosts can raise or silence
/// telemetry independently of the rest of the crate's logging.
const TARGET: &str = "visionflow::telemetry";

static ENABLED: AtomicBool = AtomicBool::new(false);
static MAX_LEVEL: AtomicU8 = AtomicU8::new(LevelFilter::Off as u8);

/// Turn telemetry on or off and set the most verbose level that may emit.
pub fn configure(enabled: bool, max_level: LevelFilter) {
    ENABLED.store(enabled, Ordering::Relaxed);
    MAX_LEVEL.store(filter_index(max_level), Ordering::Relaxed);
}

/// Whether telemetry has been enabled at all.
pub fn telemetry_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// The most verbose level telemetry is currently allowed to emit at.
pub fn telemetry_level() -> LevelFilter {
    filter_from_index(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Whether a record at `level` would currently be emitted.
pub fn telemetry_allows(level: Level) -> bool {
    telemetry_enabled()
        && level <= telemetry_level()
        && log_enabled!(target: TARGET, level)
}

/// Start timing a scope, logging at `level` on drop.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    TimingGuard::new(label.into(), level, telemetry_allows(level))
}

/// Like [`timing_guard`], but with an extra caller-side condition.
pub fn timing_guard_if(
    label: impl Into<Cow<'static, str>>,
    level: Level,
    condition: bool,
) -> TimingGuard {
    TimingGuard::new(label.into(), level, condition && telemetry_allows(level))
}

/// Guard that logs how long the surrounding scope took when dropped.
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    fn new(label: Cow<'static, str>, level: Level, active: bool) -> Self {
        Self {
            label,
            level,
            start: Instant::now(),
            active,
        }
    }

    /// Whether this guard will log when dropped.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Time elapsed since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            log!(
                target: TARGET,
                self.level,
                "{} completed in {:.2?}",
                self.label,
                self.start.elapsed()
            );
        }
    }
}

// Tests touching the process-global switches serialize on this lock.
#[cfg(test)]
pub(crate) static GLOBAL_STATE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn filter_index(filter: LevelFilter) -> u8 {
    filter as u8
}

fn filter_from_index(index: u8) -> LevelFilter {
    match index {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
