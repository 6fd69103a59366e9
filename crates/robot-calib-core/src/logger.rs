//! Minimal logger.
//!
//! Prints `[elapsed LEVEL target] message` to stderr. Install it once at
//! startup with [`init_with_level`] or [`init_from_env`].

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read by [`init_from_env`].
pub const LOG_ENV: &str = "ROBOT_CALIB_LOG";

struct CalibLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for CalibLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let target = record.target().split("::").next().unwrap_or_default();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            target,
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<CalibLogger> = OnceLock::new();

/// Install the logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| CalibLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install the logger with the level named by `ROBOT_CALIB_LOG`, or `default`.
pub fn init_from_env(default: LevelFilter) -> Result<(), log::SetLoggerError> {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(default);
    init_with_level(level)
}

/// Install a `tracing` fmt subscriber.
///
/// `RUST_LOG` wins over `default_directive` when set. Span close events are
/// emitted so per-state handler durations show up in the output.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
