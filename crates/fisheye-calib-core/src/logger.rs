//! Stderr logging for the `fisheye` tools.
//!
//! Records are tagged with the subsystem that emitted them (`detect`,
//! `solver`, `remap`, ...) rather than the full module path, e.g.
//! `[  0.153s  INFO solver] calibrated 5 views in 12 iterations`.
//! Libraries in this workspace only use the `log` macros; binaries install
//! the logger once through [`init_from_verbosity`] or [`init_with_level`].

use std::fmt::Arguments;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Short subsystem tag for a `log` target.
fn subsystem(target: &str) -> &str {
    let mut parts = target.split("::");
    let krate = parts.next().unwrap_or("");
    match krate {
        "fisheye_calib_chessboard" => "detect",
        "fisheye_calib_solver" => "solver",
        "fisheye_calib_core" => match parts.next() {
            Some("remap") => "remap",
            _ => "core",
        },
        "fisheye_calib" | "fisheye" => "calib",
        other => other,
    }
}

fn format_line(elapsed: f64, level: Level, target: &str, args: &Arguments<'_>) -> String {
    format!("[{elapsed:7.3}s {level:>5} {}] {args}", subsystem(target))
}

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args(),
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Only the first call installs anything; later calls keep the original level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Map a `-v` count to a level: warnings by default, then info, debug, trace.
pub fn level_from_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the stderr logger at the level selected by a `-v` count.
pub fn init_from_verbosity(verbose: u8) -> Result<(), log::SetLoggerError> {
    init_with_level(level_from_verbosity(verbose))
}

/// Install a `tracing` subscriber. `RUST_LOG` wins when set; otherwise
/// `default_level` applies.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_level: LevelFilter) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_ascii_lowercase()));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .with_writer(std::io::stderr)
            .finish()
            .try_init();
    }
}
