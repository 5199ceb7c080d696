//! Diagnostics sinks for calibration runs.
//!
//! Without the `tracing` feature, records from the detector, solver and
//! facade go to stderr as `[  0.412s  INFO camcal_solver] message`, with
//! the target cut to its crate name. The clock starts when the logger is
//! installed. With `tracing`, [`init_tracing`] installs a subscriber that
//! also reports closed spans (detection, solve), as text or JSON lines.

use std::fmt::Arguments;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, fmt::format::FmtSpan, util::SubscriberInitExt, EnvFilter};

struct CalibLogger {
    max_level: LevelFilter,
    installed_at: Instant,
}

static INSTALLED: OnceLock<CalibLogger> = OnceLock::new();

/// `camcal_solver::lm` becomes `camcal_solver`.
fn crate_of(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}

fn format_line(seconds: f64, level: Level, target: &str, args: &Arguments<'_>) -> String {
    format!("[{seconds:8.3}s {level:>5} {}] {args}", crate_of(target))
}

impl Log for CalibLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            self.installed_at.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args(),
        );
        // A closed stderr must not abort a calibration.
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Route `log` records at or above `max_level` to stderr.
///
/// Only the first call installs the logger. A later call keeps the first
/// level and returns `Ok`.
pub fn init_with_level(max_level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut fresh = false;
    let logger = INSTALLED.get_or_init(|| {
        fresh = true;
        CalibLogger {
            max_level,
            installed_at: Instant::now(),
        }
    });
    if fresh {
        log::set_logger(logger)?;
        log::set_max_level(max_level);
    }
    Ok(())
}

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG`, `info` when unset.
///
/// `json` selects one flattened JSON object per event, for log collectors.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(fmt::time::Uptime::default());
    // Already-installed subscribers win; a second call is harmless.
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.finish().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_cut_to_crate_name() {
        assert_eq!(crate_of("camcal_solver::lm"), "camcal_solver");
        assert_eq!(crate_of("camcal"), "camcal");
    }

    #[test]
    fn line_carries_clock_level_and_crate() {
        let line = format_line(
            0.4119,
            Level::Warn,
            "camcal_chessboard::detector",
            &format_args!("{} corners", 54),
        );
        assert_eq!(line, "[   0.412s  WARN camcal_chessboard] 54 corners");
    }
}
