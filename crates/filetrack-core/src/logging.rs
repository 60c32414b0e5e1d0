//! Logging setup with indicatif integration

use indicatif::MultiProgress;

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints through a MultiProgress so lines don't tear the
/// consolidation progress bar.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}: {}", record.target(), record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn default_level(quiet: bool, debug: bool) -> &'static str {
    match (debug, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    }
}

/// Initialize logging. `RUST_LOG` overrides the level picked from the flags.
///
/// With a `MultiProgress` (TTY) log lines are routed through it; otherwise
/// plain uncolored lines go to stderr for log aggregation. Fails if a logger
/// is already installed.
pub fn init_logging(
    quiet: bool,
    debug: bool,
    multi: Option<&MultiProgress>,
) -> Result<(), log::SetLoggerError> {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(default_level(quiet, debug));
    let mut builder = env_logger::Builder::from_env(env);

    match multi {
        Some(multi) => {
            let logger = builder.build();
            let max_level = logger.filter();
            log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))?;
            log::set_max_level(max_level);
        }
        None => {
            builder
                .format(|buf, record| {
                    let (_, label, _) = level_style(record.level(), false);
                    writeln!(
                        buf,
                        "{} [{label}] {}: {}",
                        buf.timestamp_millis(),
                        record.target(),
                        record.args()
                    )
                })
                .try_init()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_labels_have_no_ansi() {
        let (pre, label, post) = level_style(log::Level::Warn, false);
        assert_eq!((pre, label, post), ("", "WARN ", ""));
    }

    #[test]
    fn colored_labels_reset() {
        let (pre, _, post) = level_style(log::Level::Error, true);
        assert_eq!(pre, "\x1b[31m");
        assert_eq!(post, "\x1b[0m");
    }

    #[test]
    fn flags_pick_the_default_level() {
        assert_eq!(default_level(false, false), "info");
        assert_eq!(default_level(true, false), "warn");
        assert_eq!(default_level(true, true), "debug");
    }

    #[test]
    fn second_init_reports_an_error() {
        let _ = init_logging(true, false, None);
        assert!(init_logging(false, true, None).is_err());
    }
}
