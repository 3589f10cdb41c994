//! Minimal stderr logger for the `log` facade.
//!
//! Lines end in CR LF because the terminal is in raw mode while the guest runs.

use std::io::Write;

use log::{Level, Log, Metadata, Record, SetLoggerError};

struct StderrLogger {
    level: Level,
}

static INFO: StderrLogger = StderrLogger { level: Level::Info };
static DEBUG: StderrLogger = StderrLogger { level: Level::Debug };

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = write!(
            handle,
            "[{:<5} {}] {}\r\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the logger. `trace` raises the level from info to debug.
pub fn init(trace: bool) -> Result<(), SetLoggerError> {
    let logger = if trace { &DEBUG } else { &INFO };
    log::set_logger(logger)?;
    log::set_max_level(logger.level.to_level_filter());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // Either this call or an earlier test installed the logger.
        let _ = init(false);
        let err: Box<dyn std::error::Error> = init(true).unwrap_err().into();
        assert!(!err.to_string().is_empty());
        assert!(log::log_enabled!(Level::Info));
    }
}
