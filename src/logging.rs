//! File logger for rawgrab
//!
//! One global log file per process. Lines look like
//! `[2026-10-16 09:12:44.031] [INFO ] [VOLUME] message`.
//! Nothing is written until [`init`] has been called, so library users and
//! tests stay quiet unless they opt in.

use chrono::Local;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global logger instance
static LOGGER: OnceLock<Mutex<RawGrabLogger>> = OnceLock::new();

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => f.pad("DEBUG"),
            LogLevel::Info => f.pad("INFO"),
            LogLevel::Warn => f.pad("WARN"),
            LogLevel::Error => f.pad("ERROR"),
        }
    }
}

/// Main logger struct
pub struct RawGrabLogger {
    file: Option<File>,
    min_level: LogLevel,
}

impl RawGrabLogger {
    fn new(path: &Path, min_level: LogLevel) -> Self {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true) // Start fresh each run
            .open(path)
            .ok();

        if file.is_none() {
            eprintln!("[rawgrab] Could not open log file {}", path.display());
        }

        Self { file, min_level }
    }

    /// Write a log entry
    fn log(&mut self, level: LogLevel, module: &str, message: &str) {
        if level < self.min_level {
            return;
        }

        let entry = format!(
            "[{}] [{:5}] [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            module,
            message
        );

        if let Some(ref mut file) = self.file {
            let _ = file.write_all(entry.as_bytes());
        }
    }
}

/// Default log location: next to the executable
pub fn default_log_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rawgrab.log")
}

/// Initialize the global logger. Later calls are ignored.
pub fn init(path: &Path, min_level: LogLevel) {
    let _ = LOGGER.set(Mutex::new(RawGrabLogger::new(path, min_level)));
}

fn log(level: LogLevel, module: &str, message: &str) {
    if let Some(logger) = LOGGER.get() {
        logger.lock().log(level, module, message);
    }
}

/// Whether a debug line would actually be written
pub fn debug_enabled() -> bool {
    LOGGER
        .get()
        .is_some_and(|logger| logger.lock().min_level <= LogLevel::Debug)
}

/// Log debug message
pub fn debug(module: &str, message: &str) {
    log(LogLevel::Debug, module, message);
}

/// Log info message
pub fn info(module: &str, message: &str) {
    log(LogLevel::Info, module, message);
}

/// Log warning message
pub fn warn(module: &str, message: &str) {
    log(LogLevel::Warn, module, message);
}

/// Log error message
pub fn error(module: &str, message: &str) {
    log(LogLevel::Error, module, message);
}

/// Flush the log file
pub fn flush() {
    if let Some(logger) = LOGGER.get() {
        if let Some(ref mut file) = logger.lock().file {
            let _ = file.flush();
        }
    }
}

/// Write a separator line for readability
pub fn separator(label: &str) {
    let msg = format!("========== {} ==========", label);
    info("---", &msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_respects_min_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut logger = RawGrabLogger::new(&path, LogLevel::Warn);
        logger.log(LogLevel::Info, "TEST", "hidden");
        logger.log(LogLevel::Error, "TEST", "shown");
        drop(logger);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("hidden"));
        assert!(text.contains("[ERROR] [TEST] shown"));
    }

    #[test]
    fn debug_is_off_until_init() {
        assert!(!debug_enabled());
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }
}
