//! Process-wide root logger.
//!
//! Logging goes through `tracing`. The first call to [`init_root_logger`]
//! installs a global subscriber at the configured level (overridable through
//! `RUST_LOG`), optionally mirroring everything into a plain-text log file.
//! Later calls hand back the same [`RootLogger`].

use crate::error::{TrainingError, TrainingResult};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static ROOT_LOGGER: OnceLock<RootLogger> = OnceLock::new();

/// Handle describing the installed root logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLogger {
    pub level: Level,
    pub log_file: Option<PathBuf>,
    /// False when another global subscriber was already in place.
    pub installed: bool,
}

/// Parse a log level name such as `INFO` or `warning`.
pub fn parse_level(name: &str) -> TrainingResult<Level> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" => Ok(Level::ERROR),
        other => Err(TrainingError::InvalidConfig(format!("unknown log level: {other}"))),
    }
}

/// Install the root logger, or return the one installed earlier.
pub fn init_root_logger(level: &str, log_file: Option<&Path>) -> TrainingResult<RootLogger> {
    if let Some(existing) = ROOT_LOGGER.get() {
        return Ok(existing.clone());
    }

    let level = parse_level(level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .is_ok();

    let logger = RootLogger { level, log_file: log_file.map(Path::to_path_buf), installed };
    Ok(ROOT_LOGGER.get_or_init(|| logger).clone())
}

/// Root logger without a log file.
pub fn root_logger(level: &str) -> TrainingResult<RootLogger> {
    init_root_logger(level, None)
}

/// Run timestamp shared by every artifact of one run, e.g. `20240131_235959`.
#[must_use]
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_aliases() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("WARNING").unwrap(), Level::WARN);
        assert_eq!(parse_level("critical").unwrap(), Level::ERROR);
        assert!(parse_level("LOUD").is_err());
    }

    #[test]
    fn test_root_logger_is_idempotent() {
        let first = root_logger("DEBUG").unwrap();
        let second = root_logger("ERROR").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(ts.as_bytes()[8], b'_');
    }
}
