//! Core logging bootstrap.
//!
//! # Responsibility
//! - Start the rotating file logger under the configured log path once per
//!   process.
//! - Provide the sanitizer used before interpolating backend error text into
//!   log lines.
//!
//! # Invariants
//! - Initialization is idempotent for identical settings.
//! - Re-initialization with a different directory or level is rejected.
//! - Log lines carry metadata only (ids, counts, durations, error codes),
//!   never note content, tags or patient correlation guids.

use crate::config::Config;
use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::info;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "noteclerk";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 10;
const MAX_LOGGED_ERROR_CHARS: usize = 240;

static LOGGING_STATE: OnceCell<ActiveLogging> = OnceCell::new();

struct ActiveLogging {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Errors from logger initialization.
#[derive(Debug)]
pub enum LoggingError {
    UnsupportedLevel(String),
    EmptyLogDir,
    RelativeLogDir(PathBuf),
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Backend(flexi_logger::FlexiLoggerError),
    /// Logging is already running with different settings.
    AlreadyInitialized {
        active: LogSettings,
        requested: LogSettings,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::EmptyLogDir => write!(f, "log directory cannot be empty"),
            Self::RelativeLogDir(path) => {
                write!(f, "log directory must be absolute, got `{}`", path.display())
            }
            Self::CreateDir { path, source } => write!(
                f,
                "failed to create log directory `{}`: {source}",
                path.display()
            ),
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
            Self::AlreadyInitialized { active, requested } => write!(
                f,
                "logging already initialized as {active}; refusing to switch to {requested}"
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// Normalized logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    level: &'static str,
    log_dir: PathBuf,
}

impl LogSettings {
    /// Validates a level name and an absolute log directory.
    pub fn new(level: &str, log_dir: impl AsRef<Path>) -> Result<Self, LoggingError> {
        let level = normalize_level(level)?;
        let log_dir = log_dir.as_ref();
        if log_dir.as_os_str().is_empty() {
            return Err(LoggingError::EmptyLogDir);
        }
        if !log_dir.is_absolute() {
            return Err(LoggingError::RelativeLogDir(log_dir.to_path_buf()));
        }
        Ok(Self {
            level,
            log_dir: log_dir.to_path_buf(),
        })
    }

    /// Builds settings from `Config::log_path`, resolving a relative path
    /// against `base_dir`.
    pub fn from_config(
        config: &Config,
        level: &str,
        base_dir: impl AsRef<Path>,
    ) -> Result<Self, LoggingError> {
        let trimmed = config.log_path.trim();
        if trimmed.is_empty() {
            return Err(LoggingError::EmptyLogDir);
        }
        let path = Path::new(trimmed);
        if path.is_absolute() {
            Self::new(level, path)
        } else {
            Self::new(level, base_dir.as_ref().join(path))
        }
    }

    pub fn level(&self) -> &'static str {
        self.level
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl Display for LogSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "level={} log_dir={}", self.level, self.log_dir.display())
    }
}

/// Starts file logging with the given settings.
///
/// Warnings and errors are also mirrored to stderr.
pub fn init_logging(settings: &LogSettings) -> Result<(), LoggingError> {
    if let Some(active) = LOGGING_STATE.get() {
        return ensure_same_settings(&active.settings, settings);
    }

    let active = LOGGING_STATE.get_or_try_init(|| -> Result<ActiveLogging, LoggingError> {
        std::fs::create_dir_all(&settings.log_dir).map_err(|source| LoggingError::CreateDir {
            path: settings.log_dir.clone(),
            source,
        })?;

        let handle = Logger::try_with_str(settings.level)
            .map_err(LoggingError::Backend)?
            .log_to_file(
                FileSpec::default()
                    .directory(settings.log_dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .duplicate_to_stderr(Duplicate::Warn)
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(LoggingError::Backend)?;

        info!(
            "event=logging_init module=logging status=ok {} version={}",
            settings,
            env!("CARGO_PKG_VERSION")
        );

        Ok(ActiveLogging {
            settings: settings.clone(),
            _handle: handle,
        })
    })?;

    ensure_same_settings(&active.settings, settings)
}

/// Returns the active logger settings, if logging was initialized.
pub fn logging_status() -> Option<LogSettings> {
    LOGGING_STATE.get().map(|active| active.settings.clone())
}

/// Returns the default log level for the current build mode.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Flattens and truncates free-form error text before it is logged.
pub fn sanitize_for_log(value: &str) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized
        .chars()
        .take(MAX_LOGGED_ERROR_CHARS)
        .collect::<String>();
    if normalized.chars().count() > MAX_LOGGED_ERROR_CHARS {
        truncated.push_str("...");
    }
    truncated
}

fn ensure_same_settings(active: &LogSettings, requested: &LogSettings) -> Result<(), LoggingError> {
    if active == requested {
        Ok(())
    } else {
        Err(LoggingError::AlreadyInitialized {
            active: active.clone(),
            requested: requested.clone(),
        })
    }
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}
