//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Marker selecting a non-persistent in-memory engine.
pub const MEMORY_MARKER: &str = ":memory:";

/// Reserved marker used for the temporary companion engine.
pub const TEMP_MARKER: &str = ":temp:";

/// Where an engine keeps its data file and log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// A data file on disk; the log lives next to it.
    File(PathBuf),
    /// In-memory data and log, lost on dispose.
    Memory,
    /// In-memory spill storage for a companion engine.
    Temp,
}

impl DataSource {
    /// Parses a filename or one of the special markers.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            MEMORY_MARKER => Self::Memory,
            TEMP_MARKER => Self::Temp,
            other => Self::File(PathBuf::from(other)),
        }
    }

    /// Returns `true` if data survives the engine.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Returns the data file path for file-backed sources.
    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Memory | Self::Temp => None,
        }
    }

    /// Returns the log file path for file-backed sources.
    ///
    /// `app.db` logs to `app-log.db`; a path without extension gets a
    /// `-log` suffix.
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        let path = self.data_path()?;
        let stem = path.file_stem()?.to_string_lossy();
        let name = match path.extension() {
            Some(ext) => format!("{stem}-log.{}", ext.to_string_lossy()),
            None => format!("{stem}-log"),
        };
        Some(path.with_file_name(name))
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(MEMORY_MARKER),
            Self::Temp => f.write_str(TEMP_MARKER),
        }
    }
}

impl From<&str> for DataSource {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<PathBuf> for DataSource {
    fn from(value: PathBuf) -> Self {
        Self::File(value)
    }
}

impl From<&Path> for DataSource {
    fn from(value: &Path) -> Self {
        Self::File(value.to_path_buf())
    }
}

/// Settings for opening an engine.
///
/// Settings are created once and shared read-only by every service the
/// engine builds.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Data file location or special marker.
    pub source: DataSource,

    /// How long lock acquisition waits before failing with `LockTimeout`.
    pub timeout: Duration,

    /// Open without ever writing to disk.
    pub read_only: bool,

    /// Fold the whole log into the data file during shutdown.
    pub checkpoint_on_shutdown: bool,

    /// Number of data pages kept in the disk service cache.
    pub cache_pages: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            source: DataSource::Memory,
            timeout: Duration::from_secs(60),
            read_only: false,
            checkpoint_on_shutdown: true,
            cache_pages: 1024,
        }
    }
}

impl EngineSettings {
    /// Creates settings for `source` with default values.
    #[must_use]
    pub fn new(source: impl Into<DataSource>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Settings for an in-memory engine.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(DataSource::Memory)
    }

    /// Settings for a temporary companion engine.
    #[must_use]
    pub fn temp() -> Self {
        Self {
            source: DataSource::Temp,
            checkpoint_on_shutdown: false,
            ..Self::default()
        }
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub const fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether shutdown folds the log into the data file.
    #[must_use]
    pub const fn checkpoint_on_shutdown(mut self, value: bool) -> Self {
        self.checkpoint_on_shutdown = value;
        self
    }

    /// Sets the page cache capacity.
    #[must_use]
    pub const fn cache_pages(mut self, value: usize) -> Self {
        self.cache_pages = value;
        self
    }

    /// Checks that the settings describe an openable engine.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty file path, a read-only in-memory
    /// source or a zero-sized cache.
    pub fn validate(&self) -> CoreResult<()> {
        if let DataSource::File(path) = &self.source {
            if path.as_os_str().is_empty() {
                return Err(CoreError::configuration("data file path is empty"));
            }
            if path.file_name().is_none() {
                return Err(CoreError::configuration(format!(
                    "data file path has no file name: {}",
                    path.display()
                )));
            }
        }
        if self.read_only && !self.source.is_persistent() {
            return Err(CoreError::configuration(format!(
                "{} cannot be opened read-only",
                self.source
            )));
        }
        if self.cache_pages == 0 {
            return Err(CoreError::configuration("cache_pages must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.source, DataSource::Memory);
        assert!(!settings.read_only);
        assert!(settings.checkpoint_on_shutdown);
        assert_eq!(settings.timeout, Duration::from_secs(60));
    }

    #[test]
    fn builder_pattern() {
        let settings = EngineSettings::new("app.db")
            .timeout(Duration::from_millis(250))
            .read_only(true)
            .checkpoint_on_shutdown(false)
            .cache_pages(16);

        assert_eq!(settings.source, DataSource::File(PathBuf::from("app.db")));
        assert_eq!(settings.timeout, Duration::from_millis(250));
        assert!(settings.read_only);
        assert!(!settings.checkpoint_on_shutdown);
        assert_eq!(settings.cache_pages, 16);
    }

    #[test]
    fn markers_are_parsed() {
        assert_eq!(DataSource::parse(":memory:"), DataSource::Memory);
        assert_eq!(DataSource::parse(":temp:"), DataSource::Temp);
        assert!(DataSource::parse("x.db").is_persistent());
        assert!(!DataSource::Temp.is_persistent());
    }

    #[test]
    fn log_path_sits_next_to_data_file() {
        let source = DataSource::parse("/data/app.db");
        assert_eq!(source.log_path(), Some(PathBuf::from("/data/app-log.db")));

        let source = DataSource::parse("/data/app");
        assert_eq!(source.log_path(), Some(PathBuf::from("/data/app-log")));

        assert_eq!(DataSource::Memory.log_path(), None);
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = EngineSettings::new(DataSource::File(PathBuf::new()))
            .validate()
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
    }

    #[test]
    fn zero_cache_is_rejected() {
        let err = EngineSettings::memory().cache_pages(0).validate().unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
    }

    #[test]
    fn read_only_memory_is_rejected() {
        let err = EngineSettings::memory().read_only(true).validate().unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
        assert!(EngineSettings::new("a.db").read_only(true).validate().is_ok());
    }

    #[test]
    fn temp_settings_skip_shutdown_checkpoint() {
        let settings = EngineSettings::temp();
        assert_eq!(settings.source, DataSource::Temp);
        assert!(!settings.checkpoint_on_shutdown);
    }
}
