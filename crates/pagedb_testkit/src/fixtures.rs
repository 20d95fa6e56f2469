//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up test engines and common
//! page-level scenarios.

use pagedb_core::{Engine, EngineSettings, PageBuffer, PageId, PAGE_SIZE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Lock timeout used by fixtures; short so lock tests fail fast.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// A test engine with automatic cleanup.
///
/// File-backed engines live in a temporary directory that outlives every
/// reopen and is removed when the fixture drops.
pub struct TestEngine {
    engine: Option<Engine>,
    settings: EngineSettings,
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates a new in-memory test engine.
    pub fn memory() -> Self {
        Self::open(EngineSettings::memory().timeout(TEST_TIMEOUT), None)
    }

    /// Creates a new file-backed test engine with default settings.
    pub fn file() -> Self {
        Self::file_with(|settings| settings)
    }

    /// Creates a file-backed test engine whose dispose leaves the log in
    /// place, the way a crash after the last commit would.
    pub fn file_keeping_log() -> Self {
        Self::file_with(|settings| settings.checkpoint_on_shutdown(false))
    }

    /// Creates a new file-backed test engine, letting `configure` adjust
    /// the settings.
    pub fn file_with(configure: impl FnOnce(EngineSettings) -> EngineSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let settings = configure(
            EngineSettings::new(temp_dir.path().join("test.db")).timeout(TEST_TIMEOUT),
        );
        Self::open(settings, Some(temp_dir))
    }

    fn open(settings: EngineSettings, temp_dir: Option<TempDir>) -> Self {
        let engine = Engine::open(settings.clone()).expect("Failed to open engine");
        Self {
            engine: Some(engine),
            settings,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Engine {
        self.engine.as_ref().expect("engine is closed")
    }

    /// Returns the settings the engine was opened with.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns the data file path if file-backed, None if in-memory.
    pub fn data_path(&self) -> Option<&Path> {
        self.settings.source.data_path()
    }

    /// Returns the log file path if file-backed, None if in-memory.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.settings.source.log_path()
    }

    /// Disposes the engine, keeping the files.
    pub fn close(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.dispose().expect("Failed to dispose engine");
        }
    }

    /// Closes and opens the engine again with the same settings.
    pub fn reopen(&mut self) {
        self.close();
        self.engine = Some(Engine::open(self.settings.clone()).expect("Failed to reopen engine"));
    }

    /// Opens the files again with different settings, replacing the engine.
    pub fn reopen_with(
        &mut self,
        configure: impl FnOnce(EngineSettings) -> EngineSettings,
    ) -> pagedb_core::CoreResult<()> {
        self.close();
        let settings = configure(self.settings.clone());
        let engine = Engine::open(settings.clone())?;
        self.settings = settings;
        self.engine = Some(engine);
        Ok(())
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        self.engine()
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            let _ = engine.dispose();
        }
    }
}

/// Returns a page buffer filled with `byte`.
pub fn filled_page(byte: u8) -> PageBuffer {
    PageBuffer::from_bytes(&[byte; PAGE_SIZE])
}

/// Allocates one page per entry of `fills` in a single transaction, fills
/// each with its byte and commits. Returns the new page ids in order.
pub fn write_filled_pages(engine: &Engine, fills: &[u8]) -> Vec<PageId> {
    let txn = engine.begin().expect("Failed to begin");
    let ids: Vec<PageId> = fills
        .iter()
        .map(|fill| {
            let id = txn.allocate_page().expect("Failed to allocate");
            txn.write_page(id, filled_page(*fill)).expect("Failed to write");
            id
        })
        .collect();
    txn.commit().expect("Failed to commit");
    ids
}

/// Overwrites existing pages in one committed transaction.
pub fn overwrite_pages(engine: &Engine, writes: &[(PageId, u8)]) {
    let txn = engine.begin().expect("Failed to begin");
    for (id, fill) in writes {
        txn.write_page(*id, filled_page(*fill)).expect("Failed to write");
    }
    txn.commit().expect("Failed to commit");
}

/// Reads the first byte of a page in a fresh transaction.
pub fn read_fill(engine: &Engine, page_id: PageId) -> u8 {
    let txn = engine.begin().expect("Failed to begin");
    let page = txn.read_page(page_id).expect("Failed to read");
    page[0]
}

/// Runs a test with a temporary in-memory engine, disposing it afterwards.
///
/// # Example
///
/// ```rust,ignore
/// use pagedb_testkit::with_temp_engine;
///
/// #[test]
/// fn my_test() {
///     with_temp_engine(|engine| {
///         let txn = engine.begin().unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine) -> R,
{
    let test = TestEngine::memory();
    f(test.engine())
}
