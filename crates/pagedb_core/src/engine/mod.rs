//! Engine orchestrator.
//!
//! The [`Engine`] owns one lock service, one disk service, one WAL index
//! and the header of an open data file, and drives their lifecycle:
//!
//! ```text
//! open ──► restore (log not empty) ──► transactions / checkpoints
//!                                              │
//!                          dispose ◄── shutdown ┘
//! ```
//!
//! Shutdown blocks new transactions, rolls back the live ones and, unless
//! disabled or read-only, folds the whole log into the data file. Dispose
//! then releases the disk and lock services; afterwards every operation
//! fails with [`CoreError::Disposed`].

mod startup;

pub(crate) use startup::Services;

use crate::config::EngineSettings;
use crate::error::{CoreError, CoreResult};
use crate::header::HeaderPage;
use crate::stats::EngineStats;
use crate::transaction::Transaction;
use crate::types::PageId;
use crate::wal::{ActiveTransactions, CheckpointMode};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// The temporary companion engine.
enum Companion {
    /// Created by this engine; disposed with it.
    Owned(Arc<Engine>),
    /// Supplied by the caller; never disposed by this engine.
    Borrowed(Arc<Engine>),
}

impl Companion {
    fn engine(&self) -> &Arc<Engine> {
        match self {
            Self::Owned(engine) | Self::Borrowed(engine) => engine,
        }
    }
}

/// An open storage engine.
///
/// # Opening an Engine
///
/// ```rust,ignore
/// use pagedb_core::{Engine, EngineSettings};
///
/// let engine = Engine::open(EngineSettings::new("app.db"))?;
///
/// let txn = engine.begin()?;
/// let page_id = txn.allocate_page()?;
/// let mut page = txn.new_page();
/// page[..5].copy_from_slice(b"hello");
/// txn.write_page(page_id, page)?;
/// txn.commit()?;
///
/// engine.dispose()?;
/// ```
///
/// [`Engine::scoped`] opens an engine, runs a closure and disposes on every
/// exit path. Dropping an engine that was never disposed logs a warning and
/// disposes it on a best-effort basis.
pub struct Engine {
    settings: Arc<EngineSettings>,
    services: RwLock<Option<Arc<Services>>>,
    disposed: AtomicBool,
    companion: Mutex<Option<Companion>>,
}

impl Engine {
    /// Opens or creates the engine described by `settings`.
    ///
    /// # Errors
    ///
    /// - `Configuration` for invalid settings
    /// - `StorageOpen` if the files cannot be opened or created
    /// - `InvalidFormat` / `ChecksumMismatch` for a bad header page
    /// - `Recovery` if the log is damaged beyond its last record
    pub fn open(settings: EngineSettings) -> CoreResult<Self> {
        let settings = Arc::new(settings);
        let services = Services::start(Arc::clone(&settings))?;
        Ok(Self {
            settings,
            services: RwLock::new(Some(Arc::new(services))),
            disposed: AtomicBool::new(false),
            companion: Mutex::new(None),
        })
    }

    /// Opens an engine, runs `f` and disposes the engine afterwards.
    ///
    /// An error from `f` wins over an error from disposing.
    pub fn scoped<R>(
        settings: EngineSettings,
        f: impl FnOnce(&Engine) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let engine = Self::open(settings)?;
        let result = f(&engine);
        let disposed = engine.dispose();
        match result {
            Ok(value) => disposed.map(|()| value),
            Err(err) => {
                if let Err(dispose_err) = disposed {
                    warn!(error = %dispose_err, "dispose failed after scoped error");
                }
                Err(err)
            }
        }
    }

    /// Returns the settings the engine was opened with.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// `Disposed` after dispose, `ShuttingDown` once shutdown started.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let services = self.services()?;
        let shared = services
            .registry
            .register(services.header.clone(), || services.wal.current_version())?;
        Ok(Transaction::new(services, shared))
    }

    /// Returns a copy of the current header page.
    pub fn header(&self) -> CoreResult<HeaderPage> {
        Ok(self.services()?.header.snapshot())
    }

    /// Number of pooled page buffers currently handed out.
    pub fn pages_in_use(&self) -> CoreResult<usize> {
        Ok(self.services()?.disk.pages_in_use())
    }

    /// Number of queued writes not yet durable.
    pub fn queue_length(&self) -> CoreResult<usize> {
        Ok(self.services()?.disk.queue_length())
    }

    /// Blocks until every write queued before the call is durable.
    pub fn wait_for_queue(&self) -> CoreResult<()> {
        self.services()?.disk.wait_for_queue()
    }

    /// Folds logged pages no active transaction still needs into the data
    /// file. Returns the number of pages folded.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a read-only engine, `LockTimeout` if commits keep the
    /// log busy. A failed checkpoint leaves the log and index untouched.
    pub fn checkpoint(&self) -> CoreResult<usize> {
        let services = self.services()?;
        services
            .wal
            .checkpoint(&services.header, CheckpointMode::Incremental, &services.registry)
    }

    /// Starts shutting down.
    ///
    /// Blocks new transactions, rolls back every live one and, when
    /// `checkpoint_on_shutdown` is set and the engine is writable, folds the
    /// whole log into the data file. Only the first call does anything.
    ///
    /// # Errors
    ///
    /// `Disposed` after dispose, or the final checkpoint's error. Logged
    /// pages survive a failed final checkpoint and are restored on the next
    /// open.
    pub fn shutdown(&self) -> CoreResult<()> {
        let services = self.services()?;
        Self::shutdown_services(&services)
    }

    fn shutdown_services(services: &Services) -> CoreResult<()> {
        if !services.registry.begin_shutdown() {
            return Ok(());
        }
        let active = services.registry.active_count();
        info!(active, "engine shutting down");

        let outcome = services.registry.signal_all(services.settings.timeout);
        if outcome.failed > 0 {
            warn!(
                rolled_back = outcome.rolled_back,
                failed = outcome.failed,
                "some transactions could not be rolled back"
            );
        }

        if services.settings.checkpoint_on_shutdown && !services.settings.read_only {
            services
                .wal
                .checkpoint(&services.header, CheckpointMode::Shutdown, &services.registry)?;
        }
        Ok(())
    }

    /// Shuts down and releases every resource.
    ///
    /// Releases the disk service, then the lock service, then an owned
    /// companion engine. Resources are released even if the final
    /// checkpoint fails; that error is returned afterwards. Calling
    /// dispose again does nothing.
    pub fn dispose(&self) -> CoreResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let services = self.services.read().clone();
        let mut result = match &services {
            Some(services) => Self::shutdown_services(services),
            None => Ok(()),
        };
        if self.disposed.swap(true, Ordering::SeqCst) {
            return result;
        }

        if let Some(services) = self.services.write().take() {
            if let Err(e) = services.disk.close() {
                warn!(error = %e, "failed to close disk service");
                if result.is_ok() {
                    result = Err(e);
                }
            }
            services.locks.close();
        }

        if let Some(companion) = self.companion.lock().take() {
            match companion {
                Companion::Owned(engine) => {
                    if let Err(e) = engine.dispose() {
                        warn!(error = %e, "failed to dispose companion engine");
                    }
                }
                Companion::Borrowed(_) => {}
            }
        }

        info!(source = %self.settings.source, "engine disposed");
        result
    }

    /// Returns `true` once dispose ran.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns the companion engine, creating an owned in-memory one on
    /// first use.
    pub fn temp_engine(&self) -> CoreResult<Arc<Engine>> {
        self.services()?;
        let mut companion = self.companion.lock();
        // Dispose flags first and takes the companion afterwards.
        if self.is_disposed() {
            return Err(CoreError::Disposed);
        }
        if let Some(existing) = companion.as_ref() {
            return Ok(Arc::clone(existing.engine()));
        }
        let engine = Arc::new(Engine::open(
            EngineSettings::temp().timeout(self.settings.timeout),
        )?);
        *companion = Some(Companion::Owned(Arc::clone(&engine)));
        Ok(engine)
    }

    /// Supplies a caller-owned companion engine.
    ///
    /// This engine never disposes it.
    ///
    /// # Errors
    ///
    /// `TempEngineAlreadyDefined` if a companion already exists; that
    /// companion stays in place.
    pub fn set_temp_engine(&self, engine: Arc<Engine>) -> CoreResult<()> {
        self.services()?;
        let mut companion = self.companion.lock();
        if self.is_disposed() {
            return Err(CoreError::Disposed);
        }
        if companion.is_some() {
            return Err(CoreError::TempEngineAlreadyDefined);
        }
        *companion = Some(Companion::Borrowed(engine));
        Ok(())
    }

    /// Pages whose latest committed image is still in the log.
    pub fn logged_pages(&self) -> CoreResult<Vec<PageId>> {
        Ok(self.services()?.wal.pages())
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> CoreResult<EngineStats> {
        let services = self.services()?;
        Ok(EngineStats {
            pages_in_use: services.disk.pages_in_use(),
            queue_length: services.disk.queue_length(),
            logged_pages: services.wal.len(),
            log_length: services.disk.log_length(),
            data_length: services.disk.data_length()?,
            page_count: services.header.snapshot().page_count,
            active_transactions: services.registry.active_count(),
            version: services.wal.current_version().as_u64(),
        })
    }

    fn services(&self) -> CoreResult<Arc<Services>> {
        if self.is_disposed() {
            return Err(CoreError::Disposed);
        }
        self.services.read().clone().ok_or(CoreError::Disposed)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.is_disposed() {
            warn!(source = %self.settings.source, "engine dropped without dispose");
            if let Err(e) = self.dispose() {
                warn!(error = %e, "dispose on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("source", &self.settings.source)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
