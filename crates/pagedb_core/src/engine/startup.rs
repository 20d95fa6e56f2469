//! Building the service set of an engine.

use crate::config::EngineSettings;
use crate::disk::DiskService;
use crate::error::{CoreError, CoreResult};
use crate::header::{HeaderCell, HeaderPage};
use crate::lock::LockService;
use crate::transaction::TransactionRegistry;
use crate::types::TransactionId;
use crate::wal::WalIndexService;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything an open engine owns.
pub(crate) struct Services {
    pub(crate) settings: Arc<EngineSettings>,
    pub(crate) locks: LockService,
    pub(crate) disk: Arc<DiskService>,
    pub(crate) wal: WalIndexService,
    pub(crate) header: HeaderCell,
    pub(crate) registry: TransactionRegistry,
}

/// Releases already-built services, newest first, unless disarmed.
#[derive(Default)]
struct StartupGuard {
    locks: Option<LockService>,
    disk: Option<Arc<DiskService>>,
}

impl StartupGuard {
    fn disarm(mut self) {
        self.locks = None;
        self.disk = None;
    }
}

impl Drop for StartupGuard {
    fn drop(&mut self) {
        if let Some(disk) = self.disk.take() {
            if let Err(e) = disk.close() {
                warn!(error = %e, "failed to release disk service after startup error");
            }
        }
        if let Some(locks) = self.locks.take() {
            locks.close();
        }
    }
}

impl Services {
    /// Runs the startup sequence.
    ///
    /// 1. validate settings
    /// 2. lock service
    /// 3. disk service (creates the files if absent)
    /// 4. one-shot read of page 0
    /// 5. parse the header
    /// 6. WAL index service
    /// 7. restore from the log if it is not empty
    ///
    /// On failure every service built so far is released and the original
    /// error is returned.
    pub(crate) fn start(settings: Arc<EngineSettings>) -> CoreResult<Self> {
        settings.validate()?;
        let mut guard = StartupGuard::default();

        let locks = LockService::new(settings.timeout, settings.read_only);
        guard.locks = Some(locks.clone());

        let disk = Arc::new(DiskService::open(&settings)?);
        guard.disk = Some(Arc::clone(&disk));

        let first_page = {
            let mut reader = disk.startup_reader()?;
            reader
                .next_page()?
                .ok_or_else(|| CoreError::invalid_format("data file has no header page"))?
                .1
        };
        let header = HeaderCell::new(HeaderPage::decode(&first_page)?);
        drop(first_page);

        let wal = WalIndexService::new(Arc::clone(&disk), locks.clone());
        let mut first_txn = TransactionId::new(1);
        let log_length = disk.log_length();
        if log_length > 0 {
            debug!(log_length, "log not empty, restoring");
            let report = wal.restore(&header)?;
            if let Some(max) = report.max_txn_id {
                first_txn = TransactionId::new(max.as_u64() + 1);
            }
        }

        guard.disarm();
        info!(
            source = %settings.source,
            pages = header.snapshot().page_count,
            logged_pages = wal.len(),
            read_only = settings.read_only,
            "engine opened"
        );
        Ok(Self {
            settings,
            locks,
            disk,
            wal,
            header,
            registry: TransactionRegistry::new(first_txn),
        })
    }
}
