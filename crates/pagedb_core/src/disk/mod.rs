//! Disk service: data file, log file, page cache and write queue.
//!
//! The disk service owns both files of an engine:
//!
//! ```text
//! <name>.db        # data file, page 0 is the header
//! <name>-log.db    # write-ahead log
//! ```
//!
//! In-memory engines (`:memory:`, `:temp:`) use two in-memory backends.
//!
//! Reads of data pages go through an LRU cache. All writes go through the
//! asynchronous [write queue](WriteQueue), which keeps per-file submission
//! order; there is no ordering across the two files unless a caller drains
//! the queue with [`DiskService::wait_for_queue`].

mod buffer;
mod queue;
mod reader;

pub use buffer::PageBuffer;
pub use reader::StartupReader;

use crate::config::{DataSource, EngineSettings};
use crate::error::{CoreError, CoreResult};
use crate::header::HeaderPage;
use crate::types::{PageId, PAGE_SIZE};
use buffer::BufferPool;
use lru::LruCache;
use pagedb_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use parking_lot::Mutex;
use queue::{FileKind, Payload, WriteOp, WriteQueue};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// The two backends of an engine.
pub(crate) struct Files {
    pub(crate) data: Mutex<Box<dyn StorageBackend>>,
    pub(crate) log: Mutex<Box<dyn StorageBackend>>,
}

/// Owns the data file and the log file of one engine.
pub struct DiskService {
    files: Arc<Files>,
    queue: WriteQueue,
    cache: Mutex<LruCache<PageId, Vec<u8>>>,
    pool: Arc<BufferPool>,
    read_only: bool,
    created: bool,
    /// Path of a writable log file; `None` for in-memory logs.
    log_path: Option<PathBuf>,
    startup_read: AtomicBool,
    closed: AtomicBool,
}

impl DiskService {
    /// Opens the files described by `settings`, creating them if absent.
    ///
    /// A freshly created data file gets an initial header page written and
    /// synced before this returns.
    ///
    /// # Errors
    ///
    /// Returns `StorageOpen` if a file cannot be opened or created, which
    /// includes a missing data file in read-only mode.
    pub fn open(settings: &EngineSettings) -> CoreResult<Self> {
        let read_only = settings.read_only;
        let (mut data, log): (Box<dyn StorageBackend>, Box<dyn StorageBackend>) =
            match &settings.source {
                DataSource::File(path) => open_files(&settings.source, path, read_only)?,
                DataSource::Memory | DataSource::Temp => (
                    Box::new(InMemoryBackend::new()),
                    Box::new(InMemoryBackend::new()),
                ),
            };

        let log_path = match &settings.source {
            DataSource::File(_) if !read_only => settings.source.log_path(),
            _ => None,
        };

        let path = settings.source.to_string();
        let data_size = data.size().map_err(|e| CoreError::storage_open(&path, e))?;
        let created = data_size == 0 && !read_only;
        if created {
            data.write_at(0, &HeaderPage::new().encode())
                .and_then(|()| data.sync())
                .map_err(|e| CoreError::storage_open(&path, e))?;
            info!(source = %settings.source, "created new data file");
        }

        let log_end = log.size().map_err(|e| CoreError::storage_open(&path, e))?;
        let files = Arc::new(Files {
            data: Mutex::new(data),
            log: Mutex::new(log),
        });
        let queue = WriteQueue::start(Arc::clone(&files), log_end)?;
        let capacity = NonZeroUsize::new(settings.cache_pages).unwrap_or(NonZeroUsize::MIN);

        debug!(source = %settings.source, log_end, read_only, "disk service opened");
        Ok(Self {
            files,
            queue,
            cache: Mutex::new(LruCache::new(capacity)),
            pool: BufferPool::new(settings.cache_pages.min(256)),
            read_only,
            created,
            log_path,
            startup_read: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns `true` if `open` created the data file.
    #[must_use]
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// Returns `true` if every write is rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the one-shot startup reader.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` on a second call; `Disposed` after close.
    pub fn startup_reader(&self) -> CoreResult<StartupReader<'_>> {
        self.ensure_open()?;
        if self.startup_read.swap(true, Ordering::SeqCst) {
            return Err(CoreError::invalid_operation(
                "startup reader can only be used once",
            ));
        }
        StartupReader::new(&self.files)
    }

    /// Hands out a zeroed pooled page buffer.
    #[must_use]
    pub fn new_page(&self) -> PageBuffer {
        self.pool.acquire()
    }

    /// Reads a data page through the cache.
    ///
    /// Pages past the end of the file (allocated but never folded) read as
    /// zeroes.
    pub fn read_page(&self, page_id: PageId) -> CoreResult<PageBuffer> {
        self.ensure_open()?;
        let mut page = self.pool.acquire();

        if let Some(cached) = self.cache.lock().get(&page_id) {
            page.copy_from_slice(cached);
            return Ok(page);
        }

        let data = self.files.data.lock();
        let size = data.size().map_err(CoreError::from_storage)?;
        if page_id.offset() + PAGE_SIZE as u64 <= size {
            let bytes = data
                .read_at(page_id.offset(), PAGE_SIZE)
                .map_err(CoreError::from_storage)?;
            page.copy_from_slice(&bytes);
        }
        drop(data);

        self.cache.lock().put(page_id, page.to_vec());
        Ok(page)
    }

    /// Queues a data page write and refreshes the cache.
    pub fn write_page(&self, page_id: PageId, page: PageBuffer) -> CoreResult<()> {
        self.ensure_writable()?;
        self.cache.lock().put(page_id, page.to_vec());
        self.queue.push(WriteOp {
            file: FileKind::Data,
            offset: page_id.offset(),
            payload: Payload::Page(page),
        })
    }

    /// Reserves log space and queues `record`; returns its log offset.
    pub fn append_log(&self, record: Vec<u8>) -> CoreResult<u64> {
        self.ensure_writable()?;
        self.queue.push_log(record)
    }

    /// Reads `len` bytes of the log at `offset`.
    pub fn read_log(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        self.ensure_open()?;
        self.files
            .log
            .lock()
            .read_at(offset, len)
            .map_err(CoreError::from_storage)
    }

    /// Current length of the log file, including writes still queued.
    #[must_use]
    pub fn log_length(&self) -> u64 {
        self.queue.log_end()
    }

    /// Length of the data file in bytes.
    pub fn data_length(&self) -> CoreResult<u64> {
        self.files
            .data
            .lock()
            .size()
            .map_err(CoreError::from_storage)
    }

    /// Drains the queue, then cuts the log to `len` bytes.
    ///
    /// Callers must make sure nothing is appended concurrently, which the
    /// WAL index does by holding the exclusive `Log` lock.
    pub fn truncate_log(&self, len: u64) -> CoreResult<()> {
        self.ensure_writable()?;
        self.queue.wait()?;
        self.files
            .log
            .lock()
            .truncate(len)
            .map_err(CoreError::from_storage)?;
        self.queue.set_log_end(len);
        debug!(len, "log truncated");
        Ok(())
    }

    /// Replaces the whole log with `bytes`.
    ///
    /// A file-backed log is written to a staging file next to it, synced
    /// and renamed over the log, so a crash leaves either the old log or
    /// the new one. Same caller contract as [`DiskService::truncate_log`].
    pub fn replace_log(&self, bytes: &[u8]) -> CoreResult<()> {
        self.ensure_writable()?;
        self.queue.wait()?;
        let mut log = self.files.log.lock();
        match &self.log_path {
            Some(path) => {
                let staging = staging_path(path);
                if staging.exists() {
                    std::fs::remove_file(&staging)?;
                }
                let mut next = FileBackend::open(&staging)?;
                next.write_at(0, bytes)?;
                next.sync()?;
                drop(next);
                std::fs::rename(&staging, path)?;
                *log = Box::new(FileBackend::open(path)?);
            }
            None => *log = Box::new(InMemoryBackend::with_data(bytes.to_vec())),
        }
        self.queue.set_log_end(bytes.len() as u64);
        debug!(len = bytes.len(), "log replaced");
        Ok(())
    }

    /// Runs `f` with direct access to the log backend.
    ///
    /// Only used by restoration, before any write can be queued.
    pub(crate) fn with_log<R>(&self, f: impl FnOnce(&dyn StorageBackend) -> R) -> R {
        let log = self.files.log.lock();
        f(log.as_ref())
    }

    #[cfg(test)]
    pub(crate) fn with_log_mut<R>(&self, f: impl FnOnce(&mut dyn StorageBackend) -> R) -> R {
        let mut log = self.files.log.lock();
        f(&mut **log)
    }

    /// Number of pooled page buffers currently handed out.
    #[must_use]
    pub fn pages_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Number of queued writes not yet applied.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Blocks until every write queued before the call is durable.
    pub fn wait_for_queue(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.queue.wait()
    }

    /// Drains the queue, stops the writer and syncs both files.
    ///
    /// Idempotent. After close every operation fails with `Disposed`.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let drained = self.queue.stop();
        if !self.read_only {
            self.files.log.lock().sync()?;
            self.files.data.lock().sync()?;
        }
        self.cache.lock().clear();
        debug!("disk service closed");
        drained
    }

    /// Returns `true` once [`DiskService::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::Disposed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.read_only {
            Err(CoreError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

fn open_files(
    source: &DataSource,
    path: &Path,
    read_only: bool,
) -> CoreResult<(Box<dyn StorageBackend>, Box<dyn StorageBackend>)> {
    let log_path = source
        .log_path()
        .ok_or_else(|| CoreError::configuration(format!("bad data path {}", path.display())))?;
    if read_only {
        let data = FileBackend::open_read_only(path).map_err(open_err(path))?;
        // A missing log in read-only mode just means there is nothing to replay.
        let log: Box<dyn StorageBackend> = if log_path.exists() {
            Box::new(FileBackend::open_read_only(&log_path).map_err(open_err(&log_path))?)
        } else {
            Box::new(InMemoryBackend::new())
        };
        Ok((Box::new(data), log))
    } else {
        let data = FileBackend::open_with_create_dirs(path).map_err(open_err(path))?;
        // Left over from a compaction that never reached its rename.
        let staging = staging_path(&log_path);
        if staging.exists() {
            std::fs::remove_file(&staging)
                .map_err(|e| CoreError::storage_open(staging.display().to_string(), StorageError::Io(e)))?;
        }
        let log = FileBackend::open(&log_path).map_err(open_err(&log_path))?;
        Ok((Box::new(data), Box::new(log)))
    }
}

fn staging_path(log_path: &Path) -> PathBuf {
    let mut name = log_path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}

fn open_err(path: &Path) -> impl FnOnce(StorageError) -> CoreError {
    let path = path.display().to_string();
    move |e| CoreError::storage_open(path, e)
}

impl Drop for DiskService {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for DiskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskService")
            .field("read_only", &self.read_only)
            .field("closed", &self.is_closed())
            .field("queue_length", &self.queue_length())
            .field("pages_in_use", &self.pages_in_use())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn memory_disk() -> DiskService {
        DiskService::open(&EngineSettings::memory()).unwrap()
    }

    #[test]
    fn new_source_gets_a_header_page() {
        let disk = memory_disk();
        assert!(disk.was_created());
        assert_eq!(disk.data_length().unwrap(), PAGE_SIZE as u64);

        let mut reader = disk.startup_reader().unwrap();
        let (id, page) = reader.next_page().unwrap().unwrap();
        assert_eq!(id, PageId::HEADER);
        assert!(!page.is_pooled());
        assert_eq!(HeaderPage::decode(&page).unwrap(), HeaderPage::new());
        assert!(reader.next_page().unwrap().is_none());
    }

    #[test]
    fn startup_reader_is_one_shot() {
        let disk = memory_disk();
        let _ = disk.startup_reader().unwrap();
        assert!(matches!(
            disk.startup_reader(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn queued_page_write_becomes_durable() {
        let disk = memory_disk();
        let mut page = disk.new_page();
        page[..4].copy_from_slice(b"abcd");
        disk.write_page(PageId::new(2), page).unwrap();
        disk.wait_for_queue().unwrap();

        assert_eq!(disk.queue_length(), 0);
        assert_eq!(disk.data_length().unwrap(), 3 * PAGE_SIZE as u64);
        let read = disk.read_page(PageId::new(2)).unwrap();
        assert_eq!(&read[..4], b"abcd");
    }

    #[test]
    fn unwritten_page_reads_as_zeroes() {
        let disk = memory_disk();
        let page = disk.read_page(PageId::new(9)).unwrap();
        assert!(page.iter().all(|b| *b == 0));
    }

    #[test]
    fn pages_in_use_tracks_outstanding_buffers() {
        let disk = memory_disk();
        assert_eq!(disk.pages_in_use(), 0);
        let a = disk.new_page();
        let b = disk.read_page(PageId::HEADER).unwrap();
        assert_eq!(disk.pages_in_use(), 2);
        drop(a);
        drop(b);
        assert_eq!(disk.pages_in_use(), 0);
    }

    #[test]
    fn log_offsets_are_reserved_in_order() {
        let disk = memory_disk();
        let a = disk.append_log(vec![1u8; 10]).unwrap();
        let b = disk.append_log(vec![2u8; 5]).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 10);
        assert_eq!(disk.log_length(), 15);

        disk.wait_for_queue().unwrap();
        assert_eq!(disk.read_log(10, 5).unwrap(), vec![2u8; 5]);

        disk.truncate_log(0).unwrap();
        assert_eq!(disk.log_length(), 0);
        assert_eq!(disk.append_log(vec![3u8; 4]).unwrap(), 0);
    }

    #[test]
    fn read_only_missing_file_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let err = DiskService::open(&EngineSettings::new(path.clone()).read_only(true)).unwrap_err();
        assert!(matches!(err, CoreError::StorageOpen { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.db");
        DiskService::open(&EngineSettings::new(path.clone()))
            .unwrap()
            .close()
            .unwrap();

        let disk = DiskService::open(&EngineSettings::new(path).read_only(true)).unwrap();
        assert!(!disk.was_created());
        assert!(matches!(
            disk.write_page(PageId::new(1), PageBuffer::zeroed()),
            Err(CoreError::ReadOnly)
        ));
        assert!(matches!(disk.append_log(vec![0]), Err(CoreError::ReadOnly)));
    }

    #[test]
    fn file_source_creates_log_next_to_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.db");
        let disk = DiskService::open(&EngineSettings::new(path.clone())).unwrap();
        disk.close().unwrap();

        assert!(path.exists());
        assert!(dir.path().join("app-log.db").exists());
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let disk = memory_disk();
        disk.append_log(vec![0u8; 8]).unwrap();
        disk.close().unwrap();
        disk.close().unwrap();

        assert!(disk.is_closed());
        assert!(matches!(disk.read_page(PageId::HEADER), Err(CoreError::Disposed)));
        assert!(matches!(disk.wait_for_queue(), Err(CoreError::Disposed)));
    }

    #[test]
    fn replace_log_swaps_the_file_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.db");
        let disk = DiskService::open(&EngineSettings::new(path)).unwrap();
        disk.append_log(vec![1u8; 64]).unwrap();
        disk.append_log(vec![2u8; 64]).unwrap();

        disk.replace_log(&[2u8; 64]).unwrap();
        assert_eq!(disk.log_length(), 64);
        assert!(!dir.path().join("app-log.db.compact").exists());

        assert_eq!(disk.append_log(vec![3u8; 8]).unwrap(), 64);
        disk.wait_for_queue().unwrap();
        assert_eq!(disk.read_log(0, 64).unwrap(), vec![2u8; 64]);
        assert_eq!(disk.read_log(64, 8).unwrap(), vec![3u8; 8]);
        disk.close().unwrap();
        assert_eq!(std::fs::metadata(dir.path().join("app-log.db")).unwrap().len(), 72);
    }

    #[test]
    fn replace_log_in_memory() {
        let disk = memory_disk();
        disk.append_log(vec![1u8; 32]).unwrap();
        disk.replace_log(&[]).unwrap();
        assert_eq!(disk.log_length(), 0);
        assert_eq!(disk.append_log(vec![4u8; 4]).unwrap(), 0);
    }

    #[test]
    fn stale_staging_file_is_removed_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.db");
        let staging = dir.path().join("app-log.db.compact");
        std::fs::write(&staging, b"half written").unwrap();

        let disk = DiskService::open(&EngineSettings::new(path)).unwrap();
        assert!(!staging.exists());
        disk.close().unwrap();
    }
}
