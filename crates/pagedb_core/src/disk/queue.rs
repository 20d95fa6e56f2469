//! Asynchronous durable write queue.
//!
//! A single writer thread applies queued writes in submission order and
//! syncs every file it touched before reporting a batch as applied. Callers
//! that need durability wait with [`WriteQueue::wait`], which only waits for
//! the writes queued before the call.

use super::buffer::PageBuffer;
use super::Files;
use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Target file of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    Data,
    Log,
}

pub(crate) enum Payload {
    Page(PageBuffer),
    Bytes(Vec<u8>),
}

impl Payload {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Page(page) => page,
            Self::Bytes(bytes) => bytes,
        }
    }
}

pub(crate) struct WriteOp {
    pub(crate) file: FileKind,
    pub(crate) offset: u64,
    pub(crate) payload: Payload,
}

#[derive(Default)]
struct QueueState {
    ops: VecDeque<WriteOp>,
    enqueued: u64,
    applied: u64,
    /// Next free byte in the log; log space is reserved at enqueue time.
    log_end: u64,
    stopping: bool,
    failure: Option<String>,
}

struct Shared {
    state: Mutex<QueueState>,
    work: Condvar,
    drained: Condvar,
}

pub(crate) struct WriteQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Starts the writer thread.
    pub(crate) fn start(files: Arc<Files>, log_end: u64) -> CoreResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                log_end,
                ..QueueState::default()
            }),
            work: Condvar::new(),
            drained: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("pagedb-writer".into())
                .spawn(move || run_writer(&shared, &files))?
        };

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues a write at a known offset.
    pub(crate) fn push(&self, op: WriteOp) -> CoreResult<()> {
        let mut state = self.shared.state.lock();
        Self::check_open(&state)?;
        state.ops.push_back(op);
        state.enqueued += 1;
        drop(state);
        self.shared.work.notify_one();
        Ok(())
    }

    /// Reserves log space for `bytes` and queues the write.
    ///
    /// Returns the offset the record will occupy once applied.
    pub(crate) fn push_log(&self, bytes: Vec<u8>) -> CoreResult<u64> {
        let mut state = self.shared.state.lock();
        Self::check_open(&state)?;
        let offset = state.log_end;
        state.log_end += bytes.len() as u64;
        state.ops.push_back(WriteOp {
            file: FileKind::Log,
            offset,
            payload: Payload::Bytes(bytes),
        });
        state.enqueued += 1;
        drop(state);
        self.shared.work.notify_one();
        Ok(offset)
    }

    fn check_open(state: &QueueState) -> CoreResult<()> {
        if state.stopping {
            return Err(CoreError::Disposed);
        }
        if let Some(failure) = &state.failure {
            return Err(queue_failure(failure));
        }
        Ok(())
    }

    /// Number of queued writes not yet applied.
    pub(crate) fn len(&self) -> usize {
        let state = self.shared.state.lock();
        (state.enqueued - state.applied) as usize
    }

    /// Offset where the next log record will be written.
    pub(crate) fn log_end(&self) -> u64 {
        self.shared.state.lock().log_end
    }

    /// Resets the log reservation after the log file was truncated.
    pub(crate) fn set_log_end(&self, log_end: u64) {
        self.shared.state.lock().log_end = log_end;
    }

    /// Blocks until every write queued before this call is durable.
    ///
    /// Writes queued concurrently after the call are not waited for.
    pub(crate) fn wait(&self) -> CoreResult<()> {
        let mut state = self.shared.state.lock();
        let target = state.enqueued;
        while state.applied < target && state.failure.is_none() {
            self.shared.drained.wait(&mut state);
        }
        match &state.failure {
            Some(failure) => Err(queue_failure(failure)),
            None => Ok(()),
        }
    }

    /// Drains the queue and stops the writer thread. Idempotent.
    pub(crate) fn stop(&self) -> CoreResult<()> {
        let drained = self.wait();
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
        }
        self.shared.work.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("writer thread panicked");
            }
        }
        drained
    }
}

fn queue_failure(failure: &str) -> CoreError {
    CoreError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("write queue failed: {failure}"),
    ))
}

fn run_writer(shared: &Shared, files: &Files) {
    loop {
        let batch: Vec<WriteOp> = {
            let mut state = shared.state.lock();
            while state.ops.is_empty() && !state.stopping {
                shared.work.wait(&mut state);
            }
            if state.ops.is_empty() {
                break;
            }
            state.ops.drain(..).collect()
        };

        let count = batch.len() as u64;
        let result = apply_batch(files, batch);

        let mut state = shared.state.lock();
        state.applied += count;
        if let Err(err) = result {
            error!(error = %err, "write queue batch failed");
            state.failure.get_or_insert_with(|| err.to_string());
        }
        drop(state);
        shared.drained.notify_all();
    }
    debug!("writer thread stopped");
}

fn apply_batch(files: &Files, batch: Vec<WriteOp>) -> CoreResult<()> {
    let mut touched_data = false;
    let mut touched_log = false;

    for op in batch {
        let backend = match op.file {
            FileKind::Data => {
                touched_data = true;
                &files.data
            }
            FileKind::Log => {
                touched_log = true;
                &files.log
            }
        };
        backend.lock().write_at(op.offset, op.payload.as_slice())?;
    }

    if touched_log {
        let mut log = files.log.lock();
        log.flush()?;
        log.sync()?;
    }
    if touched_data {
        let mut data = files.data.lock();
        data.flush()?;
        data.sync()?;
    }
    Ok(())
}
