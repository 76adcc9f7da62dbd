//! Task pools for request dispatch and file-read fan-out.
//!
//! Both the listener and the archive builder take a [`TaskPool`], so one
//! request can occupy several workers at once: one for the connection and one
//! per file being read. Results of fanned-out jobs come back over oneshot
//! channels.

use std::fmt;
use std::io;

use futures::future::BoxFuture;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::info;

use crate::config::PoolConfig;

/// A unit of blocking work, such as reading one file.
pub type BlockingJob = Box<dyn FnOnce() + Send + 'static>;

/// Executor abstraction shared by the listener and the archive builder.
pub trait TaskPool: Send + Sync + fmt::Debug {
    /// Run an async task (a connection or a request) to completion.
    fn spawn(&self, task: BoxFuture<'static, ()>);

    /// Run a blocking job.
    fn spawn_blocking(&self, job: BlockingJob);
}

/// Submit a blocking closure and get a receiver for its result.
///
/// The receiver errors if the job panicked or was dropped unrun.
pub fn submit_blocking<T, F>(pool: &dyn TaskPool, f: F) -> oneshot::Receiver<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    pool.spawn_blocking(Box::new(move || {
        // The receiver is gone only if the request was abandoned.
        let _ = tx.send(f());
    }));
    rx
}

/// Build the multi-thread runtime that backs a [`WorkerPool`].
///
/// `min_workers` async worker threads are started up front. Blocking jobs
/// grow the pool only up to `max_workers` threads in total; see
/// [`blocking_threads`].
pub fn build_runtime(config: &PoolConfig) -> io::Result<Runtime> {
    let blocking = blocking_threads(config);
    info!(
        min_workers = config.min_workers,
        max_workers = config.max_workers,
        blocking_threads = blocking,
        "Building worker pool"
    );
    Builder::new_multi_thread()
        .worker_threads(config.min_workers)
        .max_blocking_threads(blocking)
        .thread_name("zipserve-worker")
        .enable_all()
        .build()
}

/// Blocking threads allowed beside the `min_workers` async workers.
///
/// This is the room left under `max_workers`. Tokio needs at least one
/// blocking thread, so when `min_workers == max_workers` the total is
/// `max_workers + 1`.
#[must_use]
pub fn blocking_threads(config: &PoolConfig) -> usize {
    config.max_workers.saturating_sub(config.min_workers).max(1)
}

/// Bounded pool backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
}

impl WorkerPool {
    /// Create a pool that schedules onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a pool on the runtime the caller is running in.
    pub fn current() -> io::Result<Self> {
        Handle::try_current().map(Self::new).map_err(io::Error::other)
    }
}

impl TaskPool for WorkerPool {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.handle.spawn(task);
    }

    fn spawn_blocking(&self, job: BlockingJob) {
        self.handle.spawn_blocking(job);
    }
}

/// Deterministic pool: blocking jobs run immediately on the calling thread.
///
/// Async tasks still go to the ambient tokio runtime. Useful in tests where
/// the order of file reads should be fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePool;

impl TaskPool for InlinePool {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }

    fn spawn_blocking(&self, job: BlockingJob) {
        job();
    }
}
