//! Worker pool for CPU-bound stages.

use std::any::Any;
use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{CancellationToken, TaskError};

/// Multi-threaded pool that runs pipeline futures and blocking stages.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl WorkerPool {
    /// Create a pool. `threads` of `None` uses one thread per core.
    pub fn new(threads: Option<usize>) -> std::io::Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name("nativekit-worker");
        if let Some(threads) = threads {
            builder.worker_threads(threads.max(1));
        }
        let runtime = builder.build()?;
        let handle = runtime.handle().clone();
        debug!(?threads, "Worker pool started");
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a pipeline onto the pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Block the calling thread on `future`. Must not be called from a pool thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!("Worker pool stopped");
        }
    }
}

/// Run a CPU-bound stage on the blocking pool.
///
/// Errors and panics inside `work` come back as a typed [`TaskError`]; they
/// never unwind across the thread boundary.
pub async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
    cancel.check()?;

    let token = cancel.clone();
    let joined = tokio::task::spawn_blocking(move || {
        token.check()?;
        work()
    })
    .await;

    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => {
            let message = panic_message(err.into_panic());
            warn!(%message, "Worker stage panicked");
            Err(TaskError::Panicked(message))
        }
        Err(_) => Err(TaskError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
