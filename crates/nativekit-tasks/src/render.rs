//! Render-thread job queue.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tokio::sync::oneshot;
use tracing::trace;

use crate::{CancellationToken, TaskError};

/// A unit of work executed on the render thread against its context.
pub type RenderJob<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Receiving end of the render-thread queue.
///
/// Jobs run in submission order. The queue is drained by whoever owns the
/// render context, typically once per tick.
pub struct RenderQueue<C: 'static> {
    sender: Sender<RenderJob<C>>,
    receiver: Receiver<RenderJob<C>>,
}

impl<C: 'static> RenderQueue<C> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Get a cloneable handle for posting jobs from any thread.
    pub fn scheduler(&self) -> RenderScheduler<C> {
        RenderScheduler {
            sender: self.sender.clone(),
        }
    }

    /// Pop the next job, if any.
    pub fn try_next(&self) -> Option<RenderJob<C>> {
        match self.receiver.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Number of queued jobs.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl<C: 'static> Default for RenderQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending end of the render-thread queue.
pub struct RenderScheduler<C: 'static> {
    sender: Sender<RenderJob<C>>,
}

impl<C: 'static> Clone for RenderScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<C: 'static> RenderScheduler<C> {
    /// Enqueue `work` to run on the render thread.
    pub fn dispatch<F>(&self, work: F) -> Result<(), TaskError>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.sender
            .send(Box::new(work))
            .map_err(|_| TaskError::RenderThreadGone)
    }

    /// Run `work` on the render thread and await its outcome.
    ///
    /// The job is skipped if cancellation is observed either before it is
    /// queued or when the render thread picks it up.
    pub async fn run<R, F>(&self, cancel: &CancellationToken, work: F) -> Result<R, TaskError>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> Result<R, TaskError> + Send + 'static,
    {
        cancel.check()?;

        let (tx, rx) = oneshot::channel();
        let token = cancel.clone();
        self.dispatch(move |context| {
            let outcome = token.check().and_then(|()| work(context));
            if tx.send(outcome).is_err() {
                trace!("Render job outcome dropped by waiter");
            }
        })?;

        rx.await.map_err(|_| TaskError::RenderThreadGone)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_run_in_order() {
        let queue: RenderQueue<Vec<u32>> = RenderQueue::new();
        let scheduler = queue.scheduler();

        for i in 0..3 {
            scheduler.dispatch(move |log: &mut Vec<u32>| log.push(i)).unwrap();
        }
        assert_eq!(queue.pending(), 3);

        let mut log = Vec::new();
        while let Some(job) = queue.try_next() {
            job(&mut log);
        }
        assert_eq!(log, vec![0, 1, 2]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_dispatch_after_queue_dropped() {
        let queue: RenderQueue<()> = RenderQueue::new();
        let scheduler = queue.scheduler();
        drop(queue);

        assert_eq!(scheduler.dispatch(|_| {}), Err(TaskError::RenderThreadGone));
    }
}
