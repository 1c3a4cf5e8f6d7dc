//! One-at-a-time task execution for a single track.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::task::{Spawn, SpawnError, SpawnExt};
use futures::{FutureExt, StreamExt};

use crate::error::FetchError;

type Job = BoxFuture<'static, ()>;

/// Runs scheduled tasks strictly one at a time, in submission order.
///
/// Each track owns one queue so overlapping fetches never race on the
/// track's temporary engine objects. Queues of different tracks are
/// independent. The queue does not pick an executor: the paired
/// [`QueueWorker`] is spawned wherever the host runs futures.
#[derive(Clone)]
pub struct SerialTaskQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for SerialTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTaskQueue")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drives a [`SerialTaskQueue`]. Finishes once every queue handle is
/// dropped and the backlog has run.
#[must_use = "the worker must be spawned for queued tasks to run"]
pub struct QueueWorker {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl QueueWorker {
    pub async fn run(mut self) {
        while let Some(job) = self.rx.next().await {
            job.await;
        }
    }
}

impl SerialTaskQueue {
    pub fn new() -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::unbounded();
        (Self { tx }, QueueWorker { rx })
    }

    /// Create a queue and spawn its worker on `spawner`.
    pub fn spawn<S: Spawn + ?Sized>(spawner: &S) -> Result<Self, SpawnError> {
        let (queue, worker) = Self::new();
        spawner.spawn(worker.run())?;
        Ok(queue)
    }

    /// Queue `task` behind everything scheduled before it.
    ///
    /// The task runs even if the returned handle is dropped.
    pub fn schedule<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job = async move {
            let output = task.await;
            // The caller may have stopped listening.
            let _ = done_tx.send(output);
        }
        .boxed();
        // On failure the job, and with it `done_tx`, is dropped, so the
        // handle resolves to `QueueClosed`.
        let _ = self.tx.unbounded_send(job);
        TaskHandle { rx: done_rx }
    }

    /// Whether the worker has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Completion of a scheduled task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|r| r.map_err(|_| FetchError::QueueClosed))
    }
}
