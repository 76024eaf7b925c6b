//! Single-worker sequential task executor.
//!
//! Tasks run strictly in submission order. Each task is spawned and awaited
//! by the worker, so a task that fails or panics never blocks or reorders the
//! tasks queued behind it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chatsync_types::error::{CacheError, SessionStoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

type QueuedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The task was dropped before producing a result (worker stopped or task panicked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queued task '{0}' did not complete")]
pub struct TaskDropped(pub &'static str);

impl From<TaskDropped> for CacheError {
    fn from(e: TaskDropped) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<TaskDropped> for SessionStoreError {
    fn from(e: TaskDropped) -> Self {
        SessionStoreError::Cache(e.into())
    }
}

pub struct TaskQueue {
    name: &'static str,
    sender: mpsc::UnboundedSender<QueuedTask>,
}

impl TaskQueue {
    /// Start the worker. Must be called within a Tokio runtime.
    pub fn new(name: &'static str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedTask>();

        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                if let Err(e) = tokio::spawn(task).await {
                    warn!(queue = name, error = %e, "queued task panicked");
                }
            }
        });

        Self { name, sender }
    }

    /// Append `task` to the queue. The returned handle resolves with the
    /// task's output; dropping the handle does not cancel the task.
    pub fn enqueue<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued: QueuedTask = Box::pin(async move {
            let _ = tx.send(task.await);
        });

        if self.sender.send(queued).is_err() {
            warn!(queue = self.name, "task queue worker stopped, task discarded");
        }

        TaskHandle {
            name: self.name,
            receiver: rx,
        }
    }

    /// Wait until every task submitted before this call has finished.
    pub async fn flush(&self) {
        let _ = self.enqueue(async {}).await;
    }
}

/// Completion handle of a queued task.
pub struct TaskHandle<T> {
    name: &'static str,
    receiver: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// A handle that is already resolved with `value`.
    pub fn ready(name: &'static str, value: T) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { name, receiver: rx }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskDropped>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let name = self.name;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| TaskDropped(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order_despite_delays() {
        let queue = TaskQueue::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (i, delay_ms) in [30u64, 0, 10].into_iter().enumerate() {
            let log = Arc::clone(&log);
            handles.push(queue.enqueue(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                log.lock().unwrap().push(i);
                i
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), i);
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_tasks() {
        let queue = TaskQueue::new("test");

        let failed = queue.enqueue(async { Err::<(), String>("boom".to_string()) });
        let ok = queue.enqueue(async { Ok::<u8, String>(7) });

        assert!(failed.await.unwrap().is_err());
        assert_eq!(ok.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported_and_skipped() {
        let queue = TaskQueue::new("test");

        let panicked = queue.enqueue(async {
            if true {
                panic!("task panic");
            }
        });
        let after = queue.enqueue(async { "still running" });

        assert_eq!(panicked.await, Err(TaskDropped("test")));
        assert_eq!(after.await.unwrap(), "still running");
    }

    #[tokio::test]
    async fn test_flush_waits_for_pending_tasks() {
        let queue = TaskQueue::new("test");
        let done = Arc::new(Mutex::new(false));

        let flag = Arc::clone(&done);
        let _ = queue.enqueue(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            *flag.lock().unwrap() = true;
        });

        queue.flush().await;
        assert!(*done.lock().unwrap());
    }

    #[tokio::test]
    async fn test_ready_handle_resolves_immediately() {
        let handle = TaskHandle::ready("test", 5);
        assert_eq!(handle.await, Ok(5));
    }
}
