//! FIFO task queue guarding the shared repository list.
//!
//! Each scheduled task waits for the completion signal of the task scheduled
//! before it, runs, and then signals its own completion. The tail of the chain
//! is swapped synchronously inside [`TaskQueue::schedule`], so submission
//! order is call order even if the returned futures are polled later or in a
//! different order.
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Clone, Default)]
pub struct TaskQueue {
    tail: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` behind every previously scheduled task.
    ///
    /// The task's output (including any `Err`) goes only to this caller. If the
    /// task fails or panics the next task still runs: the completion sender is
    /// dropped either way, which releases the waiter. A future dropped before
    /// its turn hands the queue on only once the task ahead of it is done.
    pub fn schedule<F, Fut, T>(&self, name: &str, task: F) -> impl Future<Output = T> + Send
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = {
            let mut tail = self.tail.lock().unwrap_or_else(|p| p.into_inner());
            tail.replace(done_rx)
        };
        let mut turn = Turn {
            previous,
            done: Some(done_tx),
        };
        let name = name.to_string();
        info!(task = %name, "task queued");
        async move {
            turn.wait().await;
            info!(task = %name, "task started");
            let output = task().await;
            info!(task = %name, "task finished");
            turn.finish();
            output
        }
    }
}

/// One slot in the chain: the completion signal of the task ahead and our own.
struct Turn {
    previous: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

impl Turn {
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // Err only means the sender went away, which also releases us.
            let _ = previous.await;
        }
        self.previous = None;
    }

    fn finish(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        // Still waiting: the task ahead may be running, so forward its
        // completion instead of releasing the next task now.
        let (Some(previous), Some(done)) = (self.previous.take(), self.done.take()) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("queued task dropped before its turn");
                handle.spawn(async move {
                    let _ = previous.await;
                    drop(done);
                });
            }
            Err(_) => drop(done),
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}
