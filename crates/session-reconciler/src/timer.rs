//! Cancellable one-shot retry timer.

use std::time::Duration;
use tokio::task::JoinHandle;

/// A scheduled callback. Dropping the timer cancels it.
#[derive(Debug)]
pub(crate) struct RetryTimer {
    task: JoinHandle<()>,
}

impl RetryTimer {
    /// Run `on_fire` once after `delay`, unless cancelled first.
    pub(crate) fn schedule<F>(delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });
        Self { task }
    }

    pub(crate) fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
