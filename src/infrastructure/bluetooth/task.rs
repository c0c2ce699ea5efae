use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cancellable background task (debounce timer, heartbeat, workers).
///
/// Cancelling is idempotent: cancelling a finished or already cancelled
/// task does nothing. Dropping the handle cancels the task.
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Run `future` once `delay` has elapsed
    pub fn after<F>(delay: Duration, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            future.await;
        })
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl From<JoinHandle<()>> for ScheduledTask {
    fn from(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let task = ScheduledTask::after(Duration::from_millis(350), async move {
            flag.store(true, Ordering::SeqCst);
        });

        task.cancel();
        task.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let task = ScheduledTask::after(Duration::from_millis(10), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(task.is_finished());
        task.cancel();
        assert!(fired.load(Ordering::SeqCst));
    }
}
