//! Deferred-callback scheduling for debounced UI work

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Runs a future after a delay; the returned handle cancels it
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask;
}

/// Handle to a pending callback. Dropping it cancels the callback, so an
/// owner going away can never leave work running behind it.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn cancel(mut self) {
        self.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                trace!("Cancelling pending scheduled task");
            }
            handle.abort();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Timer-backed scheduler on the tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledTask {
        ScheduledTask::new(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scheduled_task_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = TokioScheduler.schedule(
            Duration::from_millis(10),
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(task.is_finished());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_task_never_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = TokioScheduler.schedule(
            Duration::from_millis(20),
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        );
        drop(task);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
