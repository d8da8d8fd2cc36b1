//! Fire-and-forget task dispatch.
//!
//! [`OneShotDispatcher::run`] spawns a unit of work on the Tokio runtime and
//! returns immediately. The spawned task owns a catch-and-log wrapper, so an
//! `Err` or a panic inside the work ends up in the log instead of being lost
//! with a dropped `JoinHandle`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tracing::{debug, error};

/// A boxed unit of work accepted by [`OneShotDispatcher::run_all`].
pub type Work = BoxFuture<'static, anyhow::Result<()>>;

#[derive(Debug, Default)]
struct Counters {
    launched: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    in_flight: AtomicUsize,
}

/// Point-in-time view of dispatcher activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Units of work handed to the runtime.
    pub launched: u64,
    /// Units of work that returned `Err`.
    pub failed: u64,
    /// Units of work that panicked.
    pub panicked: u64,
    /// Units of work spawned but not yet finished.
    pub in_flight: usize,
}

/// How a dispatched unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Ok,
    Failed,
    Panicked,
}

/// Launches detached units of work.
///
/// Cheap to clone; clones share counters.
#[derive(Debug, Clone, Default)]
pub struct OneShotDispatcher {
    counters: Arc<Counters>,
}

impl OneShotDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` concurrently with the caller.
    ///
    /// Returns as soon as the task is spawned. Failures are logged with
    /// `name` and counted; they never reach the caller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run<F>(&self, name: impl Into<String>, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let supervised = self.supervise(name, work);
        tokio::spawn(supervised);
    }

    /// Run every unit of work concurrently and wait for all of them.
    ///
    /// Returns how many did not complete successfully.
    pub async fn run_all<I>(&self, name: &str, works: I) -> usize
    where
        I: IntoIterator<Item = Work>,
    {
        let handles: Vec<_> = works
            .into_iter()
            .enumerate()
            .map(|(index, work)| tokio::spawn(self.supervise(format!("{name}[{index}]"), work)))
            .collect();

        let total = handles.len();
        let failures = join_all(handles)
            .await
            .into_iter()
            .filter(|joined| !matches!(joined, Ok(Completion::Ok)))
            .count();

        debug!(batch = name, total, failures, "Batch finished");
        failures
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            launched: self.counters.launched.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
        }
    }

    /// Wrap `work` so that its outcome is logged and counted.
    pub(crate) fn supervise<F>(
        &self,
        name: String,
        work: F,
    ) -> impl Future<Output = Completion> + Send + 'static
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        counters.launched.fetch_add(1, Ordering::Relaxed);
        counters.in_flight.fetch_add(1, Ordering::Relaxed);

        async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            counters.in_flight.fetch_sub(1, Ordering::Relaxed);

            match outcome {
                Ok(Ok(())) => {
                    debug!(task = %name, "Task completed");
                    Completion::Ok
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(task = %name, error = %format!("{e:#}"), "Task failed");
                    Completion::Failed
                }
                Err(panic) => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(task = %name, panic = %panic_message(&*panic), "Task panicked");
                    Completion::Panicked
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn succeed() -> anyhow::Result<()> {
        Ok(())
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("bad payload")
    }

    async fn time_out() -> anyhow::Result<()> {
        anyhow::bail!("timeout")
    }

    #[tokio::test]
    async fn test_run_returns_before_work_completes() {
        let dispatcher = OneShotDispatcher::new();
        let (done_tx, done_rx) = oneshot::channel();

        dispatcher.run("slow", async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = done_tx.send(());
            Ok(())
        });

        assert_eq!(dispatcher.stats().in_flight, 1);

        tokio::time::timeout(Duration::from_secs(2), done_rx)
            .await
            .expect("work should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failure_is_counted_not_propagated() {
        let dispatcher = OneShotDispatcher::new();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        dispatcher.run("doomed", async move {
            let _done = done_tx;
            anyhow::bail!("exchange returned 500")
        });

        // Sender dropped when the work ends.
        let _ = done_rx.await;
        tokio::task::yield_now().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.launched, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let dispatcher = OneShotDispatcher::new();
        let failures = dispatcher
            .run_all(
                "batch",
                vec![succeed().boxed(), explode().boxed(), time_out().boxed()],
            )
            .await;

        assert_eq!(failures, 2);
        let stats = dispatcher.stats();
        assert_eq!(stats.launched, 3);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*boxed), "non-string panic payload");
    }
}
