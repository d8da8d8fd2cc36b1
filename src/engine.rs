//! Process lifecycle around a [`Scheduler`].
//!
//! The engine owns the scheduler and its heartbeat loop. Strategies get a
//! shared handle to the scheduler, register their periodic work, and the
//! engine keeps everything ticking until a shutdown future resolves.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use quantloop::config::Config;
//! use quantloop::engine::Engine;
//!
//! # async fn example() -> quantloop::error::Result<()> {
//! let mut engine = Engine::new(&Config::default());
//! engine.scheduler().register_periodic("poll_book", Duration::from_secs(3), |_tick| async {
//!     Ok(())
//! })?;
//! engine.run_until(tokio::signal::ctrl_c()).await
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::scheduler::{HeartbeatHandle, Scheduler, TaskId};

/// Name of the built-in status report task.
pub const STATUS_TASK: &str = "status";

pub struct Engine {
    scheduler: Arc<Scheduler>,
    heartbeat: Option<HeartbeatHandle>,
    status_interval: Option<Duration>,
    status_task: Option<TaskId>,
}

impl Engine {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let secs = config.heartbeat.status_interval_secs;
        Self {
            scheduler: Arc::new(Scheduler::new(config.heartbeat.clone())),
            heartbeat: None,
            status_interval: (secs > 0).then(|| Duration::from_secs(secs)),
            status_task: None,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn is_started(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Start the heartbeat loop. Calling it again while started is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if another owner already started the heartbeat on
    /// this scheduler.
    pub fn start(&mut self) -> Result<()> {
        if self.heartbeat.is_some() {
            return Ok(());
        }

        if let (Some(interval), None) = (self.status_interval, self.status_task) {
            self.status_task = Some(self.register_status_report(interval)?);
        }

        self.heartbeat = Some(self.scheduler.start_heartbeat()?);
        info!(tasks = self.scheduler.periodic().len(), "Engine started");
        Ok(())
    }

    /// Stop the heartbeat loop and wait for it to exit.
    ///
    /// Detached work already running is not awaited.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.shutdown().await;
            let stats = self.scheduler.dispatcher().stats();
            info!(
                launched = stats.launched,
                failed = stats.failed,
                in_flight = stats.in_flight,
                "Engine stopped"
            );
        }
    }

    /// Start, wait for `shutdown`, then stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to start.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future,
    {
        self.start()?;
        shutdown.await;
        info!("Shutdown signal received");
        self.stop().await;
        Ok(())
    }

    fn register_status_report(&self, interval: Duration) -> Result<TaskId> {
        let scheduler = Arc::downgrade(&self.scheduler);
        let id = self
            .scheduler
            .register_periodic(STATUS_TASK, interval, move |tick| {
                let scheduler = scheduler.clone();
                async move {
                    let Some(scheduler) = scheduler.upgrade() else {
                        return Ok(());
                    };
                    let stats = scheduler.dispatcher().stats();
                    info!(
                        beat = tick.beat,
                        launched = stats.launched,
                        failed = stats.failed,
                        panicked = stats.panicked,
                        in_flight = stats.in_flight,
                        "status"
                    );
                    for task in scheduler.periodic().snapshot() {
                        info!(
                            task = %task.name,
                            runs = task.runs,
                            skipped = task.skipped,
                            failures = task.failures,
                            in_flight = task.in_flight,
                            "task status"
                        );
                    }
                    Ok(())
                }
            })?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(status_interval_secs: u64) -> Config {
        Config {
            heartbeat: HeartbeatConfig {
                tick_ms: 100,
                print_interval: 10,
                status_interval_secs,
            },
            ..Config::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_drives_registered_tasks() {
        let mut engine = Engine::new(&config(0));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_in_task = Arc::clone(&counter);

        engine
            .scheduler()
            .register_periodic("poll_book", Duration::from_secs(1), move |_tick| {
                let counter = Arc::clone(&counter_in_task);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        engine
            .run_until(tokio::time::sleep(Duration::from_millis(3500)))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!engine.is_started());
        assert!(!engine.scheduler().periodic().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_report_is_registered_once() {
        let mut engine = Engine::new(&config(5));

        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.scheduler().periodic().len(), 1);

        tokio::time::sleep(Duration::from_millis(5500)).await;
        let snapshot = engine.scheduler().periodic().snapshot();
        assert_eq!(snapshot[0].name, STATUS_TASK);
        assert_eq!(snapshot[0].runs, 1);
        assert_eq!(snapshot[0].failures, 0);

        engine.stop().await;
        engine.start().unwrap();
        assert_eq!(engine.scheduler().periodic().len(), 1);
        engine.stop().await;
    }
}
