//! Periodic tasks, detached dispatch and named single-flight guards.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   +-- PeriodicTaskRegistry --(due entries)--> OneShotDispatcher --> tokio::spawn
//!   +-- OneShotDispatcher
//!   +-- ExclusiveRunner --> NamedLockRegistry
//! ```
//!
//! Everything hangs off an explicit [`Scheduler`] value instead of process
//! globals, so tests can build as many isolated schedulers as they need.

pub mod dispatch;
pub mod exclusive;
pub mod lock;
pub mod periodic;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use dispatch::{DispatchStats, OneShotDispatcher, Work};
pub use exclusive::{ExclusiveRunner, Guarded, OnBusy};
pub use lock::{NamedLock, NamedLockGuard, NamedLockRegistry};
pub use periodic::{HeartbeatHandle, PeriodicTaskRegistry, TaskId, TaskSnapshot, Tick};

use crate::config::HeartbeatConfig;
use crate::error::{GuardError, SchedulerError};

/// Bundle of the scheduling services sharing one lock registry and one
/// dispatcher.
#[derive(Debug)]
pub struct Scheduler {
    locks: Arc<NamedLockRegistry>,
    dispatcher: OneShotDispatcher,
    exclusive: ExclusiveRunner,
    periodic: Arc<PeriodicTaskRegistry>,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let locks = Arc::new(NamedLockRegistry::new());
        let dispatcher = OneShotDispatcher::new();
        Self {
            exclusive: ExclusiveRunner::new(Arc::clone(&locks)),
            periodic: Arc::new(PeriodicTaskRegistry::new(config, dispatcher.clone())),
            locks,
            dispatcher,
        }
    }

    /// Register `callback` to run every `interval`.
    ///
    /// # Errors
    ///
    /// Fails fast on a zero interval or blank name.
    pub fn register_periodic<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        callback: F,
    ) -> Result<TaskId, SchedulerError>
    where
        F: Fn(Tick) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.periodic.register(name, interval, callback)
    }

    pub fn unregister_periodic(&self, id: TaskId) -> bool {
        self.periodic.unregister(id)
    }

    /// Fire and forget. See [`OneShotDispatcher::run`].
    pub fn run_once<F>(&self, name: impl Into<String>, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.run(name, work);
    }

    /// Run a batch concurrently and wait for all of it. Returns the number
    /// of failures.
    pub async fn run_all<I>(&self, name: &str, works: I) -> usize
    where
        I: IntoIterator<Item = Work>,
    {
        self.dispatcher.run_all(name, works).await
    }

    /// Run `work` while holding `key`. See [`ExclusiveRunner::run`].
    ///
    /// # Errors
    ///
    /// [`GuardError::Skipped`] or [`GuardError::Failed`].
    pub async fn run_exclusive<F, Fut, T, E>(
        &self,
        key: &str,
        on_busy: OnBusy,
        work: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.exclusive.run(key, on_busy, work).await
    }

    /// A reusable guard for one key.
    pub fn guarded(&self, key: &str, on_busy: OnBusy) -> Guarded {
        self.exclusive.guarded(key, on_busy)
    }

    /// Spawn the heartbeat loop driving periodic tasks.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::AlreadyRunning`] if it is already started.
    pub fn start_heartbeat(&self) -> Result<HeartbeatHandle, SchedulerError> {
        self.periodic.start()
    }

    pub fn locks(&self) -> &Arc<NamedLockRegistry> {
        &self.locks
    }

    pub fn dispatcher(&self) -> &OneShotDispatcher {
        &self.dispatcher
    }

    pub fn periodic(&self) -> &Arc<PeriodicTaskRegistry> {
        &self.periodic
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(HeartbeatConfig::default())
    }
}
