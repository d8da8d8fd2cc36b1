//! Heartbeat-driven periodic tasks.
//!
//! One driving loop wakes every `tick` and walks the task table. An entry is
//! due when `now - last_run >= interval`; due entries are handed to the
//! [`OneShotDispatcher`] so a slow callback never delays the loop or its
//! neighbours.
//!
//! # Timing policy
//!
//! - `last_run` is reset to the observed `now`, not advanced by `interval`.
//!   A late tick therefore shifts the schedule instead of producing a
//!   catch-up burst.
//! - An entry whose previous invocation is still running is skipped for
//!   that tick (counted in [`TaskSnapshot::skipped`]). Overlapping runs of
//!   the same entry never pile up.
//! - Missed driver ticks are dropped, not replayed.
//!
//! ```text
//! interval(tick) --> beat() --> due? --> in flight? --skip--> skipped += 1
//!                                             |
//!                                             +--> OneShotDispatcher::run(callback(Tick))
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatch::OneShotDispatcher;
use crate::config::{HeartbeatConfig, MAX_TICK_MS};
use crate::error::SchedulerError;


/// Identity of a registered periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Passed to a periodic callback on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Task being invoked.
    pub task_id: TaskId,
    /// Heartbeat count at dispatch time.
    pub beat: u64,
    /// 1-based invocation number of this task.
    pub run: u64,
}

type Callback = Arc<dyn Fn(Tick) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Entry {
    name: Arc<str>,
    interval: Duration,
    callback: Callback,
    last_run: Instant,
    last_run_at: Option<DateTime<Utc>>,
    runs: u64,
    skipped: u64,
    failures: Arc<AtomicU64>,
    in_flight: Arc<AtomicBool>,
}

/// Read-only view of one periodic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub interval: Duration,
    /// Invocations dispatched so far.
    pub runs: u64,
    /// Due ticks dropped because the previous run was still going.
    pub skipped: u64,
    /// Invocations that returned `Err` or panicked.
    pub failures: u64,
    /// Wall-clock time of the most recent dispatch.
    pub last_run_at: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard {
    in_flight: Arc<AtomicBool>,
    failures: Arc<AtomicU64>,
    succeeded: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.succeeded {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Table of periodic callbacks plus the loop that drives them.
pub struct PeriodicTaskRegistry {
    tasks: Mutex<HashMap<TaskId, Entry>>,
    dispatcher: OneShotDispatcher,
    config: HeartbeatConfig,
    beats: AtomicU64,
    running: AtomicBool,
}

impl PeriodicTaskRegistry {
    #[must_use]
    pub fn new(config: HeartbeatConfig, dispatcher: OneShotDispatcher) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            dispatcher,
            config,
            beats: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Add a callback to run every `interval`.
    ///
    /// The first invocation happens one interval after registration.
    /// Registering the same callback twice creates two independent entries.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidInterval`] for a zero interval and
    /// [`SchedulerError::EmptyName`] for a blank name.
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        callback: F,
    ) -> Result<TaskId, SchedulerError>
    where
        F: Fn(Tick) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchedulerError::EmptyName);
        }
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval { name });
        }

        let id = TaskId::new();
        let callback: Callback =
            Arc::new(move |tick: Tick| -> BoxFuture<'static, anyhow::Result<()>> {
                callback(tick).boxed()
            });
        let entry = Entry {
            name: Arc::from(name.as_str()),
            interval,
            callback,
            last_run: Instant::now(),
            last_run_at: None,
            runs: 0,
            skipped: 0,
            failures: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicBool::new(false)),
        };

        self.tasks.lock().insert(id, entry);
        debug!(
            task = %name,
            %id,
            interval_ms = interval.as_millis() as u64,
            "Periodic task registered"
        );
        Ok(id)
    }

    /// Remove a task. Returns `false` if `id` is unknown.
    ///
    /// A run already in flight is left to finish.
    pub fn unregister(&self, id: TaskId) -> bool {
        match self.tasks.lock().remove(&id) {
            Some(entry) => {
                debug!(task = %entry.name, %id, "Periodic task unregistered");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Heartbeats seen since creation.
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of every task, ordered by name.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<_> = self
            .tasks
            .lock()
            .iter()
            .map(|(id, entry)| TaskSnapshot {
                id: *id,
                name: entry.name.to_string(),
                interval: entry.interval,
                runs: entry.runs,
                skipped: entry.skipped,
                failures: entry.failures.load(Ordering::Relaxed),
                last_run_at: entry.last_run_at,
                in_flight: entry.in_flight.load(Ordering::Acquire),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Spawn the driving loop.
    ///
    /// Dropping the returned handle detaches the loop; it keeps running
    /// until [`HeartbeatHandle::shutdown`] or runtime shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTick`] when the configured tick is
    /// zero or coarser than [`MAX_TICK_MS`], and
    /// [`SchedulerError::AlreadyRunning`] if a loop is already driving this
    /// registry.
    pub fn start(self: &Arc<Self>) -> Result<HeartbeatHandle, SchedulerError> {
        let tick_ms = self.config.tick_ms;
        if tick_ms == 0 || tick_ms > MAX_TICK_MS {
            return Err(SchedulerError::InvalidTick { tick_ms });
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let registry = Arc::clone(self);
        let running = RunningFlag(Arc::clone(self));
        let tick = self.config.tick();

        let task = tokio::spawn(async move {
            // Clears `running` however the loop ends, including a dropped task.
            let _running = running;
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(tick_ms = tick.as_millis() as u64, "Heartbeat started");

            loop {
                tokio::select! {
                    Some(()) = shutdown_rx.recv() => {
                        info!(beats = registry.beats(), "Heartbeat shutting down");
                        break;
                    }
                    _ = ticker.tick() => registry.beat(Instant::now()),
                }
            }
        });

        Ok(HeartbeatHandle { shutdown_tx, task })
    }

    /// One heartbeat: dispatch every entry that is due at `now`.
    pub(crate) fn beat(&self, now: Instant) {
        let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;

        let mut tasks = self.tasks.lock();
        if self.config.print_interval > 0 && beat % self.config.print_interval == 0 {
            info!(beat, tasks = tasks.len(), "heartbeat");
        }

        for (id, entry) in tasks.iter_mut() {
            if now.saturating_duration_since(entry.last_run) < entry.interval {
                continue;
            }
            entry.last_run = now;

            if entry.in_flight.swap(true, Ordering::AcqRel) {
                entry.skipped += 1;
                warn!(
                    task = %entry.name,
                    skipped = entry.skipped,
                    "Previous run still in flight, skipping tick"
                );
                continue;
            }

            entry.runs += 1;
            entry.last_run_at = Some(Utc::now());

            let tick = Tick {
                task_id: *id,
                beat,
                run: entry.runs,
            };
            let callback = Arc::clone(&entry.callback);
            let mut guard = RunGuard {
                in_flight: Arc::clone(&entry.in_flight),
                failures: Arc::clone(&entry.failures),
                succeeded: false,
            };

            self.dispatcher.run(entry.name.to_string(), async move {
                // Built inside the task so a panicking callback is caught too.
                let result = callback(tick).await;
                guard.succeeded = result.is_ok();
                result
            });
        }
    }
}

/// Marks the registry as stopped when the driving task ends.
struct RunningFlag(Arc<PeriodicTaskRegistry>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl fmt::Debug for PeriodicTaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicTaskRegistry")
            .field("tasks", &self.len())
            .field("beats", &self.beats())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Handle for controlling the heartbeat loop lifecycle.
#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the loop and wait for it to exit.
    ///
    /// Callbacks already dispatched keep running to completion.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
