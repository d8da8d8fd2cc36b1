//! Single-flight execution keyed by name.
//!
//! At most one unit of work runs per key at any time. A caller that finds
//! the key busy either queues behind the holder ([`OnBusy::Wait`]) or gives
//! up without running anything ([`OnBusy::Skip`]). Every caller that gets
//! the lock runs its own work in full; results are never shared.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::lock::{NamedLock, NamedLockRegistry};
use crate::error::GuardError;

/// What to do when the key is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnBusy {
    /// Queue behind the current holder, then run.
    #[default]
    Wait,
    /// Return [`GuardError::Skipped`] immediately; the work is never run.
    Skip,
}

impl OnBusy {
    #[must_use]
    pub const fn from_wait(wait: bool) -> Self {
        if wait {
            Self::Wait
        } else {
            Self::Skip
        }
    }
}

/// Runs units of work under named locks.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveRunner {
    locks: Arc<NamedLockRegistry>,
}

impl ExclusiveRunner {
    #[must_use]
    pub fn new(locks: Arc<NamedLockRegistry>) -> Self {
        Self { locks }
    }

    pub fn locks(&self) -> &Arc<NamedLockRegistry> {
        &self.locks
    }

    /// Run `work` while holding `key`.
    ///
    /// # Errors
    ///
    /// [`GuardError::Skipped`] when `on_busy` is [`OnBusy::Skip`] and the key
    /// is held; [`GuardError::Failed`] when the work itself fails. In both
    /// cases the lock is free again by the time the caller sees the error.
    pub async fn run<F, Fut, T, E>(
        &self,
        key: &str,
        on_busy: OnBusy,
        work: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guarded(key, on_busy).run(work).await
    }

    /// Bind `key` and `on_busy` once for repeated calls.
    ///
    /// The named lock is resolved here, so later calls skip the registry.
    pub fn guarded(&self, key: &str, on_busy: OnBusy) -> Guarded {
        Guarded {
            lock: self.locks.lock(key),
            on_busy,
        }
    }
}

/// A reusable exclusive guard around one key.
///
/// ```no_run
/// use quantloop::scheduler::{ExclusiveRunner, OnBusy};
///
/// # async fn place_order() -> anyhow::Result<u64> { Ok(1) }
/// # async fn example() {
/// let runner = ExclusiveRunner::default();
/// let buy = runner.guarded("buy", OnBusy::Skip);
///
/// match buy.run(place_order).await {
///     Ok(order_id) => println!("placed {order_id}"),
///     Err(e) if e.is_skipped() => println!("buy already in flight"),
///     Err(e) => println!("buy failed: {e}"),
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Guarded {
    lock: NamedLock,
    on_busy: OnBusy,
}

impl Guarded {
    pub fn key(&self) -> &str {
        self.lock.key()
    }

    pub fn on_busy(&self) -> OnBusy {
        self.on_busy
    }

    /// Whether a call is currently running under this key.
    pub fn is_busy(&self) -> bool {
        self.lock.is_locked()
    }

    /// See [`ExclusiveRunner::run`].
    ///
    /// # Errors
    ///
    /// Same as [`ExclusiveRunner::run`].
    pub async fn run<F, Fut, T, E>(&self, work: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = match self.on_busy {
            OnBusy::Wait => self.lock.acquire().await,
            OnBusy::Skip => match self.lock.try_acquire() {
                Some(guard) => guard,
                None => {
                    debug!(key = %self.key(), "Guard busy, skipping call");
                    return Err(GuardError::Skipped {
                        key: self.key().to_owned(),
                    });
                }
            },
        };

        // Dropping this future mid-await drops `guard` too, so cancellation
        // cannot leak the lock.
        let result = work().await;
        drop(guard);

        result.map_err(GuardError::Failed)
    }
}
