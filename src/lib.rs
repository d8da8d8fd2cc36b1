//! Quantloop - scheduling primitives for async exchange bots.
//!
//! Exchange connectors and strategies poll order books, refresh balances and
//! push orders on timers and in response to stream events. This crate holds
//! the small runtime they share.
//!
//! # Modules
//!
//! - [`scheduler`] - Periodic heartbeat tasks, fire-and-forget dispatch and
//!   named single-flight guards
//! - [`engine`] - Process lifecycle: start the heartbeat, run until shutdown
//! - [`config`] - Configuration loading from TOML files
//! - [`error`] - Error types for the crate
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use quantloop::scheduler::{OnBusy, Scheduler};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let scheduler = Scheduler::default();
//!
//! scheduler.register_periodic("refresh_balance", Duration::from_secs(5), |_tick| async {
//!     Ok(())
//! })?;
//! let _heartbeat = scheduler.start_heartbeat()?;
//!
//! // A second click while the first order is in flight is dropped.
//! let placed = scheduler
//!     .run_exclusive("order:BTCUSD", OnBusy::Skip, || async { Ok::<_, anyhow::Error>(42) })
//!     .await;
//! # let _ = placed;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
