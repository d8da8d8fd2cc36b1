//! Heartbeat driver configuration.

use std::time::Duration;

use serde::Deserialize;

/// Settings for the loop that drives periodic tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Wake-up granularity of the driving loop (milliseconds).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Log a heartbeat line every this many beats. Zero disables it.
    #[serde(default)]
    pub print_interval: u64,
    /// Log a task status report every this many seconds. Zero disables it.
    #[serde(default)]
    pub status_interval_secs: u64,
}

const fn default_tick_ms() -> u64 {
    100
}

/// Upper bound for `tick_ms`; coarser ticks make one-second tasks late.
pub const MAX_TICK_MS: u64 = 1000;

impl HeartbeatConfig {
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            print_interval: 0,
            status_interval_secs: 0,
        }
    }
}
