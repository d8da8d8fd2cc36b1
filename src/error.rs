use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Errors raised when registering work with the scheduler.
///
/// These fail fast at registration time, never at the first tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid interval for periodic task '{name}': must be greater than zero")]
    InvalidInterval { name: String },

    #[error("periodic task name cannot be empty")]
    EmptyName,

    #[error("invalid heartbeat tick {tick_ms}ms: must be between 1 and 1000")]
    InvalidTick { tick_ms: u64 },

    #[error("heartbeat is already running")]
    AlreadyRunning,
}

/// Outcome of a guarded call that did not produce a value.
///
/// `Skipped` means the unit of work never ran because the key was held and
/// the caller asked not to wait. `Failed` carries the work's own error.
#[derive(Error, Debug)]
pub enum GuardError<E> {
    #[error("guard '{key}' is busy, call skipped")]
    Skipped { key: String },

    #[error(transparent)]
    Failed(E),
}

impl<E> GuardError<E> {
    /// True when the unit of work was never invoked.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// The work's error, if it ran and failed.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Skipped { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_error_distinguishes_skip_from_failure() {
        let skipped: GuardError<std::io::Error> = GuardError::Skipped { key: "buy".into() };
        assert!(skipped.is_skipped());
        assert!(skipped.into_failure().is_none());

        let failed = GuardError::Failed(std::io::Error::other("rejected"));
        assert!(!failed.is_skipped());
        assert_eq!(failed.to_string(), "rejected");
    }

    #[test]
    fn test_scheduler_error_converts_into_crate_error() {
        let err: Error = SchedulerError::EmptyName.into();
        assert!(matches!(err, Error::Scheduler(SchedulerError::EmptyName)));
    }
}
