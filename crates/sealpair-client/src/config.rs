//! Session configuration.

use std::{num::NonZeroU32, time::Duration};

/// Session tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound for each collaborator call. `None` waits indefinitely.
    pub operation_timeout: Option<Duration>,

    /// How many times encrypt/decrypt run per call. Values above one are for
    /// measuring the mean duration; only the last result is returned.
    pub benchmark_repetitions: NonZeroU32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { operation_timeout: Some(Duration::from_secs(30)), benchmark_repetitions: NonZeroU32::MIN }
    }
}

impl SessionConfig {
    /// Config with benchmarking enabled at `repetitions` runs per call.
    pub fn benchmarking(repetitions: NonZeroU32) -> Self {
        Self { benchmark_repetitions: repetitions, ..Self::default() }
    }
}
