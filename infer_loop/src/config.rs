//! Loop configuration.
//!
use std::time::Duration;

use common::protocol::Facing;

/// Default poll interval between ticks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Parameters of one capture loop instance.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Time between two ticks. Ticks missed while an inference is pending are skipped.
    pub interval: Duration,
    /// Camera used when no facing mode is requested.
    pub default_facing: Facing,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            default_facing: Facing::Front,
        }
    }
}

impl LoopConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
