//! Engine configuration options.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Log every event at debug level as it is emitted.
    pub verbose: bool,
    /// Simulated milliseconds between two steps of an index replay.
    pub step_millis: i64,
    /// Opening balance of the insurance fund.
    pub insurance_seed: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
            step_millis: 60_000,
            insurance_seed: Decimal::ZERO,
        }
    }
}
