// 8.0: simulation engine. owns the market registry, the traders, the insurance fund
// and the audit log, and drives them on a simulated clock. deterministic, no I/O.

mod config;
mod core;
mod liquidations;
mod positions;
mod pricing;
mod replay;
mod results;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{
    EngineError, LiquidationKind, LiquidationReport, ReplayReport, StepReport, SweepFailure,
};
