// vamm-core: virtual AMM perpetual futures simulator.
// a constant-product curve prices synthetic long/short exposure; traders post one
// cross-margin balance and get liquidated in two stages as their margin ratio falls.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, TraderId, Side, Price, Quote, Leverage
//   2.x  curve.rs: constant-product reserves, peg, swaps and previews
//   3.x  margin.rs: leverage cap, margin ratio summary
//   4.x  position.rs: position record, pnl and notional by curve preview
//   6.x  liquidation.rs: partial/full liquidation, insurance fund
//   7.x  config.rs: simulation config, presets, JSON loading
//   8.x  engine/: driver: markets, traders, pricing, liquidation sweeps, replays
//   9.x  price_path.rs: seeded GBM index paths
//   10.x trader.rs: trader account, cross-margin open/close
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market config, position list, registry

// core modules
pub mod curve;
pub mod events;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod position;
pub mod trader;
pub mod types;

// driver modules
pub mod config;
pub mod engine;
pub mod price_path;

// re exports for convenience
pub use curve::*;
pub use engine::*;
pub use events::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use position::*;
pub use trader::*;
pub use types::*;
pub use config::{ConfigError, Preset, SimulationConfig};
pub use price_path::{generate_gbm, seeded_rng, GbmParams, PricePath, PricePathError};
