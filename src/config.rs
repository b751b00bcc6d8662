// 7.0 config.rs: all settings in one place. markets, margin, liquidation, price path.
// 7.1 SimulationConfig can be built from a preset or loaded from a JSON file; missing
// fields fall back to the defaults below.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::engine::EngineConfig;
use crate::liquidation::LiquidationParams;
use crate::margin::MarginParams;
use crate::market::MarketConfig;
use crate::price_path::{GbmParams, PricePathError};
use crate::types::{ErrorClass, Leverage, MarketId};

// The complete simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub markets: Vec<MarketConfig>,
    pub margin: MarginParams,
    pub liquidation: LiquidationParams,
    // Index path fed to the first market by the simulator binary
    pub price_path: GbmParams,
    pub engine: EngineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            markets: vec![MarketConfig::eth_perp()],
            margin: MarginParams::default(),
            liquidation: LiquidationParams::default(),
            price_path: GbmParams::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl SimulationConfig {
    // Lower leverage, earlier liquidations, calmer index
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.margin.max_leverage = Leverage::new_unchecked(dec!(5));
        config.liquidation.partial_threshold = dec!(0.1);
        config.liquidation.full_threshold = dec!(0.075);
        config.price_path.volatility = 0.3;
        config.engine.insurance_seed = dec!(10_000);
        config
    }

    // High leverage, thin buffers, wild index
    pub fn aggressive() -> Self {
        let mut config = Self::default();
        config.markets = vec![
            MarketConfig::sol_perp(),
            MarketConfig::eth_perp(),
            MarketConfig::btc_perp(),
        ];
        config.margin.max_leverage = Leverage::new_unchecked(dec!(20));
        config.liquidation.partial_threshold = dec!(0.05);
        config.liquidation.full_threshold = dec!(0.03);
        config.liquidation.partial_penalty_rate = dec!(0.05);
        config.price_path.volatility = 1.2;
        config
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // market checks
        if self.markets.is_empty() {
            return Err(ConfigError::NoMarkets);
        }
        let mut seen = BTreeSet::new();
        for market in &self.markets {
            market.validate().map_err(|e| ConfigError::InvalidMarket {
                reason: e.to_string(),
            })?;
            if !seen.insert(market.id) {
                return Err(ConfigError::DuplicateMarket(market.id));
            }
        }

        // margin checks
        // Leverage::new is bypassed by deserialization, so re-check the floor here
        if self.margin.max_leverage.value() < Decimal::ONE {
            return Err(ConfigError::InvalidMargin {
                reason: format!("max leverage must be at least 1x, got {}", self.margin.max_leverage),
            });
        }

        // liquidation checks: 0 < full < partial < 1
        let liq = &self.liquidation;
        if liq.full_threshold <= Decimal::ZERO
            || liq.full_threshold >= liq.partial_threshold
            || liq.partial_threshold >= Decimal::ONE
        {
            return Err(ConfigError::InvalidLiquidation {
                reason: format!(
                    "thresholds must satisfy 0 < full ({}) < partial ({}) < 1",
                    liq.full_threshold, liq.partial_threshold
                ),
            });
        }
        if !in_open_unit_interval(liq.partial_unwind_fraction) {
            return Err(ConfigError::InvalidLiquidation {
                reason: "unwind fraction must be between 0 and 1".to_string(),
            });
        }
        if !in_open_unit_interval(liq.partial_penalty_rate) {
            return Err(ConfigError::InvalidLiquidation {
                reason: "penalty rate must be between 0 and 1".to_string(),
            });
        }

        // price path checks
        self.price_path.validate()?;

        // engine checks
        if self.engine.max_events == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "max_events must be positive".to_string(),
            });
        }
        if self.engine.step_millis <= 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "step_millis must be positive".to_string(),
            });
        }
        if self.engine.insurance_seed < Decimal::ZERO {
            return Err(ConfigError::InvalidEngine {
                reason: "insurance seed cannot be negative".to_string(),
            });
        }

        Ok(())
    }

    pub fn max_leverage(&self) -> Decimal {
        self.margin.max_leverage.value()
    }

    pub fn market(&self, id: MarketId) -> Option<&MarketConfig> {
        self.markets.iter().find(|m| m.id == id)
    }
}

fn in_open_unit_interval(value: Decimal) -> bool {
    value > Decimal::ZERO && value < Decimal::ONE
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one market must be configured")]
    NoMarkets,

    #[error("Market {0} is configured twice")]
    DuplicateMarket(MarketId),

    #[error("Invalid market: {reason}")]
    InvalidMarket { reason: String },

    #[error("Invalid margin: {reason}")]
    InvalidMargin { reason: String },

    #[error("Invalid liquidation params: {reason}")]
    InvalidLiquidation { reason: String },

    #[error("Invalid engine config: {reason}")]
    InvalidEngine { reason: String },

    #[error("Invalid price path: {0}")]
    InvalidPricePath(#[from] PricePathError),

    #[error("Could not parse config: {0}")]
    Parse(String),

    #[error("Could not read {path}: {reason}")]
    Io { path: String, reason: String },
}

impl ConfigError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::FatalPrecondition
    }
}

// Named presets, selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Default,
    Conservative,
    Aggressive,
}

impl Preset {
    pub fn config(&self) -> SimulationConfig {
        match self {
            Preset::Default => SimulationConfig::default(),
            Preset::Conservative => SimulationConfig::conservative(),
            Preset::Aggressive => SimulationConfig::aggressive(),
        }
    }
}
