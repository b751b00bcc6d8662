// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::liquidation::LiquidationOutcome;
use crate::market::MarketError;
use crate::trader::TraderError;
use crate::types::{ErrorClass, MarketId, PositionId, Price, Quote, Timestamp, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationKind {
    Partial,
    Full,
}

/// What one liquidation did to a trader and to the insurance fund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationReport {
    pub trader_id: TraderId,
    pub kind: LiquidationKind,
    pub margin_ratio: Decimal,
    pub realized_pnl: Quote,
    pub penalty: Quote,
    pub forfeited: Quote,
    pub bad_debt: Quote,
    pub covered_by_insurance: Quote,
}

impl LiquidationReport {
    /// `None` when nothing was liquidated.
    pub(super) fn from_outcome(
        trader_id: TraderId,
        outcome: &LiquidationOutcome,
        covered_by_insurance: Quote,
    ) -> Option<Self> {
        match outcome {
            LiquidationOutcome::None => None,
            LiquidationOutcome::Partial(p) => Some(Self {
                trader_id,
                kind: LiquidationKind::Partial,
                margin_ratio: p.margin_ratio,
                realized_pnl: p.realized_pnl,
                penalty: p.penalty,
                forfeited: Quote::zero(),
                bad_debt: Quote::zero(),
                covered_by_insurance,
            }),
            LiquidationOutcome::Full(f) => {
                let (partial_pnl, penalty) = f
                    .partial
                    .as_ref()
                    .map_or((Quote::zero(), Quote::zero()), |p| (p.realized_pnl, p.penalty));
                Some(Self {
                    trader_id,
                    kind: LiquidationKind::Full,
                    margin_ratio: f.margin_ratio,
                    realized_pnl: partial_pnl.add(f.realized_pnl),
                    penalty,
                    forfeited: f.forfeited,
                    bad_debt: outcome.bad_debt(),
                    covered_by_insurance,
                })
            }
        }
    }
}

/// A trader a liquidation sweep had to skip, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepFailure {
    pub trader_id: TraderId,
    pub error: EngineError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: usize,
    pub timestamp: Timestamp,
    pub index_price: Price,
    pub spot_price: Price,
    pub peg_multiplier: Decimal,
    pub liquidations: usize,
    pub failed_checks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub market_id: MarketId,
    pub steps: Vec<StepReport>,
    pub liquidations: Vec<LiquidationReport>,
    #[serde(skip)]
    pub failures: Vec<SweepFailure>,
    pub insurance_balance: Quote,
}

impl ReplayReport {
    pub fn full_liquidations(&self) -> usize {
        self.liquidations
            .iter()
            .filter(|l| l.kind == LiquidationKind::Full)
            .count()
    }

    pub fn partial_liquidations(&self) -> usize {
        self.liquidations.len() - self.full_liquidations()
    }

    pub fn total_bad_debt(&self) -> Quote {
        self.liquidations.iter().map(|l| l.bad_debt).sum()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Trader {0} not found")]
    TraderNotFound(TraderId),

    #[error("{position} is not held by {trader}")]
    PositionNotFound {
        trader: TraderId,
        position: PositionId,
    },

    #[error("Index price must be positive, got {0}")]
    InvalidIndexPrice(Decimal),

    #[error("Price path is empty")]
    EmptyPricePath,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trader error: {0}")]
    Trader(#[from] TraderError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::TraderNotFound(_) | EngineError::PositionNotFound { .. } => {
                ErrorClass::NotFound
            }
            EngineError::Trader(e) => e.class(),
            EngineError::Market(e) => e.class(),
            _ => ErrorClass::FatalPrecondition,
        }
    }
}
