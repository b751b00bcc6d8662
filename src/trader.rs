//! Trader accounts and cross-margin.
//!
//! A trader holds one margin balance shared by every position it has open, in any
//! market. Opening is gated by the leverage cap; closing realizes pnl into margin.
//! Anything that spans markets takes the registry as an argument.

use crate::margin::{check_leverage, MarginError, MarginParams, MarginSummary};
use crate::market::{Market, MarketError, MarketRegistry};
use crate::position::Position;
use crate::types::{ErrorClass, PositionId, Quote, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trader {
    id: TraderId,
    margin: Quote,
    positions: Vec<Position>,
    margin_params: MarginParams,
    realized_pnl: Quote,
    total_deposited: Quote,
    total_withdrawn: Quote,
}

impl Trader {
    /// Opens an account. The seed follows the same floor as withdrawals: margin
    /// never starts below zero.
    pub fn new(id: TraderId, initial_collateral: Quote) -> Result<Self, TraderError> {
        if initial_collateral.is_negative() {
            return Err(TraderError::NegativeCollateral(initial_collateral));
        }
        Ok(Self {
            id,
            margin: initial_collateral,
            positions: Vec::new(),
            margin_params: MarginParams::default(),
            realized_pnl: Quote::zero(),
            total_deposited: initial_collateral,
            total_withdrawn: Quote::zero(),
        })
    }

    pub fn with_margin_params(mut self, params: MarginParams) -> Self {
        self.margin_params = params;
        self
    }

    pub fn id(&self) -> TraderId {
        self.id
    }

    pub fn margin(&self) -> Quote {
        self.margin
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn realized_pnl(&self) -> Quote {
        self.realized_pnl
    }

    pub fn total_deposited(&self) -> Quote {
        self.total_deposited
    }

    pub fn total_withdrawn(&self) -> Quote {
        self.total_withdrawn
    }

    pub fn margin_params(&self) -> &MarginParams {
        &self.margin_params
    }

    /// No positions and no margin left.
    pub fn is_wiped(&self) -> bool {
        self.positions.is_empty() && self.margin.value().is_zero()
    }

    // 10.1: positive amounts deposit, negative amounts withdraw. a withdrawal can't
    // take margin below zero or push open exposure onto the leverage cap.
    pub fn add_margin(&mut self, amount: Quote) -> Result<Quote, TraderError> {
        if !amount.is_negative() {
            self.margin = self.margin.add(amount);
            self.total_deposited = self.total_deposited.add(amount);
            return Ok(self.margin);
        }

        let remaining = self.margin.add(amount);
        if remaining.is_negative() {
            return Err(TraderError::InsufficientMargin {
                requested: amount.abs(),
                available: self.margin,
            });
        }
        if !self.positions.is_empty() {
            check_leverage(Quote::zero(), self.total_notional(), remaining, &self.margin_params)?;
        }
        self.margin = remaining;
        self.total_withdrawn = self.total_withdrawn.add(amount.abs());
        Ok(self.margin)
    }

    pub fn withdraw_margin(&mut self, amount: Quote) -> Result<Quote, TraderError> {
        self.add_margin(amount.abs().negate())
    }

    /// Quote committed across open positions, the same unit as margin.
    pub fn total_notional(&self) -> Quote {
        self.positions.iter().map(|p| p.initial_notional()).sum()
    }

    /// Raw base held across open positions, regardless of market.
    pub fn total_base_size(&self) -> Decimal {
        self.positions.iter().map(|p| p.size().abs()).sum()
    }

    pub fn open_position(
        &mut self,
        market: &mut Market,
        quote_size: Decimal,
    ) -> Result<Position, TraderError> {
        // total cross-margin leverage must stay under the cap
        check_leverage(
            Quote::new(quote_size),
            self.total_notional(),
            self.margin,
            &self.margin_params,
        )?;
        let position = market.open_position(self.id, quote_size)?;
        self.positions.push(position.clone());
        Ok(position)
    }

    // 10.2: pnl is read off the market before the unwind swap moves it
    pub fn close_position(
        &mut self,
        index: usize,
        registry: &mut MarketRegistry,
    ) -> Result<Quote, TraderError> {
        let position = self
            .positions
            .get(index)
            .ok_or(TraderError::PositionIndexOutOfRange {
                index,
                open: self.positions.len(),
            })?;
        let market = registry.market_mut(position.market_id())?;

        let pnl = position.unrealized_pnl(market)?;
        market.close_position_by_id(position.id())?;

        self.margin = self.margin.add(pnl);
        self.realized_pnl = self.realized_pnl.add(pnl);
        self.positions.remove(index);
        Ok(pnl)
    }

    pub fn position_index(&self, position_id: PositionId) -> Option<usize> {
        self.positions.iter().position(|p| p.id() == position_id)
    }

    pub fn margin_summary(&self, registry: &MarketRegistry) -> Result<MarginSummary, TraderError> {
        let mut unrealized_pnl = Quote::zero();
        let mut notional = Quote::zero();

        for position in &self.positions {
            let market = registry.market(position.market_id())?;
            unrealized_pnl = unrealized_pnl.add(position.unrealized_pnl(market)?);
            notional = notional.add(position.notional(market)?);
        }

        Ok(MarginSummary::new(self.margin, unrealized_pnl, notional))
    }

    pub fn margin_ratio(&self, registry: &MarketRegistry) -> Result<Decimal, TraderError> {
        Ok(self.margin_summary(registry)?.margin_ratio)
    }

    // liquidation hooks

    pub(crate) fn replace_position(&mut self, position: Position) {
        if let Some(slot) = self.positions.iter_mut().find(|p| p.id() == position.id()) {
            *slot = position;
        }
    }

    pub(crate) fn remove_position(&mut self, position_id: PositionId) -> Option<Position> {
        let index = self.position_index(position_id)?;
        Some(self.positions.remove(index))
    }

    pub(crate) fn realize(&mut self, pnl: Quote) {
        self.margin = self.margin.add(pnl);
        self.realized_pnl = self.realized_pnl.add(pnl);
    }

    /// Takes `rate` of positive margin away and returns it.
    pub(crate) fn apply_haircut(&mut self, rate: Decimal) -> Quote {
        if !self.margin.is_positive() {
            return Quote::zero();
        }
        let kept = self.margin.mul(Decimal::ONE - rate);
        let penalty = self.margin.sub(kept);
        self.margin = kept;
        penalty
    }

    /// Zeroes margin and returns what it held (negative if the account ended in debt).
    pub(crate) fn forfeit_margin(&mut self) -> Quote {
        let forfeited = self.margin;
        self.margin = Quote::zero();
        forfeited
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TraderError {
    #[error("Position index {index} out of range ({open} open)")]
    PositionIndexOutOfRange { index: usize, open: usize },

    #[error("Initial collateral must not be negative, got {0}")]
    NegativeCollateral(Quote),

    #[error("Insufficient margin: requested {requested}, available {available}")]
    InsufficientMargin { requested: Quote, available: Quote },

    #[error("Margin error: {0}")]
    Margin(#[from] MarginError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),
}

impl TraderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TraderError::PositionIndexOutOfRange { .. } => ErrorClass::NotFound,
            TraderError::Market(e) => e.class(),
            _ => ErrorClass::FatalPrecondition,
        }
    }
}
