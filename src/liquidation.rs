//! Margin-ratio liquidation.
//!
//! A trader whose margin ratio drops under `partial_threshold` has a slice of every
//! position pushed back into its curve and pays a haircut on what margin is left.
//! Under `full_threshold` everything is closed and the margin is forfeited. The
//! insurance fund at the bottom is where penalties and forfeits end up.
//!
//! Checks are pure functions over a trader and the registry, and run only when the
//! caller asks. A trader with nothing open is always healthy, so re-checking an
//! already wiped account is a no-op.

use crate::market::{ClosedPosition, MarketRegistry, PartialUnwind};
use crate::trader::{Trader, TraderError};
use crate::types::Quote;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// 6.0: thresholds and penalty rates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidationParams {
    /// Ratio under which a slice of every position is unwound
    pub partial_threshold: Decimal,
    /// Ratio under which the whole account is closed out
    pub full_threshold: Decimal,
    pub partial_unwind_fraction: Decimal,
    /// Share of remaining margin taken after a partial unwind
    pub partial_penalty_rate: Decimal,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            partial_threshold: dec!(0.0625),
            full_threshold: dec!(0.05),
            partial_unwind_fraction: dec!(0.25),
            partial_penalty_rate: dec!(0.025),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Healthy,
    PartiallyLiquidatable,
    FullyLiquidatable,
}

// 6.1: strict thresholds: exactly on a threshold is the healthier side
pub fn evaluate(margin_ratio: Decimal, params: &LiquidationParams) -> LiquidationStatus {
    if margin_ratio < params.full_threshold {
        LiquidationStatus::FullyLiquidatable
    } else if margin_ratio < params.partial_threshold {
        LiquidationStatus::PartiallyLiquidatable
    } else {
        LiquidationStatus::Healthy
    }
}

#[derive(Debug, Clone)]
pub struct PartialLiquidation {
    pub margin_ratio: Decimal,
    pub unwinds: Vec<PartialUnwind>,
    pub realized_pnl: Quote,
    pub penalty: Quote,
}

#[derive(Debug, Clone)]
pub struct FullLiquidation {
    pub margin_ratio: Decimal,
    /// Set when the partial pass ran first on the way down
    pub partial: Option<PartialLiquidation>,
    pub closed: Vec<ClosedPosition>,
    pub realized_pnl: Quote,
    /// Margin taken from the trader. Negative means the account ended in debt.
    pub forfeited: Quote,
}

#[derive(Debug, Clone)]
pub enum LiquidationOutcome {
    None,
    Partial(PartialLiquidation),
    Full(FullLiquidation),
}

impl LiquidationOutcome {
    pub fn is_none(&self) -> bool {
        matches!(self, LiquidationOutcome::None)
    }

    /// Penalties plus forfeited margin, if positive.
    pub fn collected(&self) -> Quote {
        match self {
            LiquidationOutcome::None => Quote::zero(),
            LiquidationOutcome::Partial(p) => p.penalty,
            LiquidationOutcome::Full(f) => {
                let penalty = f.partial.as_ref().map_or(Quote::zero(), |p| p.penalty);
                penalty.add(f.forfeited.max(Quote::zero()))
            }
        }
    }

    /// Debt left behind by a full liquidation, as a positive amount.
    pub fn bad_debt(&self) -> Quote {
        match self {
            LiquidationOutcome::Full(f) if f.forfeited.is_negative() => f.forfeited.abs(),
            _ => Quote::zero(),
        }
    }
}

// 6.2: staged on clones, committed only if every unwind succeeds
pub fn check_and_liquidate(
    trader: &mut Trader,
    registry: &mut MarketRegistry,
    params: &LiquidationParams,
) -> Result<LiquidationOutcome, TraderError> {
    if trader.positions().is_empty() {
        return Ok(LiquidationOutcome::None);
    }

    let margin_ratio = trader.margin_ratio(registry)?;
    let status = evaluate(margin_ratio, params);
    if status == LiquidationStatus::Healthy {
        return Ok(LiquidationOutcome::None);
    }

    // work on copies so a failing swap halfway through leaves nothing behind
    let mut staged_trader = trader.clone();
    let mut staged_registry = registry.clone();

    let partial = partial_liquidation(&mut staged_trader, &mut staged_registry, margin_ratio, params)?;
    let outcome = match status {
        LiquidationStatus::FullyLiquidatable => {
            let full =
                full_liquidation(&mut staged_trader, &mut staged_registry, margin_ratio, Some(partial))?;
            tracing::warn!(
                trader = %trader.id(),
                margin_ratio = %margin_ratio,
                closed = full.closed.len(),
                forfeited = %full.forfeited,
                "full liquidation"
            );
            LiquidationOutcome::Full(full)
        }
        _ => {
            tracing::warn!(
                trader = %trader.id(),
                margin_ratio = %margin_ratio,
                unwound = partial.unwinds.len(),
                penalty = %partial.penalty,
                "partial liquidation"
            );
            LiquidationOutcome::Partial(partial)
        }
    };

    *trader = staged_trader;
    *registry = staged_registry;
    Ok(outcome)
}

fn partial_liquidation(
    trader: &mut Trader,
    registry: &mut MarketRegistry,
    margin_ratio: Decimal,
    params: &LiquidationParams,
) -> Result<PartialLiquidation, TraderError> {
    let targets: Vec<_> = trader
        .positions()
        .iter()
        .map(|p| (p.id(), p.market_id()))
        .collect();

    let mut unwinds = Vec::with_capacity(targets.len());
    let mut realized_pnl = Quote::zero();
    for (position_id, market_id) in targets {
        let unwind = registry
            .market_mut(market_id)?
            .unwind_fraction(position_id, params.partial_unwind_fraction)?;
        trader.replace_position(unwind.remaining.clone());
        trader.realize(unwind.realized_pnl);
        realized_pnl = realized_pnl.add(unwind.realized_pnl);
        unwinds.push(unwind);
    }

    let penalty = trader.apply_haircut(params.partial_penalty_rate);
    Ok(PartialLiquidation {
        margin_ratio,
        unwinds,
        realized_pnl,
        penalty,
    })
}

fn full_liquidation(
    trader: &mut Trader,
    registry: &mut MarketRegistry,
    margin_ratio: Decimal,
    partial: Option<PartialLiquidation>,
) -> Result<FullLiquidation, TraderError> {
    let targets: Vec<_> = trader
        .positions()
        .iter()
        .map(|p| (p.id(), p.market_id()))
        .collect();

    let mut closed = Vec::with_capacity(targets.len());
    let mut realized_pnl = Quote::zero();
    for (position_id, market_id) in targets {
        let close = registry
            .market_mut(market_id)?
            .close_position_by_id(position_id)?;
        trader.remove_position(position_id);
        trader.realize(close.realized_pnl);
        realized_pnl = realized_pnl.add(close.realized_pnl);
        closed.push(close);
    }

    let forfeited = trader.forfeit_margin();
    Ok(FullLiquidation {
        margin_ratio,
        partial,
        closed,
        realized_pnl,
        forfeited,
    })
}

// 6.3: insurance fund
/// Receives liquidation penalties and forfeited margin, and absorbs debt that
/// wiped accounts leave behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub balance: Quote,
    pub total_collected: Quote,
    pub total_payouts: Quote,
    /// Debt the fund could not cover when it was reported
    pub uncovered_debt: Quote,
}

impl InsuranceFund {
    pub fn new(initial_balance: Quote) -> Self {
        Self {
            balance: initial_balance,
            total_collected: Quote::zero(),
            total_payouts: Quote::zero(),
            uncovered_debt: Quote::zero(),
        }
    }

    pub fn deposit(&mut self, amount: Quote) {
        self.balance = self.balance.add(amount);
        self.total_collected = self.total_collected.add(amount);
    }

    /// Pays out as much of `amount` as the balance allows and returns what was covered.
    pub fn cover_bad_debt(&mut self, amount: Quote) -> Quote {
        let covered = amount.min(self.balance);
        self.balance = self.balance.sub(covered);
        self.total_payouts = self.total_payouts.add(covered);
        self.uncovered_debt = self.uncovered_debt.add(amount.sub(covered));
        covered
    }

    pub fn can_cover(&self, amount: Quote) -> bool {
        self.balance >= amount
    }

    /// Books everything a liquidation produced. Returns the debt that was covered.
    pub fn absorb(&mut self, outcome: &LiquidationOutcome) -> Quote {
        let collected = outcome.collected();
        if collected.is_positive() {
            self.deposit(collected);
        }
        let debt = outcome.bad_debt();
        if debt.is_positive() {
            self.cover_bad_debt(debt)
        } else {
            Quote::zero()
        }
    }
}

impl Default for InsuranceFund {
    fn default() -> Self {
        Self::new(Quote::zero())
    }
}
