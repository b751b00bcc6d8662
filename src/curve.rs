//! Constant-product pricing curve.
//!
//! The curve holds two virtual reserves whose product is the invariant `k`, and a
//! peg multiplier that maps the raw reserve ratio onto the quoted price. Every swap
//! recomputes the moved reserve as `k / (reserve + amount)`, so `base * quote = k`
//! holds by construction.
//!
//! The swap math is a pure function of a [`Reserves`] snapshot. Real swaps run the
//! formula and then commit the next reserves; previews run the same formula and
//! throw the next reserves away, which is what position valuation uses.

use crate::types::{ErrorClass, Price, Quote};
use rust_decimal::prelude::MathematicalOps;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// 2.0: reserve snapshot. every swap reads one of these and returns the next
/// A by-value snapshot of the two virtual reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserves {
    pub base: Decimal,
    pub quote: Decimal,
}

impl Reserves {
    pub fn new(base: Decimal, quote: Decimal) -> Result<Self, CurveError> {
        let reserves = Self { base, quote };
        reserves.ensure_positive()?;
        Ok(reserves)
    }

    pub fn product(&self) -> Result<Decimal, CurveError> {
        self.base.checked_mul(self.quote).ok_or(CurveError::Overflow)
    }

    /// `peg * quote / base`, refusing to round down to a zero price.
    pub fn spot_price(&self, peg_multiplier: Decimal) -> Result<Price, CurveError> {
        let raw = peg_multiplier
            .checked_mul(self.quote)
            .and_then(|pegged| pegged.checked_div(self.base))
            .ok_or(CurveError::Overflow)?;
        Price::new(raw).ok_or(CurveError::PriceUnderflow {
            base: self.base,
            quote: self.quote,
        })
    }

    fn ensure_positive(&self) -> Result<(), CurveError> {
        if self.base > Decimal::ZERO && self.quote > Decimal::ZERO {
            Ok(())
        } else {
            Err(CurveError::NonPositiveReserves {
                base: self.base,
                quote: self.quote,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveKind {
    Base,
    Quote,
}

impl fmt::Display for ReserveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReserveKind::Base => write!(f, "base"),
            ReserveKind::Quote => write!(f, "quote"),
        }
    }
}

/// Result of pushing base into the curve.
///
/// `quote_delta` is the pegged change of the quote reserve. Negative means the
/// reserve paid quote out to the trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseSwap {
    pub quote_delta: Quote,
    pub effective_price: Price,
}

/// Result of pushing (pegged) quote into the curve.
///
/// `base_delta` is the change of the base reserve. The trader's base exposure is
/// its negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteSwap {
    pub base_delta: Decimal,
    pub effective_price: Price,
}

// 2.1: swap math, pure over a snapshot. previews and real swaps share it
/// Applies `delta_base` to the base reserve and returns the next reserves.
pub fn swap_base_in_formula(
    reserves: Reserves,
    invariant_k: Decimal,
    peg_multiplier: Decimal,
    delta_base: Decimal,
) -> Result<(Reserves, BaseSwap), CurveError> {
    if delta_base.is_zero() {
        return Err(CurveError::ZeroSwap);
    }
    // can't remove more than what's in the virtual pool
    if -delta_base >= reserves.base {
        return Err(CurveError::ReserveDrained {
            reserve: ReserveKind::Base,
            delta: delta_base,
            available: reserves.base,
        });
    }

    let new_base = reserves
        .base
        .checked_add(delta_base)
        .ok_or(CurveError::Overflow)?;
    let new_quote = invariant_k
        .checked_div(new_base)
        .ok_or(CurveError::Overflow)?;
    let next = Reserves {
        base: new_base,
        quote: new_quote,
    };
    next.ensure_positive()?;

    let quote_delta = (new_quote - reserves.quote)
        .checked_mul(peg_multiplier)
        .ok_or(CurveError::Overflow)?;
    let effective = quote_delta
        .checked_div(delta_base)
        .ok_or(CurveError::Overflow)?
        .abs();
    let effective_price = Price::new(effective).ok_or(CurveError::DegenerateSwap {
        reserve: ReserveKind::Base,
        delta: delta_base,
    })?;

    Ok((
        next,
        BaseSwap {
            quote_delta: Quote::new(quote_delta),
            effective_price,
        },
    ))
}

/// Applies the pegged `delta_quote` to the quote reserve and returns the next reserves.
pub fn swap_quote_in_formula(
    reserves: Reserves,
    invariant_k: Decimal,
    peg_multiplier: Decimal,
    delta_quote: Decimal,
) -> Result<(Reserves, QuoteSwap), CurveError> {
    if delta_quote.is_zero() {
        return Err(CurveError::ZeroSwap);
    }
    let unpegged = delta_quote
        .checked_div(peg_multiplier)
        .ok_or(CurveError::Overflow)?;
    if -unpegged >= reserves.quote {
        return Err(CurveError::ReserveDrained {
            reserve: ReserveKind::Quote,
            delta: unpegged,
            available: reserves.quote,
        });
    }

    let new_quote = reserves
        .quote
        .checked_add(unpegged)
        .ok_or(CurveError::Overflow)?;
    let new_base = invariant_k
        .checked_div(new_quote)
        .ok_or(CurveError::Overflow)?;
    let next = Reserves {
        base: new_base,
        quote: new_quote,
    };
    next.ensure_positive()?;

    let base_delta = new_base - reserves.base;
    if base_delta.is_zero() {
        return Err(CurveError::DegenerateSwap {
            reserve: ReserveKind::Quote,
            delta: delta_quote,
        });
    }
    let effective = delta_quote
        .checked_div(base_delta)
        .ok_or(CurveError::Overflow)?
        .abs();
    let effective_price = Price::new(effective).ok_or(CurveError::DegenerateSwap {
        reserve: ReserveKind::Quote,
        delta: delta_quote,
    })?;

    Ok((
        next,
        QuoteSwap {
            base_delta,
            effective_price,
        },
    ))
}

// 2.2: the live curve. commits only reserves whose spot can still be priced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingCurve {
    reserves: Reserves,
    invariant_k: Decimal,
    peg_multiplier: Decimal,
}

impl PricingCurve {
    /// Both reserves start at `sqrt(k0)`, so the opening spot equals the peg.
    pub fn new(initial_k: Decimal, peg_multiplier: Decimal) -> Result<Self, CurveError> {
        if initial_k <= Decimal::ZERO {
            return Err(CurveError::InvalidParameter {
                name: "invariant_k",
                value: initial_k,
            });
        }
        let root = initial_k.sqrt().ok_or(CurveError::InvalidParameter {
            name: "invariant_k",
            value: initial_k,
        })?;
        Self::from_reserves(root, root, peg_multiplier)
    }

    /// Builds a curve from explicit reserves; `k` becomes their product.
    pub fn from_reserves(
        base: Decimal,
        quote: Decimal,
        peg_multiplier: Decimal,
    ) -> Result<Self, CurveError> {
        ensure_valid_peg(peg_multiplier)?;
        let reserves = Reserves::new(base, quote)?;
        let invariant_k = reserves.product()?;
        reserves.spot_price(peg_multiplier)?;
        Ok(Self {
            reserves,
            invariant_k,
            peg_multiplier,
        })
    }

    pub fn reserves(&self) -> Reserves {
        self.reserves
    }

    pub fn base_reserve(&self) -> Decimal {
        self.reserves.base
    }

    pub fn quote_reserve(&self) -> Decimal {
        self.reserves.quote
    }

    pub fn invariant_k(&self) -> Decimal {
        self.invariant_k
    }

    pub fn peg_multiplier(&self) -> Decimal {
        self.peg_multiplier
    }

    /// `peg * quote / base`
    pub fn spot_price(&self) -> Result<Price, CurveError> {
        self.reserves.spot_price(self.peg_multiplier)
    }

    pub fn preview_base_in(&self, delta_base: Decimal) -> Result<BaseSwap, CurveError> {
        swap_base_in_formula(self.reserves, self.invariant_k, self.peg_multiplier, delta_base)
            .map(|(_, swap)| swap)
    }

    pub fn preview_quote_in(&self, delta_quote: Decimal) -> Result<QuoteSwap, CurveError> {
        swap_quote_in_formula(self.reserves, self.invariant_k, self.peg_multiplier, delta_quote)
            .map(|(_, swap)| swap)
    }

    pub fn swap_base_in(&mut self, delta_base: Decimal) -> Result<BaseSwap, CurveError> {
        let (next, swap) =
            swap_base_in_formula(self.reserves, self.invariant_k, self.peg_multiplier, delta_base)?;
        next.spot_price(self.peg_multiplier)?;
        self.reserves = next;
        tracing::trace!(
            delta_base = %delta_base,
            quote_delta = %swap.quote_delta,
            price = %swap.effective_price,
            "swap base in"
        );
        Ok(swap)
    }

    pub fn swap_quote_in(&mut self, delta_quote: Decimal) -> Result<QuoteSwap, CurveError> {
        let (next, swap) = swap_quote_in_formula(
            self.reserves,
            self.invariant_k,
            self.peg_multiplier,
            delta_quote,
        )?;
        next.spot_price(self.peg_multiplier)?;
        self.reserves = next;
        tracing::trace!(
            delta_quote = %delta_quote,
            base_delta = %swap.base_delta,
            price = %swap.effective_price,
            "swap quote in"
        );
        Ok(swap)
    }

    /// Changes the price scale. Reserves and `k` are untouched.
    pub fn set_peg(&mut self, peg_multiplier: Decimal) -> Result<(), CurveError> {
        ensure_valid_peg(peg_multiplier)?;
        self.reserves.spot_price(peg_multiplier)?;
        self.peg_multiplier = peg_multiplier;
        Ok(())
    }

    /// Moves the curve to new reserves and re-derives `k` from them.
    pub fn set_reserves(&mut self, base: Decimal, quote: Decimal) -> Result<(), CurveError> {
        let reserves = Reserves::new(base, quote)?;
        let invariant_k = reserves.product()?;
        reserves.spot_price(self.peg_multiplier)?;
        self.invariant_k = invariant_k;
        self.reserves = reserves;
        Ok(())
    }

    /// Peg that would make the current spot equal `target`.
    pub fn peg_for_price(&self, target: Price) -> Result<Decimal, CurveError> {
        target
            .value()
            .checked_mul(self.reserves.base)
            .and_then(|scaled| scaled.checked_div(self.reserves.quote))
            .ok_or(CurveError::Overflow)
    }

    /// Absolute gap between `base * quote` and `k`. only rounding should show up here.
    pub fn invariant_drift(&self) -> Result<Decimal, CurveError> {
        Ok((self.reserves.product()? - self.invariant_k).abs())
    }
}

fn ensure_valid_peg(peg_multiplier: Decimal) -> Result<(), CurveError> {
    if peg_multiplier > Decimal::ZERO {
        Ok(())
    } else {
        Err(CurveError::InvalidParameter {
            name: "peg_multiplier",
            value: peg_multiplier,
        })
    }
}

// 2.3: errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveError {
    #[error("Swap of {delta} would drain the {reserve} reserve ({available} available)")]
    ReserveDrained {
        reserve: ReserveKind,
        delta: Decimal,
        available: Decimal,
    },

    #[error("Zero-sized swap has no effective price")]
    ZeroSwap,

    #[error("Swap of {delta} into the {reserve} reserve produced no output")]
    DegenerateSwap { reserve: ReserveKind, delta: Decimal },

    #[error("Reserves must stay positive: base {base}, quote {quote}")]
    NonPositiveReserves { base: Decimal, quote: Decimal },

    #[error("Arithmetic overflow in curve math")]
    Overflow,

    #[error("Spot price rounds to zero: base {base}, quote {quote}")]
    PriceUnderflow { base: Decimal, quote: Decimal },

    #[error("Invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: Decimal },
}

impl CurveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CurveError::NonPositiveReserves { .. }
            | CurveError::Overflow
            | CurveError::PriceUnderflow { .. } => ErrorClass::InvariantViolation,
            _ => ErrorClass::FatalPrecondition,
        }
    }
}
