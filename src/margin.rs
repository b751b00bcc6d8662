//! Cross-margin leverage cap and margin-ratio math.
//!
//! Leverage is projected exposure over free margin, both in quote terms. The cap
//! is strict: a trade that would land exactly on the cap is rejected.
//!
//! The margin ratio is total collateral (margin plus unrealized pnl) over the
//! notional all open positions would fetch if unwound now.

use crate::types::{Leverage, Quote};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// 3.0: cap config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginParams {
    pub max_leverage: Leverage,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self {
            max_leverage: Leverage::new_unchecked(dec!(10)),
        }
    }
}

// 3.1: leverage gate for opens and withdrawals
/// `(new exposure + existing exposure) / margin`, refusing to divide by a
/// non-positive margin. Saturates at `Decimal::MAX` when the exposure dwarfs the
/// margin, which the cap then rejects.
pub fn projected_leverage(
    additional: Quote,
    existing: Quote,
    margin: Quote,
) -> Result<Decimal, MarginError> {
    if !margin.is_positive() {
        return Err(MarginError::NonPositiveMargin(margin));
    }
    Ok(additional
        .abs()
        .value()
        .checked_add(existing.abs().value())
        .and_then(|exposure| exposure.checked_div(margin.value()))
        .unwrap_or(Decimal::MAX))
}

pub fn check_leverage(
    additional: Quote,
    existing: Quote,
    margin: Quote,
    params: &MarginParams,
) -> Result<Decimal, MarginError> {
    let leverage = projected_leverage(additional, existing, margin)?;
    if leverage >= params.max_leverage.value() {
        return Err(MarginError::LeverageExceeded {
            leverage,
            max: params.max_leverage.value(),
        });
    }
    Ok(leverage)
}

// 3.2: collateral over notional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginSummary {
    pub margin: Quote,
    pub unrealized_pnl: Quote,
    pub total_collateral: Quote,
    pub notional: Quote,
    pub margin_ratio: Decimal,
}

impl MarginSummary {
    pub fn new(margin: Quote, unrealized_pnl: Quote, notional: Quote) -> Self {
        let total_collateral = margin.add(unrealized_pnl);
        // nothing open means nothing to liquidate
        let margin_ratio = if notional.value().is_zero() {
            Decimal::MAX
        } else {
            total_collateral
                .value()
                .checked_div(notional.value())
                .unwrap_or(if total_collateral.is_negative() {
                    Decimal::MIN
                } else {
                    Decimal::MAX
                })
        };
        Self {
            margin,
            unrealized_pnl,
            total_collateral,
            notional,
            margin_ratio,
        }
    }

    pub fn has_exposure(&self) -> bool {
        !self.notional.value().is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarginError {
    #[error("Margin must be positive to take on exposure, got {0}")]
    NonPositiveMargin(Quote),

    #[error("Leverage {leverage} would reach the {max}x cap")]
    LeverageExceeded { leverage: Decimal, max: Decimal },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cap_is_ten_x() {
        assert_eq!(MarginParams::default().max_leverage.value(), dec!(10));
    }

    #[test]
    fn leverage_just_under_cap_passes() {
        let params = MarginParams::default();
        let lev = check_leverage(
            Quote::new(dec!(-500)),
            Quote::new(dec!(499)),
            Quote::new(dec!(100)),
            &params,
        )
        .unwrap();
        assert_eq!(lev, dec!(9.99));
    }

    #[test]
    fn leverage_at_cap_is_rejected() {
        let params = MarginParams::default();
        let result = check_leverage(
            Quote::new(dec!(500)),
            Quote::new(dec!(500)),
            Quote::new(dec!(100)),
            &params,
        );
        assert!(matches!(result, Err(MarginError::LeverageExceeded { .. })));
    }

    #[test]
    fn zero_margin_never_divides() {
        let result = projected_leverage(Quote::new(dec!(1)), Quote::zero(), Quote::zero());
        assert!(matches!(result, Err(MarginError::NonPositiveMargin(_))));

        let result = projected_leverage(Quote::new(dec!(1)), Quote::zero(), Quote::new(dec!(-5)));
        assert!(matches!(result, Err(MarginError::NonPositiveMargin(_))));
    }

    #[test]
    fn dust_margin_saturates_and_is_rejected() {
        let dust = Quote::new(Decimal::new(1, 28));
        let huge = Quote::new(dec!(10000000000));
        assert_eq!(projected_leverage(huge, Quote::zero(), dust).unwrap(), Decimal::MAX);

        let err = check_leverage(huge, Quote::zero(), dust, &MarginParams::default()).unwrap_err();
        assert_eq!(
            err,
            MarginError::LeverageExceeded {
                leverage: Decimal::MAX,
                max: dec!(10)
            }
        );

        // exposures whose sum overflows are capped the same way
        let max = Quote::new(Decimal::MAX);
        assert_eq!(
            projected_leverage(max, max, Quote::new(dec!(1))).unwrap(),
            Decimal::MAX
        );
    }

    #[test]
    fn summary_ratio() {
        let summary = MarginSummary::new(
            Quote::new(dec!(100)),
            Quote::new(dec!(-40)),
            Quote::new(dec!(1000)),
        );
        assert_eq!(summary.total_collateral.value(), dec!(60));
        assert_eq!(summary.margin_ratio, dec!(0.06));
    }

    #[test]
    fn summary_without_exposure_is_max() {
        let summary = MarginSummary::new(Quote::new(dec!(100)), Quote::zero(), Quote::zero());
        assert_eq!(summary.margin_ratio, Decimal::MAX);
        assert!(!summary.has_exposure());
    }
}
