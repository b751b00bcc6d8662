//! Synthetic index paths.
//!
//! Geometric Brownian motion sampled on an even grid:
//! `S(t) = S0 * exp((mu - sigma^2 / 2) * t + sigma * W(t))`, with `W` the running
//! sum of standard normal draws scaled by `sqrt(dt)`. Sampling runs in `f64` and
//! the result is handed to the engine as `Decimal` prices.
//!
//! Runs are reproducible: pass a [`ChaCha8Rng`] from [`seeded_rng`] and the same
//! seed gives the same path on every platform.

use crate::types::ErrorClass;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const MAX_STEPS: usize = 10_000_000;
const PRICE_DECIMALS: u32 = 8;

// 9.0: path parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmParams {
    /// Total simulated time, in years
    pub horizon: f64,
    /// Annualized drift (mu)
    pub drift: f64,
    /// Annualized volatility (sigma)
    pub volatility: f64,
    pub initial_price: f64,
    /// Step length, in years
    pub dt: f64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            horizon: 1.0,
            drift: 0.0,
            volatility: 0.6,
            initial_price: 2000.0,
            dt: 1.0 / 365.0,
        }
    }
}

impl GbmParams {
    /// `round(horizon / dt)`
    pub fn steps(&self) -> usize {
        (self.horizon / self.dt).round() as usize
    }

    pub fn validate(&self) -> Result<(), PricePathError> {
        let positive = [
            ("horizon", self.horizon),
            ("initial_price", self.initial_price),
            ("dt", self.dt),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(PricePathError::InvalidParameter { name, value });
            }
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(PricePathError::InvalidParameter {
                name: "volatility",
                value: self.volatility,
            });
        }
        if !self.drift.is_finite() {
            return Err(PricePathError::InvalidParameter {
                name: "drift",
                value: self.drift,
            });
        }
        let steps = self.horizon / self.dt;
        if steps.round() < 1.0 || steps > MAX_STEPS as f64 {
            return Err(PricePathError::StepCount(steps));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePath {
    pub times: Vec<f64>,
    pub prices: Vec<Decimal>,
}

impl PricePath {
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn first(&self) -> Option<Decimal> {
        self.prices.first().copied()
    }

    pub fn last(&self) -> Option<Decimal> {
        self.prices.last().copied()
    }

    pub fn min(&self) -> Option<Decimal> {
        self.prices.iter().copied().min()
    }

    pub fn max(&self) -> Option<Decimal> {
        self.prices.iter().copied().max()
    }
}

// 9.1: sampling
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Even grid of `n` points from 0 to `horizon`, both ends included.
fn linspace(horizon: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let last = (n - 1) as f64;
            (0..n).map(|i| horizon * i as f64 / last).collect()
        }
    }
}

pub fn generate_gbm<R: Rng + ?Sized>(
    params: &GbmParams,
    rng: &mut R,
) -> Result<PricePath, PricePathError> {
    params.validate()?;

    let n = params.steps();
    let times = linspace(params.horizon, n);
    let drift = params.drift - params.volatility * params.volatility / 2.0;
    let scale = params.dt.sqrt();

    let mut brownian = 0.0;
    let mut prices = Vec::with_capacity(n);
    for (step, &t) in times.iter().enumerate() {
        let shock: f64 = StandardNormal.sample(rng);
        brownian += shock * scale;
        let price = params.initial_price * (drift * t + params.volatility * brownian).exp();

        let price = Decimal::from_f64(price)
            .map(|p| p.round_dp(PRICE_DECIMALS))
            .filter(|p| *p > Decimal::ZERO)
            .ok_or(PricePathError::Unrepresentable { step, value: price })?;
        prices.push(price);
    }

    tracing::debug!(
        steps = n,
        volatility = params.volatility,
        drift = params.drift,
        "generated gbm path"
    );
    Ok(PricePath { times, prices })
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PricePathError {
    #[error("Invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("horizon / dt gives {0} steps, need between 1 and 10 million")]
    StepCount(f64),

    #[error("Price {value} at step {step} cannot be used as an index price")]
    Unrepresentable { step: usize, value: f64 },
}

impl PricePathError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::FatalPrecondition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_count_rounds() {
        let params = GbmParams {
            horizon: 1.0,
            dt: 0.3,
            ..GbmParams::default()
        };
        assert_eq!(params.steps(), 3);
        assert_eq!(GbmParams::default().steps(), 365);
    }

    #[test]
    fn same_seed_same_path() {
        let params = GbmParams::default();
        let a = generate_gbm(&params, &mut seeded_rng(7)).unwrap();
        let b = generate_gbm(&params, &mut seeded_rng(7)).unwrap();
        let c = generate_gbm(&params, &mut seeded_rng(8)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.prices, c.prices);
        assert_eq!(a.len(), 365);
    }

    #[test]
    fn grid_spans_the_horizon() {
        let params = GbmParams {
            horizon: 2.0,
            dt: 0.5,
            ..GbmParams::default()
        };
        let path = generate_gbm(&params, &mut seeded_rng(1)).unwrap();
        assert_eq!(path.times, vec![0.0, 2.0 / 3.0, 4.0 / 3.0, 2.0]);
    }

    #[test]
    fn zero_volatility_is_pure_drift() {
        let params = GbmParams {
            horizon: 1.0,
            drift: 0.0,
            volatility: 0.0,
            initial_price: 1500.0,
            dt: 0.1,
        };
        let path = generate_gbm(&params, &mut seeded_rng(3)).unwrap();
        assert!(path.prices.iter().all(|p| *p == Decimal::from(1500)));
    }

    #[test]
    fn prices_stay_positive() {
        let params = GbmParams {
            volatility: 2.5,
            ..GbmParams::default()
        };
        let path = generate_gbm(&params, &mut seeded_rng(42)).unwrap();
        assert!(path.min().unwrap() > Decimal::ZERO);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let bad_dt = GbmParams {
            dt: 0.0,
            ..GbmParams::default()
        };
        assert!(matches!(
            generate_gbm(&bad_dt, &mut seeded_rng(0)),
            Err(PricePathError::InvalidParameter { name: "dt", .. })
        ));

        let too_coarse = GbmParams {
            horizon: 1.0,
            dt: 5.0,
            ..GbmParams::default()
        };
        assert!(matches!(
            too_coarse.validate(),
            Err(PricePathError::StepCount(_))
        ));

        let negative_vol = GbmParams {
            volatility: -0.1,
            ..GbmParams::default()
        };
        assert!(negative_vol.validate().is_err());
    }
}
