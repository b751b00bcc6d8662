//! Index-path replay: feed an oracle series into one market and let liquidations
//! fire as the peg follows it.

use super::core::Engine;
use super::results::{EngineError, ReplayReport, StepReport};
use crate::types::{MarketId, Price};
use rust_decimal::Decimal;

impl Engine {
    /// For each price: record it as the index, re-peg to it, advance the clock one
    /// step and sweep liquidations. Traders a sweep can't check are collected in
    /// the report's `failures` and the replay keeps going.
    pub fn replay_index_path(
        &mut self,
        market_id: MarketId,
        path: &[Decimal],
    ) -> Result<ReplayReport, EngineError> {
        if path.is_empty() {
            return Err(EngineError::EmptyPricePath);
        }
        // fail before touching anything if the market is missing or a price is bad
        self.registry.market(market_id)?;
        let prices = path
            .iter()
            .map(|&p| Price::new(p).ok_or(EngineError::InvalidIndexPrice(p)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut steps = Vec::with_capacity(prices.len());
        let mut liquidations = Vec::new();
        let mut failures = Vec::new();

        for (step, index_price) in prices.into_iter().enumerate() {
            self.update_index_price(market_id, index_price)?;
            let peg_multiplier = self.repeg_to_index(market_id)?;
            self.advance_time(self.config.step_millis);

            let reports = self.check_liquidations();
            let failed_checks = self.sweep_failures.len();
            failures.extend(self.sweep_failures.iter().cloned());
            if !reports.is_empty() {
                tracing::info!(
                    step,
                    market = %market_id,
                    index = %index_price,
                    count = reports.len(),
                    "liquidations during replay"
                );
            }

            steps.push(StepReport {
                step,
                timestamp: self.current_time,
                index_price,
                spot_price: self.spot_price(market_id)?,
                peg_multiplier,
                liquidations: reports.len(),
                failed_checks,
            });
            liquidations.extend(reports);
        }

        Ok(ReplayReport {
            market_id,
            steps,
            liquidations,
            failures,
            insurance_balance: self.insurance_fund.balance,
        })
    }
}
