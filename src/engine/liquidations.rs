//! Liquidation sweeps over every trader.

use super::core::Engine;
use super::results::{EngineError, LiquidationReport, SweepFailure};
use crate::events::{BadDebtEvent, EventPayload, FullLiquidationEvent, PartialLiquidationEvent};
use crate::liquidation::{check_and_liquidate, LiquidationOutcome};
use crate::types::TraderId;

impl Engine {
    /// Checks every trader in ascending id order and liquidates those under the
    /// thresholds. Penalties and forfeits go to the insurance fund.
    ///
    /// A trader whose book can't be valued is left untouched and recorded in
    /// [`Engine::sweep_failures`]; the sweep carries on with the next one.
    pub fn check_liquidations(&mut self) -> Vec<LiquidationReport> {
        let trader_ids: Vec<TraderId> = self.traders.keys().copied().collect();
        let mut reports = Vec::new();
        self.sweep_failures.clear();
        for trader_id in trader_ids {
            match self.liquidate_trader(trader_id) {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(trader = %trader_id, error = %error, "liquidation check failed");
                    self.sweep_failures.push(SweepFailure { trader_id, error });
                }
            }
        }
        reports
    }

    /// Traders the most recent sweep could not check.
    pub fn sweep_failures(&self) -> &[SweepFailure] {
        &self.sweep_failures
    }

    /// Runs the liquidation check for one trader. `None` when the trader is healthy.
    pub fn liquidate_trader(
        &mut self,
        trader_id: TraderId,
    ) -> Result<Option<LiquidationReport>, EngineError> {
        let trader = self
            .traders
            .get_mut(&trader_id)
            .ok_or(EngineError::TraderNotFound(trader_id))?;
        let outcome = check_and_liquidate(trader, &mut self.registry, &self.liquidation_params)?;
        if outcome.is_none() {
            return Ok(None);
        }

        let covered = self.insurance_fund.absorb(&outcome);
        self.emit_liquidation_events(trader_id, &outcome, covered);
        Ok(LiquidationReport::from_outcome(trader_id, &outcome, covered))
    }

    fn emit_liquidation_events(
        &mut self,
        trader_id: TraderId,
        outcome: &LiquidationOutcome,
        covered: crate::types::Quote,
    ) {
        match outcome {
            LiquidationOutcome::None => {}
            LiquidationOutcome::Partial(p) => {
                self.emit_event(EventPayload::PartialLiquidation(PartialLiquidationEvent {
                    trader_id,
                    margin_ratio: p.margin_ratio,
                    positions_reduced: p.unwinds.len(),
                    realized_pnl: p.realized_pnl,
                    penalty: p.penalty,
                }));
            }
            LiquidationOutcome::Full(f) => {
                if let Some(p) = &f.partial {
                    self.emit_event(EventPayload::PartialLiquidation(PartialLiquidationEvent {
                        trader_id,
                        margin_ratio: p.margin_ratio,
                        positions_reduced: p.unwinds.len(),
                        realized_pnl: p.realized_pnl,
                        penalty: p.penalty,
                    }));
                }
                self.emit_event(EventPayload::FullLiquidation(FullLiquidationEvent {
                    trader_id,
                    margin_ratio: f.margin_ratio,
                    positions_closed: f.closed.len(),
                    realized_pnl: f.realized_pnl,
                    forfeited: f.forfeited,
                }));

                let debt = outcome.bad_debt();
                if debt.is_positive() {
                    tracing::error!(
                        trader = %trader_id,
                        debt = %debt,
                        covered = %covered,
                        "bad debt"
                    );
                    self.emit_event(EventPayload::BadDebt(BadDebtEvent {
                        trader_id,
                        debt_amount: debt,
                        covered_by_insurance: covered,
                        uncovered: debt.sub(covered),
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EngineConfig, LiquidationKind};
    use super::*;
    use crate::market::MarketConfig;
    use crate::types::{MarketId, Quote};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    // 900 long on 100 margin; a repeg to `peg` scales its value to 900 * peg / 2000
    fn levered(peg: Decimal) -> (Engine, TraderId, MarketId) {
        let mut engine = Engine::new(EngineConfig::default());
        let market = engine.add_market(MarketConfig::eth_perp()).unwrap();
        let trader = engine.create_trader(Quote::new(dec!(100))).unwrap();
        engine.open_position(trader, market, dec!(900)).unwrap();
        engine.repeg(market, peg).unwrap();
        (engine, trader, market)
    }

    #[test]
    fn healthy_sweep_reports_nothing() {
        let (mut engine, _, _) = levered(dec!(1990));
        assert!(engine.check_liquidations().is_empty());
        assert_eq!(engine.insurance_fund().balance, Quote::zero());
    }

    #[test]
    fn partial_penalty_funds_insurance() {
        let (mut engine, trader, _) = levered(dec!(1890));
        let reports = engine.check_liquidations();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.trader_id, trader);
        assert_eq!(report.kind, LiquidationKind::Partial);
        assert!(report.penalty.is_positive());
        assert_eq!(engine.insurance_fund().balance, report.penalty);
        assert!(matches!(
            engine.events().last().unwrap().payload,
            EventPayload::PartialLiquidation(_)
        ));
    }

    #[test]
    fn full_liquidation_forfeits_to_insurance() {
        let (mut engine, trader, market) = levered(dec!(1850));
        let reports = engine.check_liquidations();

        let report = &reports[0];
        assert_eq!(report.kind, LiquidationKind::Full);
        assert!(report.forfeited.is_positive());
        assert_eq!(
            engine.insurance_fund().balance,
            report.penalty.add(report.forfeited)
        );
        assert!(engine.trader(trader).unwrap().is_wiped());
        assert!(engine.market(market).unwrap().positions().is_empty());

        // a second sweep finds nothing left to do
        assert!(engine.check_liquidations().is_empty());
    }

    #[test]
    fn bad_debt_is_covered_and_logged() {
        let config = EngineConfig {
            insurance_seed: dec!(1000),
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        let market = engine.add_market(MarketConfig::eth_perp()).unwrap();
        let trader = engine.create_trader(Quote::new(dec!(100))).unwrap();
        engine.open_position(trader, market, dec!(900)).unwrap();
        engine.repeg(market, dec!(1700)).unwrap();

        let report = engine.liquidate_trader(trader).unwrap().unwrap();
        assert!(report.bad_debt.is_positive());
        assert_eq!(report.covered_by_insurance, report.bad_debt);
        assert_eq!(
            engine.insurance_fund().balance.value(),
            dec!(1000) + report.penalty.value() - report.bad_debt.value()
        );
        assert!(matches!(
            engine.events().last().unwrap().payload,
            EventPayload::BadDebt(_)
        ));
    }

    #[test]
    fn unvaluable_trader_does_not_block_the_sweep() {
        let mut engine = Engine::new(EngineConfig::default());
        let market = engine.add_market(MarketConfig::eth_perp()).unwrap();
        let stuck = engine.create_trader(Quote::new(dec!(1000))).unwrap();
        let levered = engine.create_trader(Quote::new(dec!(100))).unwrap();
        let short = engine.open_position(stuck, market, dec!(-900)).unwrap();
        engine.open_position(levered, market, dec!(900)).unwrap();

        // put the curve where buying the short back would drain the base reserve
        let curve = engine.registry.market_mut(market).unwrap().curve_mut();
        curve.set_reserves(dec!(0.4), dec!(0.794)).unwrap();
        assert!(short.notional(engine.market(market).unwrap()).is_err());

        let reports = engine.check_liquidations();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].trader_id, levered);
        assert_eq!(reports[0].kind, LiquidationKind::Full);
        assert!(engine.trader(levered).unwrap().is_wiped());

        let failures = engine.sweep_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].trader_id, stuck);
        assert_eq!(engine.trader(stuck).unwrap().positions().len(), 1);
        assert_eq!(engine.trader(stuck).unwrap().margin().value(), dec!(1000));

        // unwinding the long refilled the base reserve, so the short values again
        assert!(engine.check_liquidations().is_empty());
        assert!(engine.sweep_failures().is_empty());
        assert!(short.notional(engine.market(market).unwrap()).is_ok());
    }

    #[test]
    fn sweep_visits_traders_in_id_order() {
        let mut engine = Engine::new(EngineConfig::default());
        let market = engine.add_market(MarketConfig::eth_perp()).unwrap();
        let a = engine.create_trader(Quote::new(dec!(100))).unwrap();
        let b = engine.create_trader(Quote::new(dec!(100))).unwrap();
        engine.open_position(a, market, dec!(900)).unwrap();
        engine.open_position(b, market, dec!(900)).unwrap();
        engine.repeg(market, dec!(1500)).unwrap();

        let reports = engine.check_liquidations();
        let ids: Vec<_> = reports.iter().map(|r| r.trader_id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
