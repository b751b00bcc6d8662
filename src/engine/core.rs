// 8.0 engine/core.rs: main engine. holds the markets, traders and insurance fund.

use super::config::EngineConfig;
use super::results::{EngineError, SweepFailure};
use crate::config::SimulationConfig;
use crate::events::{
    Event, EventEmitter, EventId, EventPayload, MarginChangedEvent, MarketCreatedEvent,
    TraderCreatedEvent,
};
use crate::liquidation::{InsuranceFund, LiquidationParams};
use crate::margin::{MarginParams, MarginSummary};
use crate::market::{Market, MarketConfig, MarketRegistry};
use crate::trader::Trader;
use crate::types::{MarketId, Quote, Timestamp, TraderId};
use std::collections::BTreeMap;

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) registry: MarketRegistry,
    pub(super) traders: BTreeMap<TraderId, Trader>,
    pub(super) margin_params: MarginParams,
    pub(super) liquidation_params: LiquidationParams,
    pub(super) insurance_fund: InsuranceFund,
    pub(super) sweep_failures: Vec<SweepFailure>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) next_trader_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let insurance_fund = InsuranceFund::new(Quote::new(config.insurance_seed));
        Self {
            config,
            registry: MarketRegistry::new(),
            traders: BTreeMap::new(),
            margin_params: MarginParams::default(),
            liquidation_params: LiquidationParams::default(),
            insurance_fund,
            sweep_failures: Vec::new(),
            events: Vec::new(),
            next_event_id: 1,
            next_trader_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    /// Validates `config` and builds an engine with every configured market listed.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut engine = Self::new(config.engine.clone())
            .with_margin_params(config.margin.clone())
            .with_liquidation_params(config.liquidation.clone());
        for market in &config.markets {
            engine.add_market(market.clone())?;
        }
        Ok(engine)
    }

    pub fn with_margin_params(mut self, params: MarginParams) -> Self {
        self.margin_params = params;
        self
    }

    pub fn with_liquidation_params(mut self, params: LiquidationParams) -> Self {
        self.liquidation_params = params;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn liquidation_params(&self) -> &LiquidationParams {
        &self.liquidation_params
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    pub fn add_market(&mut self, config: MarketConfig) -> Result<MarketId, EngineError> {
        let market = Market::from_config(&config)?;
        let market_id = market.id();
        let curve = market.curve();
        let payload = EventPayload::MarketCreated(MarketCreatedEvent {
            market_id,
            symbol: market.symbol().to_string(),
            invariant_k: curve.invariant_k(),
            peg_multiplier: curve.peg_multiplier(),
        });
        self.registry.insert(market)?;

        tracing::info!(market = %market_id, symbol = %config.symbol, "market listed");
        self.emit_event(payload);
        Ok(market_id)
    }

    pub fn market(&self, market_id: MarketId) -> Result<&Market, EngineError> {
        Ok(self.registry.market(market_id)?)
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    /// Opens an account with `initial_collateral`. A negative seed is refused and
    /// burns no id.
    pub fn create_trader(&mut self, initial_collateral: Quote) -> Result<TraderId, EngineError> {
        let id = TraderId(self.next_trader_id);
        let trader =
            Trader::new(id, initial_collateral)?.with_margin_params(self.margin_params.clone());
        self.next_trader_id += 1;
        self.traders.insert(id, trader);

        tracing::debug!(trader = %id, collateral = %initial_collateral, "trader created");
        self.emit_event(EventPayload::TraderCreated(TraderCreatedEvent {
            trader_id: id,
            initial_collateral,
        }));
        Ok(id)
    }

    pub fn trader(&self, trader_id: TraderId) -> Result<&Trader, EngineError> {
        self.traders
            .get(&trader_id)
            .ok_or(EngineError::TraderNotFound(trader_id))
    }

    pub(super) fn trader_mut(&mut self, trader_id: TraderId) -> Result<&mut Trader, EngineError> {
        self.traders
            .get_mut(&trader_id)
            .ok_or(EngineError::TraderNotFound(trader_id))
    }

    pub fn traders(&self) -> impl Iterator<Item = &Trader> {
        self.traders.values()
    }

    /// Deposits for positive amounts, withdraws for negative ones.
    pub fn add_margin(&mut self, trader_id: TraderId, amount: Quote) -> Result<Quote, EngineError> {
        let new_margin = self.trader_mut(trader_id)?.add_margin(amount)?;
        self.emit_event(EventPayload::MarginChanged(MarginChangedEvent {
            trader_id,
            amount,
            new_margin,
        }));
        Ok(new_margin)
    }

    pub fn withdraw_margin(
        &mut self,
        trader_id: TraderId,
        amount: Quote,
    ) -> Result<Quote, EngineError> {
        self.add_margin(trader_id, amount.abs().negate())
    }

    pub fn margin_summary(&self, trader_id: TraderId) -> Result<MarginSummary, EngineError> {
        Ok(self.trader(trader_id)?.margin_summary(&self.registry)?)
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_of(&self, trader_id: TraderId) -> impl Iterator<Item = &Event> {
        self.events
            .iter()
            .filter(move |e| e.payload.trader_id() == Some(trader_id))
    }

    /// Hands a copy of every retained event to `sink`, oldest first.
    pub fn forward_events<E: EventEmitter + ?Sized>(&self, sink: &mut E) {
        for event in &self.events {
            sink.emit(event.clone());
        }
    }

    pub fn insurance_fund(&self) -> &InsuranceFund {
        &self.insurance_fund
    }

    pub fn fund_insurance(&mut self, amount: Quote) {
        self.insurance_fund.deposit(amount);
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            tracing::debug!(id = event.id.0, kind = event.payload.kind(), "event");
        }

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorClass;
    use rust_decimal_macros::dec;

    #[test]
    fn markets_and_traders_are_registered() {
        let mut engine = Engine::new(EngineConfig::default());
        let market = engine.add_market(MarketConfig::eth_perp()).unwrap();
        let trader = engine.create_trader(Quote::new(dec!(100))).unwrap();

        assert_eq!(market, MarketId(1));
        assert_eq!(trader, TraderId(1));
        assert_eq!(engine.market(market).unwrap().symbol(), "ETH-PERP");
        assert_eq!(engine.trader(trader).unwrap().margin().value(), dec!(100));
        assert_eq!(engine.events().len(), 2);
    }

    #[test]
    fn events_forward_to_an_emitter() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.add_market(MarketConfig::eth_perp()).unwrap();
        let trader = engine.create_trader(Quote::new(dec!(100))).unwrap();
        engine.add_margin(trader, Quote::new(dec!(5))).unwrap();

        let mut collector = crate::events::EventCollector::new();
        engine.forward_events(&mut collector);

        let kinds: Vec<_> = collector.events().iter().map(|e| e.payload.kind()).collect();
        assert_eq!(kinds, vec!["market_created", "trader_created", "margin_changed"]);
    }

    #[test]
    fn duplicate_market_is_rejected() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.add_market(MarketConfig::eth_perp()).unwrap();
        let err = engine.add_market(MarketConfig::eth_perp()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::FatalPrecondition);
        assert_eq!(engine.events().len(), 1);
    }

    #[test]
    fn margin_changes_are_logged() {
        let mut engine = Engine::new(EngineConfig::default());
        let trader = engine.create_trader(Quote::zero()).unwrap();

        engine.add_margin(trader, Quote::new(dec!(100))).unwrap();
        engine.add_margin(trader, Quote::new(dec!(25))).unwrap();
        engine.withdraw_margin(trader, Quote::new(dec!(20))).unwrap();

        assert_eq!(engine.trader(trader).unwrap().margin().value(), dec!(105));
        let kinds: Vec<_> = engine.events_of(trader).map(|e| e.payload.kind()).collect();
        assert_eq!(
            kinds,
            vec!["trader_created", "margin_changed", "margin_changed", "margin_changed"]
        );
    }

    #[test]
    fn negative_seed_creates_nobody() {
        let mut engine = Engine::new(EngineConfig::default());
        let err = engine.create_trader(Quote::new(dec!(-10))).unwrap_err();
        assert_eq!(err.class(), ErrorClass::FatalPrecondition);
        assert_eq!(engine.traders().count(), 0);
        assert!(engine.events().is_empty());

        // the refused seed did not use up an id
        assert_eq!(engine.create_trader(Quote::zero()).unwrap(), TraderId(1));
    }

    #[test]
    fn unknown_trader_is_not_found() {
        let mut engine = Engine::new(EngineConfig::default());
        let err = engine.add_margin(TraderId(42), Quote::new(dec!(1))).unwrap_err();
        assert_eq!(err, EngineError::TraderNotFound(TraderId(42)));
        assert!(err.class().is_recoverable());
    }

    #[test]
    fn event_log_is_bounded() {
        let config = EngineConfig {
            max_events: 3,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config);
        for _ in 0..5 {
            engine.create_trader(Quote::zero()).unwrap();
        }
        assert_eq!(engine.events().len(), 3);
        assert_eq!(engine.events()[0].id, EventId(3));
        assert_eq!(engine.recent_events(1)[0].id, EventId(5));
    }

    #[test]
    fn from_config_lists_markets() {
        let engine = Engine::from_config(&SimulationConfig::default()).unwrap();
        assert_eq!(engine.registry().len(), SimulationConfig::default().markets.len());
        assert_eq!(
            engine.insurance_fund().balance,
            Quote::new(SimulationConfig::default().engine.insurance_seed)
        );
    }
}
