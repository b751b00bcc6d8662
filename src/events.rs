// 11.0: every state change the engine makes produces an event. the log is an audit
// trail of the run: replaying it in order tells you how each account got where it is.

use crate::types::{MarketId, PositionId, Price, Quote, Side, SignedSize, Timestamp, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Setup
    MarketCreated(MarketCreatedEvent),
    TraderCreated(TraderCreatedEvent),

    // Account events
    MarginChanged(MarginChangedEvent),

    // Position events
    PositionOpened(PositionOpenedEvent),
    PositionClosed(PositionClosedEvent),

    // Curve events
    Repeg(RepegEvent),
    IndexPriceUpdate(IndexPriceUpdateEvent),
    ReservesMoved(ReservesMovedEvent),

    // Risk events
    PartialLiquidation(PartialLiquidationEvent),
    FullLiquidation(FullLiquidationEvent),
    BadDebt(BadDebtEvent),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::MarketCreated(_) => "market_created",
            EventPayload::TraderCreated(_) => "trader_created",
            EventPayload::MarginChanged(_) => "margin_changed",
            EventPayload::PositionOpened(_) => "position_opened",
            EventPayload::PositionClosed(_) => "position_closed",
            EventPayload::Repeg(_) => "repeg",
            EventPayload::IndexPriceUpdate(_) => "index_price_update",
            EventPayload::ReservesMoved(_) => "reserves_moved",
            EventPayload::PartialLiquidation(_) => "partial_liquidation",
            EventPayload::FullLiquidation(_) => "full_liquidation",
            EventPayload::BadDebt(_) => "bad_debt",
        }
    }

    /// The trader this event concerns, if any.
    pub fn trader_id(&self) -> Option<TraderId> {
        match self {
            EventPayload::TraderCreated(e) => Some(e.trader_id),
            EventPayload::MarginChanged(e) => Some(e.trader_id),
            EventPayload::PositionOpened(e) => Some(e.trader_id),
            EventPayload::PositionClosed(e) => Some(e.trader_id),
            EventPayload::PartialLiquidation(e) => Some(e.trader_id),
            EventPayload::FullLiquidation(e) => Some(e.trader_id),
            EventPayload::BadDebt(e) => Some(e.trader_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market_id: MarketId,
    pub symbol: String,
    pub invariant_k: Decimal,
    pub peg_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderCreatedEvent {
    pub trader_id: TraderId,
    pub initial_collateral: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginChangedEvent {
    pub trader_id: TraderId,
    /// Signed: negative for withdrawals
    pub amount: Quote,
    pub new_margin: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub market_id: MarketId,
    pub trader_id: TraderId,
    pub position_id: PositionId,
    pub side: Side,
    pub size: SignedSize,
    pub notional: Quote,
    pub spot_after: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub market_id: MarketId,
    pub trader_id: TraderId,
    pub position_id: PositionId,
    pub realized_pnl: Quote,
    pub new_margin: Quote,
    pub spot_after: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepegEvent {
    pub market_id: MarketId,
    pub old_peg: Decimal,
    pub new_peg: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPriceUpdateEvent {
    pub market_id: MarketId,
    pub price: Price,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservesMovedEvent {
    pub market_id: MarketId,
    pub base_reserve: Decimal,
    pub quote_reserve: Decimal,
    pub invariant_k: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialLiquidationEvent {
    pub trader_id: TraderId,
    pub margin_ratio: Decimal,
    pub positions_reduced: usize,
    pub realized_pnl: Quote,
    pub penalty: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullLiquidationEvent {
    pub trader_id: TraderId,
    pub margin_ratio: Decimal,
    pub positions_closed: usize,
    pub realized_pnl: Quote,
    pub forfeited: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadDebtEvent {
    pub trader_id: TraderId,
    pub debt_amount: Quote,
    pub covered_by_insurance: Quote,
    pub uncovered: Quote,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
    next_id: u64,
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl EventEmitter for EventCollector {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}
