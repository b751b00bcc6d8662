//! Opening and closing positions on behalf of traders.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, PositionClosedEvent, PositionOpenedEvent};
use crate::position::Position;
use crate::trader::TraderError;
use crate::types::{MarketId, PositionId, Quote, TraderId};
use rust_decimal::Decimal;

impl Engine {
    /// Opens a long (positive `quote_size`) or short (negative) position for a trader.
    pub fn open_position(
        &mut self,
        trader_id: TraderId,
        market_id: MarketId,
        quote_size: Decimal,
    ) -> Result<Position, EngineError> {
        let trader = self
            .traders
            .get_mut(&trader_id)
            .ok_or(EngineError::TraderNotFound(trader_id))?;
        let market = self.registry.market_mut(market_id)?;

        let position = trader.open_position(market, quote_size)?;
        let spot_after = market.spot_price()?;

        self.emit_event(EventPayload::PositionOpened(PositionOpenedEvent {
            market_id,
            trader_id,
            position_id: position.id(),
            side: position.side(),
            size: position.size(),
            notional: position.initial_notional(),
            spot_after,
        }));
        Ok(position)
    }

    /// Closes the trader's position at `index` in its open order and returns the pnl.
    pub fn close_position(
        &mut self,
        trader_id: TraderId,
        index: usize,
    ) -> Result<Quote, EngineError> {
        let trader = self
            .traders
            .get_mut(&trader_id)
            .ok_or(EngineError::TraderNotFound(trader_id))?;
        let (position_id, market_id) = trader
            .positions()
            .get(index)
            .map(|p| (p.id(), p.market_id()))
            .ok_or(TraderError::PositionIndexOutOfRange {
                index,
                open: trader.positions().len(),
            })?;

        let realized_pnl = trader.close_position(index, &mut self.registry)?;
        let new_margin = trader.margin();
        let spot_after = self.registry.market(market_id)?.spot_price()?;

        self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
            market_id,
            trader_id,
            position_id,
            realized_pnl,
            new_margin,
            spot_after,
        }));
        Ok(realized_pnl)
    }

    pub fn close_position_by_id(
        &mut self,
        trader_id: TraderId,
        position_id: PositionId,
    ) -> Result<Quote, EngineError> {
        let index = self
            .trader(trader_id)?
            .position_index(position_id)
            .ok_or(EngineError::PositionNotFound {
                trader: trader_id,
                position: position_id,
            })?;
        self.close_position(trader_id, index)
    }
}
