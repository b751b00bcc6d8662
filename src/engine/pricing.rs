//! Price anchoring: repegs, oracle updates and direct reserve moves.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, IndexPriceUpdateEvent, RepegEvent, ReservesMovedEvent};
use crate::types::{MarketId, Price};
use rust_decimal::Decimal;

impl Engine {
    pub fn spot_price(&self, market_id: MarketId) -> Result<Price, EngineError> {
        Ok(self.registry.market(market_id)?.spot_price()?)
    }

    /// Changes the peg multiplier. Reserves and `k` are left alone.
    pub fn repeg(&mut self, market_id: MarketId, new_peg: Decimal) -> Result<(), EngineError> {
        let market = self.registry.market_mut(market_id)?;
        let old_peg = market.curve().peg_multiplier();
        market.repeg(new_peg)?;

        tracing::info!(market = %market_id, old_peg = %old_peg, new_peg = %new_peg, "repeg");
        self.emit_event(EventPayload::Repeg(RepegEvent {
            market_id,
            old_peg,
            new_peg,
        }));
        Ok(())
    }

    /// Update the index price from oracle.
    pub fn update_index_price(
        &mut self,
        market_id: MarketId,
        index_price: Price,
    ) -> Result<(), EngineError> {
        self.registry.market_mut(market_id)?.set_index_price(index_price);

        self.emit_event(EventPayload::IndexPriceUpdate(IndexPriceUpdateEvent {
            market_id,
            price: index_price,
            source: "simulated_oracle".to_string(),
        }));
        Ok(())
    }

    /// Re-pegs so spot matches the last index price. Returns the new peg.
    pub fn repeg_to_index(&mut self, market_id: MarketId) -> Result<Decimal, EngineError> {
        let market = self.registry.market_mut(market_id)?;
        let old_peg = market.curve().peg_multiplier();
        let new_peg = market.repeg_to_index()?;

        tracing::debug!(market = %market_id, old_peg = %old_peg, new_peg = %new_peg, "repeg to index");
        self.emit_event(EventPayload::Repeg(RepegEvent {
            market_id,
            old_peg,
            new_peg,
        }));
        Ok(new_peg)
    }

    /// Moves the curve to the given reserves; `k` follows.
    pub fn move_reserves(
        &mut self,
        market_id: MarketId,
        base_reserve: Decimal,
        quote_reserve: Decimal,
    ) -> Result<(), EngineError> {
        let market = self.registry.market_mut(market_id)?;
        market.move_reserves(base_reserve, quote_reserve)?;
        let invariant_k = market.curve().invariant_k();

        tracing::info!(
            market = %market_id,
            base = %base_reserve,
            quote = %quote_reserve,
            "reserves moved"
        );
        self.emit_event(EventPayload::ReservesMoved(ReservesMovedEvent {
            market_id,
            base_reserve,
            quote_reserve,
            invariant_k,
        }));
        Ok(())
    }
}
