// 4.0: one trader's exposure in one market. immutable once opened: pnl and notional
// come from replaying the closing swap on a curve preview, never from mutating the record.
// 4.3 at the bottom is the partial-unwind split.

use crate::curve::PricingCurve;
use crate::market::{Market, MarketError};
use crate::types::{MarketId, PositionId, Price, Quote, Side, SignedSize, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    id: PositionId,
    trader_id: TraderId,
    market_id: MarketId,
    initial_notional: Quote,
    size: SignedSize,
}

impl Position {
    pub fn new(
        id: PositionId,
        trader_id: TraderId,
        market_id: MarketId,
        initial_notional: Quote,
        size: SignedSize,
    ) -> Self {
        debug_assert!(!initial_notional.is_negative());
        Self {
            id,
            trader_id,
            market_id,
            initial_notional,
            size,
        }
    }

    pub fn id(&self) -> PositionId {
        self.id
    }

    pub fn trader_id(&self) -> TraderId {
        self.trader_id
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    pub fn initial_notional(&self) -> Quote {
        self.initial_notional
    }

    pub fn size(&self) -> SignedSize {
        self.size
    }

    pub fn side(&self) -> Side {
        self.size.side()
    }

    /// Average quote paid per unit of base at open. `None` for an empty size or a
    /// ratio too large to represent.
    pub fn entry_price(&self) -> Option<Price> {
        if self.size.is_zero() {
            return None;
        }
        self.initial_notional
            .value()
            .checked_div(self.size.abs())
            .and_then(Price::new)
    }

    // 4.2: what unwinding the whole size would fetch on this curve right now
    pub fn close_value(&self, curve: &PricingCurve) -> Result<Quote, MarketError> {
        let swap = curve.preview_base_in(self.size.value())?;
        Ok(swap.quote_delta.abs())
    }

    // long gains when the unwind fetches more than it cost, short when it fetches less
    pub fn pnl_for_close_value(&self, close_value: Quote) -> Quote {
        match self.side() {
            Side::Long => close_value.sub(self.initial_notional),
            Side::Short => self.initial_notional.sub(close_value),
        }
    }

    pub fn unrealized_pnl(&self, market: &Market) -> Result<Quote, MarketError> {
        self.ensure_market(market)?;
        let close_value = self.close_value(market.curve())?;
        Ok(self.pnl_for_close_value(close_value))
    }

    pub fn notional(&self, market: &Market) -> Result<Quote, MarketError> {
        self.ensure_market(market)?;
        self.close_value(market.curve())
    }

    fn ensure_market(&self, market: &Market) -> Result<(), MarketError> {
        if market.id() == self.market_id {
            Ok(())
        } else {
            Err(MarketError::MarketMismatch {
                position: self.id,
                expected: self.market_id,
                actual: market.id(),
            })
        }
    }

    // 4.3: carve a slice off the position. the slice carries the same share of the
    // opening notional; the remainder keeps the id and whatever is left.
    pub fn split(&self, fraction: Decimal) -> (Position, Position) {
        let slice_size = self.size.scale(fraction);
        let slice_notional = self.initial_notional.mul(fraction);
        let slice = Position {
            size: slice_size,
            initial_notional: slice_notional,
            ..self.clone()
        };
        let remainder = Position {
            size: self.size.sub(slice_size),
            initial_notional: self.initial_notional.sub(slice_notional),
            ..self.clone()
        };
        (slice, remainder)
    }
}
