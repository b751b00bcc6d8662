//! Market configuration and state.
//!
//! A market is one vAMM curve plus the positions opened against it. Positions are
//! kept in open order; the registry maps ids to markets and is always passed in
//! explicitly by whoever needs more than one market.

use crate::curve::{swap_base_in_formula, BaseSwap, CurveError, PricingCurve, QuoteSwap, Reserves};
use crate::position::Position;
use crate::types::{ErrorClass, MarketId, PositionId, Price, Quote, SignedSize, TraderId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static market configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    /// Human-readable name (e.g., "ETH-PERP")
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Constant product the curve starts from; both reserves open at its square root
    pub initial_k: Decimal,
    /// Opening peg, which is also the opening spot price
    pub initial_peg: Decimal,
    /// Optional oracle reference the market can be re-pegged to
    pub index_price: Option<Price>,
}

impl MarketConfig {
    pub fn eth_perp() -> Self {
        Self {
            id: MarketId(1),
            symbol: "ETH-PERP".to_string(),
            base_asset: "ETH".to_string(),
            quote_asset: "USDC".to_string(),
            initial_k: dec!(1_000_000),
            initial_peg: dec!(2000),
            index_price: None,
        }
    }

    pub fn sol_perp() -> Self {
        Self {
            id: MarketId(0),
            symbol: "SOL-PERP".to_string(),
            base_asset: "SOL".to_string(),
            quote_asset: "USDC".to_string(),
            initial_k: dec!(100_000_000),
            initial_peg: dec!(100),
            index_price: None,
        }
    }

    pub fn btc_perp() -> Self {
        Self {
            id: MarketId(2),
            symbol: "BTC-PERP".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDC".to_string(),
            initial_k: dec!(10_000),
            initial_peg: dec!(50000),
            index_price: None,
        }
    }

    pub fn validate(&self) -> Result<(), MarketError> {
        if self.symbol.trim().is_empty() {
            return Err(MarketError::InvalidConfig {
                market: self.id,
                reason: "symbol must not be empty".to_string(),
            });
        }
        if self.initial_k <= Decimal::ZERO {
            return Err(MarketError::InvalidConfig {
                market: self.id,
                reason: format!("initial k must be positive, got {}", self.initial_k),
            });
        }
        if self.initial_peg <= Decimal::ZERO {
            return Err(MarketError::InvalidConfig {
                market: self.id,
                reason: format!("initial peg must be positive, got {}", self.initial_peg),
            });
        }
        Ok(())
    }
}

/// What a full unwind did to the curve.
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position: Position,
    pub swap: BaseSwap,
    pub close_value: Quote,
    pub realized_pnl: Quote,
}

/// What a partial unwind did: the slice that went back into the curve and the
/// position that replaced the original.
#[derive(Debug, Clone)]
pub struct PartialUnwind {
    pub slice: Position,
    pub remaining: Position,
    pub close_value: Quote,
    pub realized_pnl: Quote,
}

#[derive(Debug, Clone)]
pub struct Market {
    id: MarketId,
    symbol: String,
    curve: PricingCurve,
    index_price: Option<Price>,
    positions: Vec<Position>,
    next_position_id: u64,
}

impl Market {
    pub fn new(initial_k: Decimal, initial_peg: Decimal, id: MarketId) -> Result<Self, MarketError> {
        let curve = PricingCurve::new(initial_k, initial_peg)?;
        Ok(Self {
            id,
            symbol: format!("MARKET-{}", id.0),
            curve,
            index_price: None,
            positions: Vec::new(),
            next_position_id: 1,
        })
    }

    pub fn from_config(config: &MarketConfig) -> Result<Self, MarketError> {
        config.validate()?;
        let mut market = Self::new(config.initial_k, config.initial_peg, config.id)?;
        market.symbol = config.symbol.clone();
        market.index_price = config.index_price;
        Ok(market)
    }

    pub fn id(&self) -> MarketId {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn curve(&self) -> &PricingCurve {
        &self.curve
    }

    #[cfg(test)]
    pub(crate) fn curve_mut(&mut self) -> &mut PricingCurve {
        &mut self.curve
    }

    pub fn index_price(&self) -> Option<Price> {
        self.index_price
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_of(&self, trader_id: TraderId) -> impl Iterator<Item = &Position> {
        self.positions
            .iter()
            .filter(move |p| p.trader_id() == trader_id)
    }

    pub fn position(&self, position_id: PositionId) -> Option<&Position> {
        self.positions.iter().find(|p| p.id() == position_id)
    }

    /// Net base the traders hold against this curve (longs minus shorts).
    pub fn net_position_size(&self) -> Decimal {
        self.positions.iter().map(|p| p.size().value()).sum()
    }

    pub fn spot_price(&self) -> Result<Price, MarketError> {
        Ok(self.curve.spot_price()?)
    }

    pub fn swap_base_in(&mut self, delta_base: Decimal) -> Result<BaseSwap, MarketError> {
        Ok(self.curve.swap_base_in(delta_base)?)
    }

    pub fn swap_quote_in(&mut self, delta_quote: Decimal) -> Result<QuoteSwap, MarketError> {
        Ok(self.curve.swap_quote_in(delta_quote)?)
    }

    // 12.1: negative quote size opens a short, positive a long. the trader's base
    // holding is the opposite of what the reserve moved.
    pub fn open_position(
        &mut self,
        trader_id: TraderId,
        quote_open_size: Decimal,
    ) -> Result<Position, MarketError> {
        if quote_open_size.is_zero() {
            return Err(MarketError::ZeroSize);
        }
        let swap = self.curve.swap_quote_in(quote_open_size)?;
        let size = SignedSize::new(-swap.base_delta);

        let position = Position::new(
            PositionId(self.next_position_id),
            trader_id,
            self.id,
            Quote::new(quote_open_size.abs()),
            size,
        );
        self.next_position_id += 1;
        self.positions.push(position.clone());

        tracing::debug!(
            market = %self.id,
            trader = %trader_id,
            position = %position.id(),
            side = %position.side(),
            size = %size,
            price = %swap.effective_price,
            "position opened"
        );
        Ok(position)
    }

    /// Closes the first open position of `trader_id`, in open order.
    pub fn close_position(&mut self, trader_id: TraderId) -> Result<ClosedPosition, MarketError> {
        let index = self
            .positions
            .iter()
            .position(|p| p.trader_id() == trader_id)
            .ok_or(MarketError::PositionNotFound {
                trader: trader_id,
                market: self.id,
            })?;
        self.close_at(index)
    }

    pub fn close_position_by_id(
        &mut self,
        position_id: PositionId,
    ) -> Result<ClosedPosition, MarketError> {
        let index = self.index_of(position_id)?;
        self.close_at(index)
    }

    // 12.2: swap first, remove after. a failed swap leaves the list as it was.
    fn close_at(&mut self, index: usize) -> Result<ClosedPosition, MarketError> {
        let size = self.positions[index].size();
        let swap = self.curve.swap_base_in(size.value())?;
        let position = self.positions.remove(index);

        let close_value = swap.quote_delta.abs();
        let realized_pnl = position.pnl_for_close_value(close_value);

        tracing::debug!(
            market = %self.id,
            trader = %position.trader_id(),
            position = %position.id(),
            pnl = %realized_pnl,
            "position closed"
        );
        Ok(ClosedPosition {
            position,
            swap,
            close_value,
            realized_pnl,
        })
    }

    /// Pushes `fraction` of a position's size back into the curve and replaces the
    /// position with what is left.
    pub fn unwind_fraction(
        &mut self,
        position_id: PositionId,
        fraction: Decimal,
    ) -> Result<PartialUnwind, MarketError> {
        if fraction <= Decimal::ZERO || fraction >= Decimal::ONE {
            return Err(MarketError::InvalidFraction(fraction));
        }
        let index = self.index_of(position_id)?;
        let (slice, remaining) = self.positions[index].split(fraction);

        let swap = self.curve.swap_base_in(slice.size().value())?;
        let close_value = swap.quote_delta.abs();
        let realized_pnl = slice.pnl_for_close_value(close_value);
        self.positions[index] = remaining.clone();

        Ok(PartialUnwind {
            slice,
            remaining,
            close_value,
            realized_pnl,
        })
    }

    fn index_of(&self, position_id: PositionId) -> Result<usize, MarketError> {
        self.positions
            .iter()
            .position(|p| p.id() == position_id)
            .ok_or(MarketError::PositionIdNotFound {
                position: position_id,
                market: self.id,
            })
    }

    // 12.3: admin price anchoring

    pub fn repeg(&mut self, new_peg: Decimal) -> Result<(), MarketError> {
        self.curve.set_peg(new_peg)?;
        Ok(())
    }

    pub fn set_index_price(&mut self, price: Price) {
        self.index_price = Some(price);
    }

    /// Re-pegs so that spot equals the index price. Returns the new peg.
    pub fn repeg_to_index(&mut self) -> Result<Decimal, MarketError> {
        let index = self.index_price.ok_or(MarketError::NoIndexPrice(self.id))?;
        let peg = self.curve.peg_for_price(index)?;
        self.curve.set_peg(peg)?;
        Ok(peg)
    }

    /// Sets both reserves directly; `k` is re-derived from them.
    ///
    /// Refused if any open position could no longer be unwound against the new
    /// reserves, since it would then be impossible to value or liquidate.
    pub fn move_reserves(&mut self, base: Decimal, quote: Decimal) -> Result<(), MarketError> {
        let next = Reserves::new(base, quote)?;
        let invariant_k = next.product()?;
        let peg = self.curve.peg_multiplier();
        for position in &self.positions {
            swap_base_in_formula(next, invariant_k, peg, position.size().value()).map_err(
                |source| MarketError::StrandedPosition {
                    position: position.id(),
                    source,
                },
            )?;
        }
        self.curve.set_reserves(base, quote)?;
        Ok(())
    }
}

/// Markets by id. Iteration is in ascending id order.
#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    markets: BTreeMap<MarketId, Market>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, market: Market) -> Result<(), MarketError> {
        let id = market.id();
        if self.markets.contains_key(&id) {
            return Err(MarketError::DuplicateMarket(id));
        }
        self.markets.insert(id, market);
        Ok(())
    }

    pub fn get(&self, id: MarketId) -> Option<&Market> {
        self.markets.get(&id)
    }

    pub fn get_mut(&mut self, id: MarketId) -> Option<&mut Market> {
        self.markets.get_mut(&id)
    }

    pub fn market(&self, id: MarketId) -> Result<&Market, MarketError> {
        self.markets.get(&id).ok_or(MarketError::MarketNotFound(id))
    }

    pub fn market_mut(&mut self, id: MarketId) -> Result<&mut Market, MarketError> {
        self.markets
            .get_mut(&id)
            .ok_or(MarketError::MarketNotFound(id))
    }

    pub fn contains(&self, id: MarketId) -> bool {
        self.markets.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Market> {
        self.markets.values()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    #[error("Market {0} not found")]
    MarketNotFound(MarketId),

    #[error("Market {0} is already registered")]
    DuplicateMarket(MarketId),

    #[error("No open position for {trader} in {market}")]
    PositionNotFound { trader: TraderId, market: MarketId },

    #[error("{position} not found in {market}")]
    PositionIdNotFound {
        position: PositionId,
        market: MarketId,
    },

    #[error("{position} belongs to {expected} but was valued against {actual}")]
    MarketMismatch {
        position: PositionId,
        expected: MarketId,
        actual: MarketId,
    },

    #[error("Position size must be non-zero")]
    ZeroSize,

    #[error("Unwind fraction {0} must be strictly between 0 and 1")]
    InvalidFraction(Decimal),

    #[error("No index price set for {0}")]
    NoIndexPrice(MarketId),

    #[error("New reserves would strand {position}: {source}")]
    StrandedPosition {
        position: PositionId,
        source: CurveError,
    },

    #[error("Invalid config for {market}: {reason}")]
    InvalidConfig { market: MarketId, reason: String },

    #[error("Curve error: {0}")]
    Curve(#[from] CurveError),
}

impl MarketError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MarketError::MarketNotFound(_)
            | MarketError::PositionNotFound { .. }
            | MarketError::PositionIdNotFound { .. } => ErrorClass::NotFound,
            MarketError::Curve(e) => e.class(),
            _ => ErrorClass::FatalPrecondition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn eth_market() -> Market {
        Market::from_config(&MarketConfig::eth_perp()).unwrap()
    }

    #[test]
    fn eth_perp_defaults() {
        let market = eth_market();
        assert_eq!(market.id(), MarketId(1));
        assert_eq!(market.symbol(), "ETH-PERP");
        assert_eq!(market.spot_price().unwrap().value(), dec!(2000));
        assert!(market.positions().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = MarketConfig::eth_perp();
        config.initial_peg = Decimal::ZERO;
        assert!(matches!(
            Market::from_config(&config),
            Err(MarketError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn open_then_opposite_open_restores_spot() {
        let mut market = eth_market();
        let spot = market.spot_price().unwrap();

        market.open_position(TraderId(1), dec!(-10)).unwrap();
        assert!(market.spot_price().unwrap() < spot);
        market.open_position(TraderId(1), dec!(10)).unwrap();

        assert_eq!(market.spot_price().unwrap(), spot);
        assert_eq!(market.positions().len(), 2);
    }

    #[test]
    fn positions_keep_open_order_and_unique_ids() {
        let mut market = eth_market();
        let a = market.open_position(TraderId(1), dec!(10)).unwrap();
        let b = market.open_position(TraderId(2), dec!(-5)).unwrap();
        let c = market.open_position(TraderId(1), dec!(3)).unwrap();

        let ids: Vec<_> = market.positions().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
        assert_eq!(market.positions_of(TraderId(1)).count(), 2);
        assert_eq!(b.side(), Side::Short);
    }

    #[test]
    fn close_unwinds_first_match() {
        let mut market = eth_market();
        let reserves = market.curve().reserves();
        let first = market.open_position(TraderId(1), dec!(10)).unwrap();
        market.open_position(TraderId(2), dec!(20)).unwrap();

        let closed = market.close_position(TraderId(1)).unwrap();
        assert_eq!(closed.position.id(), first.id());
        assert_eq!(market.positions().len(), 1);

        market.close_position(TraderId(2)).unwrap();
        let drift = (market.curve().base_reserve() - reserves.base).abs();
        assert!(drift < dec!(0.000000000000000001));
    }

    #[test]
    fn close_without_position_is_not_found() {
        let mut market = eth_market();
        market.open_position(TraderId(1), dec!(10)).unwrap();
        let before = market.curve().reserves();

        let err = market.close_position(TraderId(9)).unwrap_err();
        assert_eq!(
            err,
            MarketError::PositionNotFound {
                trader: TraderId(9),
                market: MarketId(1)
            }
        );
        assert_eq!(err.class(), ErrorClass::NotFound);
        // nothing was removed or swapped
        assert_eq!(market.positions().len(), 1);
        assert_eq!(market.curve().reserves(), before);
    }

    #[test]
    fn zero_open_is_rejected() {
        let mut market = eth_market();
        assert_eq!(
            market.open_position(TraderId(1), Decimal::ZERO).unwrap_err(),
            MarketError::ZeroSize
        );
    }

    #[test]
    fn unwind_fraction_replaces_position() {
        let mut market = eth_market();
        let pos = market.open_position(TraderId(1), dec!(100)).unwrap();

        let unwind = market.unwind_fraction(pos.id(), dec!(0.25)).unwrap();
        assert_eq!(unwind.remaining.id(), pos.id());
        assert_eq!(unwind.remaining.initial_notional().value(), dec!(75));
        assert_eq!(market.position(pos.id()), Some(&unwind.remaining));
        // convexity: the first quarter out fetches slightly more than a quarter
        assert!(unwind.close_value.value() > dec!(25));
        assert!(unwind.realized_pnl.is_positive());

        assert!(matches!(
            market.unwind_fraction(pos.id(), dec!(1)),
            Err(MarketError::InvalidFraction(_))
        ));
    }

    #[test]
    fn net_size_mirrors_reserve_move() {
        let mut market = eth_market();
        market.open_position(TraderId(1), dec!(500)).unwrap();
        market.open_position(TraderId(2), dec!(-200)).unwrap();
        let moved = dec!(1000) - market.curve().base_reserve();
        let diff = (market.net_position_size() - moved).abs();
        assert!(diff < dec!(0.000000000000000001));
    }

    #[test]
    fn repeg_to_index_matches_oracle() {
        let mut market = eth_market();
        market.open_position(TraderId(1), dec!(1000)).unwrap();
        assert!(matches!(market.repeg_to_index(), Err(MarketError::NoIndexPrice(_))));

        market.set_index_price(Price::new_unchecked(dec!(1900)));
        market.repeg_to_index().unwrap();
        let diff = (market.spot_price().unwrap().value() - dec!(1900)).abs();
        assert!(diff < dec!(0.000000001));
    }

    #[test]
    fn lopsided_reserves_are_refused() {
        let mut market = eth_market();
        let err = market
            .move_reserves(dec!(0.00000000000001), dec!(100000000000000))
            .unwrap_err();
        assert_eq!(err, MarketError::Curve(CurveError::Overflow));
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
        assert_eq!(market.spot_price().unwrap().value(), dec!(2000));
    }

    #[test]
    fn reserves_that_strand_a_short_are_refused() {
        let mut market = eth_market();
        let short = market.open_position(TraderId(1), dec!(-900)).unwrap();
        market.open_position(TraderId(2), dec!(900)).unwrap();
        let before = market.curve().reserves();

        // buying the short back needs ~0.45 base out of a 0.4 reserve
        let err = market.move_reserves(dec!(0.4), dec!(0.794)).unwrap_err();
        assert!(matches!(
            err,
            MarketError::StrandedPosition {
                position,
                source: CurveError::ReserveDrained { .. },
            } if position == short.id()
        ));
        assert_eq!(err.class(), ErrorClass::FatalPrecondition);
        assert_eq!(market.curve().reserves(), before);

        // deep enough reserves still go through
        market.move_reserves(dec!(500), dec!(600)).unwrap();
        assert_eq!(market.curve().invariant_k(), dec!(300000));
    }

    #[test]
    fn registry_lookup() {
        let mut registry = MarketRegistry::new();
        registry.insert(eth_market()).unwrap();
        assert!(matches!(
            registry.insert(eth_market()),
            Err(MarketError::DuplicateMarket(MarketId(1)))
        ));
        assert!(registry.market(MarketId(1)).is_ok());
        assert_eq!(
            registry.market(MarketId(5)).unwrap_err().class(),
            ErrorClass::NotFound
        );
        assert_eq!(registry.len(), 1);
    }
}
