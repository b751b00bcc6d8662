// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, prices, sizes, leverage, timestamps. each is a newtype so the compiler catches type mixups.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "market#{}", self.0)
    }
}

impl fmt::Display for TraderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trader#{}", self.0)
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "position#{}", self.0)
    }
}

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => dec!(1),
            Side::Short => dec!(-1),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// 1.1: signed base size: positive = long, negative = short. the side is never stored,
// it is read off the sign so the two can't disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedSize(Decimal);

impl SignedSize {
    pub fn new(size: Decimal) -> Self {
        Self(size)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_side(side: Side, abs_size: Decimal) -> Self {
        Self(side.sign() * abs_size.abs())
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn abs(&self) -> Decimal {
        self.0.abs()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.0 >= Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    // size >= 0 reads as long
    pub fn side(&self) -> Side {
        if self.is_short() {
            Side::Short
        } else {
            Side::Long
        }
    }

    pub fn scale(&self, fraction: Decimal) -> Self {
        Self(self.0 * fraction)
    }

    pub fn sub(&self, other: SignedSize) -> Self {
        Self(self.0 - other.0)
    }
}

impl fmt::Display for SignedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: price in quote currency per unit of base. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: quote currency amount. margin, pnl, notional, penalties all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote(Decimal);

impl Quote {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn add(&self, other: Quote) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Quote) -> Self {
        Self(self.0 - other.0)
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn negate(&self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Quote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quote {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Quote {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(q))
    }
}

impl<'a> Sum<&'a Quote> for Quote {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(*q))
    }
}

// 1.4: leverage multiplier. must be >= 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leverage(Decimal);

impl Leverage {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ONE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value >= Decimal::ONE);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// 1.5: millisecond timestamp. the engine runs on a simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_millis(&self, ms: i64) -> Self {
        Self(self.0 + ms)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

// 1.6: how a failure should be treated by whoever drives the simulation.
// fatal preconditions and invariant violations mean a caller or sizing bug.
// not-found is always recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    FatalPrecondition,
    NotFound,
    InvariantViolation,
}

impl ErrorClass {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorClass::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signed_size_operations() {
        let long = SignedSize::from_side(Side::Long, dec!(10));
        assert!(long.is_long());
        assert_eq!(long.abs(), dec!(10));

        let short = SignedSize::from_side(Side::Short, dec!(10));
        assert!(short.is_short());
        assert_eq!(short.abs(), dec!(10));
        assert_eq!(short.value(), dec!(-10));
    }

    #[test]
    fn side_derived_from_sign() {
        assert_eq!(SignedSize::new(dec!(0.5)).side(), Side::Long);
        assert_eq!(SignedSize::new(dec!(-0.5)).side(), Side::Short);
        // zero reads as long
        assert_eq!(SignedSize::zero().side(), Side::Long);
    }

    #[test]
    fn scaled_size_keeps_sign() {
        let short = SignedSize::new(dec!(-2));
        let slice = short.scale(dec!(0.25));
        assert_eq!(slice.value(), dec!(-0.5));
        assert_eq!(short.sub(slice).value(), dec!(-1.5));
    }

    #[test]
    fn leverage_floor_is_one_x() {
        assert_eq!(Leverage::new(dec!(10)).unwrap().value(), dec!(10));
        assert_eq!(Leverage::new(dec!(1)).unwrap().to_string(), "1x");
        assert!(Leverage::new(dec!(0.5)).is_none());
    }

    #[test]
    fn price_rejects_non_positive() {
        assert!(Price::new(dec!(0)).is_none());
        assert!(Price::new(dec!(-1)).is_none());
        assert_eq!(Price::new(dec!(2000)).unwrap().value(), dec!(2000));
    }

    #[test]
    fn quote_sum() {
        let total: Quote = [Quote::new(dec!(1.5)), Quote::new(dec!(-0.5))].iter().sum();
        assert_eq!(total.value(), dec!(1));
    }

    #[test]
    fn timestamp_display_is_rfc3339() {
        let ts = Timestamp::from_millis(0);
        assert!(ts.to_string().starts_with("1970-01-01T00:00:00"));
    }

    #[test]
    fn only_not_found_is_recoverable() {
        assert!(ErrorClass::NotFound.is_recoverable());
        assert!(!ErrorClass::FatalPrecondition.is_recoverable());
        assert!(!ErrorClass::InvariantViolation.is_recoverable());
    }
}
