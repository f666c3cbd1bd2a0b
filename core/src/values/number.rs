//! Exact numeric values.
//!
//! Policy arithmetic must not silently lose precision: integer and fractional
//! literals are both carried as arbitrary-precision decimals, shared behind an
//! `Arc` so cloning a number (and therefore cloning any composite value that
//! contains one) stays cheap.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use num_traits::{Signed, ToPrimitive, Zero};

/// An exact decimal number.
///
/// Equality and ordering are numeric, not textual: `1`, `1.0` and `1.00` are
/// the same number.
#[derive(Clone)]
pub struct Number(Arc<BigDecimal>);

impl Number {
    /// The number zero.
    pub fn zero() -> Self {
        Number(Arc::new(BigDecimal::zero()))
    }

    /// Parse a decimal literal (`"42"`, `"-0.5"`, `"1e9"`).
    pub fn parse(s: &str) -> Option<Self> {
        BigDecimal::from_str(s).ok().map(|d| Number(Arc::new(d)))
    }

    /// Convert from a float. Returns `None` for NaN and infinities, which have
    /// no place in the value taxonomy.
    pub fn from_f64(f: f64) -> Option<Self> {
        BigDecimal::try_from(f).ok().map(|d| Number(Arc::new(d)))
    }

    /// True if the number has no fractional part.
    pub fn is_integer(&self) -> bool {
        self.0.is_integer()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn as_i64(&self) -> Option<i64> {
        if self.0.is_integer() { self.0.to_i64() } else { None }
    }

    pub fn as_u64(&self) -> Option<u64> {
        if self.0.is_integer() { self.0.to_u64() } else { None }
    }

    /// Integral value usable as a collection index.
    pub fn as_index(&self) -> Option<usize> {
        if self.0.is_integer() { self.0.to_usize() } else { None }
    }

    /// Lossy conversion for host callbacks that want a float.
    pub fn as_f64(&self) -> Option<f64> {
        self.0.to_f64()
    }

    pub fn add(&self, other: &Number) -> Number {
        Number(Arc::new(self.0.as_ref() + other.0.as_ref()))
    }

    pub fn sub(&self, other: &Number) -> Number {
        Number(Arc::new(self.0.as_ref() - other.0.as_ref()))
    }

    pub fn mul(&self, other: &Number) -> Number {
        Number(Arc::new(self.0.as_ref() * other.0.as_ref()))
    }

    /// Division; `None` if `other` is zero. Non-terminating quotients are
    /// rounded at `bigdecimal`'s default precision.
    pub fn checked_div(&self, other: &Number) -> Option<Number> {
        if other.0.is_zero() {
            return None;
        }
        Some(Number(Arc::new(self.0.as_ref() / other.0.as_ref())))
    }

    /// Remainder; `None` if `other` is zero.
    pub fn checked_rem(&self, other: &Number) -> Option<Number> {
        if other.0.is_zero() {
            return None;
        }
        Some(Number(Arc::new(self.0.as_ref() % other.0.as_ref())))
    }

    pub fn neg(&self) -> Number {
        Number(Arc::new(-self.0.as_ref()))
    }

    /// Canonical textual form: normalized, no trailing zeros.
    pub fn to_canonical_string(&self) -> String {
        self.0.normalized().to_string()
    }

    /// The JSON rendering of this number. Integers that fit a machine word
    /// are emitted as such; everything else goes through the exact decimal
    /// text (`serde_json` is built with `arbitrary_precision`, so nothing is
    /// squeezed through an `f64` on the way out).
    pub fn to_json_number(&self) -> Option<serde_json::Number> {
        if self.0.is_integer() {
            if let Some(u) = self.0.to_u64() {
                return Some(serde_json::Number::from(u));
            }
            if let Some(i) = self.0.to_i64() {
                return Some(serde_json::Number::from(i));
            }
        }
        serde_json::Number::from_str(&self.to_canonical_string()).ok()
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalized())
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalized())
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number(Arc::new(BigDecimal::from(n)))
    }
}

impl From<u64> for Number {
    fn from(n: u64) -> Self {
        Number(Arc::new(BigDecimal::from(n)))
    }
}

impl From<i32> for Number {
    fn from(n: i32) -> Self {
        Number(Arc::new(BigDecimal::from(n)))
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        Number(Arc::new(BigDecimal::from(n as u64)))
    }
}

impl FromStr for Number {
    type Err = bigdecimal::ParseBigDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigDecimal::from_str(s).map(|d| Number(Arc::new(d)))
    }
}
