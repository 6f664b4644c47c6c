//! Value objects shared by the ledgers.

use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point drift.
///
/// Persisted as an integer number of cents. The wire protocol carries
/// currency units as JSON numbers; see [`Money::from_units`] and
/// [`Money::as_units`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Largest amount a price or wire value may carry: one hundred trillion
    /// currency units.
    pub const MAX: Money = Money(10_000_000_000_000_000);

    /// Creates a new Money amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates a new Money amount from whole currency units.
    pub const fn from_whole(units: i64) -> Self {
        Self(units * 100)
    }

    /// Converts a decimal currency amount, rounding to the nearest cent.
    ///
    /// Returns `None` for NaN, infinite, or input beyond [`Money::MAX`] in
    /// either direction.
    pub fn from_units(units: f64) -> Option<Self> {
        if !units.is_finite() {
            return None;
        }
        let cents = (units * 100.0).round();
        if cents.abs() > Self::MAX.0 as f64 {
            return None;
        }
        Some(Self(cents as i64))
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the amount as decimal currency units.
    pub fn as_units(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, saturating at the `i64` bounds.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(quantity)))
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// Scales by a discount factor, rounding to the nearest cent.
    pub fn discounted(&self, factor: f64) -> Money {
        Money((self.0 as f64 * factor).round() as i64)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

// Operators saturate. Amounts that must be exact go through the checked
// methods.
impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_units_rounds_to_cents() {
        assert_eq!(Money::from_units(19.99).unwrap().cents(), 1999);
        assert_eq!(Money::from_units(0.1 + 0.2).unwrap().cents(), 30);
        assert!(Money::from_units(f64::NAN).is_none());
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!(a.multiply(3).cents(), 3000);
        assert_eq!(vec![a, b, b].into_iter().sum::<Money>().cents(), 2000);
    }

    #[test]
    fn test_money_rejects_amounts_beyond_max() {
        assert_eq!(Money::from_units(1e14), Some(Money::MAX));
        assert!(Money::from_units(1e14 + 1.0).is_none());
        assert!(Money::from_units(-5e16).is_none());
    }

    #[test]
    fn test_money_overflow_never_panics() {
        let huge = Money::from_cents(i64::MAX / 2 + 1);
        assert!(huge.checked_mul(2).is_none());
        assert_eq!(huge.multiply(2).cents(), i64::MAX);
        assert_eq!((huge + huge).cents(), i64::MAX);
        assert_eq!(vec![huge, huge].into_iter().sum::<Money>().cents(), i64::MAX);
        assert_eq!(Money::MAX.checked_mul(3).unwrap().cents(), 30_000_000_000_000_000);
    }

    #[test]
    fn test_money_discount() {
        assert_eq!(Money::from_cents(1000).discounted(0.85).cents(), 850);
        assert_eq!(Money::from_cents(999).discounted(0.5).cents(), 500);
        assert_eq!(Money::from_cents(999).discounted(1.0).cents(), 999);
    }

    #[test]
    fn test_money_persists_as_cents() {
        let json = serde_json::to_string(&Money::from_cents(4000)).unwrap();
        assert_eq!(json, "4000");
    }
}
