//! Monetary amounts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Money amount held as integer cents.
///
/// On the wire amounts are decimal numbers (`100.0`, `12.5`). Decoding rounds
/// to the nearest cent and rejects non-finite values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a Money amount from a decimal major-unit value, rounding to the nearest cent.
    ///
    /// Returns `None` for NaN or infinite input.
    pub fn from_major(amount: f64) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        Some(Self {
            cents: (amount * 100.0).round() as i64,
        })
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the amount as a decimal major-unit value.
    pub fn as_major(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Money::from_major(raw)
            .ok_or_else(|| serde::de::Error::custom("amount must be a finite number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_decimal_amounts_to_cents() {
        let m: Money = serde_json::from_str("100.0").unwrap();
        assert_eq!(m.cents(), 10_000);

        let m: Money = serde_json::from_str("19.999").unwrap();
        assert_eq!(m.cents(), 2_000);

        let m: Money = serde_json::from_str("7").unwrap();
        assert_eq!(m.cents(), 700);
    }

    #[test]
    fn encodes_as_decimal_number() {
        let json = serde_json::to_value(Money::from_cents(12_550)).unwrap();
        assert_eq!(json, serde_json::json!(125.5));
    }

    #[test]
    fn rejects_non_numeric_amounts() {
        assert!(serde_json::from_str::<Money>("\"100\"").is_err());
        assert!(Money::from_major(f64::NAN).is_none());
        assert!(Money::from_major(f64::INFINITY).is_none());
    }

    #[test]
    fn display_formats_two_decimals() {
        assert_eq!(Money::from_cents(10_000).to_string(), "100.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
    }

    #[test]
    fn sign_predicates() {
        assert!(Money::from_cents(1).is_positive());
        assert!(!Money::zero().is_positive());
        assert!(Money::from_cents(-1).is_negative());
    }
}
