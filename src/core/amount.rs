use crate::{EmberError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Base units per whole coin: amounts are fixed-point decimals with 8
/// fractional digits, held as integer base units. No binary floating point
/// is involved anywhere, including hash canonicalization.
pub const UNITS_PER_COIN: u128 = 100_000_000;

const FRACTION_DIGITS: usize = 8;

/// A non-negative monetary amount with 8 decimal places. The canonical
/// string form always carries exactly 8 fractional digits
/// (`"100.00000000"`) and is what enters every hash preimage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: u128) -> Self {
        Self(units)
    }

    pub fn from_whole(coins: u64) -> Self {
        Self(coins as u128 * UNITS_PER_COIN)
    }

    pub fn units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / UNITS_PER_COIN,
            self.0 % UNITS_PER_COIN
        )
    }
}

impl FromStr for Amount {
    type Err = EmberError;

    fn from_str(s: &str) -> Result<Self> {
        let (whole, fraction) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(EmberError::Transaction(format!("Invalid amount: {}", s)));
        }
        if fraction.len() > FRACTION_DIGITS || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(EmberError::Transaction(format!("Invalid amount: {}", s)));
        }

        let whole: u128 = whole
            .parse()
            .map_err(|_| EmberError::Transaction(format!("Invalid amount: {}", s)))?;

        let mut fraction_units: u128 = 0;
        if !fraction.is_empty() {
            fraction_units = fraction
                .parse()
                .map_err(|_| EmberError::Transaction(format!("Invalid amount: {}", s)))?;
            fraction_units *= 10u128.pow((FRACTION_DIGITS - fraction.len()) as u32);
        }

        whole
            .checked_mul(UNITS_PER_COIN)
            .and_then(|units| units.checked_add(fraction_units))
            .map(Amount)
            .ok_or_else(|| EmberError::Transaction(format!("Amount out of range: {}", s)))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a decimal amount string or a whole-coin integer")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Amount, E> {
        value.parse().map_err(de::Error::custom)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Amount, E> {
        Ok(Amount::from_whole(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Amount, E> {
        if value < 0 {
            return Err(de::Error::custom("amount cannot be negative"));
        }
        Ok(Amount::from_whole(value as u64))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_format() {
        assert_eq!(Amount::from_whole(1_000_000).to_string(), "1000000.00000000");
        assert_eq!(Amount::from_units(1).to_string(), "0.00000001");
        assert_eq!(Amount::ZERO.to_string(), "0.00000000");
    }

    #[test]
    fn test_parse_roundtrip() {
        for s in ["0.00000000", "10.00000000", "1000000.00000000", "0.12345678"] {
            let amount: Amount = s.parse().unwrap();
            assert_eq!(amount.to_string(), s);
        }
    }

    #[test]
    fn test_parse_short_fraction_pads() {
        let amount: Amount = "10.5".parse().unwrap();
        assert_eq!(amount.to_string(), "10.50000000");

        let amount: Amount = "250".parse().unwrap();
        assert_eq!(amount.to_string(), "250.00000000");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for s in ["", ".", "1.", "-1", "1.123456789", "1e8", "1,5", "abc"] {
            assert!(s.parse::<Amount>().is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn test_checked_arithmetic() {
        let ten = Amount::from_whole(10);
        let three = Amount::from_whole(3);

        assert_eq!(ten.checked_sub(three), Some(Amount::from_whole(7)));
        assert_eq!(three.checked_sub(ten), None);
        assert_eq!(
            ten.checked_add(three).unwrap().to_string(),
            "13.00000000"
        );
    }

    #[test]
    fn test_serde_string_and_integer() {
        let from_str: Amount = serde_json::from_str("\"10.00000000\"").unwrap();
        let from_int: Amount = serde_json::from_str("1000").unwrap();

        assert_eq!(from_str, Amount::from_whole(10));
        assert_eq!(from_int, Amount::from_whole(1000));
        assert_eq!(
            serde_json::to_string(&from_str).unwrap(),
            "\"10.00000000\""
        );
    }
}
