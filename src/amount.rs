//! Fixed-point 8-decimal amounts (satoshi-equivalent), exact parse/format.
//!
//! RPC payloads carry amounts as decimal strings ("25.00000000"). Converting
//! through `f64` loses precision at the edges of the range, so amounts are
//! parsed directly into a `u64` count of 1e-8 units.

use std::fmt;
use std::str::FromStr;

const SCALE: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

#[derive(Debug, thiserror::Error)]
pub enum AmountError {
    #[error("invalid decimal amount: {0}")]
    InvalidFormat(String),
    #[error("amount overflow")]
    Overflow,
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: u64) -> Self {
        Amount(units)
    }

    pub fn units(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::InvalidFormat(s.to_string()));
        }
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidFormat(s.to_string()));
        }
        if frac_part.len() > 8 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidFormat(s.to_string()));
        }
        let mut frac_padded = frac_part.to_string();
        while frac_padded.len() < 8 {
            frac_padded.push('0');
        }

        let int_val: u64 = int_part
            .parse()
            .map_err(|_| AmountError::InvalidFormat(s.to_string()))?;
        let frac_val: u64 = frac_padded
            .parse()
            .map_err(|_| AmountError::InvalidFormat(s.to_string()))?;

        let int_units = int_val.checked_mul(SCALE).ok_or(AmountError::Overflow)?;
        let units = int_units.checked_add(frac_val).ok_or(AmountError::Overflow)?;
        Ok(Amount(units))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let int_part = self.0 / SCALE;
        let frac_part = self.0 % SCALE;
        write!(f, "{}.{:08}", int_part, frac_part)
    }
}

impl serde::Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}
