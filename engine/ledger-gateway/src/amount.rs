//! Fixed-point credit amounts as the ledger represents them

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{LedgerError, Result};

/// Number of fractional digits in the ledger's integer representation
pub const LEDGER_DECIMALS: u32 = 18;

/// 10^18 base units per credit
const BASE_UNITS_PER_CREDIT: u128 = 1_000_000_000_000_000_000;

/// CreditAmount represents a non-negative ledger amount in base units
///
/// Example: 1.5 credits = 1_500_000_000_000_000_000 base units.
/// Serialized on the wire as a decimal string of base units so values above
/// 2^53 survive JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CreditAmount {
    base_units: u128,
}

impl CreditAmount {
    pub const ZERO: CreditAmount = CreditAmount { base_units: 0 };

    /// Create an amount from raw base units
    pub fn from_base_units(base_units: u128) -> Self {
        Self { base_units }
    }

    /// Create an amount from whole credits
    pub fn from_credits(credits: u64) -> Self {
        Self { base_units: credits as u128 * BASE_UNITS_PER_CREDIT }
    }

    /// Get the raw base units
    pub fn base_units(self) -> u128 {
        self.base_units
    }

    /// Convert a decimal credit amount to base units.
    ///
    /// Digits beyond the 18th fractional place are truncated.
    pub fn from_decimal(decimal: Decimal) -> Result<Self> {
        if decimal.is_sign_negative() && !decimal.is_zero() {
            return Err(LedgerError::InvalidAmount(format!("negative amount {decimal}")));
        }

        let whole = decimal.trunc();
        let fraction = decimal - whole;

        let whole_units = whole
            .to_u128()
            .and_then(|w| w.checked_mul(BASE_UNITS_PER_CREDIT))
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{decimal} overflows ledger")))?;
        let fraction_units = (fraction * Decimal::from(BASE_UNITS_PER_CREDIT as u64))
            .trunc()
            .to_u128()
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{decimal} has bad fraction")))?;

        whole_units
            .checked_add(fraction_units)
            .map(Self::from_base_units)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{decimal} overflows ledger")))
    }

    /// Convert base units back to a normalized decimal credit amount
    pub fn to_decimal(self) -> Result<Decimal> {
        let whole = self.base_units / BASE_UNITS_PER_CREDIT;
        let fraction = self.base_units % BASE_UNITS_PER_CREDIT;

        let whole = Decimal::from_u128(whole).ok_or_else(|| {
            LedgerError::InvalidAmount(format!("{} base units overflow decimal", self.base_units))
        })?;
        let fraction = Decimal::from_i128_with_scale(fraction as i128, LEDGER_DECIMALS);

        whole
            .checked_add(fraction)
            .map(|d| d.normalize())
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!("{} base units overflow decimal", self.base_units))
            })
    }

    /// Check if amount is zero
    pub fn is_zero(self) -> bool {
        self.base_units == 0
    }

    /// Subtraction that returns `None` instead of going negative
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.base_units.checked_sub(other.base_units).map(Self::from_base_units)
    }

    /// Addition that returns `None` on overflow
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.base_units.checked_add(other.base_units).map(Self::from_base_units)
    }
}

impl std::fmt::Display for CreditAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_decimal() {
            Ok(decimal) => write!(f, "{decimal}"),
            Err(_) => write!(f, "{}e-{}", self.base_units, LEDGER_DECIMALS),
        }
    }
}

impl std::str::FromStr for CreditAmount {
    type Err = LedgerError;

    /// Parse base units from a decimal or `0x`-prefixed hex string
    fn from_str(s: &str) -> Result<Self> {
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16),
            None => s.parse::<u128>(),
        };
        parsed
            .map(Self::from_base_units)
            .map_err(|e| LedgerError::InvalidAmount(format!("{s}: {e}")))
    }
}

impl Serialize for CreditAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.base_units.to_string())
    }
}

impl<'de> Deserialize<'de> for CreditAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_whole_credit_scaling() {
        let amount = CreditAmount::from_decimal(Decimal::from(20)).unwrap();
        assert_eq!(amount.base_units(), 20 * BASE_UNITS_PER_CREDIT);
        assert_eq!(amount, CreditAmount::from_credits(20));
        assert_eq!(amount.to_decimal().unwrap(), Decimal::from(20));
    }

    #[test]
    fn test_fractional_credits() {
        let amount = CreditAmount::from_decimal(Decimal::from_str("0.5").unwrap()).unwrap();
        assert_eq!(amount.base_units(), 500_000_000_000_000_000);

        let smallest = CreditAmount::from_base_units(1);
        assert_eq!(smallest.to_decimal().unwrap(), Decimal::from_str("0.000000000000000001").unwrap());
    }

    #[test]
    fn test_digits_past_eighteen_truncate() {
        let fine = Decimal::from_str("1.0000000000000000019").unwrap();
        let amount = CreditAmount::from_decimal(fine).unwrap();
        assert_eq!(amount.base_units(), BASE_UNITS_PER_CREDIT + 1);
    }

    #[test]
    fn test_negative_rejected() {
        let err = CreditAmount::from_decimal(Decimal::from(-3)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert!(CreditAmount::from_decimal(Decimal::ZERO).unwrap().is_zero());
    }

    #[test]
    fn test_wire_format_is_string() {
        let amount = CreditAmount::from_credits(3);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"3000000000000000000\"");

        let parsed: CreditAmount = serde_json::from_str("\"0x29a2241af62c0000\"").unwrap();
        assert_eq!(parsed, amount);
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = CreditAmount::from_credits(10);
        let b = CreditAmount::from_credits(25);
        assert_eq!(b.checked_sub(a), Some(CreditAmount::from_credits(15)));
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(a.checked_add(b), Some(CreditAmount::from_credits(35)));
    }
}
