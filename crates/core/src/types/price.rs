//! Price handling with decimal arithmetic.
//!
//! Catalog prices are stored in major units (pesos, not centavos) as
//! decimals; the payment processor wants minor units as integers. The
//! conversion lives here so every caller applies the same rounding and the
//! same plausibility bound.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog prices above this (in major units) are assumed to be a data-entry
/// mistake where someone typed centavos instead of pesos.
const MAX_MAJOR_UNITS: i64 = 100_000;

/// Errors converting a catalog price to a payable amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriceError {
    /// Negative price in the catalog.
    #[error("price must not be negative: {0}")]
    Negative(Decimal),

    /// Suspiciously large price, probably entered in minor units.
    #[error("price {0} exceeds {MAX_MAJOR_UNITS}; use major units, not cents")]
    TooLarge(Decimal),
}

/// ISO 4217 currency codes accepted by the shop.
///
/// Serialized lowercase to match both the content store documents and the
/// payment processor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyCode {
    #[default]
    Mxn,
    Usd,
}

impl CurrencyCode {
    /// Lowercase currency code as the payment processor expects it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mxn => "mxn",
            Self::Usd => "usd",
        }
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit price in major currency units, as stored in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrice {
    /// Amount in the currency's major unit (e.g. pesos).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: CurrencyCode,
}

impl UnitPrice {
    /// Create a new unit price.
    #[must_use]
    pub const fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    /// Convert to minor units (centavos/cents) for the payment processor.
    ///
    /// Rounds half-up to the nearest minor unit.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Negative`] for negative amounts and
    /// [`PriceError::TooLarge`] for amounts over the plausibility bound.
    pub fn to_minor_units(self) -> Result<i64, PriceError> {
        if self.amount.is_sign_negative() {
            return Err(PriceError::Negative(self.amount));
        }
        if self.amount > Decimal::from(MAX_MAJOR_UNITS) {
            return Err(PriceError::TooLarge(self.amount));
        }

        let minor = (self.amount * Decimal::ONE_HUNDRED).round();
        minor.to_i64().ok_or(PriceError::TooLarge(self.amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_amount_to_minor_units() {
        let price = UnitPrice::new(Decimal::from(350), CurrencyCode::Mxn);
        assert_eq!(price.to_minor_units(), Ok(35_000));
    }

    #[test]
    fn test_fractional_amount_rounds() {
        // 19.995 rounds to 2000 minor units
        let price = UnitPrice::new(Decimal::new(19_995, 3), CurrencyCode::Usd);
        assert_eq!(price.to_minor_units(), Ok(2000));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let price = UnitPrice::new(Decimal::from(-1), CurrencyCode::Mxn);
        assert_eq!(
            price.to_minor_units(),
            Err(PriceError::Negative(Decimal::from(-1)))
        );
    }

    #[test]
    fn test_implausibly_large_amount_rejected() {
        // 350 pesos typed as 150000 "pesos" (really centavos)
        let price = UnitPrice::new(Decimal::from(150_000), CurrencyCode::Mxn);
        assert!(matches!(
            price.to_minor_units(),
            Err(PriceError::TooLarge(_))
        ));
    }

    #[test]
    fn test_currency_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CurrencyCode::Mxn).expect("serialize"),
            "\"mxn\""
        );
    }
}
