//! Amounts of money in minor currency units.
//!
//! Stripe takes integer minor units (`9900` for R$ 99,00) while PayPal takes
//! decimal strings (`"99.00"`). [`Money`] stores the former and renders the
//! latter through `rust_decimal`, so no float ever touches an amount.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Upper bound for a single charge, in minor units.
const MAX_AMOUNT_MINOR: i64 = 100_000_000;

/// Errors that can occur when building a [`Money`] value or currency.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount is required")]
    Missing,
    #[error("amount must be a whole number of minor units")]
    NotAnInteger,
    #[error("amount must be greater than zero")]
    NotPositive,
    #[error("amount exceeds the maximum of {max} minor units")]
    TooLarge { max: i64 },
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// ISO 4217 currencies accepted at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyCode {
    #[default]
    Brl,
    Usd,
    Eur,
}

impl CurrencyCode {
    /// Lower-case code, as Stripe expects it.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Brl => "brl",
            Self::Usd => "usd",
            Self::Eur => "eur",
        }
    }

    /// Upper-case code, as PayPal expects it.
    #[must_use]
    pub const fn as_upper(&self) -> &'static str {
        match self {
            Self::Brl => "BRL",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brl" => Ok(Self::Brl),
            "usd" => Ok(Self::Usd),
            "eur" => Ok(Self::Eur),
            other => Err(MoneyError::UnsupportedCurrency(other.to_owned())),
        }
    }
}

/// An amount in minor units with its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the smallest currency unit (centavos, cents).
    pub amount_minor: i64,
    pub currency: CurrencyCode,
}

impl Money {
    /// Create a money value without validation (for trusted constants).
    #[must_use]
    pub const fn new(amount_minor: i64, currency: CurrencyCode) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    /// Parse a client-supplied amount such as the `amount` query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError`] if the amount is blank, not an integer, not
    /// positive or above the per-charge maximum.
    pub fn parse_minor(amount: &str, currency: CurrencyCode) -> Result<Self, MoneyError> {
        let amount = amount.trim();
        if amount.is_empty() {
            return Err(MoneyError::Missing);
        }
        let minor: i64 = amount.parse().map_err(|_| MoneyError::NotAnInteger)?;
        Self::checked(minor, currency)
    }

    /// Validate an already-numeric amount.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError`] if the amount is not positive or too large.
    pub const fn checked(amount_minor: i64, currency: CurrencyCode) -> Result<Self, MoneyError> {
        if amount_minor <= 0 {
            return Err(MoneyError::NotPositive);
        }
        if amount_minor > MAX_AMOUNT_MINOR {
            return Err(MoneyError::TooLarge {
                max: MAX_AMOUNT_MINOR,
            });
        }
        Ok(Self::new(amount_minor, currency))
    }

    /// Amount in major units with two decimal places.
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.amount_minor, 2)
    }

    /// Parse a PayPal-style decimal string (`"99.00"`) back to minor units.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::NotAnInteger`] when the value has more than two
    /// decimal places or does not parse.
    pub fn from_decimal_str(value: &str, currency: CurrencyCode) -> Result<Self, MoneyError> {
        let decimal: Decimal = value.trim().parse().map_err(|_| MoneyError::NotAnInteger)?;
        let scaled = decimal
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or(MoneyError::TooLarge {
                max: MAX_AMOUNT_MINOR,
            })?;
        if scaled.fract() != Decimal::ZERO {
            return Err(MoneyError::NotAnInteger);
        }
        let minor = i64::try_from(scaled).map_err(|_| MoneyError::TooLarge {
            max: MAX_AMOUNT_MINOR,
        })?;
        Self::checked(minor, currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.2}", self.currency.as_upper(), self.to_decimal())
    }
}
