//! Subscription plans offered on the pricing page.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::money::{CurrencyCode, Money};

/// Error returned when a plan identifier is not recognised.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan is required")]
    Missing,
    #[error("unknown plan: {0}")]
    Unknown(String),
}

/// How often a plan is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

/// A plan the lead can select.
///
/// The price lives here, server-side. Clients send the amount they were
/// shown and it must match; they never choose what they are charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Annual,
}

impl Plan {
    /// All plans, in pricing-page order.
    pub const ALL: [Self; 2] = [Self::Monthly, Self::Annual];

    /// Parse a plan id. Accepts `monthly`, `annual` and the legacy `yearly`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] for empty or unknown identifiers.
    pub fn parse(s: &str) -> Result<Self, PlanError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(PlanError::Missing),
            "monthly" => Ok(Self::Monthly),
            "annual" | "yearly" => Ok(Self::Annual),
            other => Err(PlanError::Unknown(other.to_owned())),
        }
    }

    /// Stable identifier stored in the database and gateway metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    /// Name shown on the hosted checkout page.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Monthly => "Zero Cost Website - Plano Mensal",
            Self::Annual => "Zero Cost Website - Plano Anual",
        }
    }

    #[must_use]
    pub const fn interval(&self) -> BillingInterval {
        match self {
            Self::Monthly => BillingInterval::Month,
            Self::Annual => BillingInterval::Year,
        }
    }

    /// Authoritative price of the plan.
    #[must_use]
    pub const fn price(&self) -> Money {
        match self {
            Self::Monthly => Money::new(9_900, CurrencyCode::Brl),
            Self::Annual => Money::new(99_000, CurrencyCode::Brl),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Plan {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
