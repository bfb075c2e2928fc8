//! Core types for the lead capture and checkout domain.

pub mod email;
pub mod id;
pub mod money;
pub mod plan;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use money::{CurrencyCode, Money, MoneyError};
pub use plan::{BillingInterval, Plan, PlanError};
pub use status::*;
