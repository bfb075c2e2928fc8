//! Domain models for leads and payments.
//!
//! These types are separate from database row types; repositories convert
//! rows into them and report invalid stored values as data corruption.

pub mod lead;

pub use lead::{
    AbandonedForm, ConfirmOutcome, FormSubmission, LeadDetails, PaymentConfirmation,
};
