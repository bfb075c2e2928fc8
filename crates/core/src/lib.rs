//! Zero Cost Core - Shared domain types.
//!
//! Used by every crate in the workspace:
//! - `server` - Lead capture, checkout and webhook HTTP service
//! - `cli` - Migrations and maintenance commands
//!
//! # Architecture
//!
//! The core crate contains only types and validation - no I/O, no database
//! access, no HTTP clients. The optional `postgres` feature adds sqlx
//! encode/decode impls for the newtypes that are stored as columns.
//!
//! # Modules
//!
//! - [`types`] - Emails, form ids, plans, money and payment statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
