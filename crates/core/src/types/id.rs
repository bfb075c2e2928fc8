//! Identifiers for leads and payments.
//!
//! Payment rows are keyed by UUIDs generated server-side and use the
//! `define_uuid_id!` macro. Form ids are different: the browser holds them
//! across the multi-step form and the checkout redirect, and older clients
//! minted their own, so [`FormId`] is a validated opaque token.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Macro to define a UUID-backed ID wrapper.
///
/// Creates a newtype wrapper around `uuid::Uuid` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - `new_v4()`, `from_uuid()`, `as_uuid()`
/// - `sqlx` `Type`, `Encode`, and `Decode` implementations (with `postgres` feature)
///
/// # Example
///
/// ```rust
/// # use zero_cost_core::define_uuid_id;
/// define_uuid_id!(InvoiceId);
///
/// let a = InvoiceId::new_v4();
/// let b = InvoiceId::from_uuid(*a.as_uuid());
/// assert_eq!(a, b);
/// ```
#[macro_export]
macro_rules! define_uuid_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Generate a fresh random ID.
            #[must_use]
            pub fn new_v4() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: ::uuid::Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &::uuid::Uuid {
                &self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <::uuid::Uuid as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <::uuid::Uuid as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let id = <::uuid::Uuid as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                Ok(Self(id))
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <::uuid::Uuid as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

define_uuid_id!(PaymentId);

/// Errors that can occur when parsing a [`FormId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FormIdError {
    #[error("form id cannot be empty")]
    Empty,
    #[error("form id must be at most {max} characters")]
    TooLong { max: usize },
    #[error("form id may only contain letters, digits, '-' and '_'")]
    InvalidCharacter,
}

/// Identifier of a captured lead form.
///
/// 1-64 characters of `[A-Za-z0-9_-]`. Ids minted by this service are UUID
/// v4 strings; the same value is used as the primary key of both the
/// staging row and the confirmed submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormId(String);

impl FormId {
    /// Maximum accepted length.
    pub const MAX_LENGTH: usize = 64;

    /// Mint a new random form id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Parse a form id received from a client or a gateway's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`FormIdError`] if the token is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn parse(s: &str) -> Result<Self, FormIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FormIdError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(FormIdError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FormIdError::InvalidCharacter);
        }
        Ok(Self(s.to_owned()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for FormId {
    type Err = FormIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FormId {
    type Error = FormIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FormId> for String {
    fn from(id: FormId) -> Self {
        id.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for FormId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for FormId {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for FormId {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_form_id_is_uuid() {
        let id = FormId::generate();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
        assert_ne!(id, FormId::generate());
    }

    #[test]
    fn test_short_client_ids_are_accepted() {
        assert_eq!(FormId::parse("abc").unwrap().as_str(), "abc");
        assert_eq!(FormId::parse(" form_42-x ").unwrap().as_str(), "form_42-x");
    }

    #[test]
    fn test_form_id_rejects_bad_tokens() {
        assert_eq!(FormId::parse(""), Err(FormIdError::Empty));
        assert_eq!(
            FormId::parse("abc'; drop table"),
            Err(FormIdError::InvalidCharacter)
        );
        assert!(matches!(
            FormId::parse(&"a".repeat(65)),
            Err(FormIdError::TooLong { max: 64 })
        ));
    }

    #[test]
    fn test_payment_id_display_matches_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let id = PaymentId::from_uuid(uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }
}
