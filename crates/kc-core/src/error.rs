//! # Error Types
//!
//! Error hierarchy shared by the Kitcare crates. All errors use `thiserror`
//! for derive-based `Display` and `Error` implementations.
//!
//! State machine and entitlement errors live next to their state machines in
//! `kc-state`; this module only carries the errors raised by the core
//! primitives themselves.

use thiserror::Error;

/// A value did not satisfy its domain constraints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A timestamp string could not be parsed or was not UTC.
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A monetary amount could not be parsed.
    #[error("invalid amount {value:?}: {reason}")]
    InvalidAmount {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A monetary amount was negative.
    #[error("amount must not be negative, got {0}")]
    NegativeAmount(String),
}

/// Errors raised while computing a price from configured settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// A required setting has no value.
    #[error("setting {0:?} is not configured")]
    MissingSetting(String),

    /// Decimal arithmetic overflowed.
    #[error("price arithmetic overflow")]
    Overflow,
}
