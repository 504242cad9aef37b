//! # kc-core: Foundational Types for Kitcare
//!
//! The leaf of the Kitcare dependency DAG. Defines the primitives every other
//! crate builds on: identifier newtypes, UTC timestamps truncated to seconds,
//! fixed-point money, and the kit price calculator.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `UserId`, `KitOrderId`,
//!    `ConsultationId`, `SubscriptionId`, `DoctorId` are distinct types.
//!    A subscription id cannot be passed where a kit order id is expected.
//!
//! 2. **No binary floating point for money.** `Money` wraps
//!    `rust_decimal::Decimal` and serializes as a decimal string.
//!
//! 3. **UTC-only, second-resolution timestamps.** Timeline keys and expiry
//!    dates all flow through `Timestamp`.
//!
//! 4. **Configuration is injected.** The price calculator reads its inputs
//!    through the [`SettingsProvider`] trait, never from global state.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `kc-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod money;
pub mod pricing;
pub mod temporal;

pub use error::{PricingError, ValidationError};
pub use identity::{ConsultationId, DoctorId, KitOrderId, SubscriptionId, UserId};
pub use money::Money;
pub use pricing::{
    KitQuote, PriceCalculator, SettingsProvider, KIT_BASE_PRICE_KEY, KIT_SHIPPING_FEE_KEY,
};
pub use temporal::Timestamp;
