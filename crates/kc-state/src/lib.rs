//! # kc-state: Workflow State Machines and the Entitlement Ledger
//!
//! The part of Kitcare with real invariants. Everything here is pure and
//! synchronous; callers provide the clock (`Timestamp`) and the locking.
//!
//! ## State Machines
//!
//! - **Kit order** (`kit_order.rs`):
//!   `in_review → shipping → out_for_delivery → returning → received`,
//!   with `in_review → cancelled`. Terminal: `received`, `cancelled`.
//!
//! - **Consultation** (`consultation.rs`):
//!   `received → coordinating → confirmed → reminder_sent`.
//!   Terminal: `reminder_sent`. `in_review` is read as `received`.
//!
//! Both implement [`WorkflowState`], whose `next_allowed()` is the single
//! source of truth for legal moves. [`check_transition`] is the guard every
//! status write goes through.
//!
//! ## Ledger
//!
//! - **Subscription** (`subscription.rs`): kits_allowed / kits_used quota,
//!   active / expired / cancelled status, annual expiry.
//!
//! ## Audit
//!
//! - **Timeline** (`timeline.rs`): append-only, monotonically non-decreasing
//!   list of `(timestamp, label)` entries attached to every aggregate.

pub mod consultation;
pub mod kit_order;
pub mod subscription;
pub mod timeline;
pub mod transition;

pub use consultation::{
    Appointment, ConsultationError, ConsultationRequest, ConsultationStatus, SchedulePreferences,
};
pub use kit_order::{DeliveryInfo, KitOrder, KitOrderStatus, KitPurchase, PurchaseType};
pub use subscription::{EntitlementError, Subscription, SubscriptionStatus, SubscriptionTier};
pub use timeline::{Timeline, TimelineEntry};
pub use transition::{check_transition, StatusChange, TransitionError, WorkflowState};
