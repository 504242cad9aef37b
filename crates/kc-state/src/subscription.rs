//! # Subscription Entitlement Ledger
//!
//! A subscription is a prepaid allowance of kits. Each subscription-funded
//! kit order consumes one kit through [`Subscription::use_kit`].
//!
//! | tier | kits | date expiry |
//! |---|---|---|
//! | `one_time` | 1 | never |
//! | `annual_moderate` | 2 | created_at + 1 year |
//! | `annual_high` | 4 | created_at + 1 year |
//!
//! ## Invariants
//!
//! - `0 ≤ kits_used ≤ kits_allowed` at all times.
//! - A failed `use_kit` or `cancel` leaves the subscription unchanged.
//! - Every ledger event appends a timeline entry: `active`, `kit_used`,
//!   `expired`, `cancelled`.
//!
//! Methods take `&mut self`; cross-thread atomicity of `use_kit` comes from
//! the store's write lock in the API layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kc_core::{Money, SubscriptionId, Timestamp, UserId};

use crate::timeline::Timeline;

/// Timeline label appended when a kit is consumed.
pub const KIT_USED_LABEL: &str = "kit_used";

/// Subscription product tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    /// A single kit, no date expiry.
    OneTime,
    /// Two kits over one year.
    AnnualModerate,
    /// Four kits over one year.
    AnnualHigh,
}

impl SubscriptionTier {
    /// Every tier.
    pub const ALL: [SubscriptionTier; 3] = [Self::OneTime, Self::AnnualModerate, Self::AnnualHigh];

    /// Kits granted by this tier.
    pub fn kits_allowed(&self) -> u32 {
        match self {
            Self::OneTime => 1,
            Self::AnnualModerate => 2,
            Self::AnnualHigh => 4,
        }
    }

    /// Whether the tier expires one year after creation.
    pub fn is_annual(&self) -> bool {
        !matches!(self, Self::OneTime)
    }

    /// Persisted label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::AnnualModerate => "annual_moderate",
            Self::AnnualHigh => "annual_high",
        }
    }

    /// Parse a persisted label.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "one_time" => Some(Self::OneTime),
            "annual_moderate" => Some(Self::AnnualModerate),
            "annual_high" => Some(Self::AnnualHigh),
            _ => None,
        }
    }

    /// Settings key holding this tier's price.
    pub fn price_setting_key(&self) -> String {
        format!("subscription.{}.price", self.as_str())
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    /// Persisted label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted label.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger operation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// No kits remain.
    #[error("subscription {subscription_id} has no kits remaining ({kits_used}/{kits_allowed} used)")]
    Exhausted {
        subscription_id: SubscriptionId,
        kits_used: u32,
        kits_allowed: u32,
    },

    /// Kits remain but the subscription is not active (cancelled or past
    /// its expiry date).
    #[error("subscription {subscription_id} is not active (status {status})")]
    Inactive {
        subscription_id: SubscriptionId,
        status: SubscriptionStatus,
    },

    /// `cancel` on a subscription that is already cancelled.
    #[error("subscription {subscription_id} is already cancelled")]
    AlreadyCancelled { subscription_id: SubscriptionId },
}

/// A kit entitlement ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub tier: SubscriptionTier,
    pub price: Money,
    pub kits_allowed: u32,
    pub kits_used: u32,
    pub created_at: Timestamp,
    /// Set for annual tiers only.
    pub expires_at: Option<Timestamp>,
    pub status: SubscriptionStatus,
    pub timeline: Timeline,
}

impl Subscription {
    /// Open a new active subscription.
    pub fn new(user_id: UserId, tier: SubscriptionTier, price: Money, now: Timestamp) -> Self {
        let mut timeline = Timeline::new();
        timeline.record_at(now, SubscriptionStatus::Active.as_str());
        Self {
            id: SubscriptionId::new(),
            user_id,
            tier,
            price,
            kits_allowed: tier.kits_allowed(),
            kits_used: 0,
            created_at: now,
            expires_at: tier.is_annual().then(|| now.plus_one_year()),
            status: SubscriptionStatus::Active,
            timeline,
        }
    }

    /// Active status, and for annual tiers an expiry still in the future.
    /// A one-time subscription is active only while its kit is unused.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        if self.status != SubscriptionStatus::Active {
            return false;
        }
        if self.tier.is_annual() {
            matches!(self.expires_at, Some(expires) if expires > now)
        } else {
            self.kits_used < self.kits_allowed
        }
    }

    /// Whether any kit is left to use.
    pub fn has_remaining_kits(&self) -> bool {
        self.kits_used < self.kits_allowed
    }

    /// Kits left to use.
    pub fn remaining_kits(&self) -> u32 {
        self.kits_allowed.saturating_sub(self.kits_used)
    }

    /// Consume one kit. The increment and its `kit_used` timeline entry
    /// happen together or not at all. Using the last kit of a one-time
    /// subscription also expires it.
    pub fn use_kit(&mut self, now: Timestamp) -> Result<u32, EntitlementError> {
        if !self.has_remaining_kits() {
            return Err(EntitlementError::Exhausted {
                subscription_id: self.id,
                kits_used: self.kits_used,
                kits_allowed: self.kits_allowed,
            });
        }
        if !self.is_active_at(now) {
            return Err(EntitlementError::Inactive {
                subscription_id: self.id,
                status: self.status,
            });
        }
        self.kits_used += 1;
        self.timeline.record_at(now, KIT_USED_LABEL);
        if !self.tier.is_annual() && !self.has_remaining_kits() {
            self.status = SubscriptionStatus::Expired;
            self.timeline.record_at(now, SubscriptionStatus::Expired.as_str());
        }
        Ok(self.remaining_kits())
    }

    /// Cancel. Fails if already cancelled; an expired subscription may
    /// still be cancelled.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), EntitlementError> {
        if self.status == SubscriptionStatus::Cancelled {
            return Err(EntitlementError::AlreadyCancelled {
                subscription_id: self.id,
            });
        }
        self.status = SubscriptionStatus::Cancelled;
        self.timeline.record_at(now, SubscriptionStatus::Cancelled.as_str());
        Ok(())
    }

    /// Mark an active annual subscription past its expiry as `expired`.
    /// Returns whether anything changed.
    pub fn expire_if_due(&mut self, now: Timestamp) -> bool {
        let due = self.status == SubscriptionStatus::Active
            && matches!(self.expires_at, Some(expires) if expires <= now);
        if due {
            self.status = SubscriptionStatus::Expired;
            self.timeline.record_at(now, SubscriptionStatus::Expired.as_str());
        }
        due
    }
}
