//! # Kit Order Workflow
//!
//! ```text
//! in_review ──► shipping ──► out_for_delivery ──► returning ──► received
//!     │
//!     └──► cancelled
//! ```
//!
//! `received` and `cancelled` are terminal. There are no self-transitions.
//!
//! A kit order is either paid once (`one_time`, priced by the kit price
//! calculator) or funded by a subscription entitlement (`subscription`,
//! price `0.00`).

use serde::{Deserialize, Serialize};

use kc_core::{KitOrderId, Money, SubscriptionId, Timestamp, UserId};

use crate::timeline::Timeline;
use crate::transition::{check_transition, StatusChange, TransitionError, WorkflowState};

/// Lifecycle status of a kit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KitOrderStatus {
    /// Submitted, awaiting admin review.
    InReview,
    /// Kit dispatched to the courier.
    Shipping,
    /// Kit with the courier for final delivery.
    OutForDelivery,
    /// Sample kit on its way back to the lab.
    Returning,
    /// Sample received by the lab. Terminal state.
    Received,
    /// Order cancelled during review. Terminal state.
    Cancelled,
}

impl KitOrderStatus {
    /// Every status, in workflow order.
    pub const ALL: [KitOrderStatus; 6] = [
        Self::InReview,
        Self::Shipping,
        Self::OutForDelivery,
        Self::Returning,
        Self::Received,
        Self::Cancelled,
    ];
}

impl WorkflowState for KitOrderStatus {
    const WORKFLOW: &'static str = "kit_order";

    fn all() -> &'static [Self] {
        &Self::ALL
    }

    fn next_allowed(&self) -> &'static [Self] {
        match self {
            Self::InReview => &[Self::Shipping, Self::Cancelled],
            Self::Shipping => &[Self::OutForDelivery],
            Self::OutForDelivery => &[Self::Returning],
            Self::Returning => &[Self::Received],
            Self::Received => &[],
            Self::Cancelled => &[],
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::InReview => "in_review",
            Self::Shipping => "shipping",
            Self::OutForDelivery => "out_for_delivery",
            Self::Returning => "returning",
            Self::Received => "received",
            Self::Cancelled => "cancelled",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "in_review" => Some(Self::InReview),
            "shipping" => Some(Self::Shipping),
            "out_for_delivery" => Some(Self::OutForDelivery),
            "returning" => Some(Self::Returning),
            "received" => Some(Self::Received),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for KitOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a kit order is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseType {
    /// Paid per order.
    OneTime,
    /// Funded by a subscription kit entitlement.
    Subscription,
}

impl PurchaseType {
    /// Persisted label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Subscription => "subscription",
        }
    }

    /// Parse a persisted label.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "one_time" => Some(Self::OneTime),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }
}

/// Resolved funding of a new kit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KitPurchase {
    /// Charged `price` once.
    OneTime {
        /// Price from the kit price calculator.
        price: Money,
    },
    /// One kit consumed from the given subscription.
    Subscription {
        /// The subscription whose entitlement was used.
        subscription_id: SubscriptionId,
    },
}

/// Where the kit goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub recipient_name: String,
    pub address: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A kit order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitOrder {
    pub id: KitOrderId,
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    pub purchase_type: PurchaseType,
    pub price: Money,
    pub delivery: DeliveryInfo,
    pub status: KitOrderStatus,
    pub timeline: Timeline,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl KitOrder {
    /// Create an order in `in_review`, with the first timeline entry.
    pub fn new(user_id: UserId, purchase: KitPurchase, delivery: DeliveryInfo, now: Timestamp) -> Self {
        let (purchase_type, price, subscription_id) = match purchase {
            KitPurchase::OneTime { price } => (PurchaseType::OneTime, price, None),
            KitPurchase::Subscription { subscription_id } => {
                (PurchaseType::Subscription, Money::zero(), Some(subscription_id))
            }
        };
        let mut timeline = Timeline::new();
        timeline.record_at(now, KitOrderStatus::InReview.as_str());
        Self {
            id: KitOrderId::new(),
            user_id,
            subscription_id,
            purchase_type,
            price,
            delivery,
            status: KitOrderStatus::InReview,
            timeline,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to` if the table allows it. On success the status,
    /// `updated_at`, and timeline change together; on failure nothing does.
    pub fn transition(
        &mut self,
        to: KitOrderStatus,
        now: Timestamp,
    ) -> Result<StatusChange<KitOrderStatus>, TransitionError> {
        check_transition(self.status, to)?;
        let from = self.status;
        let at = self.timeline.record_at(now, to.as_str()).at;
        self.status = to;
        self.updated_at = at;
        Ok(StatusChange { from, to, at })
    }

    /// Whether the order has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = KitOrderStatus> {
        prop::sample::select(KitOrderStatus::ALL.to_vec())
    }

    proptest! {
        /// A transition succeeds exactly when it is in the table.
        #[test]
        fn guard_matches_table(from in any_status(), to in any_status()) {
            let allowed = from.next_allowed().contains(&to);
            prop_assert_eq!(check_transition(from, to).is_ok(), allowed);
        }

        /// Random request sequences only ever produce table steps, one
        /// timeline entry per accepted step.
        #[test]
        fn random_walk_stays_on_table(requests in prop::collection::vec(any_status(), 0..20)) {
            let mut o = KitOrder::new(
                UserId::new(),
                KitPurchase::OneTime { price: Money::zero() },
                DeliveryInfo {
                    recipient_name: "r".to_string(),
                    address: "a".to_string(),
                    phone: None,
                    notes: None,
                },
                Timestamp::now(),
            );
            let mut accepted = 0usize;
            for to in requests {
                if o.transition(to, Timestamp::now()).is_ok() {
                    accepted += 1;
                    prop_assert_eq!(o.timeline.last().unwrap().label.as_str(), to.as_str());
                }
            }
            prop_assert_eq!(o.timeline.len(), accepted + 1);
            prop_assert!(o.timeline.replay_is_consistent::<KitOrderStatus>());
        }
    }
}
