//! Subscription ledger persistence on the `subscriptions` table.
//!
//! `kits_used` is only ever written with the prior value in the `WHERE`
//! clause, so two instances can never both consume the last kit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use kc_core::{Money, SubscriptionId, Timestamp, UserId};
use kc_state::{Subscription, SubscriptionStatus, SubscriptionTier};

use super::{from_json, invalid_column, to_json};

/// Insert a new subscription.
pub async fn insert(pool: &PgPool, subscription: &Subscription) -> Result<(), sqlx::Error> {
    let timeline = to_json(&subscription.timeline, "timeline")?;

    sqlx::query(
        "INSERT INTO subscriptions (id, user_id, tier, price, kits_allowed, kits_used, status, timeline, created_at, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(subscription.id.as_uuid())
    .bind(subscription.user_id.as_uuid())
    .bind(subscription.tier.as_str())
    .bind(subscription.price.amount())
    .bind(i64::from(subscription.kits_allowed))
    .bind(i64::from(subscription.kits_used))
    .bind(subscription.status.as_str())
    .bind(&timeline)
    .bind(subscription.created_at.as_datetime())
    .bind(subscription.expires_at.map(|t| *t.as_datetime()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist `kits_used`, status and timeline. Applies only if the row still
/// holds `prev_kits_used` and `prev_status`; returns `false` when it did not.
pub async fn update_ledger(
    pool: &PgPool,
    subscription: &Subscription,
    prev_kits_used: u32,
    prev_status: SubscriptionStatus,
) -> Result<bool, sqlx::Error> {
    let timeline = to_json(&subscription.timeline, "timeline")?;

    let result = sqlx::query(
        "UPDATE subscriptions SET kits_used = $1, status = $2, timeline = $3
         WHERE id = $4 AND kits_used = $5 AND status = $6",
    )
    .bind(i64::from(subscription.kits_used))
    .bind(subscription.status.as_str())
    .bind(&timeline)
    .bind(subscription.id.as_uuid())
    .bind(i64::from(prev_kits_used))
    .bind(prev_status.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load all subscriptions on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(
        "SELECT id, user_id, tier, price, kits_allowed, kits_used, status, timeline, created_at, expires_at
         FROM subscriptions ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SubscriptionRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    tier: String,
    price: Decimal,
    kits_allowed: i64,
    kits_used: i64,
    status: String,
    timeline: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl SubscriptionRow {
    fn into_record(self) -> Result<Subscription, sqlx::Error> {
        let tier = SubscriptionTier::from_name(&self.tier)
            .ok_or_else(|| invalid_column("subscriptions.tier", &self.tier))?;
        let status = SubscriptionStatus::from_name(&self.status)
            .ok_or_else(|| invalid_column("subscriptions.status", &self.status))?;
        let kits_allowed = u32::try_from(self.kits_allowed)
            .map_err(|_| invalid_column("subscriptions.kits_allowed", self.kits_allowed))?;
        let kits_used = u32::try_from(self.kits_used)
            .ok()
            .filter(|used| *used <= kits_allowed)
            .ok_or_else(|| invalid_column("subscriptions.kits_used", self.kits_used))?;
        let price = Money::new(self.price).map_err(|e| invalid_column("subscriptions.price", e))?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            tier,
            price,
            kits_allowed,
            kits_used,
            created_at: Timestamp::from_utc(self.created_at),
            expires_at: self.expires_at.map(Timestamp::from_utc),
            status,
            timeline: from_json(self.timeline, "subscriptions.timeline")?,
        })
    }
}
