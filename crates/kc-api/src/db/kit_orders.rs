//! Kit order persistence on the `kit_orders` table.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use kc_core::{KitOrderId, Money, SubscriptionId, Timestamp, UserId};
use kc_state::{KitOrder, KitOrderStatus, PurchaseType, WorkflowState};

use super::{from_json, invalid_column, to_json};

/// Insert a new kit order.
pub async fn insert(pool: &PgPool, order: &KitOrder) -> Result<(), sqlx::Error> {
    let delivery = to_json(&order.delivery, "delivery")?;
    let timeline = to_json(&order.timeline, "timeline")?;

    sqlx::query(
        "INSERT INTO kit_orders (id, user_id, subscription_id, purchase_type, price, delivery, status, timeline, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(order.id.as_uuid())
    .bind(order.user_id.as_uuid())
    .bind(order.subscription_id.map(|s| *s.as_uuid()))
    .bind(order.purchase_type.as_str())
    .bind(order.price.amount())
    .bind(&delivery)
    .bind(order.status.as_str())
    .bind(&timeline)
    .bind(order.created_at.as_datetime())
    .bind(order.updated_at.as_datetime())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a status change. Applies only if the row still holds
/// `previous`; returns `false` when it did not.
pub async fn update_status(
    pool: &PgPool,
    order: &KitOrder,
    previous: KitOrderStatus,
) -> Result<bool, sqlx::Error> {
    let timeline = to_json(&order.timeline, "timeline")?;

    let result = sqlx::query(
        "UPDATE kit_orders SET status = $1, timeline = $2, updated_at = $3
         WHERE id = $4 AND status = $5",
    )
    .bind(order.status.as_str())
    .bind(&timeline)
    .bind(order.updated_at.as_datetime())
    .bind(order.id.as_uuid())
    .bind(previous.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load all kit orders on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<KitOrder>, sqlx::Error> {
    let rows = sqlx::query_as::<_, KitOrderRow>(
        "SELECT id, user_id, subscription_id, purchase_type, price, delivery, status, timeline, created_at, updated_at
         FROM kit_orders ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(KitOrderRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct KitOrderRow {
    id: Uuid,
    user_id: Uuid,
    subscription_id: Option<Uuid>,
    purchase_type: String,
    price: Decimal,
    delivery: serde_json::Value,
    status: String,
    timeline: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl KitOrderRow {
    fn into_record(self) -> Result<KitOrder, sqlx::Error> {
        let status = KitOrderStatus::from_name(&self.status)
            .ok_or_else(|| invalid_column("kit_orders.status", &self.status))?;
        let purchase_type = PurchaseType::from_name(&self.purchase_type)
            .ok_or_else(|| invalid_column("kit_orders.purchase_type", &self.purchase_type))?;
        let price = Money::new(self.price).map_err(|e| invalid_column("kit_orders.price", e))?;

        Ok(KitOrder {
            id: KitOrderId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            subscription_id: self.subscription_id.map(SubscriptionId::from_uuid),
            purchase_type,
            price,
            delivery: from_json(self.delivery, "kit_orders.delivery")?,
            status,
            timeline: from_json(self.timeline, "kit_orders.timeline")?,
            created_at: Timestamp::from_utc(self.created_at),
            updated_at: Timestamp::from_utc(self.updated_at),
        })
    }
}
