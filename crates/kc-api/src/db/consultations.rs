//! Consultation persistence on the `consultations` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use kc_core::{ConsultationId, DoctorId, Timestamp, UserId};
use kc_state::{ConsultationRequest, ConsultationStatus, WorkflowState};

use super::{from_json, invalid_column, to_json};

/// Insert a new consultation request.
pub async fn insert(pool: &PgPool, consultation: &ConsultationRequest) -> Result<(), sqlx::Error> {
    let preferences = to_json(&consultation.preferences, "preferences")?;
    let timeline = to_json(&consultation.timeline, "timeline")?;

    sqlx::query(
        "INSERT INTO consultations (id, user_id, preferences, status, doctor_id, scheduled_at, subscription_tier, timeline, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(consultation.id.as_uuid())
    .bind(consultation.user_id.as_uuid())
    .bind(&preferences)
    .bind(consultation.status.as_str())
    .bind(consultation.doctor_id.map(|d| *d.as_uuid()))
    .bind(consultation.scheduled_at.map(|t| *t.as_datetime()))
    .bind(consultation.subscription_tier.as_deref())
    .bind(&timeline)
    .bind(consultation.created_at.as_datetime())
    .bind(consultation.updated_at.as_datetime())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist status, appointment and timeline. Applies only if the row still
/// holds `previous`; returns `false` when it did not.
pub async fn update(
    pool: &PgPool,
    consultation: &ConsultationRequest,
    previous: ConsultationStatus,
) -> Result<bool, sqlx::Error> {
    let timeline = to_json(&consultation.timeline, "timeline")?;

    // Rows written before the rename may still hold `in_review`.
    let result = sqlx::query(
        "UPDATE consultations
         SET status = $1, doctor_id = $2, scheduled_at = $3, timeline = $4, updated_at = $5
         WHERE id = $6 AND (status = $7 OR ($7 = 'received' AND status = 'in_review'))",
    )
    .bind(consultation.status.as_str())
    .bind(consultation.doctor_id.map(|d| *d.as_uuid()))
    .bind(consultation.scheduled_at.map(|t| *t.as_datetime()))
    .bind(&timeline)
    .bind(consultation.updated_at.as_datetime())
    .bind(consultation.id.as_uuid())
    .bind(previous.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load all consultations on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<ConsultationRequest>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ConsultationRow>(
        "SELECT id, user_id, preferences, status, doctor_id, scheduled_at, subscription_tier, timeline, created_at, updated_at
         FROM consultations ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ConsultationRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct ConsultationRow {
    id: Uuid,
    user_id: Uuid,
    preferences: serde_json::Value,
    status: String,
    doctor_id: Option<Uuid>,
    scheduled_at: Option<DateTime<Utc>>,
    subscription_tier: Option<String>,
    timeline: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConsultationRow {
    fn into_record(self) -> Result<ConsultationRequest, sqlx::Error> {
        let status = ConsultationStatus::from_name(&self.status)
            .ok_or_else(|| invalid_column("consultations.status", &self.status))?;

        Ok(ConsultationRequest {
            id: ConsultationId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            preferences: from_json(self.preferences, "consultations.preferences")?,
            status,
            doctor_id: self.doctor_id.map(DoctorId::from_uuid),
            scheduled_at: self.scheduled_at.map(Timestamp::from_utc),
            subscription_tier: self.subscription_tier,
            timeline: from_json(self.timeline, "consultations.timeline")?,
            created_at: Timestamp::from_utc(self.created_at),
            updated_at: Timestamp::from_utc(self.updated_at),
        })
    }
}
