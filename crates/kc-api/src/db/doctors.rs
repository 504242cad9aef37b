//! Partner doctor persistence on the `partner_doctors` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::state::PartnerDoctor;

/// Insert a new partner doctor.
pub async fn insert(pool: &PgPool, doctor: &PartnerDoctor) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO partner_doctors (id, name, specialty, active, created_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(doctor.id)
    .bind(&doctor.name)
    .bind(doctor.specialty.as_deref())
    .bind(doctor.active)
    .bind(doctor.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a doctor inactive. Applies only if the row is still active;
/// returns `false` when it was not.
pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE partner_doctors SET active = FALSE WHERE id = $1 AND active")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Load all partner doctors on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<PartnerDoctor>, sqlx::Error> {
    sqlx::query_as::<_, PartnerDoctor>(
        "SELECT id, name, specialty, active, created_at FROM partner_doctors ORDER BY created_at",
    )
    .fetch_all(pool)
    .await
}
