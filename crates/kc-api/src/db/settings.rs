//! Setting persistence on the `settings` table.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::PgPool;

use kc_core::Money;

use super::invalid_column;

/// Insert or replace one setting.
pub async fn upsert(pool: &PgPool, key: &str, value: Money) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, now())
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
    )
    .bind(key)
    .bind(value.amount())
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert seed values for keys that are not yet stored. Existing values win.
pub async fn seed_missing(pool: &PgPool, seed: &HashMap<String, Money>) -> Result<(), sqlx::Error> {
    for (key, value) in seed {
        sqlx::query("INSERT INTO settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
            .bind(key)
            .bind(value.amount())
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Load every setting.
pub async fn load_all(pool: &PgPool) -> Result<Vec<(String, Money)>, sqlx::Error> {
    let rows: Vec<(String, Decimal)> = sqlx::query_as("SELECT key, value FROM settings")
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|(key, value)| {
            Money::new(value)
                .map(|money| (key, money))
                .map_err(|e| invalid_column("settings.value", e))
        })
        .collect()
}
