//! # Database Persistence Layer
//!
//! Postgres persistence for Kitcare state via SQLx.
//!
//! The database layer is optional. When `DATABASE_URL` is set, every
//! accepted change is written through to Postgres and the in-memory stores
//! are hydrated from it on startup. When absent, the API runs in-memory only.
//!
//! Status updates are optimistic: the prior status (or prior `kits_used`)
//! is part of the `WHERE` clause, and zero rows affected means another
//! writer got there first.

pub mod consultations;
pub mod doctors;
pub mod kit_orders;
pub mod settings;
pub mod subscriptions;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Serialize a value into a JSONB column.
fn to_json<T: Serialize>(value: &T, what: &'static str) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, column = what, "failed to serialize column");
        sqlx::Error::Encode(Box::new(e))
    })
}

/// Deserialize a JSONB column.
fn from_json<T: DeserializeOwned>(value: serde_json::Value, what: &'static str) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(error = %e, column = what, "failed to deserialize column");
        sqlx::Error::Decode(Box::new(e))
    })
}

/// Report a row value the domain types reject.
fn invalid_column(column: &'static str, value: impl std::fmt::Display) -> sqlx::Error {
    let message = format!("invalid value {value} in column {column}");
    tracing::error!(column, "{message}");
    sqlx::Error::Decode(message.into())
}
