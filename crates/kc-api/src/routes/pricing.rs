//! # Pricing & Settings Routes
//!
//! The current kit price, admin setting updates, and the in-process
//! counters.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use kc_core::Money;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::middleware::metrics::MetricsSnapshot;
use crate::state::AppState;
use crate::workflow;

/// Current one-time kit price and its components.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct KitPriceResponse {
    /// Base price plus shipping, two decimal places.
    pub price: String,
    pub base_price: String,
    pub shipping_fee: String,
}

/// Request to update one setting.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSettingRequest {
    /// Non-negative decimal, e.g. `"430.00"`.
    pub value: String,
}

impl Validate for UpdateSettingRequest {
    fn validate(&self) -> Result<(), String> {
        Money::parse(&self.value).map(|_| ()).map_err(|e| e.to_string())
    }
}

/// A stored setting.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SettingResponse {
    pub key: String,
    pub value: String,
}

/// Build the pricing and settings router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/pricing/kit", get(get_kit_price))
        .route("/v1/settings", get(list_settings))
        .route("/v1/settings/:key", put(update_setting))
        .route("/v1/metrics", get(get_metrics))
}

/// GET /v1/pricing/kit: Current one-time kit price.
#[utoipa::path(
    get,
    path = "/v1/pricing/kit",
    responses(
        (status = 200, description = "Current kit price", body = KitPriceResponse),
        (status = 500, description = "Pricing settings missing", body = crate::error::ErrorBody),
    ),
    tag = "pricing"
)]
pub(crate) async fn get_kit_price(
    State(state): State<AppState>,
) -> Result<Json<KitPriceResponse>, AppError> {
    let quote = workflow::kit_quote(&state)?;
    Ok(Json(KitPriceResponse {
        price: quote.total.to_string(),
        base_price: quote.base_price.to_string(),
        shipping_fee: quote.shipping_fee.to_string(),
    }))
}

/// GET /v1/settings: All settings, sorted by key (admin).
#[utoipa::path(
    get,
    path = "/v1/settings",
    responses(
        (status = 200, description = "Setting values keyed by name"),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
    ),
    tag = "pricing"
)]
pub(crate) async fn list_settings(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    require_role(&caller, Role::Admin)?;
    let settings = state
        .settings
        .snapshot()
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();
    Ok(Json(settings))
}

/// PUT /v1/settings/:key: Update a setting (admin). The next price read
/// observes the new value.
#[utoipa::path(
    put,
    path = "/v1/settings/{key}",
    params(("key" = String, Path, description = "Setting key, e.g. kit.base_price")),
    request_body = UpdateSettingRequest,
    responses(
        (status = 200, description = "Setting stored", body = SettingResponse),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid value", body = crate::error::ErrorBody),
    ),
    tag = "pricing"
)]
pub(crate) async fn update_setting(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(key): Path<String>,
    body: Result<Json<UpdateSettingRequest>, JsonRejection>,
) -> Result<Json<SettingResponse>, AppError> {
    let req = extract_validated_json(body)?;
    if key.trim().is_empty() || key.len() > 128 {
        return Err(AppError::Validation(
            "setting key must be 1 to 128 characters".to_string(),
        ));
    }
    let value = Money::parse(&req.value)?;
    workflow::update_setting(&state, &caller, &key, value).await?;
    Ok(Json(SettingResponse {
        key,
        value: value.to_string(),
    }))
}

/// GET /v1/metrics: Request and workflow counters (admin).
#[utoipa::path(
    get,
    path = "/v1/metrics",
    responses(
        (status = 200, description = "Counter snapshot", body = MetricsSnapshot),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
    ),
    tag = "pricing"
)]
pub(crate) async fn get_metrics(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<MetricsSnapshot>, AppError> {
    require_role(&caller, Role::Admin)?;
    Ok(Json(state.metrics.snapshot()))
}
