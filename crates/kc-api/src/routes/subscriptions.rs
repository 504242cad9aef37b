//! # Subscription Routes
//!
//! Subscription creation (one active subscription with remaining kits per
//! user), the kit entitlement ledger, and cancellation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use kc_core::{SubscriptionId, Timestamp, UserId};
use kc_state::{Subscription, SubscriptionTier};

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::AppState;
use crate::workflow;

/// Request to open a subscription.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    /// Subscribing user. Clients may omit it.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// `one_time`, `annual_moderate` or `annual_high`.
    pub tier: String,
}

impl Validate for CreateSubscriptionRequest {
    fn validate(&self) -> Result<(), String> {
        if SubscriptionTier::from_name(&self.tier).is_none() {
            return Err(format!(
                "invalid tier '{}'. Valid tiers: {}",
                self.tier,
                SubscriptionTier::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        Ok(())
    }
}

/// Query for the active subscription lookup.
#[derive(Debug, Deserialize, Default)]
pub struct ActiveQuery {
    /// User to look up. Admin only; clients always see their own.
    pub user_id: Option<Uuid>,
}

/// Result of consuming one kit.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UseKitResponse {
    pub subscription_id: Uuid,
    pub kits_used: u32,
    pub kits_allowed: u32,
    pub remaining_kits: u32,
    pub status: String,
}

impl From<&Subscription> for UseKitResponse {
    fn from(s: &Subscription) -> Self {
        Self {
            subscription_id: *s.id.as_uuid(),
            kits_used: s.kits_used,
            kits_allowed: s.kits_allowed,
            remaining_kits: s.remaining_kits(),
            status: s.status.as_str().to_string(),
        }
    }
}

/// Build the subscriptions router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/subscriptions", post(create_subscription))
        .route("/v1/subscriptions/active", get(get_active_subscription))
        .route("/v1/subscriptions/:id", get(get_subscription))
        .route("/v1/subscriptions/:id/use-kit", post(use_kit))
        .route("/v1/subscriptions/:id/cancel", post(cancel_subscription))
}

/// POST /v1/subscriptions: Open a subscription.
#[utoipa::path(
    post,
    path = "/v1/subscriptions",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created and active"),
        (status = 409, description = "User already has an active subscription with kits remaining", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn create_subscription(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateSubscriptionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let req = extract_validated_json(body)?;
    let user_id = caller.resolve_subject(req.user_id.map(UserId::from_uuid))?;
    let tier = SubscriptionTier::from_name(&req.tier)
        .ok_or_else(|| AppError::Validation(format!("invalid tier '{}'", req.tier)))?;
    let subscription = workflow::create_subscription(&state, &caller, user_id, tier).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// GET /v1/subscriptions/active: The caller's (or, for admins, the named
/// user's) active subscription with kits remaining.
#[utoipa::path(
    get,
    path = "/v1/subscriptions/active",
    params(("user_id" = Option<Uuid>, Query, description = "User to look up (admin only)")),
    responses(
        (status = 200, description = "Active subscription"),
        (status = 404, description = "No active subscription with kits remaining", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn get_active_subscription(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(query): Query<ActiveQuery>,
) -> Result<Json<Subscription>, AppError> {
    let user_id = caller.resolve_subject(query.user_id.map(UserId::from_uuid))?;
    workflow::get_active_subscription(&state, user_id, Timestamp::now())
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "user {user_id} has no active subscription with kits remaining"
            ))
        })
}

/// GET /v1/subscriptions/:id: Get a subscription.
#[utoipa::path(
    get,
    path = "/v1/subscriptions/{id}",
    params(("id" = Uuid, Path, description = "Subscription ID")),
    responses(
        (status = 200, description = "Subscription found"),
        (status = 404, description = "Subscription not found", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn get_subscription(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription =
        workflow::read_subscription(&state, SubscriptionId::from_uuid(id), &caller).await?;
    Ok(Json(subscription))
}

/// POST /v1/subscriptions/:id/use-kit: Consume one kit.
#[utoipa::path(
    post,
    path = "/v1/subscriptions/{id}/use-kit",
    params(("id" = Uuid, Path, description = "Subscription ID")),
    responses(
        (status = 200, description = "Kit consumed", body = UseKitResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ErrorBody),
        (status = 409, description = "No kits remaining or subscription inactive", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn use_kit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<UseKitResponse>, AppError> {
    let subscription = workflow::use_kit(&state, SubscriptionId::from_uuid(id), &caller).await?;
    Ok(Json(UseKitResponse::from(&subscription)))
}

/// POST /v1/subscriptions/:id/cancel: Cancel a subscription.
#[utoipa::path(
    post,
    path = "/v1/subscriptions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Subscription ID")),
    responses(
        (status = 200, description = "Subscription cancelled"),
        (status = 404, description = "Subscription not found", body = crate::error::ErrorBody),
        (status = 422, description = "Already cancelled", body = crate::error::ErrorBody),
    ),
    tag = "subscriptions"
)]
pub(crate) async fn cancel_subscription(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription =
        workflow::cancel_subscription(&state, SubscriptionId::from_uuid(id), &caller).await?;
    Ok(Json(subscription))
}
