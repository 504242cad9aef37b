//! # Kit Order Routes
//!
//! Creation, reads, status transitions, client-initiated returns and the
//! per-order audit timeline. All state changes go through
//! [`crate::workflow`].

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use kc_core::{KitOrderId, UserId};
use kc_state::{DeliveryInfo, KitOrder, KitOrderStatus, PurchaseType, WorkflowState};

use super::{check_status_label, parse_status, ListParams};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::AppState;
use crate::workflow::{self, NewKitOrder};

/// Delivery details for a new kit order.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DeliveryBody {
    pub recipient_name: String,
    pub address: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<DeliveryBody> for DeliveryInfo {
    fn from(body: DeliveryBody) -> Self {
        Self {
            recipient_name: body.recipient_name.trim().to_string(),
            address: body.address.trim().to_string(),
            phone: body.phone,
            notes: body.notes,
        }
    }
}

/// Request to create a kit order.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateKitOrderRequest {
    /// Ordering user. Clients may omit it; admins must set it unless their
    /// token is bound to a user.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// `one_time` or `subscription`.
    pub purchase_type: String,
    pub delivery: DeliveryBody,
}

impl Validate for CreateKitOrderRequest {
    fn validate(&self) -> Result<(), String> {
        if PurchaseType::from_name(&self.purchase_type).is_none() {
            return Err(format!(
                "invalid purchase_type '{}'. Valid types: one_time, subscription",
                self.purchase_type
            ));
        }
        if self.delivery.recipient_name.trim().is_empty() {
            return Err("delivery.recipient_name must be non-empty".to_string());
        }
        if self.delivery.address.trim().is_empty() {
            return Err("delivery.address must be non-empty".to_string());
        }
        if self.delivery.address.len() > 1000 {
            return Err("delivery.address must not exceed 1000 characters".to_string());
        }
        Ok(())
    }
}

/// Request to change a kit order's status.
#[derive(Debug, Deserialize, ToSchema)]
pub struct KitOrderStatusRequest {
    /// Target status label, e.g. `shipping`.
    pub status: String,
}

impl Validate for KitOrderStatusRequest {
    fn validate(&self) -> Result<(), String> {
        check_status_label::<KitOrderStatus>(&self.status)
    }
}

/// One audit entry in a timeline response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimelineEntryView {
    /// UTC ISO-8601 timestamp, second resolution.
    pub at: String,
    pub label: String,
}

/// A kit order's audit trail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct KitOrderTimelineResponse {
    pub kit_order_id: Uuid,
    pub status: String,
    /// Entries in the order they were recorded.
    pub entries: Vec<TimelineEntryView>,
    /// Timestamp-keyed view kept for older consumers.
    pub legacy: BTreeMap<String, String>,
    /// Whether replaying `entries` through the transition table ends in
    /// `status`.
    pub consistent: bool,
}

/// Build the kit orders router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/kit-orders", get(list_kit_orders).post(create_kit_order))
        .route("/v1/kit-orders/:id", get(get_kit_order))
        .route("/v1/kit-orders/:id/status", put(transition_kit_order))
        .route("/v1/kit-orders/:id/return", post(return_kit_order))
        .route("/v1/kit-orders/:id/timeline", get(kit_order_timeline))
}

/// POST /v1/kit-orders: Create a kit order.
#[utoipa::path(
    post,
    path = "/v1/kit-orders",
    request_body = CreateKitOrderRequest,
    responses(
        (status = 201, description = "Kit order created in in_review"),
        (status = 409, description = "No kit entitlement available", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "kit-orders"
)]
pub(crate) async fn create_kit_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateKitOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<KitOrder>), AppError> {
    let req = extract_validated_json(body)?;
    let user_id = caller.resolve_subject(req.user_id.map(UserId::from_uuid))?;
    let purchase_type = PurchaseType::from_name(&req.purchase_type)
        .ok_or_else(|| AppError::Validation(format!("invalid purchase_type '{}'", req.purchase_type)))?;

    let order = workflow::create_kit_order(
        &state,
        &caller,
        NewKitOrder {
            user_id,
            purchase_type,
            delivery: req.delivery.into(),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/kit-orders: List kit orders, newest first.
#[utoipa::path(
    get,
    path = "/v1/kit-orders",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<usize>, Query, description = "Max items to return (default 100, max 1000)"),
        ("offset" = Option<usize>, Query, description = "Items to skip (default 0)"),
    ),
    responses(
        (status = 200, description = "Kit orders visible to the caller"),
    ),
    tag = "kit-orders"
)]
pub(crate) async fn list_kit_orders(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<KitOrder>>, AppError> {
    let status = params.status_filter::<KitOrderStatus>()?;
    let mut orders = state.kit_orders.filter(|order| {
        caller.can_access(order.user_id) && status.map_or(true, |s| order.status == s)
    });
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let offset = params.effective_offset().min(orders.len());
    let page = orders
        .into_iter()
        .skip(offset)
        .take(params.effective_limit())
        .collect();
    Ok(Json(page))
}

/// GET /v1/kit-orders/:id: Get a kit order.
#[utoipa::path(
    get,
    path = "/v1/kit-orders/{id}",
    params(("id" = Uuid, Path, description = "Kit order ID")),
    responses(
        (status = 200, description = "Kit order found"),
        (status = 404, description = "Kit order not found", body = crate::error::ErrorBody),
    ),
    tag = "kit-orders"
)]
pub(crate) async fn get_kit_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<KitOrder>, AppError> {
    let order = workflow::read_kit_order(&state, KitOrderId::from_uuid(id), &caller)?;
    Ok(Json(order))
}

/// PUT /v1/kit-orders/:id/status: Apply a status transition.
#[utoipa::path(
    put,
    path = "/v1/kit-orders/{id}/status",
    params(("id" = Uuid, Path, description = "Kit order ID")),
    request_body = KitOrderStatusRequest,
    responses(
        (status = 200, description = "Transition applied"),
        (status = 403, description = "Caller may not request this transition", body = crate::error::ErrorBody),
        (status = 404, description = "Kit order not found", body = crate::error::ErrorBody),
        (status = 409, description = "Concurrent modification", body = crate::error::ErrorBody),
        (status = 422, description = "Transition not allowed from the current status", body = crate::error::ErrorBody),
    ),
    tag = "kit-orders"
)]
pub(crate) async fn transition_kit_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<KitOrderStatusRequest>, JsonRejection>,
) -> Result<Json<KitOrder>, AppError> {
    let req = extract_validated_json(body)?;
    let target = parse_status::<KitOrderStatus>(&req.status)?;
    let order =
        workflow::apply_kit_order_transition(&state, KitOrderId::from_uuid(id), target, &caller).await?;
    Ok(Json(order))
}

/// POST /v1/kit-orders/:id/return: Start returning a delivered kit.
#[utoipa::path(
    post,
    path = "/v1/kit-orders/{id}/return",
    params(("id" = Uuid, Path, description = "Kit order ID")),
    responses(
        (status = 200, description = "Order moved to returning"),
        (status = 404, description = "Kit order not found", body = crate::error::ErrorBody),
        (status = 422, description = "Order is not out for delivery", body = crate::error::ErrorBody),
    ),
    tag = "kit-orders"
)]
pub(crate) async fn return_kit_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<KitOrder>, AppError> {
    let order = workflow::initiate_return(&state, KitOrderId::from_uuid(id), &caller).await?;
    Ok(Json(order))
}

/// GET /v1/kit-orders/:id/timeline: Audit timeline with replay check.
#[utoipa::path(
    get,
    path = "/v1/kit-orders/{id}/timeline",
    params(("id" = Uuid, Path, description = "Kit order ID")),
    responses(
        (status = 200, description = "Timeline", body = KitOrderTimelineResponse),
        (status = 404, description = "Kit order not found", body = crate::error::ErrorBody),
    ),
    tag = "kit-orders"
)]
pub(crate) async fn kit_order_timeline(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<KitOrderTimelineResponse>, AppError> {
    let order = workflow::read_kit_order(&state, KitOrderId::from_uuid(id), &caller)?;
    let consistent = workflow::kit_order_timeline_consistent(&order);
    if !consistent {
        tracing::warn!(kit_order_id = %order.id, status = %order.status, "kit order timeline does not replay to its status");
    }

    Ok(Json(KitOrderTimelineResponse {
        kit_order_id: *order.id.as_uuid(),
        status: order.status.as_str().to_string(),
        entries: order
            .timeline
            .entries()
            .iter()
            .map(|e| TimelineEntryView {
                at: e.at.to_iso8601(),
                label: e.label.clone(),
            })
            .collect(),
        legacy: order.timeline.to_legacy_map(),
        consistent,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_rejects_unknown_purchase_type() {
        let req = CreateKitOrderRequest {
            user_id: None,
            purchase_type: "rental".to_string(),
            delivery: DeliveryBody {
                recipient_name: "Amina".to_string(),
                address: "12 Canal Road".to_string(),
                phone: None,
                notes: None,
            },
        };
        assert!(req.validate().unwrap_err().contains("purchase_type"));
    }

    #[test]
    fn create_request_requires_address() {
        let req = CreateKitOrderRequest {
            user_id: None,
            purchase_type: "one_time".to_string(),
            delivery: DeliveryBody {
                recipient_name: "Amina".to_string(),
                address: "   ".to_string(),
                phone: None,
                notes: None,
            },
        };
        assert!(req.validate().unwrap_err().contains("address"));
    }

    #[test]
    fn status_request_lists_valid_statuses() {
        let req = KitOrderStatusRequest {
            status: "accepted".to_string(),
        };
        let err = req.validate().unwrap_err();
        assert!(err.contains("accepted"));
        assert!(err.contains("out_for_delivery"));
    }
}
