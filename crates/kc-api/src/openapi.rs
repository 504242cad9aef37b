//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "`{role}:{user_id}:{secret}` or `{secret}`. Set the secret via AUTH_TOKEN.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

/// Assembled OpenAPI spec for the Kitcare API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kitcare API",
        version = "0.1.0",
        description = "Kit order and consultation status workflows, subscription kit entitlements, kit pricing and the partner doctor registry.\n\nAuthentication: Bearer token via `Authorization: Bearer <token>` header. Health probes (`/health/*`) are unauthenticated."
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Kit orders ───────────────────────────────────────────────────
        crate::routes::kit_orders::create_kit_order,
        crate::routes::kit_orders::list_kit_orders,
        crate::routes::kit_orders::get_kit_order,
        crate::routes::kit_orders::transition_kit_order,
        crate::routes::kit_orders::return_kit_order,
        crate::routes::kit_orders::kit_order_timeline,
        // ── Consultations ────────────────────────────────────────────────
        crate::routes::consultations::create_consultation,
        crate::routes::consultations::list_consultations,
        crate::routes::consultations::get_consultation,
        crate::routes::consultations::transition_consultation,
        crate::routes::consultations::assign_doctor,
        // ── Partner doctors ──────────────────────────────────────────────
        crate::routes::doctors::create_doctor,
        crate::routes::doctors::list_doctors,
        crate::routes::doctors::deactivate_doctor,
        // ── Subscriptions ────────────────────────────────────────────────
        crate::routes::subscriptions::create_subscription,
        crate::routes::subscriptions::get_active_subscription,
        crate::routes::subscriptions::get_subscription,
        crate::routes::subscriptions::use_kit,
        crate::routes::subscriptions::cancel_subscription,
        // ── Pricing & settings ───────────────────────────────────────────
        crate::routes::pricing::get_kit_price,
        crate::routes::pricing::list_settings,
        crate::routes::pricing::update_setting,
        crate::routes::pricing::get_metrics,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::state::PartnerDoctor,
            crate::middleware::metrics::MetricsSnapshot,
            crate::routes::ListParams,
            crate::routes::kit_orders::DeliveryBody,
            crate::routes::kit_orders::CreateKitOrderRequest,
            crate::routes::kit_orders::KitOrderStatusRequest,
            crate::routes::kit_orders::TimelineEntryView,
            crate::routes::kit_orders::KitOrderTimelineResponse,
            crate::routes::consultations::CreateConsultationRequest,
            crate::routes::consultations::ConsultationStatusRequest,
            crate::routes::consultations::AssignDoctorRequest,
            crate::routes::doctors::CreateDoctorRequest,
            crate::routes::subscriptions::CreateSubscriptionRequest,
            crate::routes::subscriptions::UseKitResponse,
            crate::routes::pricing::KitPriceResponse,
            crate::routes::pricing::UpdateSettingRequest,
            crate::routes::pricing::SettingResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "kit-orders", description = "Kit order lifecycle and audit timeline"),
        (name = "consultations", description = "Consultation requests and scheduling"),
        (name = "doctors", description = "Partner doctor registry"),
        (name = "subscriptions", description = "Subscriptions and kit entitlements"),
        (name = "pricing", description = "Kit price, settings and counters"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
