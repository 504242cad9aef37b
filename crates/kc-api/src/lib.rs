//! # kc-api: Axum API Service for Kitcare
//!
//! HTTP surface over the Kitcare workflows: kit orders, consultations,
//! subscriptions with kit entitlements, pricing settings and the partner
//! doctor registry.
//!
//! ## API Surface
//!
//! | Prefix                 | Module                       |
//! |------------------------|------------------------------|
//! | `/v1/kit-orders/*`     | [`routes::kit_orders`]       |
//! | `/v1/consultations/*`  | [`routes::consultations`]    |
//! | `/v1/doctors`          | [`routes::doctors`]          |
//! | `/v1/subscriptions/*`  | [`routes::subscriptions`]    |
//! | `/v1/pricing/*`, `/v1/settings/*`, `/v1/metrics` | [`routes::pricing`] |
//! | `/openapi.json`        | [`openapi`]                  |
//! | `/health/*`            | unauthenticated probes       |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → RateLimitMiddleware → Handler
//! ```
//!
//! ## Crate Policy
//!
//! - Route handlers parse and validate requests; every state change goes
//!   through [`workflow`].
//! - All errors map to structured HTTP responses via `AppError`.

pub mod auth;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod settings;
pub mod state;
pub mod workflow;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};

pub use error::AppError;
pub use state::{AppConfig, AppState};

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) are mounted outside the auth middleware so
/// they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let limiter = RateLimiter::new(RateLimitConfig::default());

    let api = Router::new()
        .merge(routes::kit_orders::router())
        .merge(routes::consultations::router())
        .merge(routes::doctors::router())
        .merge(routes::subscriptions::router())
        .merge(routes::pricing::router())
        .merge(openapi::router());

    // Auth runs before rate limiting so the limiter can key on the caller.
    let mut api = api
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(from_fn(auth::auth_middleware));

    if state.config.metrics_enabled {
        api = api
            .layer(from_fn(middleware::metrics::metrics_middleware))
            .layer(axum::Extension(state.metrics.clone()));
    }

    let api = api
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .layer(axum::Extension(limiter))
        .with_state(state.clone());

    let unauthenticated = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// Liveness probe: the process is up.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: pricing settings resolve and, when configured, the
/// database answers.
///
/// Returns 200 "ready" or 503 with a diagnostic message.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if workflow::kit_price(&state).is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "pricing settings unavailable").into_response();
    }

    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!(error = %e, "readiness: database check failed");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response();
        }
    }

    (StatusCode::OK, "ready").into_response()
}
