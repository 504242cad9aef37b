//! # Partner Doctor Routes
//!
//! Admin-only registry of doctors consultations can be assigned to.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use kc_core::DoctorId;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::{AppState, PartnerDoctor};
use crate::workflow;

/// Request to register a partner doctor.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDoctorRequest {
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
}

impl Validate for CreateDoctorRequest {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must be non-empty".to_string());
        }
        if self.name.len() > 255 {
            return Err("name must not exceed 255 characters".to_string());
        }
        Ok(())
    }
}

/// Build the partner doctors router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/doctors", get(list_doctors).post(create_doctor))
        .route("/v1/doctors/:id/deactivate", post(deactivate_doctor))
}

/// POST /v1/doctors: Register a partner doctor (admin).
#[utoipa::path(
    post,
    path = "/v1/doctors",
    request_body = CreateDoctorRequest,
    responses(
        (status = 201, description = "Doctor registered", body = PartnerDoctor),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "doctors"
)]
pub(crate) async fn create_doctor(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateDoctorRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PartnerDoctor>), AppError> {
    let req = extract_validated_json(body)?;
    let doctor = workflow::create_doctor(
        &state,
        &caller,
        req.name.trim().to_string(),
        req.specialty,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(doctor)))
}

/// GET /v1/doctors: List partner doctors by name (admin).
#[utoipa::path(
    get,
    path = "/v1/doctors",
    responses(
        (status = 200, description = "Registered doctors", body = Vec<PartnerDoctor>),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
    ),
    tag = "doctors"
)]
pub(crate) async fn list_doctors(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<PartnerDoctor>>, AppError> {
    require_role(&caller, Role::Admin)?;
    let mut doctors = state.doctors.list();
    doctors.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(doctors))
}

/// POST /v1/doctors/:id/deactivate: Stop new assignments to a doctor (admin).
#[utoipa::path(
    post,
    path = "/v1/doctors/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Partner doctor ID")),
    responses(
        (status = 200, description = "Doctor inactive", body = PartnerDoctor),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 404, description = "Doctor not found", body = crate::error::ErrorBody),
    ),
    tag = "doctors"
)]
pub(crate) async fn deactivate_doctor(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PartnerDoctor>, AppError> {
    let doctor = workflow::deactivate_doctor(&state, &caller, DoctorId::from_uuid(id)).await?;
    Ok(Json(doctor))
}
