//! # Consultation Routes
//!
//! Clients request consultations with schedule preferences; staff move them
//! through coordination and confirmation and assign partner doctors.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use kc_core::{ConsultationId, DoctorId, Timestamp, UserId};
use kc_state::{Appointment, ConsultationRequest, ConsultationStatus, SchedulePreferences};

use super::{check_status_label, parse_status, ListParams};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::AppState;
use crate::workflow;

const MAX_PREFERRED_DATES: usize = 14;

/// Request to book a consultation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConsultationRequest {
    /// Requesting user. Clients may omit it.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Dates the client can make, free-form (`YYYY-MM-DD` recommended).
    #[serde(default)]
    pub preferred_dates: Vec<String>,
    #[serde(default)]
    pub preferred_time_slot: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Validate for CreateConsultationRequest {
    fn validate(&self) -> Result<(), String> {
        if self.preferred_dates.len() > MAX_PREFERRED_DATES {
            return Err(format!(
                "at most {MAX_PREFERRED_DATES} preferred_dates may be given"
            ));
        }
        if self.preferred_dates.iter().any(|d| d.trim().is_empty()) {
            return Err("preferred_dates must not contain empty entries".to_string());
        }
        if self.notes.as_ref().is_some_and(|n| n.len() > 2000) {
            return Err("notes must not exceed 2000 characters".to_string());
        }
        Ok(())
    }
}

/// Request to change a consultation's status.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsultationStatusRequest {
    /// Target status label, e.g. `confirmed`.
    pub status: String,
    /// Appointment time. Only accepted together with `confirmed`.
    #[serde(default)]
    pub scheduled_at: Option<String>,
    /// Partner doctor. Only accepted together with `confirmed`.
    #[serde(default)]
    pub doctor_id: Option<Uuid>,
}

impl Validate for ConsultationStatusRequest {
    fn validate(&self) -> Result<(), String> {
        check_status_label::<ConsultationStatus>(&self.status)?;
        if let Some(raw) = &self.scheduled_at {
            Timestamp::parse_lenient(raw).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Request to assign a partner doctor.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignDoctorRequest {
    pub doctor_id: Uuid,
}

/// Build the consultations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/consultations",
            get(list_consultations).post(create_consultation),
        )
        .route("/v1/consultations/:id", get(get_consultation))
        .route("/v1/consultations/:id/status", put(transition_consultation))
        .route("/v1/consultations/:id/doctor", put(assign_doctor))
}

/// POST /v1/consultations: Request a consultation.
#[utoipa::path(
    post,
    path = "/v1/consultations",
    request_body = CreateConsultationRequest,
    responses(
        (status = 201, description = "Consultation created in received"),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "consultations"
)]
pub(crate) async fn create_consultation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateConsultationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ConsultationRequest>), AppError> {
    let req = extract_validated_json(body)?;
    let user_id = caller.resolve_subject(req.user_id.map(UserId::from_uuid))?;
    let preferences = SchedulePreferences {
        preferred_dates: req.preferred_dates,
        preferred_time_slot: req.preferred_time_slot,
        notes: req.notes,
    };
    let consultation = workflow::create_consultation(&state, &caller, user_id, preferences).await?;
    Ok((StatusCode::CREATED, Json(consultation)))
}

/// GET /v1/consultations: List consultations, newest first.
#[utoipa::path(
    get,
    path = "/v1/consultations",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<usize>, Query, description = "Max items to return (default 100, max 1000)"),
        ("offset" = Option<usize>, Query, description = "Items to skip (default 0)"),
    ),
    responses(
        (status = 200, description = "Consultations visible to the caller"),
    ),
    tag = "consultations"
)]
pub(crate) async fn list_consultations(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ConsultationRequest>>, AppError> {
    let status = params.status_filter::<ConsultationStatus>()?;
    let mut consultations = state
        .consultations
        .filter(|c| caller.can_access(c.user_id) && status.map_or(true, |s| c.status == s));
    consultations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let offset = params.effective_offset().min(consultations.len());
    let page = consultations
        .into_iter()
        .skip(offset)
        .take(params.effective_limit())
        .collect();
    Ok(Json(page))
}

/// GET /v1/consultations/:id: Get a consultation.
#[utoipa::path(
    get,
    path = "/v1/consultations/{id}",
    params(("id" = Uuid, Path, description = "Consultation ID")),
    responses(
        (status = 200, description = "Consultation found"),
        (status = 404, description = "Consultation not found", body = crate::error::ErrorBody),
    ),
    tag = "consultations"
)]
pub(crate) async fn get_consultation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ConsultationRequest>, AppError> {
    let consultation = workflow::read_consultation(&state, ConsultationId::from_uuid(id), &caller)?;
    Ok(Json(consultation))
}

/// PUT /v1/consultations/:id/status: Apply a status transition (admin).
#[utoipa::path(
    put,
    path = "/v1/consultations/{id}/status",
    params(("id" = Uuid, Path, description = "Consultation ID")),
    request_body = ConsultationStatusRequest,
    responses(
        (status = 200, description = "Transition applied"),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 404, description = "Consultation or doctor not found", body = crate::error::ErrorBody),
        (status = 409, description = "Concurrent modification", body = crate::error::ErrorBody),
        (status = 422, description = "Transition not allowed from the current status", body = crate::error::ErrorBody),
    ),
    tag = "consultations"
)]
pub(crate) async fn transition_consultation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ConsultationStatusRequest>, JsonRejection>,
) -> Result<Json<ConsultationRequest>, AppError> {
    let req = extract_validated_json(body)?;
    let target = parse_status::<ConsultationStatus>(&req.status)?;
    let appointment = Appointment {
        scheduled_at: req
            .scheduled_at
            .as_deref()
            .map(Timestamp::parse_lenient)
            .transpose()?,
        doctor_id: req.doctor_id.map(DoctorId::from_uuid),
    };

    let consultation = workflow::apply_consultation_transition(
        &state,
        ConsultationId::from_uuid(id),
        target,
        appointment,
        &caller,
    )
    .await?;
    Ok(Json(consultation))
}

/// PUT /v1/consultations/:id/doctor: Assign a partner doctor (admin).
#[utoipa::path(
    put,
    path = "/v1/consultations/{id}/doctor",
    params(("id" = Uuid, Path, description = "Consultation ID")),
    request_body = AssignDoctorRequest,
    responses(
        (status = 200, description = "Doctor assigned"),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 404, description = "Consultation or doctor not found", body = crate::error::ErrorBody),
        (status = 422, description = "Consultation is finished or doctor inactive", body = crate::error::ErrorBody),
    ),
    tag = "consultations"
)]
pub(crate) async fn assign_doctor(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<AssignDoctorRequest>, JsonRejection>,
) -> Result<Json<ConsultationRequest>, AppError> {
    let req = crate::extractors::extract_json(body)?;
    let consultation = workflow::assign_doctor(
        &state,
        ConsultationId::from_uuid(id),
        DoctorId::from_uuid(req.doctor_id),
        &caller,
    )
    .await?;
    Ok(Json(consultation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_in_review_label_is_accepted() {
        let req = ConsultationStatusRequest {
            status: "in_review".to_string(),
            scheduled_at: None,
            doctor_id: None,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn malformed_schedule_rejected() {
        let req = ConsultationStatusRequest {
            status: "confirmed".to_string(),
            scheduled_at: Some("next tuesday".to_string()),
            doctor_id: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn too_many_preferred_dates_rejected() {
        let req = CreateConsultationRequest {
            user_id: None,
            preferred_dates: vec!["2026-11-02".to_string(); MAX_PREFERRED_DATES + 1],
            preferred_time_slot: None,
            notes: None,
        };
        assert!(req.validate().is_err());
    }
}
