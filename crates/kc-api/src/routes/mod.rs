//! # API Route Modules
//!
//! - `kit_orders`: Kit order lifecycle: creation, status transitions,
//!   client-initiated returns, and the audit timeline.
//! - `consultations`: Consultation requests, coordination, confirmation
//!   and doctor assignment.
//! - `doctors`: Partner doctor registry.
//! - `subscriptions`: Subscription creation, the kit entitlement ledger,
//!   and cancellation.
//! - `pricing`: Kit price, settings administration and counters.

pub mod consultations;
pub mod doctors;
pub mod kit_orders;
pub mod pricing;
pub mod subscriptions;

use serde::Deserialize;
use utoipa::ToSchema;

use kc_state::WorkflowState;

use crate::error::AppError;

/// Listing parameters shared by the collection endpoints.
#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct ListParams {
    /// Only return records in this status.
    pub status: Option<String>,
    /// Maximum number of items to return (default: 100, max: 1000).
    pub limit: Option<usize>,
    /// Number of items to skip (default: 0).
    pub offset: Option<usize>,
}

impl ListParams {
    const DEFAULT_LIMIT: usize = 100;
    const MAX_LIMIT: usize = 1000;

    pub(crate) fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT)
    }

    pub(crate) fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Parse the status filter, if any.
    pub(crate) fn status_filter<S: WorkflowState>(&self) -> Result<Option<S>, AppError> {
        self.status.as_deref().map(parse_status::<S>).transpose()
    }
}

/// Parse a status label, listing the valid ones on failure.
pub(crate) fn parse_status<S: WorkflowState>(name: &str) -> Result<S, AppError> {
    S::from_name(name).ok_or_else(|| {
        AppError::Validation(format!(
            "unknown {} status '{name}'. Valid statuses: {}",
            S::WORKFLOW,
            S::all()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

/// Check that a label is a known status without keeping the parsed value.
pub(crate) fn check_status_label<S: WorkflowState>(name: &str) -> Result<(), String> {
    parse_status::<S>(name).map(|_| ()).map_err(|e| match e {
        AppError::Validation(msg) => msg,
        other => other.to_string(),
    })
}
