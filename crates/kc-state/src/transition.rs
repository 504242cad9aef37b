//! # Transition Guard
//!
//! The shared contract of the Kitcare workflows. Each status enum exposes a
//! total, pure `next_allowed()` table; [`check_transition`] validates a
//! requested move against it before anything is mutated.
//!
//! Authorization and persistence are the caller's concern. This module only
//! answers "is `current → requested` in the table".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kc_core::Timestamp;

/// A workflow status with an enumerated transition table.
pub trait WorkflowState: Copy + Eq + std::fmt::Debug + Send + Sync + 'static {
    /// Workflow name used in error messages and logs.
    const WORKFLOW: &'static str;

    /// Every state of the workflow, in table order.
    fn all() -> &'static [Self];

    /// States reachable from `self` in exactly one transition.
    fn next_allowed(&self) -> &'static [Self];

    /// Canonical persisted label.
    fn as_str(&self) -> &'static str;

    /// Parse a persisted label.
    fn from_name(name: &str) -> Option<Self>;

    /// Whether no transition leaves this state.
    fn is_terminal(&self) -> bool {
        self.next_allowed().is_empty()
    }

    /// Whether `next` is in this state's allowed set.
    fn can_transition_to(&self, next: Self) -> bool {
        self.next_allowed().contains(&next)
    }
}

/// A requested status change was rejected by the transition table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The requested status is not in the current status's allowed set.
    #[error("invalid {workflow} transition: {from} -> {to} (allowed from {from}: [{}])", .allowed.join(", "))]
    InvalidTransition {
        /// Workflow name.
        workflow: &'static str,
        /// Current status label.
        from: String,
        /// Requested status label.
        to: String,
        /// Labels that would have been accepted.
        allowed: Vec<String>,
    },

    /// The current status is terminal.
    #[error("{workflow} is in terminal state {state}")]
    TerminalState {
        /// Workflow name.
        workflow: &'static str,
        /// The terminal status label.
        state: String,
    },
}

/// Validate `current → requested` against the workflow table.
pub fn check_transition<S: WorkflowState>(current: S, requested: S) -> Result<(), TransitionError> {
    if current.is_terminal() {
        return Err(TransitionError::TerminalState {
            workflow: S::WORKFLOW,
            state: current.as_str().to_string(),
        });
    }
    if !current.can_transition_to(requested) {
        return Err(TransitionError::InvalidTransition {
            workflow: S::WORKFLOW,
            from: current.as_str().to_string(),
            to: requested.as_str().to_string(),
            allowed: current
                .next_allowed()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
        });
    }
    Ok(())
}

/// An accepted status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange<S> {
    /// Status before the change.
    pub from: S,
    /// Status after the change.
    pub to: S,
    /// Timeline timestamp of the change.
    pub at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConsultationStatus, KitOrderStatus};

    #[test]
    fn terminal_state_reported_before_table_miss() {
        let err = check_transition(KitOrderStatus::Received, KitOrderStatus::Shipping).unwrap_err();
        assert!(matches!(err, TransitionError::TerminalState { .. }));
    }

    #[test]
    fn invalid_transition_lists_allowed_set() {
        let err =
            check_transition(KitOrderStatus::InReview, KitOrderStatus::Received).unwrap_err();
        match &err {
            TransitionError::InvalidTransition { from, to, allowed, .. } => {
                assert_eq!(from, "in_review");
                assert_eq!(to, "received");
                assert_eq!(allowed, &vec!["shipping".to_string(), "cancelled".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("shipping, cancelled"));
    }

    #[test]
    fn consultation_guard_uses_its_own_table() {
        assert!(check_transition(ConsultationStatus::Received, ConsultationStatus::Coordinating).is_ok());
        assert!(check_transition(ConsultationStatus::Received, ConsultationStatus::Confirmed).is_err());
    }
}
