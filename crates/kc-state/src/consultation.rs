//! # Consultation Workflow
//!
//! ```text
//! received ──► coordinating ──► confirmed ──► reminder_sent
//! ```
//!
//! `reminder_sent` is terminal. Older rows carry `in_review` for the initial
//! state; it is read as `received` and always written back as `received`.
//!
//! Confirmation is the only step that may set the appointment time and the
//! partner doctor together with the status. A doctor may also be assigned on
//! its own at any non-terminal point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kc_core::{ConsultationId, DoctorId, Timestamp, UserId};

use crate::timeline::Timeline;
use crate::transition::{check_transition, StatusChange, TransitionError, WorkflowState};

/// Lifecycle status of a consultation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    /// Request received from the client.
    #[serde(alias = "in_review")]
    Received,
    /// Admin is coordinating with a partner doctor.
    Coordinating,
    /// Appointment confirmed.
    Confirmed,
    /// Reminder delivered to the client. Terminal state.
    ReminderSent,
}

impl ConsultationStatus {
    /// Every status, in workflow order.
    pub const ALL: [ConsultationStatus; 4] = [
        Self::Received,
        Self::Coordinating,
        Self::Confirmed,
        Self::ReminderSent,
    ];
}

impl WorkflowState for ConsultationStatus {
    const WORKFLOW: &'static str = "consultation";

    fn all() -> &'static [Self] {
        &Self::ALL
    }

    fn next_allowed(&self) -> &'static [Self] {
        match self {
            Self::Received => &[Self::Coordinating],
            Self::Coordinating => &[Self::Confirmed],
            Self::Confirmed => &[Self::ReminderSent],
            Self::ReminderSent => &[],
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Coordinating => "coordinating",
            Self::Confirmed => "confirmed",
            Self::ReminderSent => "reminder_sent",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "received" | "in_review" => Some(Self::Received),
            "coordinating" => Some(Self::Coordinating),
            "confirmed" => Some(Self::Confirmed),
            "reminder_sent" => Some(Self::ReminderSent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from consultation updates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsultationError {
    /// The status change is not in the table.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Schedule fields were supplied on a step other than confirmation.
    #[error("scheduled_at and doctor_id may only be set when confirming (requested {requested})")]
    ScheduleNotAllowed {
        /// The requested target status.
        requested: String,
    },

    /// The consultation is finished; nothing about it may change.
    #[error("consultation {id} is in terminal state {state}")]
    Terminal {
        /// Consultation identifier.
        id: ConsultationId,
        /// The terminal status label.
        state: String,
    },
}

/// What the client asked for when booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePreferences {
    #[serde(default)]
    pub preferred_dates: Vec<String>,
    #[serde(default)]
    pub preferred_time_slot: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Appointment details set at confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Appointment {
    pub scheduled_at: Option<Timestamp>,
    pub doctor_id: Option<DoctorId>,
}

impl Appointment {
    fn is_empty(&self) -> bool {
        self.scheduled_at.is_none() && self.doctor_id.is_none()
    }
}

/// A consultation request aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationRequest {
    pub id: ConsultationId,
    pub user_id: UserId,
    pub preferences: SchedulePreferences,
    pub status: ConsultationStatus,
    pub doctor_id: Option<DoctorId>,
    pub scheduled_at: Option<Timestamp>,
    /// Tier label of the subscription the client held when booking.
    pub subscription_tier: Option<String>,
    pub timeline: Timeline,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ConsultationRequest {
    /// Create a request in `received`.
    pub fn new(
        user_id: UserId,
        preferences: SchedulePreferences,
        subscription_tier: Option<String>,
        now: Timestamp,
    ) -> Self {
        let mut timeline = Timeline::new();
        timeline.record_at(now, ConsultationStatus::Received.as_str());
        Self {
            id: ConsultationId::new(),
            user_id,
            preferences,
            status: ConsultationStatus::Received,
            doctor_id: None,
            scheduled_at: None,
            subscription_tier,
            timeline,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, optionally setting the appointment when `to` is
    /// `confirmed`. Nothing changes on error.
    pub fn transition(
        &mut self,
        to: ConsultationStatus,
        appointment: Appointment,
        now: Timestamp,
    ) -> Result<StatusChange<ConsultationStatus>, ConsultationError> {
        check_transition(self.status, to)?;
        if !appointment.is_empty() && to != ConsultationStatus::Confirmed {
            return Err(ConsultationError::ScheduleNotAllowed {
                requested: to.as_str().to_string(),
            });
        }
        let from = self.status;
        let at = self.timeline.record_at(now, to.as_str()).at;
        self.status = to;
        self.updated_at = at;
        if let Some(scheduled_at) = appointment.scheduled_at {
            self.scheduled_at = Some(scheduled_at);
        }
        if let Some(doctor_id) = appointment.doctor_id {
            self.doctor_id = Some(doctor_id);
        }
        Ok(StatusChange { from, to, at })
    }

    /// Assign a partner doctor without changing status.
    pub fn assign_doctor(&mut self, doctor_id: DoctorId, now: Timestamp) -> Result<(), ConsultationError> {
        if self.status.is_terminal() {
            return Err(ConsultationError::Terminal {
                id: self.id,
                state: self.status.as_str().to_string(),
            });
        }
        self.doctor_id = Some(doctor_id);
        self.updated_at = now.max(self.updated_at);
        Ok(())
    }
}
