//! Session state machine: the single owner of the in-memory review

use super::completion;
use super::registry::StepRegistry;
use crate::error::{ReviewError, Result};
use chrono::{DateTime, Utc};
use review_types::{Review, ReviewStatus, StepRecord};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Active,
    Saving,
    Completed,
    Cancelled,
    Error,
}

impl SessionPhase {
    /// Active or saving: the review may be navigated
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Saving)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Phases from which initialization may (re)start
    pub fn can_initialize(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Saving => "saving",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested changes to session state
#[derive(Debug, Clone)]
pub enum Transition {
    BeginLoading,
    Loaded(Review),
    LoadFailed(String),
    PermissionDenied(String),
    BeginSave,
    /// `revision` is the machine revision the saved snapshot was taken at
    SaveSucceeded { updated_at: DateTime<Utc>, revision: u64 },
    /// Back to active; the message, when present, is recorded for display
    SaveFailed(Option<String>),
    StepCompleted {
        step_id: String,
        record: StepRecord,
        updated_at: DateTime<Utc>,
    },
    MoveTo(usize),
    Completed(Review),
    Cancelled(Review),
    /// Record a non-fatal error without changing phase
    ErrorRecorded(String),
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Self::BeginLoading => "begin-loading",
            Self::Loaded(_) => "loaded",
            Self::LoadFailed(_) => "load-failed",
            Self::PermissionDenied(_) => "permission-denied",
            Self::BeginSave => "begin-save",
            Self::SaveSucceeded { .. } => "save-succeeded",
            Self::SaveFailed(_) => "save-failed",
            Self::StepCompleted { .. } => "step-completed",
            Self::MoveTo(_) => "move-to",
            Self::Completed(_) => "completed",
            Self::Cancelled(_) => "cancelled",
            Self::ErrorRecorded(_) => "error-recorded",
        }
    }
}

/// Immutable view of the session published to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub review: Option<Review>,
    pub current_step_index: usize,
    pub current_step_id: Option<String>,
    pub completion_percentage: f64,
    pub can_complete: bool,
    pub dirty: bool,
    pub last_error: Option<String>,
}

pub struct SessionMachine {
    registry: Arc<StepRegistry>,
    phase: SessionPhase,
    review: Option<Review>,
    revision: u64,
    saved_revision: u64,
    last_error: Option<String>,
}

impl SessionMachine {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            phase: SessionPhase::Uninitialized,
            review: None,
            revision: 0,
            saved_revision: 0,
            last_error: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn review(&self) -> Option<&Review> {
        self.review.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Unsaved local mutations exist
    pub fn is_dirty(&self) -> bool {
        self.revision > self.saved_revision
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Apply a transition, rejecting anything illegal in the current phase
    pub fn apply(&mut self, transition: Transition) -> Result<()> {
        use SessionPhase::*;

        let name = transition.name();
        let from = self.phase;

        match (from, transition) {
            (Uninitialized | Error, Transition::BeginLoading) => {
                self.phase = Loading;
                self.review = None;
                self.last_error = None;
            }
            (Uninitialized | Error, Transition::PermissionDenied(message)) => {
                self.phase = Uninitialized;
                self.review = None;
                self.last_error = Some(message);
            }
            (Loading, Transition::Loaded(mut review)) => {
                let len = self.registry.len();
                if review.current_step_index >= len {
                    log::warn!(
                        "Review {} has cursor {} beyond {} steps, clamping",
                        review.id,
                        review.current_step_index,
                        len
                    );
                    review.current_step_index = len - 1;
                }
                self.phase = match review.status {
                    ReviewStatus::InProgress => Active,
                    ReviewStatus::Completed => Completed,
                    ReviewStatus::Cancelled => Cancelled,
                };
                self.review = Some(review);
                self.revision = 0;
                self.saved_revision = 0;
            }
            (Loading, Transition::LoadFailed(message)) => {
                self.phase = Error;
                self.review = None;
                self.last_error = Some(message);
            }
            (Active, Transition::BeginSave) => {
                self.phase = Saving;
            }
            (Saving, Transition::SaveSucceeded { updated_at, revision }) => {
                if let Some(review) = self.review.as_mut() {
                    review.updated_at = review.updated_at.max(updated_at);
                }
                self.saved_revision = self.saved_revision.max(revision);
                self.phase = Active;
            }
            (Saving, Transition::SaveFailed(message)) => {
                if message.is_some() {
                    self.last_error = message;
                }
                self.phase = Active;
            }
            (Active | Saving, Transition::StepCompleted { step_id, record, updated_at }) => {
                let review = self.active_review_mut(name)?;
                if review.steps.get(&step_id) != Some(&record) {
                    review.steps.insert(step_id, record);
                    review.updated_at = review.updated_at.max(updated_at);
                    self.revision += 1;
                }
            }
            (Active | Saving, Transition::MoveTo(index)) => {
                let len = self.registry.len();
                if index >= len {
                    return Err(ReviewError::InvalidState(format!(
                        "step index {} out of range (0..{})",
                        index, len
                    )));
                }
                let review = self.active_review_mut(name)?;
                if review.current_step_index != index {
                    review.current_step_index = index;
                    self.revision += 1;
                }
            }
            (Active | Saving, Transition::Completed(mut review)) => {
                review.status = ReviewStatus::Completed;
                self.keep_patient(&mut review);
                self.review = Some(review);
                self.saved_revision = self.revision;
                self.phase = Completed;
            }
            (Active | Saving, Transition::Cancelled(mut review)) => {
                review.status = ReviewStatus::Cancelled;
                self.keep_patient(&mut review);
                self.review = Some(review);
                self.saved_revision = self.revision;
                self.phase = Cancelled;
            }
            (_, Transition::ErrorRecorded(message)) => {
                self.last_error = Some(message);
            }
            (from, _) => {
                return Err(ReviewError::InvalidState(format!(
                    "cannot apply {} while {}",
                    name, from
                )));
            }
        }

        if from != self.phase {
            log::debug!("Session phase {} -> {} ({})", from, self.phase, name);
        }
        Ok(())
    }

    fn active_review_mut(&mut self, name: &str) -> Result<&mut Review> {
        self.review
            .as_mut()
            .ok_or_else(|| ReviewError::InvalidState(format!("cannot apply {} without a review", name)))
    }

    /// Patient id is immutable once the session holds a review
    fn keep_patient(&self, incoming: &mut Review) {
        if let Some(current) = self.review.as_ref() {
            if incoming.patient_id != current.patient_id {
                log::warn!(
                    "Gateway returned review {} for patient {}, keeping {}",
                    incoming.id,
                    incoming.patient_id,
                    current.patient_id
                );
                incoming.patient_id = current.patient_id.clone();
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (current_step_index, completion_percentage, can_complete) = match self.review.as_ref() {
            Some(review) => (
                review.current_step_index,
                completion::completion_percentage(review, &self.registry),
                self.phase.is_active() && completion::can_complete_review(review, &self.registry),
            ),
            None => (0, 0.0, false),
        };

        SessionSnapshot {
            phase: self.phase,
            current_step_id: self
                .review
                .as_ref()
                .and_then(|_| self.registry.get(current_step_index))
                .map(|s| s.id.clone()),
            review: self.review.clone(),
            current_step_index,
            completion_percentage,
            can_complete,
            dirty: self.is_dirty(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_types::PatientId;
    use serde_json::json;

    fn active_machine() -> SessionMachine {
        let mut machine = SessionMachine::new(Arc::new(StepRegistry::medication_therapy_review()));
        machine.apply(Transition::BeginLoading).unwrap();
        let review = Review::start(PatientId::from_string("p-1").unwrap());
        machine.apply(Transition::Loaded(review)).unwrap();
        machine
    }

    #[test]
    fn test_load_lifecycle() {
        let machine = active_machine();
        assert_eq!(machine.phase(), SessionPhase::Active);
        assert!(!machine.is_dirty());
        assert_eq!(machine.snapshot().current_step_id.as_deref(), Some("patient_selection"));
    }

    #[test]
    fn test_load_failure_keeps_no_review() {
        let mut machine = SessionMachine::new(Arc::new(StepRegistry::default()));
        machine.apply(Transition::BeginLoading).unwrap();
        machine.apply(Transition::LoadFailed("boom".to_string())).unwrap();
        assert_eq!(machine.phase(), SessionPhase::Error);
        assert!(machine.review().is_none());
        assert_eq!(machine.last_error(), Some("boom"));

        // Error allows a manual retry
        machine.apply(Transition::BeginLoading).unwrap();
        assert_eq!(machine.phase(), SessionPhase::Loading);
        assert!(machine.last_error().is_none());
    }

    #[test]
    fn test_loaded_terminal_review_lands_in_terminal_phase() {
        let mut machine = SessionMachine::new(Arc::new(StepRegistry::default()));
        machine.apply(Transition::BeginLoading).unwrap();
        let mut review = Review::start(PatientId::from_string("p-1").unwrap());
        review.status = ReviewStatus::Cancelled;
        review.current_step_index = 42;
        machine.apply(Transition::Loaded(review)).unwrap();
        assert_eq!(machine.phase(), SessionPhase::Cancelled);
        assert_eq!(machine.review().unwrap().current_step_index, 5);
    }

    #[test]
    fn test_dirty_tracking_across_save() {
        let mut machine = active_machine();
        machine.apply(Transition::MoveTo(1)).unwrap();
        assert!(machine.is_dirty());

        let rev = machine.revision();
        machine.apply(Transition::BeginSave).unwrap();
        // Mutation while the save is in flight keeps the session dirty
        machine.apply(Transition::MoveTo(0)).unwrap();
        machine
            .apply(Transition::SaveSucceeded { updated_at: Utc::now(), revision: rev })
            .unwrap();
        assert_eq!(machine.phase(), SessionPhase::Active);
        assert!(machine.is_dirty());

        let rev = machine.revision();
        machine.apply(Transition::BeginSave).unwrap();
        machine
            .apply(Transition::SaveSucceeded { updated_at: Utc::now(), revision: rev })
            .unwrap();
        assert!(!machine.is_dirty());
    }

    #[test]
    fn test_save_failure_returns_to_active() {
        let mut machine = active_machine();
        machine.apply(Transition::BeginSave).unwrap();
        assert!(machine.apply(Transition::BeginSave).is_err());
        machine.apply(Transition::SaveFailed(Some("offline".to_string()))).unwrap();
        assert_eq!(machine.phase(), SessionPhase::Active);
        assert_eq!(machine.last_error(), Some("offline"));
        assert_eq!(machine.review().unwrap().status, ReviewStatus::InProgress);
    }

    #[test]
    fn test_move_out_of_range_rejected() {
        let mut machine = active_machine();
        assert!(machine.apply(Transition::MoveTo(6)).is_err());
        assert_eq!(machine.review().unwrap().current_step_index, 0);
    }

    #[test]
    fn test_terminal_phases_reject_mutation() {
        let mut machine = active_machine();
        let review = machine.review().unwrap().clone();
        machine.apply(Transition::Cancelled(review.clone())).unwrap();
        assert_eq!(machine.phase(), SessionPhase::Cancelled);

        assert!(machine.apply(Transition::MoveTo(1)).is_err());
        assert!(machine.apply(Transition::BeginSave).is_err());
        assert!(machine.apply(Transition::Completed(review)).is_err());
        assert!(machine.apply(Transition::BeginLoading).is_err());
        assert!(machine
            .apply(Transition::StepCompleted {
                step_id: "patient_selection".to_string(),
                record: StepRecord::completed_at(json!({}), Utc::now()),
                updated_at: Utc::now(),
            })
            .is_err());

        let review = machine.review().unwrap();
        assert_eq!(review.status, ReviewStatus::Cancelled);
        assert_eq!(review.current_step_index, 0);
    }

    #[test]
    fn test_permission_denied_stays_uninitialized() {
        let mut machine = SessionMachine::new(Arc::new(StepRegistry::default()));
        machine
            .apply(Transition::PermissionDenied("not allowed".to_string()))
            .unwrap();
        assert_eq!(machine.phase(), SessionPhase::Uninitialized);
        assert_eq!(machine.last_error(), Some("not allowed"));
    }
}
