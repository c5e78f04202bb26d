//! Shared types for the medication therapy review session engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Opaque payload captured by a step when it is completed
pub type StepData = serde_json::Value;

/// Identifier parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{kind} contains whitespace: '{value}'")]
    Whitespace { kind: &'static str, value: String },

    #[error("{kind} is not a plain name: '{value}'")]
    NotPlain { kind: &'static str, value: String },
}

fn check_id(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty(kind));
    }
    if s.chars().any(char::is_whitespace) {
        return Err(IdError::Whitespace {
            kind,
            value: s.to_string(),
        });
    }
    // Ids become file names in the local store
    if s == "." || s == ".." || s.contains(['/', '\\']) {
        return Err(IdError::NotPlain {
            kind,
            value: s.to_string(),
        });
    }
    Ok(())
}

/// Strongly typed ReviewId, assigned by the persistence gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReviewId(String);

impl ReviewId {
    /// Generate a fresh id (used by gateways that assign ids locally)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Result<Self, IdError> {
        check_id("review id", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ReviewId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for ReviewId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, IdError> {
        check_id("review id", &s)?;
        Ok(Self(s))
    }
}

impl From<ReviewId> for String {
    fn from(id: ReviewId) -> Self {
        id.0
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed PatientId
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatientId(String);

impl PatientId {
    pub fn from_string(s: &str) -> Result<Self, IdError> {
        check_id("patient id", s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PatientId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, IdError> {
        check_id("patient id", &s)?;
        Ok(Self(s))
    }
}

impl From<PatientId> for String {
    fn from(id: PatientId) -> Self {
        id.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a review. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step progress entry, created lazily when a step completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: StepData,
}

impl StepRecord {
    pub fn completed_at(data: StepData, at: DateTime<Utc>) -> Self {
        Self {
            completed: true,
            completed_at: Some(at),
            data,
        }
    }
}

/// The persistent session aggregate for one patient's review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: ReviewId,
    pub status: ReviewStatus,
    pub patient_id: PatientId,
    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,
    #[serde(default)]
    pub current_step_index: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    /// Start a fresh in-progress review for a patient
    pub fn start(patient_id: PatientId) -> Self {
        let now = Utc::now();
        Self {
            id: ReviewId::new(),
            status: ReviewStatus::InProgress,
            patient_id,
            steps: BTreeMap::new(),
            current_step_index: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_step_completed(&self, step_id: &str) -> bool {
        self.steps.get(step_id).map(|s| s.completed).unwrap_or(false)
    }
}

/// Payload sent to the gateway when a step is completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompletion {
    pub step_index: usize,
    pub step_id: String,
    pub data: StepData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_review_start() {
        let patient = PatientId::from_string("patient-42").unwrap();
        let review = Review::start(patient.clone());
        assert_eq!(review.patient_id, patient);
        assert_eq!(review.status, ReviewStatus::InProgress);
        assert_eq!(review.current_step_index, 0);
        assert!(review.steps.is_empty());
        assert!(!review.id.as_str().is_empty());
        assert!(!review.is_terminal());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ReviewStatus::InProgress.is_terminal());
        assert!(ReviewStatus::Completed.is_terminal());
        assert!(ReviewStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_id_validation() {
        assert_eq!(PatientId::from_string(""), Err(IdError::Empty("patient id")));
        assert!(ReviewId::from_string("abc def").is_err());
        assert_eq!(ReviewId::from_string("r-1").unwrap().as_str(), "r-1");
    }

    #[test]
    fn test_ids_cannot_name_other_files() {
        for bad in ["..", ".", "../x", "a/b", "a\\b"] {
            assert!(
                matches!(ReviewId::from_string(bad), Err(IdError::NotPlain { .. })),
                "{} should be rejected",
                bad
            );
            assert!(PatientId::from_string(bad).is_err(), "{} should be rejected", bad);
        }
        assert!(ReviewId::from_string("r..1").is_ok());

        assert!(serde_json::from_value::<ReviewId>(json!("../escape")).is_err());
        let id: PatientId = serde_json::from_value(json!("p-1")).unwrap();
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("p-1"));
    }

    #[test]
    fn test_review_wire_shape() {
        let json = json!({
            "id": "rev-1",
            "status": "in_progress",
            "patientId": "p-1",
            "steps": {
                "patient_selection": {
                    "completed": true,
                    "completedAt": "2024-03-01T10:00:00Z",
                    "data": { "patientId": "p-1" }
                }
            },
            "currentStepIndex": 1,
            "createdAt": "2024-03-01T09:00:00Z",
            "updatedAt": "2024-03-01T10:00:00Z"
        });

        let review: Review = serde_json::from_value(json).unwrap();
        assert_eq!(review.id.as_str(), "rev-1");
        assert_eq!(review.current_step_index, 1);
        assert!(review.is_step_completed("patient_selection"));
        assert!(!review.is_step_completed("medication_history"));

        let back = serde_json::to_value(&review).unwrap();
        assert_eq!(back["status"], "in_progress");
        assert_eq!(back["patientId"], "p-1");
    }
}
