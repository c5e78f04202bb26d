//! Seams between the session orchestrator and its collaborators

use crate::error::Result;
use async_trait::async_trait;
use review_types::{PatientId, Review, ReviewId, StepCompletion, StepData};
use std::sync::Arc;

/// Remote persistence for reviews
///
/// Every call may be slow or fail; the session converts failures into its
/// own error categories. Implementations must be cheap to share behind an `Arc`.
#[async_trait]
pub trait ReviewGateway: Send + Sync {
    /// Create a new in-progress review. Fails with `Conflict` if the patient already has one.
    async fn create_review(&self, patient_id: &PatientId) -> Result<Review>;

    /// Load a review by id. Fails with `NotFound` if absent.
    async fn load_review(&self, review_id: &ReviewId) -> Result<Review>;

    /// The patient's in-progress review, if there is one to resume
    async fn load_in_progress_review(&self, patient_id: &PatientId) -> Result<Option<Review>>;

    /// Persist a snapshot; returns the stored review with a refreshed `updated_at`
    async fn save_review(&self, review: &Review) -> Result<Review>;

    /// Mark one step completed with its captured data
    async fn complete_step(&self, review_id: &ReviewId, completion: &StepCompletion) -> Result<Review>;

    /// Finalize the review. Rejected if a validation-required step is incomplete.
    async fn complete_review(&self, review_id: &ReviewId) -> Result<Review>;

    /// Cancel the review; irreversible
    async fn cancel_review(&self, review_id: &ReviewId) -> Result<Review>;
}

/// Lets a session run over a shared or type-erased gateway (`Arc<dyn ReviewGateway>`)
#[async_trait]
impl<T: ReviewGateway + ?Sized> ReviewGateway for Arc<T> {
    async fn create_review(&self, patient_id: &PatientId) -> Result<Review> {
        (**self).create_review(patient_id).await
    }

    async fn load_review(&self, review_id: &ReviewId) -> Result<Review> {
        (**self).load_review(review_id).await
    }

    async fn load_in_progress_review(&self, patient_id: &PatientId) -> Result<Option<Review>> {
        (**self).load_in_progress_review(patient_id).await
    }

    async fn save_review(&self, review: &Review) -> Result<Review> {
        (**self).save_review(review).await
    }

    async fn complete_step(&self, review_id: &ReviewId, completion: &StepCompletion) -> Result<Review> {
        (**self).complete_step(review_id, completion).await
    }

    async fn complete_review(&self, review_id: &ReviewId) -> Result<Review> {
        (**self).complete_review(review_id).await
    }

    async fn cancel_review(&self, review_id: &ReviewId) -> Result<Review> {
        (**self).cancel_review(review_id).await
    }
}

/// Outcome of a step's self-check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepValidation {
    Valid,
    Invalid(String),
}

impl StepValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Per-step capability implemented by whatever renders or collects the step
pub trait StepCapability: Send + Sync {
    fn validate(&self) -> StepValidation;

    fn extract_data(&self) -> StepData;
}
