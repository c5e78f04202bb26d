//! File-backed review store
//! One directory per review status; a status change moves the file.

use crate::error::{ReviewError, Result};
use crate::workflow::completion;
use crate::workflow::registry::StepRegistry;
use crate::workflow::traits::ReviewGateway;
use async_trait::async_trait;
use chrono::Utc;
use review_types::{PatientId, Review, ReviewId, ReviewStatus, StepCompletion, StepRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

/// Lookup order: a terminal copy wins over a stale in-progress one
const ALL_STATUSES: [ReviewStatus; 3] = [
    ReviewStatus::Completed,
    ReviewStatus::Cancelled,
    ReviewStatus::InProgress,
];

/// Local JSON store implementing the review gateway
pub struct FileReviewStore {
    root_path: PathBuf,
    registry: Arc<StepRegistry>,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileReviewStore {
    /// Open (or create) a store at `root_path` using the default step registry
    pub async fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        Self::with_registry(root_path, Arc::new(StepRegistry::default())).await
    }

    pub async fn with_registry<P: AsRef<Path>>(root_path: P, registry: Arc<StepRegistry>) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        for status in ALL_STATUSES {
            fs::create_dir_all(root_path.join(status.as_str())).await?;
        }

        log::debug!("Review store ready at {}", root_path.display());
        Ok(Self {
            root_path,
            registry,
            lock: Mutex::new(()),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn review_path(&self, status: ReviewStatus, review_id: &ReviewId) -> PathBuf {
        self.root_path
            .join(status.as_str())
            .join(format!("review_{}.json", review_id))
    }

    /// Locate a review in any status directory
    async fn find_review_path(&self, review_id: &ReviewId) -> Result<Option<(PathBuf, ReviewStatus)>> {
        for status in ALL_STATUSES {
            let path = self.review_path(status, review_id);
            if fs::try_exists(&path).await? {
                return Ok(Some((path, status)));
            }
        }
        Ok(None)
    }

    async fn read_review(&self, path: &Path) -> Result<Review> {
        let json = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write via a temp file and rename so readers never see a partial file
    async fn write_review(&self, review: &Review) -> Result<()> {
        let path = self.review_path(review.status, &review.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(review)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_existing(&self, review_id: &ReviewId) -> Result<(PathBuf, Review)> {
        let (path, _) = self
            .find_review_path(review_id)
            .await?
            .ok_or_else(|| ReviewError::NotFound(format!("review {}", review_id)))?;
        let review = self.read_review(&path).await?;
        Ok((path, review))
    }

    async fn load_mutable(&self, review_id: &ReviewId) -> Result<(PathBuf, Review)> {
        let (path, review) = self.load_existing(review_id).await?;
        if review.is_terminal() {
            return Err(ReviewError::Conflict(format!(
                "review {} is {} and can no longer change",
                review_id, review.status
            )));
        }
        Ok((path, review))
    }

    /// Store the review under a new status and drop the old file
    async fn move_review(&self, from: &Path, review: &Review) -> Result<()> {
        self.write_review(review).await?;
        let to = self.review_path(review.status, &review.id);
        if from != to {
            if let Err(e) = fs::remove_file(from).await {
                // The new copy is authoritative; lookups prefer terminal directories
                log::warn!("Could not remove {} after moving review {}: {}", from.display(), review.id, e);
            }
        }
        Ok(())
    }

    /// All reviews currently in the given status
    pub async fn list_reviews(&self, status: ReviewStatus) -> Result<Vec<Review>> {
        let dir = self.root_path.join(status.as_str());
        let mut reviews = Vec::new();

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.read_review(&path).await {
                Ok(review) => reviews.push(review),
                Err(e) => log::warn!("Skipping unreadable review file {}: {}", path.display(), e),
            }
        }

        reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(reviews)
    }

    async fn find_in_progress(&self, patient_id: &PatientId) -> Result<Option<Review>> {
        for review in self.list_reviews(ReviewStatus::InProgress).await? {
            if review.patient_id != *patient_id {
                continue;
            }
            match self.find_review_path(&review.id).await? {
                Some((_, ReviewStatus::InProgress)) => return Ok(Some(review)),
                _ => log::warn!("Ignoring stale in-progress copy of finished review {}", review.id),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ReviewGateway for FileReviewStore {
    async fn create_review(&self, patient_id: &PatientId) -> Result<Review> {
        let _guard = self.lock.lock().await;

        if let Some(existing) = self.find_in_progress(patient_id).await? {
            return Err(ReviewError::Conflict(format!(
                "patient {} already has review {} in progress",
                patient_id, existing.id
            )));
        }

        let review = Review::start(patient_id.clone());
        self.write_review(&review).await?;
        log::info!("Created review {} for patient {}", review.id, patient_id);
        Ok(review)
    }

    async fn load_review(&self, review_id: &ReviewId) -> Result<Review> {
        let (_, review) = self.load_existing(review_id).await?;
        Ok(review)
    }

    async fn load_in_progress_review(&self, patient_id: &PatientId) -> Result<Option<Review>> {
        self.find_in_progress(patient_id).await
    }

    async fn save_review(&self, review: &Review) -> Result<Review> {
        let _guard = self.lock.lock().await;
        let (_, mut stored) = self.load_mutable(&review.id).await?;

        if stored.patient_id != review.patient_id {
            return Err(ReviewError::Conflict(format!(
                "review {} belongs to patient {}",
                review.id, stored.patient_id
            )));
        }
        if review.current_step_index >= self.registry.len() {
            return Err(ReviewError::Conflict(format!(
                "step index {} out of range",
                review.current_step_index
            )));
        }

        // Status only changes through complete/cancel
        stored.steps = review.steps.clone();
        stored.current_step_index = review.current_step_index;
        stored.updated_at = Utc::now();
        self.write_review(&stored).await?;

        log::debug!("Saved review {}", stored.id);
        Ok(stored)
    }

    async fn complete_step(&self, review_id: &ReviewId, step: &StepCompletion) -> Result<Review> {
        let _guard = self.lock.lock().await;
        let (_, mut stored) = self.load_mutable(review_id).await?;

        if self.registry.index_of(&step.step_id) != Some(step.step_index) {
            return Err(ReviewError::Conflict(format!(
                "step '{}' is not at index {}",
                step.step_id, step.step_index
            )));
        }

        let now = Utc::now();
        stored
            .steps
            .insert(step.step_id.clone(), StepRecord::completed_at(step.data.clone(), now));
        stored.updated_at = now;
        self.write_review(&stored).await?;

        log::debug!("Recorded step '{}' on review {}", step.step_id, review_id);
        Ok(stored)
    }

    async fn complete_review(&self, review_id: &ReviewId) -> Result<Review> {
        let _guard = self.lock.lock().await;
        let (path, mut stored) = self.load_mutable(review_id).await?;

        let unmet = completion::unmet_requirements(&stored, &self.registry);
        if !unmet.is_empty() {
            let ids: Vec<&str> = unmet.iter().map(|s| s.id.as_str()).collect();
            return Err(ReviewError::Conflict(format!(
                "required steps incomplete: {}",
                ids.join(", ")
            )));
        }

        stored.status = ReviewStatus::Completed;
        stored.updated_at = Utc::now();
        self.move_review(&path, &stored).await?;

        log::info!("Review {} completed", review_id);
        Ok(stored)
    }

    async fn cancel_review(&self, review_id: &ReviewId) -> Result<Review> {
        let _guard = self.lock.lock().await;
        let (path, mut stored) = self.load_mutable(review_id).await?;

        stored.status = ReviewStatus::Cancelled;
        stored.updated_at = Utc::now();
        self.move_review(&path, &stored).await?;

        log::info!("Review {} cancelled", review_id);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FileReviewStore) {
        let dir = TempDir::new().unwrap();
        let store = FileReviewStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_creates_status_directories() {
        let (dir, _store) = store().await;
        for name in ["in_progress", "completed", "cancelled"] {
            assert!(dir.path().join(name).is_dir(), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_complete_step_checks_index() {
        let (_dir, store) = store().await;
        let review = store.create_review(&PatientId::from_string("p-1").unwrap()).await.unwrap();

        let wrong = StepCompletion {
            step_index: 2,
            step_id: "patient_selection".to_string(),
            data: json!({}),
        };
        assert!(matches!(
            store.complete_step(&review.id, &wrong).await,
            Err(ReviewError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_leftover_in_progress_copy_does_not_reopen_review() {
        let (dir, store) = store().await;
        let patient = PatientId::from_string("p-1").unwrap();
        let review = store.create_review(&patient).await.unwrap();
        let leftover = std::fs::read(
            dir.path().join("in_progress").join(format!("review_{}.json", review.id)),
        )
        .unwrap();

        store.cancel_review(&review.id).await.unwrap();
        // Simulate a move whose old file could not be removed
        std::fs::write(
            dir.path().join("in_progress").join(format!("review_{}.json", review.id)),
            leftover,
        )
        .unwrap();

        assert_eq!(store.load_review(&review.id).await.unwrap().status, ReviewStatus::Cancelled);
        assert!(store.load_in_progress_review(&patient).await.unwrap().is_none());
        assert!(matches!(
            store.save_review(&review).await,
            Err(ReviewError::Conflict(_))
        ));
        // The patient can start over
        let fresh = store.create_review(&patient).await.unwrap();
        assert_ne!(fresh.id, review.id);
    }

    #[tokio::test]
    async fn test_unreadable_files_are_skipped() {
        let (dir, store) = store().await;
        let patient = PatientId::from_string("p-1").unwrap();
        std::fs::write(dir.path().join("in_progress").join("review_junk.json"), "{ nope").unwrap();

        let created = store.create_review(&patient).await.unwrap();
        let found = store.load_in_progress_review(&patient).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }
}
