use review_core::workflow::StepValidation;
use review_core::{
    AllowAll, FileReviewStore, PatientId, ReviewError, ReviewGateway, ReviewSession, ReviewStatus,
    SessionOptions, SessionPhase, SessionStart, StepCapability, StepCompletion, StepData, StepRegistry,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

struct Filled(StepData);

impl StepCapability for Filled {
    fn validate(&self) -> StepValidation {
        StepValidation::Valid
    }

    fn extract_data(&self) -> StepData {
        self.0.clone()
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn patient(id: &str) -> PatientId {
    PatientId::from_string(id).unwrap()
}

fn options() -> SessionOptions {
    SessionOptions {
        autosave_enabled: false,
        ..SessionOptions::default()
    }
}

async fn open_session(store: Arc<FileReviewStore>, patient_id: &str) -> ReviewSession<Arc<FileReviewStore>> {
    let mut session = ReviewSession::new(
        store,
        Arc::new(AllowAll),
        Arc::new(StepRegistry::default()),
        options(),
    );
    session
        .initialize(SessionStart::Patient(patient(patient_id)))
        .await
        .expect("Failed to initialize session");
    session
}

#[tokio::test]
async fn test_one_in_progress_review_per_patient() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let store = FileReviewStore::new(dir.path()).await.unwrap();

    let first = store.create_review(&patient("p-1")).await.unwrap();
    let err = store.create_review(&patient("p-1")).await.unwrap_err();
    assert!(matches!(err, ReviewError::Conflict(_)));

    // A different patient is unaffected
    store.create_review(&patient("p-2")).await.unwrap();

    let found = store.load_in_progress_review(&patient("p-1")).await.unwrap().unwrap();
    assert_eq!(found.id, first.id);
    assert!(store.load_in_progress_review(&patient("p-3")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_completion_gate_and_file_moves() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let store = FileReviewStore::new(dir.path()).await.unwrap();
    let review = store.create_review(&patient("p-1")).await.unwrap();

    let err = store.complete_review(&review.id).await.unwrap_err();
    assert!(err.to_string().contains("medication_history"));

    let registry = StepRegistry::default();
    for index in 0..4 {
        let step = StepCompletion {
            step_index: index,
            step_id: registry.get(index).unwrap().id.clone(),
            data: json!({ "index": index }),
        };
        store.complete_step(&review.id, &step).await.unwrap();
    }

    let completed = store.complete_review(&review.id).await.unwrap();
    assert_eq!(completed.status, ReviewStatus::Completed);

    let file = format!("review_{}.json", review.id);
    assert!(dir.path().join("completed").join(&file).exists());
    assert!(!dir.path().join("in_progress").join(&file).exists());

    // Terminal reviews refuse further writes
    assert!(matches!(store.save_review(&completed).await, Err(ReviewError::Conflict(_))));
    assert!(matches!(store.cancel_review(&review.id).await, Err(ReviewError::Conflict(_))));
    assert_eq!(store.load_review(&review.id).await.unwrap().status, ReviewStatus::Completed);
}

#[tokio::test]
async fn test_save_cannot_change_status() {
    let dir = TempDir::new().unwrap();
    let store = FileReviewStore::new(dir.path()).await.unwrap();
    let mut review = store.create_review(&patient("p-1")).await.unwrap();

    review.status = ReviewStatus::Completed;
    review.current_step_index = 2;
    let saved = store.save_review(&review).await.unwrap();

    assert_eq!(saved.status, ReviewStatus::InProgress);
    assert_eq!(saved.current_step_index, 2);
    assert!(saved.updated_at >= saved.created_at);
}

#[tokio::test]
async fn test_session_resumes_where_it_left_off() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileReviewStore::new(dir.path()).await.unwrap());

    let session = open_session(store.clone(), "p-9").await;
    session.next(&Filled(json!({ "patient": "p-9" }))).await.unwrap();
    session.next(&Filled(json!({ "medications": ["metformin"] }))).await.unwrap();
    session.save().await.unwrap();
    let review_id = session.review().unwrap().id;
    session.teardown().await;

    let resumed = open_session(store.clone(), "p-9").await;
    let review = resumed.review().unwrap();
    assert_eq!(review.id, review_id, "existing review is resumed, not recreated");
    assert_eq!(review.current_step_index, 2);
    assert_eq!(
        review.steps["medication_history"].data,
        json!({ "medications": ["metformin"] })
    );
    assert!((resumed.get_completion_percentage() - 100.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_full_review_over_file_store() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileReviewStore::new(dir.path()).await.unwrap());
    let mut session = open_session(store.clone(), "p-4").await;

    for _ in 0..4 {
        session.next(&Filled(json!({ "done": true }))).await.unwrap();
    }
    assert!(session.can_complete_review());
    assert_eq!(session.get_current_step_name().as_deref(), Some("Interventions"));

    let review = session.complete().await.unwrap();
    assert_eq!(review.status, ReviewStatus::Completed);
    assert_eq!(session.phase(), SessionPhase::Completed);

    let stored = store.load_review(&review.id).await.unwrap();
    assert_eq!(stored.status, ReviewStatus::Completed);
    assert_eq!(stored.current_step_index, 4);

    // A new session for the same patient starts a fresh review
    let fresh = open_session(store, "p-4").await;
    assert_ne!(fresh.review().unwrap().id, review.id);
}
