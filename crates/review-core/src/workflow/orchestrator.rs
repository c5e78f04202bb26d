//! Review session orchestrator
//!
//! `ReviewSession` is the explicit session object consumers hold. It owns the
//! state machine, runs the permission gate before anything else, routes
//! navigation through the controller, and serializes every gateway write
//! through a single write guard shared with the autosave scheduler.

use super::autosave::{AutosaveHandle, AutosaveOutcome, AutosaveTarget};
use super::completion;
use super::machine::{SessionMachine, SessionPhase, SessionSnapshot, Transition};
use super::navigation::{NavigationController, NextPlan};
use super::permissions::PermissionGate;
use super::registry::{StepDefinition, StepRegistry};
use super::traits::{ReviewGateway, StepCapability};
use crate::config::ReviewConfig;
use crate::error::{ReviewError, Result};
use async_trait::async_trait;
use chrono::Utc;
use review_types::{PatientId, Review, ReviewId, StepRecord};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

/// How a session finds its review
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    /// Resume a specific review
    Review(ReviewId),
    /// Resume the patient's in-progress review, or create one
    Patient(PatientId),
}

/// Result of `next()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextOutcome {
    Advanced { from: usize, to: usize },
    /// Last step recorded as completed; the cursor stays
    CompletedLast { index: usize },
    /// Optional last step; nothing to do
    Unchanged { index: usize },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub autosave_enabled: bool,
    pub autosave_interval: Duration,
    pub teardown_grace: Duration,
    /// `None` leaves gateway calls unbounded
    pub gateway_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            autosave_enabled: true,
            autosave_interval: Duration::from_secs(30),
            teardown_grace: Duration::from_secs(2),
            gateway_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&ReviewConfig> for SessionOptions {
    fn from(config: &ReviewConfig) -> Self {
        Self {
            autosave_enabled: config.autosave.enabled,
            autosave_interval: config.autosave.interval(),
            teardown_grace: config.autosave.teardown_grace(),
            gateway_timeout: config.gateway.timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveKind {
    Explicit,
    Auto,
    Teardown,
}

/// State shared between the session and its autosave task
struct SessionCore<G: ReviewGateway> {
    gateway: G,
    registry: Arc<StepRegistry>,
    machine: Mutex<SessionMachine>,
    /// Single guard serializing every gateway write
    write_lock: tokio::sync::Mutex<()>,
    changes: watch::Sender<SessionSnapshot>,
    gateway_timeout: Option<Duration>,
}

impl<G: ReviewGateway> SessionCore<G> {
    fn machine(&self) -> MutexGuard<'_, SessionMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, machine: &SessionMachine) {
        self.changes.send_replace(machine.snapshot());
    }

    fn apply(&self, transition: Transition) -> Result<()> {
        self.apply_all(vec![transition])
    }

    /// Apply transitions under one lock and publish a single snapshot
    fn apply_all(&self, transitions: Vec<Transition>) -> Result<()> {
        let mut machine = self.machine();
        let mut result = Ok(());
        for transition in transitions {
            result = machine.apply(transition);
            if result.is_err() {
                break;
            }
        }
        self.publish(&machine);
        result
    }

    fn ensure_active(machine: &SessionMachine) -> Result<()> {
        if machine.phase().is_active() {
            Ok(())
        } else {
            Err(ReviewError::InvalidState(format!("session is {}", machine.phase())))
        }
    }

    fn active_review_id(&self) -> Result<ReviewId> {
        let machine = self.machine();
        Self::ensure_active(&machine)?;
        machine
            .review()
            .map(|r| r.id.clone())
            .ok_or_else(|| ReviewError::InvalidState("no review loaded".to_string()))
    }

    /// Run a gateway call under the configured timeout
    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.gateway_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(ReviewError::Timeout(format!(
                    "{} did not answer within {:?}",
                    operation, limit
                ))),
            },
            None => fut.await,
        }
    }

    /// Save the current snapshot. The caller must hold `write_lock`.
    async fn save_locked(&self, kind: SaveKind) -> Result<()> {
        let (snapshot, revision) = {
            let mut machine = self.machine();
            let review = machine
                .review()
                .cloned()
                .ok_or_else(|| ReviewError::InvalidState("no review loaded".to_string()))?;
            let revision = machine.revision();
            machine.apply(Transition::BeginSave)?;
            self.publish(&machine);
            (review, revision)
        };

        let mut pending = PendingSave { core: self, settled: false };
        let result = self.call("save_review", self.gateway.save_review(&snapshot)).await;
        pending.settled = true;

        match result {
            Ok(saved) => {
                self.apply(Transition::SaveSucceeded {
                    updated_at: saved.updated_at,
                    revision,
                })?;
                log::debug!("Saved review {} ({:?})", snapshot.id, kind);
                Ok(())
            }
            Err(e) => {
                let surfaced = match kind {
                    SaveKind::Explicit => Some(format!("Save failed: {}", e)),
                    SaveKind::Auto | SaveKind::Teardown => None,
                };
                self.apply(Transition::SaveFailed(surfaced))?;
                Err(e)
            }
        }
    }

    /// One best-effort save when the session is abandoned; `Ok(false)` when nothing was pending
    async fn final_save(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        {
            let machine = self.machine();
            if machine.phase() != SessionPhase::Active || !machine.is_dirty() {
                return Ok(false);
            }
        }
        self.save_locked(SaveKind::Teardown).await.map(|_| true)
    }
}

/// Returns the machine to `Active` if a save future is dropped before it settles
struct PendingSave<'a, G: ReviewGateway> {
    core: &'a SessionCore<G>,
    settled: bool,
}

impl<G: ReviewGateway> Drop for PendingSave<'_, G> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut machine = self.core.machine();
        if machine.phase() == SessionPhase::Saving && machine.apply(Transition::SaveFailed(None)).is_ok() {
            log::warn!("Save abandoned before the gateway answered");
            self.core.publish(&machine);
        }
    }
}

#[async_trait]
impl<G: ReviewGateway> AutosaveTarget for SessionCore<G> {
    async fn autosave(&self) -> AutosaveOutcome {
        let Ok(_guard) = self.write_lock.try_lock() else {
            return AutosaveOutcome::SaveInFlight;
        };

        {
            let machine = self.machine();
            match machine.phase() {
                SessionPhase::Active => {}
                SessionPhase::Saving => return AutosaveOutcome::SaveInFlight,
                _ => return AutosaveOutcome::NotActive,
            }
            if !machine.is_dirty() {
                return AutosaveOutcome::Clean;
            }
        }

        match self.save_locked(SaveKind::Auto).await {
            Ok(()) => AutosaveOutcome::Saved,
            Err(e) => AutosaveOutcome::Failed(e.to_string()),
        }
    }
}

/// One patient's review session
pub struct ReviewSession<G: ReviewGateway + 'static> {
    core: Arc<SessionCore<G>>,
    permissions: Arc<dyn PermissionGate>,
    options: SessionOptions,
    autosave: Option<AutosaveHandle>,
    torn_down: bool,
}

impl<G: ReviewGateway + 'static> ReviewSession<G> {
    pub fn new(
        gateway: G,
        permissions: Arc<dyn PermissionGate>,
        registry: Arc<StepRegistry>,
        options: SessionOptions,
    ) -> Self {
        let machine = SessionMachine::new(registry.clone());
        let (changes, _) = watch::channel(machine.snapshot());

        Self {
            core: Arc::new(SessionCore {
                gateway,
                registry,
                machine: Mutex::new(machine),
                write_lock: tokio::sync::Mutex::new(()),
                changes,
                gateway_timeout: options.gateway_timeout,
            }),
            permissions,
            options,
            autosave: None,
            torn_down: false,
        }
    }

    /// Receive a snapshot after every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.core.changes.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.machine().snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.machine().phase()
    }

    pub fn review(&self) -> Option<Review> {
        self.core.machine().review().cloned()
    }

    pub fn last_error(&self) -> Option<String> {
        self.core.machine().last_error().map(str::to_string)
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.core.registry
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.core.machine().review().map(|r| r.current_step_index)
    }

    /// Label of the step under the cursor
    pub fn get_current_step_name(&self) -> Option<String> {
        let index = self.current_step_index()?;
        self.core.registry.get(index).map(|s| s.label.clone())
    }

    pub fn get_completion_percentage(&self) -> f64 {
        let machine = self.core.machine();
        machine
            .review()
            .map(|r| completion::completion_percentage(r, &self.core.registry))
            .unwrap_or(0.0)
    }

    /// The step after the cursor, if any
    pub fn get_next_step(&self) -> Option<StepDefinition> {
        let index = self.current_step_index()?;
        self.core.registry.get(index + 1).cloned()
    }

    pub fn can_complete_review(&self) -> bool {
        let machine = self.core.machine();
        machine.phase().is_active()
            && machine
                .review()
                .map(|r| completion::can_complete_review(r, &self.core.registry))
                .unwrap_or(false)
    }

    pub fn autosave_running(&self) -> bool {
        self.autosave.as_ref().map(AutosaveHandle::is_running).unwrap_or(false)
    }

    /// Check permissions, then resume or create the review.
    ///
    /// Allowed from `Uninitialized` or `Error`; a failed attempt can be
    /// retried by calling this again.
    pub async fn initialize(&mut self, start: SessionStart) -> Result<Review> {
        let phase = self.phase();
        if !phase.can_initialize() {
            return Err(ReviewError::InvalidState(format!(
                "cannot initialize a session that is {}",
                phase
            )));
        }

        let allowed = self
            .core
            .call("check_permissions", self.permissions.check_permissions())
            .await;
        let denial = match allowed {
            Ok(true) => None,
            Ok(false) => Some("you do not have permission to run medication therapy reviews".to_string()),
            Err(e) => Some(format!("permission check failed: {}", e)),
        };
        if let Some(message) = denial {
            log::warn!("Review session blocked: {}", message);
            self.core.apply(Transition::PermissionDenied(message.clone()))?;
            return Err(ReviewError::PermissionDenied(message));
        }

        self.core.apply(Transition::BeginLoading)?;
        log::info!("Loading review session ({:?})", start);

        let loaded = match &start {
            SessionStart::Review(review_id) => {
                self.core
                    .call("load_review", self.core.gateway.load_review(review_id))
                    .await
            }
            SessionStart::Patient(patient_id) => self.resume_or_create(patient_id).await,
        };

        match loaded {
            Ok(review) => {
                self.core.apply(Transition::Loaded(review.clone()))?;
                log::info!(
                    "Review {} for patient {} is {} at step {}",
                    review.id,
                    review.patient_id,
                    review.status,
                    review.current_step_index
                );
                if self.phase() == SessionPhase::Active {
                    self.start_autosave();
                }
                Ok(self.review().unwrap_or(review))
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("Failed to initialize review session: {}", message);
                self.core.apply(Transition::LoadFailed(message.clone()))?;
                Err(ReviewError::Initialization(message))
            }
        }
    }

    /// Resume the patient's in-progress review before ever creating one
    async fn resume_or_create(&self, patient_id: &PatientId) -> Result<Review> {
        let gateway = &self.core.gateway;
        let existing = self
            .core
            .call("load_in_progress_review", gateway.load_in_progress_review(patient_id))
            .await?;

        let review = match existing {
            Some(review) => {
                log::info!("Resuming in-progress review {} for patient {}", review.id, patient_id);
                review
            }
            None => {
                log::info!("No in-progress review for patient {}, creating one", patient_id);
                self.core
                    .call("create_review", gateway.create_review(patient_id))
                    .await?
            }
        };

        if review.patient_id != *patient_id {
            return Err(ReviewError::Initialization(format!(
                "gateway returned review {} for patient {} instead of {}",
                review.id, review.patient_id, patient_id
            )));
        }
        Ok(review)
    }

    fn start_autosave(&mut self) {
        if !self.options.autosave_enabled || self.autosave.is_some() {
            return;
        }
        self.autosave = Some(AutosaveHandle::start(
            self.core.clone(),
            self.options.autosave_interval,
        ));
    }

    async fn stop_autosave(&mut self) {
        if let Some(handle) = self.autosave.take() {
            handle.stop().await;
        }
    }

    /// Complete the current step and advance.
    ///
    /// Validation failures return `ReviewError::Validation` without any
    /// gateway call or state change.
    pub async fn next(&self, step: &dyn StepCapability) -> Result<NextOutcome> {
        let plan = {
            let machine = self.core.machine();
            SessionCore::<G>::ensure_active(&machine)?;
            let review = machine
                .review()
                .ok_or_else(|| ReviewError::InvalidState("no review loaded".to_string()))?;
            NavigationController::new(&self.core.registry).plan_next(review, step)
        };

        let (completion, advance_to) = match plan {
            Ok(NextPlan::Noop) => {
                let index = self.current_step_index().unwrap_or(0);
                log::debug!("next() on optional last step {} is a no-op", index);
                return Ok(NextOutcome::Unchanged { index });
            }
            Ok(NextPlan::Complete { completion, advance_to }) => (completion, advance_to),
            Err(e) => {
                if let ReviewError::Validation { step, reason } = &e {
                    log::info!("Step '{}' not ready: {}", step, reason);
                }
                return Err(e);
            }
        };

        let _guard = self.core.write_lock.lock().await;
        let review_id = {
            let machine = self.core.machine();
            SessionCore::<G>::ensure_active(&machine)?;
            let review = machine
                .review()
                .ok_or_else(|| ReviewError::InvalidState("no review loaded".to_string()))?;
            if review.current_step_index != completion.step_index {
                return Err(ReviewError::InvalidState(format!(
                    "cursor moved from {} to {} while completing the step",
                    completion.step_index, review.current_step_index
                )));
            }
            review.id.clone()
        };

        let stored = match self
            .core
            .call(
                "complete_step",
                self.core.gateway.complete_step(&review_id, &completion),
            )
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                let message = format!("could not record step '{}': {}", completion.step_id, e);
                log::error!("{}", message);
                self.core.apply(Transition::ErrorRecorded(message.clone()))?;
                return Err(ReviewError::Save(message));
            }
        };

        let record = stored
            .steps
            .get(&completion.step_id)
            .filter(|r| r.completed)
            .cloned()
            .unwrap_or_else(|| StepRecord::completed_at(completion.data.clone(), Utc::now()));

        let mut transitions = vec![Transition::StepCompleted {
            step_id: completion.step_id.clone(),
            record,
            updated_at: stored.updated_at,
        }];
        if let Some(to) = advance_to {
            transitions.push(Transition::MoveTo(to));
        }
        self.core.apply_all(transitions)?;

        let from = completion.step_index;
        log::info!("Completed step '{}' of review {}", completion.step_id, review_id);
        Ok(match advance_to {
            Some(to) => NextOutcome::Advanced { from, to },
            None => NextOutcome::CompletedLast { index: from },
        })
    }

    /// Step back one; stays at the first step. Returns the cursor.
    pub fn back(&self) -> Result<usize> {
        let mut machine = self.core.machine();
        SessionCore::<G>::ensure_active(&machine)?;
        let (current, target) = match machine.review() {
            Some(review) => (
                review.current_step_index,
                NavigationController::new(&self.core.registry).back_target(review),
            ),
            None => return Err(ReviewError::InvalidState("no review loaded".to_string())),
        };

        match target {
            Some(to) => {
                machine.apply(Transition::MoveTo(to))?;
                self.core.publish(&machine);
                Ok(to)
            }
            None => Ok(current),
        }
    }

    /// Jump to a completed step or the first incomplete one.
    ///
    /// Anything else, including out-of-range indices, is ignored. Returns the cursor.
    pub fn jump_to(&self, index: usize) -> Result<usize> {
        let mut machine = self.core.machine();
        SessionCore::<G>::ensure_active(&machine)?;
        let (current, target) = match machine.review() {
            Some(review) => (
                review.current_step_index,
                NavigationController::new(&self.core.registry).jump_target(review, index),
            ),
            None => return Err(ReviewError::InvalidState("no review loaded".to_string())),
        };

        match target {
            Some(to) => {
                machine.apply(Transition::MoveTo(to))?;
                self.core.publish(&machine);
                Ok(to)
            }
            None => {
                log::debug!("Ignoring jump from step {} to {}", current, index);
                Ok(current)
            }
        }
    }

    /// Explicit save; waits for any in-flight save, failures are returned
    pub async fn save(&self) -> Result<()> {
        SessionCore::<G>::ensure_active(&self.core.machine())?;
        let _guard = self.core.write_lock.lock().await;
        SessionCore::<G>::ensure_active(&self.core.machine())?;

        self.core.save_locked(SaveKind::Explicit).await.map_err(|e| {
            log::error!("Explicit save failed: {}", e);
            ReviewError::Save(e.to_string())
        })
    }

    /// Save, then finalize the review.
    ///
    /// Rejected locally when a validation-required step is incomplete. The
    /// write guard is held across both calls so no autosave interleaves.
    pub async fn complete(&mut self) -> Result<Review> {
        self.check_completable()?;

        let guard = self.core.write_lock.lock().await;
        self.check_completable()?;

        if let Err(e) = self.core.save_locked(SaveKind::Explicit).await {
            log::error!("Save before completion failed: {}", e);
            return Err(ReviewError::Save(e.to_string()));
        }

        let review_id = self.core.active_review_id()?;
        let completed = match self
            .core
            .call("complete_review", self.core.gateway.complete_review(&review_id))
            .await
        {
            Ok(review) => review,
            Err(e) => {
                let message = format!("the review service rejected completion: {}", e);
                log::warn!("Completing review {} failed: {}", review_id, e);
                self.core.apply(Transition::ErrorRecorded(message.clone()))?;
                return Err(ReviewError::Completion(message));
            }
        };

        self.core.apply(Transition::Completed(completed))?;
        drop(guard);
        self.stop_autosave().await;

        log::info!("Review {} completed", review_id);
        self.review()
            .ok_or_else(|| ReviewError::InvalidState("no review loaded".to_string()))
    }

    fn check_completable(&self) -> Result<()> {
        let machine = self.core.machine();
        SessionCore::<G>::ensure_active(&machine)?;
        let review = machine
            .review()
            .ok_or_else(|| ReviewError::InvalidState("no review loaded".to_string()))?;

        let unmet = completion::unmet_requirements(review, &self.core.registry);
        if unmet.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = unmet.iter().map(|s| s.label.as_str()).collect();
        let message = format!("required steps are incomplete: {}", names.join(", "));
        drop(machine);
        self.core.apply(Transition::ErrorRecorded(message.clone()))?;
        Err(ReviewError::Completion(message))
    }

    /// Cancel the review. Irreversible once the gateway acknowledges it.
    pub async fn cancel(&mut self) -> Result<Review> {
        self.core.active_review_id()?;
        let guard = self.core.write_lock.lock().await;
        let review_id = self.core.active_review_id()?;

        let cancelled = match self
            .core
            .call("cancel_review", self.core.gateway.cancel_review(&review_id))
            .await
        {
            Ok(review) => review,
            Err(e) => {
                let message = format!("could not cancel review: {}", e);
                log::error!("Cancelling review {} failed: {}", review_id, e);
                self.core.apply(Transition::ErrorRecorded(message.clone()))?;
                return Err(ReviewError::Cancellation(message));
            }
        };

        self.core.apply(Transition::Cancelled(cancelled))?;
        drop(guard);
        self.stop_autosave().await;

        log::info!("Review {} cancelled", review_id);
        self.review()
            .ok_or_else(|| ReviewError::InvalidState("no review loaded".to_string()))
    }

    /// Abandon the session: stop autosave and make one best-effort save.
    ///
    /// Never takes longer than the configured grace period; failures are only logged.
    pub async fn teardown(mut self) {
        self.torn_down = true;
        let deadline = Instant::now() + self.options.teardown_grace;

        if let Some(handle) = self.autosave.take() {
            if timeout_at(deadline, handle.stop()).await.is_err() {
                log::warn!("Autosave did not stop within the teardown grace period");
            }
        }

        match timeout_at(deadline, self.core.final_save()).await {
            Ok(Ok(true)) => log::info!("Saved review before teardown"),
            Ok(Ok(false)) => log::debug!("Nothing to save at teardown"),
            Ok(Err(e)) => log::warn!("Teardown save failed: {}", e),
            Err(_) => log::warn!("Teardown save abandoned after grace period"),
        }
    }
}

impl<G: ReviewGateway + 'static> Drop for ReviewSession<G> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        // Let a tick that is already saving finish; the final save queues behind it
        if let Some(handle) = self.autosave.take() {
            handle.detach();
        }

        let pending = {
            let machine = self.core.machine();
            machine.phase().is_active() && machine.is_dirty()
        };
        if !pending {
            return;
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let core = self.core.clone();
            let grace = self.options.teardown_grace;
            runtime.spawn(async move {
                match tokio::time::timeout(grace, core.final_save()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::warn!("Save on abandoned session failed: {}", e),
                    Err(_) => log::warn!("Save on abandoned session timed out"),
                }
            });
        } else {
            log::warn!("Review session dropped with unsaved changes and no runtime to save them");
        }
    }
}
