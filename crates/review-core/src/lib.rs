//! Medication therapy review session core
//!
//! Orchestrates one patient's multi-step review: permission gating, step
//! navigation, completion tracking, autosave and terminal transitions, on
//! top of a pluggable review gateway.

pub mod clients;
pub mod config;
pub mod constants;
pub mod error;
pub mod workflow;

// Re-export main types for easy access
pub use config::{GatewayKind, ReviewConfig};
pub use error::{ReviewError, Result};

pub use clients::{FileReviewStore, RestReviewGateway};

pub use workflow::{
    AllowAll,
    NextOutcome,
    PermissionGate,
    ReviewGateway,
    ReviewSession,
    RolePermissionGate,
    SessionOptions,
    SessionPhase,
    SessionSnapshot,
    SessionStart,
    StepCapability,
    StepDefinition,
    StepRegistry,
    StepValidation,
};

pub use review_types::{PatientId, Review, ReviewId, ReviewStatus, StepCompletion, StepData, StepRecord};
