//! Review session workflow

pub mod autosave;
pub mod completion;
pub mod machine;
pub mod navigation;
pub mod orchestrator;
pub mod permissions;
pub mod registry;
pub mod traits;

pub use autosave::{AutosaveHandle, AutosaveOutcome, AutosaveTarget};
pub use machine::{SessionMachine, SessionPhase, SessionSnapshot, Transition};
pub use navigation::{NavigationController, NextPlan};
pub use orchestrator::{NextOutcome, ReviewSession, SessionOptions, SessionStart};
pub use permissions::{AllowAll, PermissionGate, RolePermissionGate};
pub use registry::{StepDefinition, StepRegistry};
pub use traits::{ReviewGateway, StepCapability, StepValidation};
