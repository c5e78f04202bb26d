/// Step ids of the medication therapy review, in workflow order
pub const STEP_PATIENT_SELECTION: &str = "patient_selection";
pub const STEP_MEDICATION_HISTORY: &str = "medication_history";
pub const STEP_THERAPY_ASSESSMENT: &str = "therapy_assessment";
pub const STEP_PLAN_DEVELOPMENT: &str = "plan_development";
pub const STEP_INTERVENTIONS: &str = "interventions";
pub const STEP_FOLLOW_UP: &str = "follow_up";

/// Permission checked before a review session may start
pub const REVIEW_PERMISSION: &str = "medication-review";
