//! Ordered catalogue of review steps

use crate::constants::*;
use crate::error::{ReviewError, Result};
use serde::Serialize;
use std::collections::HashSet;

/// Immutable description of one workflow step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,
    pub label: String,
    pub description: String,
    pub order: usize,
    /// The step must report itself valid before the session advances past it
    pub validation_required: bool,
}

impl StepDefinition {
    pub fn new(id: &str, label: &str, description: &str, order: usize, validation_required: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            order,
            validation_required,
        }
    }
}

/// Static ordered list of step definitions, never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRegistry {
    steps: Vec<StepDefinition>,
}

impl StepRegistry {
    /// Build a registry, rejecting empty lists, duplicate ids and out-of-place `order` values
    pub fn new(steps: Vec<StepDefinition>) -> Result<Self> {
        if steps.is_empty() {
            return Err(ReviewError::Config("step registry must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for (position, step) in steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(ReviewError::Config(format!("step at position {} has no id", position)));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ReviewError::Config(format!("duplicate step id '{}'", step.id)));
            }
            if step.order != position {
                return Err(ReviewError::Config(format!(
                    "step '{}' has order {} but sits at position {}",
                    step.id, step.order, position
                )));
            }
        }

        Ok(Self { steps })
    }

    /// The six-step medication therapy review
    pub fn medication_therapy_review() -> Self {
        Self {
            steps: vec![
                StepDefinition::new(
                    STEP_PATIENT_SELECTION,
                    "Patient Selection",
                    "Select the patient whose therapy is being reviewed",
                    0,
                    true,
                ),
                StepDefinition::new(
                    STEP_MEDICATION_HISTORY,
                    "Medication History",
                    "Record current and past medications",
                    1,
                    true,
                ),
                StepDefinition::new(
                    STEP_THERAPY_ASSESSMENT,
                    "Therapy Assessment",
                    "Assess therapy problems, interactions and adherence",
                    2,
                    true,
                ),
                StepDefinition::new(
                    STEP_PLAN_DEVELOPMENT,
                    "Plan Development",
                    "Develop the therapy plan and goals",
                    3,
                    true,
                ),
                StepDefinition::new(
                    STEP_INTERVENTIONS,
                    "Interventions",
                    "Document pharmacist interventions",
                    4,
                    false,
                ),
                StepDefinition::new(
                    STEP_FOLLOW_UP,
                    "Follow-up",
                    "Schedule follow-up appointments and tasks",
                    5,
                    false,
                ),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a constructed registry
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.steps.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    pub fn index_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::medication_therapy_review()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_shape() {
        let registry = StepRegistry::medication_therapy_review();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.last_index(), 5);
        assert_eq!(registry.get(0).unwrap().id, STEP_PATIENT_SELECTION);
        assert_eq!(registry.get(5).unwrap().id, STEP_FOLLOW_UP);

        let required: Vec<bool> = registry.iter().map(|s| s.validation_required).collect();
        assert_eq!(required, vec![true, true, true, true, false, false]);

        // Default registry must satisfy its own construction rules
        assert!(StepRegistry::new(registry.iter().cloned().collect()).is_ok());
    }

    #[test]
    fn test_index_of() {
        let registry = StepRegistry::default();
        assert_eq!(registry.index_of(STEP_PLAN_DEVELOPMENT), Some(3));
        assert_eq!(registry.index_of("unknown"), None);
    }

    #[test]
    fn test_rejects_invalid_registries() {
        assert!(StepRegistry::new(vec![]).is_err());

        let dup = vec![
            StepDefinition::new("a", "A", "", 0, true),
            StepDefinition::new("a", "A again", "", 1, false),
        ];
        let err = StepRegistry::new(dup).unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let misordered = vec![
            StepDefinition::new("a", "A", "", 1, true),
            StepDefinition::new("b", "B", "", 0, false),
        ];
        assert!(StepRegistry::new(misordered).is_err());
    }
}
