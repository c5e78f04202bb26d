//! Completion metrics derived from a review's step records.
//!
//! Everything here is a pure function of the review's `steps` map and the
//! registry. Step records whose id is not in the registry are ignored.

use super::registry::{StepDefinition, StepRegistry};
use review_types::Review;

/// Percentage (0–100) of registry steps marked completed
pub fn completion_percentage(review: &Review, registry: &StepRegistry) -> f64 {
    let completed = registry
        .iter()
        .filter(|step| review.is_step_completed(&step.id))
        .count();
    100.0 * completed as f64 / registry.len() as f64
}

/// True iff every validation-required step is completed
pub fn can_complete_review(review: &Review, registry: &StepRegistry) -> bool {
    unmet_requirements(review, registry).is_empty()
}

/// Validation-required steps that are not yet completed, in order
pub fn unmet_requirements<'r>(review: &Review, registry: &'r StepRegistry) -> Vec<&'r StepDefinition> {
    registry
        .iter()
        .filter(|step| step.validation_required && !review.is_step_completed(&step.id))
        .collect()
}

/// Index of the first step not yet completed; `None` when all are
pub fn first_incomplete_step_index(review: &Review, registry: &StepRegistry) -> Option<usize> {
    registry
        .iter()
        .position(|step| !review.is_step_completed(&step.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use review_types::{PatientId, StepRecord};
    use serde_json::json;

    fn review_with_completed(registry: &StepRegistry, indices: &[usize]) -> Review {
        let mut review = Review::start(PatientId::from_string("p-1").unwrap());
        for &i in indices {
            let id = registry.get(i).unwrap().id.clone();
            review.steps.insert(id, StepRecord::completed_at(json!({}), Utc::now()));
        }
        review
    }

    #[test]
    fn test_required_steps_only_allow_completion() {
        let registry = StepRegistry::medication_therapy_review();
        let review = review_with_completed(&registry, &[0, 1, 2, 3]);

        let pct = completion_percentage(&review, &registry);
        assert!((pct - 66.666).abs() < 0.1, "got {}", pct);
        assert!(can_complete_review(&review, &registry));
        assert_eq!(first_incomplete_step_index(&review, &registry), Some(4));
    }

    #[test]
    fn test_missing_required_step_blocks_completion() {
        let registry = StepRegistry::medication_therapy_review();
        let review = review_with_completed(&registry, &[0, 1, 3, 4, 5]);

        assert!(!can_complete_review(&review, &registry));
        let unmet: Vec<&str> = unmet_requirements(&review, &registry)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(unmet, vec!["therapy_assessment"]);
        assert_eq!(first_incomplete_step_index(&review, &registry), Some(2));
    }

    #[test]
    fn test_empty_and_full_reviews() {
        let registry = StepRegistry::medication_therapy_review();
        let empty = review_with_completed(&registry, &[]);
        assert_eq!(completion_percentage(&empty, &registry), 0.0);
        assert_eq!(first_incomplete_step_index(&empty, &registry), Some(0));

        let full = review_with_completed(&registry, &[0, 1, 2, 3, 4, 5]);
        assert_eq!(completion_percentage(&full, &registry), 100.0);
        assert_eq!(first_incomplete_step_index(&full, &registry), None);
    }

    #[test]
    fn test_unknown_and_uncompleted_records_ignored() {
        let registry = StepRegistry::medication_therapy_review();
        let mut review = review_with_completed(&registry, &[0]);
        review
            .steps
            .insert("legacy_step".to_string(), StepRecord::completed_at(json!(null), Utc::now()));
        review.steps.insert(
            "medication_history".to_string(),
            StepRecord {
                completed: false,
                completed_at: None,
                data: json!({ "draft": true }),
            },
        );

        let pct = completion_percentage(&review, &registry);
        assert!((pct - 100.0 / 6.0).abs() < 1e-9);
    }
}
