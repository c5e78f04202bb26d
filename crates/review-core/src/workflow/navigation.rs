//! Navigation controller: turns next/back/jump intents into planned transitions
//!
//! Planning is pure; the session applies the plan to the state machine and
//! performs any gateway call the plan needs.

use super::completion::first_incomplete_step_index;
use super::registry::StepRegistry;
use super::traits::{StepCapability, StepValidation};
use crate::error::{ReviewError, Result};
use review_types::{Review, StepCompletion};

/// What `next()` should do
#[derive(Debug, Clone, PartialEq)]
pub enum NextPlan {
    /// Record the step as completed, then move the cursor if `advance_to` is set
    Complete {
        completion: StepCompletion,
        advance_to: Option<usize>,
    },
    /// Optional last step: there is nothing after it
    Noop,
}

pub struct NavigationController<'r> {
    registry: &'r StepRegistry,
}

impl<'r> NavigationController<'r> {
    pub fn new(registry: &'r StepRegistry) -> Self {
        Self { registry }
    }

    /// Plan a forward move from the review's current step.
    ///
    /// Validation-required steps must report valid; a failure is returned as
    /// `ReviewError::Validation` and nothing else happens.
    pub fn plan_next(&self, review: &Review, step: &dyn StepCapability) -> Result<NextPlan> {
        let index = review.current_step_index;
        let definition = self.registry.get(index).ok_or_else(|| {
            ReviewError::InvalidState(format!("cursor {} is outside the step registry", index))
        })?;
        let is_last = index == self.registry.last_index();

        if is_last && !definition.validation_required {
            return Ok(NextPlan::Noop);
        }

        if definition.validation_required {
            if let StepValidation::Invalid(reason) = step.validate() {
                return Err(ReviewError::Validation {
                    step: definition.id.clone(),
                    reason,
                });
            }
        }

        Ok(NextPlan::Complete {
            completion: StepCompletion {
                step_index: index,
                step_id: definition.id.clone(),
                data: step.extract_data(),
            },
            advance_to: (!is_last).then_some(index + 1),
        })
    }

    /// Target of `back()`; `None` at the first step
    pub fn back_target(&self, review: &Review) -> Option<usize> {
        review.current_step_index.checked_sub(1)
    }

    /// Target of `jump_to(index)`; `None` means the request is ignored.
    ///
    /// Any completed step or the first incomplete one may be visited; later
    /// steps and out-of-range indices may not.
    pub fn jump_target(&self, review: &Review, index: usize) -> Option<usize> {
        if index >= self.registry.len() || index == review.current_step_index {
            return None;
        }
        let bound = first_incomplete_step_index(review, self.registry)
            .unwrap_or_else(|| self.registry.last_index());
        (index <= bound).then_some(index)
    }
}
