//! Step data typed on the command line

use anyhow::{Context, Result};
use review_core::{StepCapability, StepData, StepValidation};
use serde_json::Value;

/// A step whose content is a JSON document
#[derive(Debug, Clone, PartialEq)]
pub struct JsonStep {
    data: StepData,
}

impl JsonStep {
    /// Parse step data; missing or empty input yields an empty step
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let data = match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(text) => serde_json::from_str(text).context("step data must be valid JSON")?,
            None => Value::Null,
        };
        Ok(Self { data })
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

impl StepCapability for JsonStep {
    fn validate(&self) -> StepValidation {
        if is_blank(&self.data) {
            StepValidation::Invalid("no data entered for this step".to_string())
        } else {
            StepValidation::Valid
        }
    }

    fn extract_data(&self) -> StepData {
        self.data.clone()
    }
}
