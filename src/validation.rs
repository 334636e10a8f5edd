// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Up-front validation for typed line item creation.
//!
//! The schema is generated from [`FIELD_ALIASES`], so every accepted spelling
//! of a field gets the same rule. A batch is checked as a whole and every
//! field error is reported, not just the first.
//!
//! ```
//! use line_item_sync::validation::LineItemValidator;
//! use serde_json::json;
//!
//! let validator = LineItemValidator::new().unwrap();
//! let errors = validator
//!     .validate_batch(&[
//!         json!({"productId": "p-1", "quantity": 2}),
//!         json!({"unitPrice": -5}),
//!     ])
//!     .unwrap_err();
//!
//! assert!(errors.iter().all(|e| e.index == 1));
//! assert_eq!(errors.len(), 2); // no product reference, negative price
//! ```

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::line_item::{LineItemField, FIELD_ALIASES};

/// One failed rule for one item in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Position of the item in the batch.
    pub index: usize,
    /// JSON pointer into the item; empty for item-level failures.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "item {}: {}", self.index, self.message)
        } else {
            write!(f, "item {} {}: {}", self.index, self.path, self.message)
        }
    }
}

/// Every field error found in a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} invalid line item field(s): {}", .errors.len(), join(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }
}

/// The generated schema failed to compile.
#[derive(Error, Debug, Clone)]
#[error("Invalid line item schema: {0}")]
pub struct SchemaError(pub String);

/// JSON Schema for one line item object.
#[must_use]
pub fn line_item_schema() -> Value {
    let mut properties = Map::new();
    for (field, aliases) in FIELD_ALIASES {
        let rule = field_rule(*field);
        for alias in *aliases {
            properties.insert((*alias).to_string(), rule.clone());
        }
    }

    // Null aliases are skipped when reading, so one non-null spelling suffices
    let product_required: Vec<Value> = LineItemField::ProductId
        .aliases()
        .iter()
        .map(|name| {
            json!({
                "required": [name],
                "properties": { *name: { "type": ["string", "number"], "pattern": "\\S" } },
            })
        })
        .collect();

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": properties,
        "anyOf": product_required,
    })
}

fn field_rule(field: LineItemField) -> Value {
    match field {
        LineItemField::ProductId => json!({
            "type": ["string", "number", "null"],
            "pattern": "\\S",
        }),
        LineItemField::VendorId => json!({ "type": ["string", "number", "null"] }),
        LineItemField::Quantity | LineItemField::UnitPrice => json!({
            "type": ["number", "null"],
            "minimum": 0,
        }),
        LineItemField::RequiresScheduling | LineItemField::IsOffSite => {
            json!({ "type": ["boolean", "null"] })
        }
        LineItemField::NoScheduleReason => json!({ "type": ["string", "null"] }),
        LineItemField::PromisedDate
        | LineItemField::ScheduledStartTime
        | LineItemField::ScheduledEndTime => json!({ "type": ["string", "integer", "null"] }),
    }
}

/// Compiled line item schema.
pub struct LineItemValidator {
    validator: Validator,
}

impl std::fmt::Debug for LineItemValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineItemValidator").finish_non_exhaustive()
    }
}

impl LineItemValidator {
    pub fn new() -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&line_item_schema())
            .map_err(|err| SchemaError(err.to_string()))?;
        Ok(Self { validator })
    }

    /// Field errors for one item.
    #[must_use]
    pub fn validate_item(&self, index: usize, item: &Value) -> Vec<FieldError> {
        self.validator
            .iter_errors(item)
            .map(|err| {
                let message = if matches!(err.kind, ValidationErrorKind::AnyOf { .. }) {
                    format!(
                        "missing product reference (expected one of {})",
                        LineItemField::ProductId.aliases().join(", ")
                    )
                } else {
                    err.to_string()
                };
                FieldError {
                    index,
                    path: err.instance_path.to_string(),
                    message,
                }
            })
            .collect()
    }

    /// Check every item; `Err` lists all failures across the batch.
    pub fn validate_batch(&self, items: &[Value]) -> Result<(), ValidationErrors> {
        let errors: Vec<FieldError> = items
            .iter()
            .enumerate()
            .flat_map(|(index, item)| self.validate_item(index, item))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { errors })
        }
    }
}
