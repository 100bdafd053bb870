//! Company record and rule-set types
//!
//! These are the request-scoped values threaded through the pipelines.
//! Nothing here persists beyond a single request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Maximum number of properties accepted in a caller-supplied record
pub const MAX_RECORD_PROPERTIES: usize = 50;

/// A flat map of company properties, optionally tagged with its store id.
///
/// Caller-supplied records carry no id until they are matched against the
/// store; records fetched from the store always carry one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub properties: BTreeMap<String, Value>,
}

impl CompanyRecord {
    pub fn new(properties: BTreeMap<String, Value>) -> Self {
        Self {
            id: None,
            properties,
        }
    }

    pub fn with_id(id: impl Into<String>, properties: BTreeMap<String, Value>) -> Self {
        Self {
            id: Some(id.into()),
            properties,
        }
    }

    /// Property value as a string, if present and non-null
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Validate a caller-supplied property map: 1..=50 entries, scalars only.
///
/// Nested objects and arrays are rejected here, before any external call
/// is made.
pub fn validate_input_record(properties: &BTreeMap<String, Value>) -> Result<(), ValidationError> {
    if properties.is_empty() {
        return Err(ValidationError::EmptyRecord);
    }
    if properties.len() > MAX_RECORD_PROPERTIES {
        return Err(ValidationError::TooManyProperties {
            count: properties.len(),
            max: MAX_RECORD_PROPERTIES,
        });
    }
    for (name, value) in properties {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {}
            Value::Array(_) | Value::Object(_) => {
                return Err(ValidationError::NestedProperty {
                    property: name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Caller-supplied natural-language overrides for the merge pipeline.
///
/// The text is opaque to the core: it is only ever appended to schema
/// descriptions, after structural characters are stripped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    pub duplicate_rules: Option<String>,
    pub primary_rules: Option<String>,
    pub merge_rules: Option<String>,
    #[serde(default)]
    pub merge_property_rules: BTreeMap<String, String>,
}
