//! Clean workflow
//!
//! One inference call maps every caller-supplied field to a cleaned value
//! with reasoning and confidence. The schema is restricted to exactly the
//! caller's fields. Write-back, when requested, only touches fields whose
//! cleaned value differs from the original and which exist on the stored
//! record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PipelineFailure;
use super::usage::{PipelineUsage, StageKind};
use super::Confidence;
use crate::error::PipelineError;
use crate::inference::{InferenceError, StructuredInference};
use crate::records::CompanyRecord;
use crate::schema;
use crate::store::RecordStore;

/// What the model did to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CleanAction {
    Cleaned,
    Unchanged,
    Cleared,
}

/// Per-field clean result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanedField {
    pub cleaned_value: Option<String>,
    pub action: CleanAction,
    pub confidence: Confidence,
    pub reasoning: String,
}

/// Caller input for one clean run.
#[derive(Debug, Clone)]
pub struct CleanRequest {
    pub company: CompanyRecord,
    /// Store id of the record, required when `apply` is set.
    pub record_id: Option<String>,
    pub clean_rules: Option<String>,
    pub apply: bool,
}

/// Everything one clean run produced.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanReport {
    pub fields: BTreeMap<String, CleanedField>,
    pub record_updated: bool,
    pub updated_properties: Vec<String>,
    pub usage: PipelineUsage,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl CleanReport {
    pub fn credit_cost(&self) -> u32 {
        self.usage.credit_cost()
    }
}

/// Run the clean workflow.
pub async fn run(
    inference: &dyn StructuredInference,
    store: &dyn RecordStore,
    request: &CleanRequest,
) -> Result<CleanReport, PipelineFailure> {
    let mut usage = PipelineUsage::new();
    match drive(inference, store, request, &mut usage).await {
        Ok(report) => Ok(report),
        Err(source) => Err(PipelineFailure { source, usage }),
    }
}

async fn drive(
    inference: &dyn StructuredInference,
    store: &dyn RecordStore,
    request: &CleanRequest,
    usage: &mut PipelineUsage,
) -> Result<CleanReport, PipelineError> {
    let stage_schema = schema::clean(
        request.company.properties.keys(),
        request.clean_rules.as_deref(),
    );
    let subject = serde_json::json!({ "company": request.company.properties });

    let output = inference.generate(&subject, &stage_schema).await?;
    usage.record(StageKind::Clean, output.usage);

    let fields_value = output
        .data
        .get("fields")
        .cloned()
        .ok_or_else(|| InferenceError::Parse("clean output lacks fields".into()))?;
    let fields: BTreeMap<String, CleanedField> = serde_json::from_value(fields_value)
        .map_err(|e| InferenceError::Parse(format!("clean fields: {e}")))?;

    let (record_updated, updated_properties) = match (&request.record_id, request.apply) {
        (Some(record_id), true) => write_back(store, record_id, request, &fields).await?,
        _ => (false, Vec::new()),
    };

    Ok(CleanReport {
        fields,
        record_updated,
        updated_properties,
        usage: std::mem::take(usage),
        completed_at: chrono::Utc::now(),
    })
}

/// Patch only the fields that actually changed and exist on the stored
/// record. The diff is a precondition on the write, not on inference.
async fn write_back(
    store: &dyn RecordStore,
    record_id: &str,
    request: &CleanRequest,
    fields: &BTreeMap<String, CleanedField>,
) -> Result<(bool, Vec<String>), PipelineError> {
    let requested: Vec<String> = request.company.properties.keys().cloned().collect();
    let stored = store.fetch(record_id, &requested).await?;

    let mut changes: BTreeMap<String, Value> = BTreeMap::new();
    for (name, cleaned) in fields {
        let Some(original) = request.company.properties.get(name) else {
            continue;
        };
        if !stored.properties.contains_key(name) {
            continue;
        }
        let replacement = match &cleaned.cleaned_value {
            Some(v) => Value::String(v.clone()),
            None => Value::Null,
        };
        if !value_matches(original, &replacement) {
            changes.insert(name.clone(), replacement);
        }
    }

    if changes.is_empty() {
        return Ok((false, Vec::new()));
    }

    store.update(record_id, &changes).await?;
    let updated: Vec<String> = changes.into_keys().collect();
    tracing::info!(record_id, fields = updated.len(), "cleaned values written back");
    Ok((true, updated))
}

/// Compare a caller-supplied scalar with its cleaned replacement.
/// Numbers and booleans compare through their canonical string form.
fn value_matches(original: &Value, replacement: &Value) -> bool {
    match (original, replacement) {
        (Value::Null, Value::Null) => true,
        (Value::String(a), Value::String(b)) => a == b,
        (a, Value::String(b)) => &scalar_to_string(a) == b,
        _ => original == replacement,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
