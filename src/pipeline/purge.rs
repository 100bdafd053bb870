//! Purge workflow
//!
//! One inference call classifies a record as REMOVE or KEEP, biased
//! toward conservatism by the schema description. The optional archive is
//! gated on the classification being REMOVE.

use serde::{Deserialize, Serialize};

use super::PipelineFailure;
use super::usage::{PipelineUsage, StageKind};
use super::Confidence;
use crate::error::PipelineError;
use crate::inference::{InferenceError, StructuredInference};
use crate::records::CompanyRecord;
use crate::schema;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PurgeAction {
    Remove,
    Keep,
}

/// Caller input for one purge run.
#[derive(Debug, Clone)]
pub struct PurgeRequest {
    pub company: CompanyRecord,
    /// Store id of the record, required when `apply` is set.
    pub record_id: Option<String>,
    pub purge_rules: Option<String>,
    pub apply: bool,
}

/// Classification plus whether the record was actually archived.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub recommended_action: PurgeAction,
    pub confidence: Confidence,
    pub reasoning: String,
    pub record_archived: bool,
    pub usage: PipelineUsage,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl PurgeReport {
    pub fn credit_cost(&self) -> u32 {
        self.usage.credit_cost()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Classification {
    recommended_action: PurgeAction,
    confidence: Confidence,
    reasoning: String,
}

/// Run the purge workflow.
pub async fn run(
    inference: &dyn StructuredInference,
    store: &dyn RecordStore,
    request: &PurgeRequest,
) -> Result<PurgeReport, PipelineFailure> {
    let mut usage = PipelineUsage::new();
    match drive(inference, store, request, &mut usage).await {
        Ok(report) => Ok(report),
        Err(source) => Err(PipelineFailure { source, usage }),
    }
}

async fn drive(
    inference: &dyn StructuredInference,
    store: &dyn RecordStore,
    request: &PurgeRequest,
    usage: &mut PipelineUsage,
) -> Result<PurgeReport, PipelineError> {
    let stage_schema = schema::purge(request.purge_rules.as_deref());
    let subject = serde_json::json!({ "company": request.company.properties });

    let output = inference.generate(&subject, &stage_schema).await?;
    usage.record(StageKind::Purge, output.usage);

    let classification: Classification = serde_json::from_value(output.data)
        .map_err(|e| InferenceError::Parse(format!("purge classification: {e}")))?;

    let record_archived = match (&request.record_id, request.apply) {
        (Some(record_id), true) if classification.recommended_action == PurgeAction::Remove => {
            store.archive(record_id).await?;
            tracing::info!(record_id = %record_id, "record archived after REMOVE classification");
            true
        }
        _ => false,
    };

    Ok(PurgeReport {
        recommended_action: classification.recommended_action,
        confidence: classification.confidence,
        reasoning: classification.reasoning,
        record_archived,
        usage: std::mem::take(usage),
        completed_at: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_action_wire_names() {
        assert_eq!(
            serde_json::to_value(PurgeAction::Remove).unwrap(),
            serde_json::json!("REMOVE")
        );
        let parsed: PurgeAction = serde_json::from_str("\"KEEP\"").unwrap();
        assert_eq!(parsed, PurgeAction::Keep);
    }
}
