//! Merge pipeline
//!
//! The duplicate-detection and merge-decision state machine:
//!
//! ```text
//! build filters -> search -> [no other duplicates]  -> keep, cost 1
//!                         -> [duplicates found]     -> decide
//! decide -> [KEEP or self-primary]                  -> keep, cost 2
//!        -> [MERGE] -> fetch primary -> plan fields -> apply (opt-in) -> cost 3
//! ```
//!
//! Stages are strictly sequential; each stage's input depends on the
//! previous stage's output. Usage is recorded as each inference stage
//! completes, so a mid-pipeline failure still reports the cost of the
//! work already performed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::usage::{PipelineUsage, StageKind};
use super::{Confidence, PipelineFailure};
use crate::error::PipelineError;
use crate::inference::{InferenceError, StructuredInference};
use crate::records::{CompanyRecord, RuleSet};
use crate::schema;
use crate::store::{FilterGroup, RecordStore};

/// Properties requested from the store for every candidate; later stages
/// depend on the identity and location fields being present.
pub const DEFAULT_SEARCH_PROPERTIES: [&str; 12] = [
    "name",
    "domain",
    "website",
    "phone",
    "city",
    "state",
    "zip",
    "country",
    "address",
    "linkedin_company_page",
    "createdate",
    "hs_lastmodifieddate",
];

const SEARCH_LIMIT: u32 = 25;

/// Recommended merge action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MergeAction {
    Merge,
    Keep,
}

/// Stage-1 output: the filters used to search for duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSearchResult {
    pub filter_groups: Vec<FilterGroup>,
    pub confidence: Confidence,
    pub reasoning: String,
}

/// Stage-2 output: which record survives.
///
/// Invariants hold for every value of this type: KEEP implies the primary
/// is the current record; MERGE implies the primary is one of the
/// candidates. Enforced in [`MergeDecision::decode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDecision {
    pub recommended_action: MergeAction,
    pub primary_record_id: String,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl MergeDecision {
    /// Synthesized decision for the zero-duplicates early exit.
    fn no_duplicates(record_id: &str) -> Self {
        Self {
            recommended_action: MergeAction::Keep,
            primary_record_id: record_id.to_string(),
            confidence: Confidence::High,
            reasoning: "no duplicates found".to_string(),
        }
    }

    /// Decode untrusted model output into a decision whose id invariants
    /// hold.
    ///
    /// A KEEP decision is pinned to the current record's id regardless of
    /// what the model named. A MERGE decision naming the current record is
    /// normalized to KEEP (there is nothing to absorb); a MERGE decision
    /// naming an id outside the candidate set is rejected.
    fn decode(
        data: Value,
        record_id: &str,
        candidate_ids: &[&str],
    ) -> Result<Self, InferenceError> {
        let mut decision: MergeDecision = serde_json::from_value(data)
            .map_err(|e| InferenceError::Parse(format!("merge decision: {e}")))?;

        match decision.recommended_action {
            MergeAction::Keep => {
                decision.primary_record_id = record_id.to_string();
            }
            MergeAction::Merge if decision.primary_record_id == record_id => {
                decision.recommended_action = MergeAction::Keep;
            }
            MergeAction::Merge => {
                if !candidate_ids.contains(&decision.primary_record_id.as_str()) {
                    return Err(InferenceError::Contract(format!(
                        "decision names primary '{}' which is not a candidate duplicate",
                        decision.primary_record_id
                    )));
                }
            }
        }
        Ok(decision)
    }
}

/// Stage-3 output: properties where the current record's value overwrites
/// the primary's. Empty means "no change".
pub type FieldMergePlan = BTreeMap<String, Value>;

/// Caller input for one merge run.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub company: CompanyRecord,
    pub record_id: String,
    pub rules: RuleSet,
    /// Gates the apply step. When false the decision and plan are still
    /// returned, but no store writes happen.
    pub apply: bool,
}

/// Everything one merge run produced.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub duplicate_search: DuplicateSearchResult,
    pub duplicates: Vec<CompanyRecord>,
    pub decision: MergeDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_merge: Option<FieldMergePlan>,
    pub record_updated: bool,
    pub record_merged: bool,
    pub usage: PipelineUsage,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl MergeReport {
    pub fn credit_cost(&self) -> u32 {
        self.usage.credit_cost()
    }

    pub fn duplicates_found(&self) -> bool {
        !self.duplicates.is_empty()
    }
}

/// The merge orchestrator. Stateless across requests; both collaborators
/// are borrowed for the duration of one run.
pub struct MergePipeline<'a> {
    inference: &'a dyn StructuredInference,
    store: &'a dyn RecordStore,
}

impl<'a> MergePipeline<'a> {
    pub fn new(inference: &'a dyn StructuredInference, store: &'a dyn RecordStore) -> Self {
        Self { inference, store }
    }

    /// Run the full pipeline for one request.
    pub async fn run(&self, request: &MergeRequest) -> Result<MergeReport, PipelineFailure> {
        let mut usage = PipelineUsage::new();
        match self.drive(request, &mut usage).await {
            Ok(report) => Ok(report),
            Err(source) => Err(PipelineFailure { source, usage }),
        }
    }

    async fn drive(
        &self,
        request: &MergeRequest,
        usage: &mut PipelineUsage,
    ) -> Result<MergeReport, PipelineError> {
        // 1. Build search filters
        let search = self.build_filters(request, usage).await?;

        // 2. Search the store, excluding the current record itself
        let duplicates = self.search_duplicates(request, &search.filter_groups).await?;
        if duplicates.is_empty() {
            tracing::info!(record_id = %request.record_id, "no duplicates found, keeping record");
            return Ok(Self::keep_report(
                search,
                duplicates,
                MergeDecision::no_duplicates(&request.record_id),
                usage,
            ));
        }

        // 3. Decide which record survives
        let decision = self.decide(request, &duplicates, usage).await?;
        if decision.recommended_action == MergeAction::Keep {
            tracing::info!(record_id = %request.record_id, "decision is KEEP, nothing to reconcile");
            return Ok(Self::keep_report(search, duplicates, decision, usage));
        }

        // 4. Fetch the authoritative primary state
        let primary = self.fetch_primary(request, &decision).await?;

        // 5. Plan the field-level reconciliation
        let plan = self.plan_field_merge(request, &primary, usage).await?;

        // 6. Apply, when the caller opted in
        let (record_updated, record_merged) = if request.apply {
            self.apply(request, &decision, &plan).await?
        } else {
            (false, false)
        };

        Ok(MergeReport {
            duplicate_search: search,
            duplicates,
            decision,
            field_merge: Some(plan),
            record_updated,
            record_merged,
            usage: std::mem::take(usage),
            completed_at: chrono::Utc::now(),
        })
    }

    fn keep_report(
        search: DuplicateSearchResult,
        duplicates: Vec<CompanyRecord>,
        decision: MergeDecision,
        usage: &mut PipelineUsage,
    ) -> MergeReport {
        MergeReport {
            duplicate_search: search,
            duplicates,
            decision,
            field_merge: None,
            record_updated: false,
            record_merged: false,
            usage: std::mem::take(usage),
            completed_at: chrono::Utc::now(),
        }
    }

    /// Stage 1: filter-search schema + inference, literals sanitized.
    async fn build_filters(
        &self,
        request: &MergeRequest,
        usage: &mut PipelineUsage,
    ) -> Result<DuplicateSearchResult, PipelineError> {
        let stage_schema = schema::filter_search(request.rules.duplicate_rules.as_deref());
        let subject = serde_json::json!({
            "recordId": request.record_id,
            "company": request.company.properties,
        });

        let output = self.inference.generate(&subject, &stage_schema).await?;
        usage.record(StageKind::DuplicateSearch, output.usage);

        let mut result: DuplicateSearchResult = serde_json::from_value(output.data)
            .map_err(|e| InferenceError::Parse(format!("duplicate search: {e}")))?;
        // The 5-group maximum is a modeling instruction; extra groups are
        // forwarded rather than rejected.
        result.filter_groups = result
            .filter_groups
            .into_iter()
            .map(FilterGroup::normalized)
            .collect();
        Ok(result)
    }

    /// Store search with self-exclusion; a record always matches its
    /// own identity filters.
    async fn search_duplicates(
        &self,
        request: &MergeRequest,
        filter_groups: &[FilterGroup],
    ) -> Result<Vec<CompanyRecord>, PipelineError> {
        let properties: Vec<String> = DEFAULT_SEARCH_PROPERTIES
            .iter()
            .map(|p| p.to_string())
            .collect();
        let mut results = self
            .store
            .search(filter_groups, &properties, SEARCH_LIMIT)
            .await?;
        results.retain(|r| r.id.as_deref() != Some(request.record_id.as_str()));
        Ok(results)
    }

    /// Stage 2: decision schema + inference over the full candidate list.
    async fn decide(
        &self,
        request: &MergeRequest,
        duplicates: &[CompanyRecord],
        usage: &mut PipelineUsage,
    ) -> Result<MergeDecision, PipelineError> {
        let stage_schema = schema::merge_decision(request.rules.primary_rules.as_deref());
        let subject = serde_json::json!({
            "recordId": request.record_id,
            "company": request.company.properties,
            "candidates": duplicates,
        });

        let output = self.inference.generate(&subject, &stage_schema).await?;
        usage.record(StageKind::MergeDecision, output.usage);

        let candidate_ids: Vec<&str> = duplicates.iter().filter_map(|d| d.id.as_deref()).collect();
        let decision = MergeDecision::decode(output.data, &request.record_id, &candidate_ids)?;
        Ok(decision)
    }

    /// The field merge needs the authoritative target state; a missing
    /// primary is fatal.
    async fn fetch_primary(
        &self,
        request: &MergeRequest,
        decision: &MergeDecision,
    ) -> Result<CompanyRecord, PipelineError> {
        let mut properties: Vec<String> = DEFAULT_SEARCH_PROPERTIES
            .iter()
            .map(|p| p.to_string())
            .collect();
        for name in request.company.properties.keys() {
            if !properties.contains(name) {
                properties.push(name.clone());
            }
        }
        Ok(self
            .store
            .fetch(&decision.primary_record_id, &properties)
            .await?)
    }

    /// Stage 3: field-merge schema over the current record's properties; null
    /// slots mean "keep the primary's value" and are dropped here.
    async fn plan_field_merge(
        &self,
        request: &MergeRequest,
        primary: &CompanyRecord,
        usage: &mut PipelineUsage,
    ) -> Result<FieldMergePlan, PipelineError> {
        let stage_schema = schema::field_merge(
            request.company.properties.keys(),
            request.rules.merge_rules.as_deref(),
            &request.rules.merge_property_rules,
        );
        let subject = serde_json::json!({
            "current": request.company.properties,
            "primaryRecordId": primary.id,
            "primary": primary.properties,
        });

        let output = self.inference.generate(&subject, &stage_schema).await?;
        usage.record(StageKind::FieldMerge, output.usage);

        let updates = output
            .data
            .get("updates")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| InferenceError::Parse("field merge output lacks updates".into()))?;

        let plan: FieldMergePlan = updates
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();
        Ok(plan)
    }

    /// Apply: a non-empty plan patches the primary first; the merge itself is
    /// unconditional. A failure after the update leaves the primary
    /// updated but unmerged, surfaced to the caller and not rolled back.
    async fn apply(
        &self,
        request: &MergeRequest,
        decision: &MergeDecision,
        plan: &FieldMergePlan,
    ) -> Result<(bool, bool), PipelineError> {
        let record_updated = if plan.is_empty() {
            false
        } else {
            self.store
                .update(&decision.primary_record_id, plan)
                .await?;
            true
        };

        self.store
            .merge(&decision.primary_record_id, &request.record_id)
            .await?;
        tracing::info!(
            primary = %decision.primary_record_id,
            merged = %request.record_id,
            updated_fields = plan.len(),
            "merge applied"
        );
        Ok((record_updated, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_keep_pins_primary_to_current() {
        let data = json!({
            "recommendedAction": "KEEP",
            "primaryRecordId": "999",
            "confidence": "HIGH",
            "reasoning": "no true duplicate"
        });
        let decision = MergeDecision::decode(data, "111", &["222"]).unwrap();
        assert_eq!(decision.recommended_action, MergeAction::Keep);
        assert_eq!(decision.primary_record_id, "111");
    }

    #[test]
    fn test_decode_merge_into_self_becomes_keep() {
        let data = json!({
            "recommendedAction": "MERGE",
            "primaryRecordId": "111",
            "confidence": "MEDIUM",
            "reasoning": "current record is the stronger one"
        });
        let decision = MergeDecision::decode(data, "111", &["222"]).unwrap();
        assert_eq!(decision.recommended_action, MergeAction::Keep);
        assert_eq!(decision.primary_record_id, "111");
    }

    #[test]
    fn test_decode_merge_requires_candidate_primary() {
        let data = json!({
            "recommendedAction": "MERGE",
            "primaryRecordId": "333",
            "confidence": "HIGH",
            "reasoning": "made up id"
        });
        let err = MergeDecision::decode(data, "111", &["222"]).unwrap_err();
        assert!(matches!(err, InferenceError::Contract(_)));
    }

    #[test]
    fn test_decode_merge_accepts_candidate() {
        let data = json!({
            "recommendedAction": "MERGE",
            "primaryRecordId": "222",
            "confidence": "HIGH",
            "reasoning": "candidate is more complete"
        });
        let decision = MergeDecision::decode(data, "111", &["222", "444"]).unwrap();
        assert_eq!(decision.recommended_action, MergeAction::Merge);
        assert_eq!(decision.primary_record_id, "222");
    }
}
