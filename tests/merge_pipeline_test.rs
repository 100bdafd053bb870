//! Merge Pipeline Integration Test
//!
//! Drives the full duplicate-detection state machine against scripted
//! inference output and a recording mock store, covering every exit
//! point and its credit cost:
//! 1. Zero other duplicates - keep at cost 1
//! 2. KEEP decision - exit at cost 2
//! 3. MERGE decision with and without apply - cost 3
//! 4. Apply gating, empty-plan semantics and partial-failure billing

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crm_refinery::inference::{
    InferenceError, StructuredInference, StructuredOutput, TokenUsage,
};
use crm_refinery::pipeline::{MergeAction, MergePipeline, MergeRequest};
use crm_refinery::records::{CompanyRecord, RuleSet};
use crm_refinery::store::{FilterGroup, RecordStore, StoreError};

// ============================================================================
// Mocks
// ============================================================================

/// Inference mock that replays scripted stage outputs in order.
struct ScriptedInference {
    outputs: Mutex<VecDeque<Option<Value>>>,
}

impl ScriptedInference {
    fn new(outputs: Vec<Option<Value>>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
        }
    }
}

#[async_trait]
impl StructuredInference for ScriptedInference {
    async fn generate(
        &self,
        _subject: &Value,
        _schema: &Value,
    ) -> Result<StructuredOutput, InferenceError> {
        let next = self.outputs.lock().unwrap().pop_front();
        match next {
            Some(Some(data)) => Ok(StructuredOutput {
                data,
                usage: TokenUsage {
                    input_tokens: 1000,
                    output_tokens: 100,
                    reasoning_tokens: 0,
                    total_tokens: 1100,
                },
            }),
            Some(None) => Err(InferenceError::EmptyResponse),
            None => panic!("pipeline requested more inference stages than scripted"),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Record store mock that records every operation it is asked to run.
#[derive(Default)]
struct MockStore {
    search_results: Vec<CompanyRecord>,
    fetch_result: Option<CompanyRecord>,
    fail_update: bool,
    fail_merge: bool,
    calls: Mutex<Vec<String>>,
}

impl MockStore {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl RecordStore for MockStore {
    async fn search(
        &self,
        filter_groups: &[FilterGroup],
        _properties: &[String],
        _limit: u32,
    ) -> Result<Vec<CompanyRecord>, StoreError> {
        self.record(format!("search:{}", filter_groups.len()));
        Ok(self.search_results.clone())
    }

    async fn fetch(&self, id: &str, _properties: &[String]) -> Result<CompanyRecord, StoreError> {
        self.record(format!("fetch:{id}"));
        self.fetch_result
            .clone()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.record(format!("exists:{id}"));
        Ok(true)
    }

    async fn update(
        &self,
        id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        self.record(format!("update:{id}:{}", properties.len()));
        if self.fail_update {
            Err(StoreError::Api {
                status: 500,
                message: "update rejected".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn merge(&self, primary_id: &str, merged_id: &str) -> Result<(), StoreError> {
        self.record(format!("merge:{primary_id}<-{merged_id}"));
        if self.fail_merge {
            Err(StoreError::Api {
                status: 500,
                message: "merge rejected".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn archive(&self, id: &str) -> Result<(), StoreError> {
        self.record(format!("archive:{id}"));
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn company(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

fn request(apply: bool) -> MergeRequest {
    MergeRequest {
        company: CompanyRecord::new(company(&[("name", "Acme Corp"), ("domain", "acme.com")])),
        record_id: "111".to_string(),
        rules: RuleSet::default(),
        apply,
    }
}

fn filter_stage_output() -> Value {
    json!({
        "filterGroups": [
            {"filters": [
                {"propertyName": "domain", "operator": "EQ", "value": "acme.com}]},{\"", "values": null}
            ]},
            {"filters": [
                {"propertyName": "name", "operator": "CONTAINS_TOKEN", "value": "Acme", "values": null}
            ]}
        ],
        "confidence": "HIGH",
        "reasoning": "domain and name identify the company"
    })
}

fn decision_output(action: &str, primary: &str) -> Value {
    json!({
        "recommendedAction": action,
        "primaryRecordId": primary,
        "confidence": "HIGH",
        "reasoning": "candidate has the more complete profile"
    })
}

fn stored(id: &str, pairs: &[(&str, &str)]) -> CompanyRecord {
    CompanyRecord::with_id(id, company(pairs))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_no_duplicates_keeps_record_at_cost_one() {
    let inference = ScriptedInference::new(vec![Some(filter_stage_output())]);
    // Search only finds the record itself
    let store = MockStore {
        search_results: vec![stored("111", &[("name", "Acme Corp")])],
        ..Default::default()
    };

    let report = MergePipeline::new(&inference, &store)
        .run(&request(false))
        .await
        .expect("pipeline should succeed");

    assert!(!report.duplicates_found());
    assert_eq!(report.credit_cost(), 1);
    assert_eq!(report.decision.recommended_action, MergeAction::Keep);
    assert_eq!(report.decision.primary_record_id, "111");
    assert_eq!(report.decision.reasoning, "no duplicates found");
    assert!(report.field_merge.is_none());
    assert_eq!(store.calls(), vec!["search:2"]);
}

#[tokio::test]
async fn test_filter_literals_are_sanitized_before_search() {
    let inference = ScriptedInference::new(vec![Some(filter_stage_output())]);
    let store = MockStore::default();

    let report = MergePipeline::new(&inference, &store)
        .run(&request(false))
        .await
        .unwrap();

    let first_filter = &report.duplicate_search.filter_groups[0].filters[0];
    assert_eq!(first_filter.value.as_deref(), Some("acme.com"));
}

#[tokio::test]
async fn test_keep_decision_exits_at_cost_two() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("KEEP", "111")),
    ]);
    let store = MockStore {
        search_results: vec![
            stored("111", &[("name", "Acme Corp")]),
            stored("222", &[("name", "Acme Corporation")]),
        ],
        ..Default::default()
    };

    let report = MergePipeline::new(&inference, &store)
        .run(&request(true))
        .await
        .unwrap();

    assert!(report.duplicates_found());
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.credit_cost(), 2);
    assert!(report.field_merge.is_none());
    assert!(!report.record_updated);
    assert!(!report.record_merged);
    // No writes: only the search ran
    assert_eq!(store.calls(), vec!["search:2"]);
}

#[tokio::test]
async fn test_self_exclusion_from_candidates() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("KEEP", "111")),
    ]);
    let store = MockStore {
        search_results: vec![
            stored("111", &[("name", "Acme Corp")]),
            stored("222", &[("name", "Acme Corporation")]),
        ],
        ..Default::default()
    };

    let report = MergePipeline::new(&inference, &store)
        .run(&request(false))
        .await
        .unwrap();

    let ids: Vec<&str> = report
        .duplicates
        .iter()
        .filter_map(|d| d.id.as_deref())
        .collect();
    assert_eq!(ids, vec!["222"]);
}

#[tokio::test]
async fn test_merge_without_apply_returns_plan_but_never_writes() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("MERGE", "222")),
        Some(json!({
            "updates": {"name": "Acme Corp", "domain": null},
            "reasoning": "current name is better formatted"
        })),
    ]);
    let store = MockStore {
        search_results: vec![
            stored("111", &[("name", "Acme Corp")]),
            stored("222", &[("name", "ACME CORP"), ("domain", "acme.com")]),
        ],
        fetch_result: Some(stored("222", &[("name", "ACME CORP"), ("domain", "acme.com")])),
        ..Default::default()
    };

    let report = MergePipeline::new(&inference, &store)
        .run(&request(false))
        .await
        .unwrap();

    assert_eq!(report.credit_cost(), 3);
    assert_eq!(report.decision.recommended_action, MergeAction::Merge);
    assert_eq!(report.decision.primary_record_id, "222");

    // Null slots dropped from the plan
    let plan = report.field_merge.expect("plan must be returned");
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.get("name"), Some(&json!("Acme Corp")));

    assert!(!report.record_updated);
    assert!(!report.record_merged);
    assert_eq!(store.calls(), vec!["search:2", "fetch:222"]);
}

#[tokio::test]
async fn test_merge_with_apply_updates_then_merges() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("MERGE", "222")),
        Some(json!({
            "updates": {"name": "Acme Corp"},
            "reasoning": "current name is better formatted"
        })),
    ]);
    let store = MockStore {
        search_results: vec![stored("222", &[("name", "ACME CORP")])],
        fetch_result: Some(stored("222", &[("name", "ACME CORP")])),
        ..Default::default()
    };

    let report = MergePipeline::new(&inference, &store)
        .run(&request(true))
        .await
        .unwrap();

    assert_eq!(report.credit_cost(), 3);
    assert!(report.record_updated);
    assert!(report.record_merged);
    assert_eq!(
        store.calls(),
        vec!["search:2", "fetch:222", "update:222:1", "merge:222<-111"]
    );
}

#[tokio::test]
async fn test_empty_plan_skips_update_but_still_merges() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("MERGE", "222")),
        Some(json!({
            "updates": {"name": null, "domain": null},
            "reasoning": "primary already has the better values"
        })),
    ]);
    let store = MockStore {
        search_results: vec![stored("222", &[("name", "Acme Corp")])],
        fetch_result: Some(stored("222", &[("name", "Acme Corp")])),
        ..Default::default()
    };

    let report = MergePipeline::new(&inference, &store)
        .run(&request(true))
        .await
        .unwrap();

    assert!(!report.record_updated);
    assert!(report.record_merged);
    assert_eq!(
        store.calls(),
        vec!["search:2", "fetch:222", "merge:222<-111"]
    );
}

#[tokio::test]
async fn test_decision_naming_unknown_primary_is_rejected() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("MERGE", "999")),
    ]);
    let store = MockStore {
        search_results: vec![stored("222", &[("name", "Acme Corp")])],
        ..Default::default()
    };

    let failure = MergePipeline::new(&inference, &store)
        .run(&request(false))
        .await
        .expect_err("decision contract violation must fail the run");

    // Both completed stages stay billed
    assert_eq!(failure.usage.credit_cost(), 2);
}

#[tokio::test]
async fn test_inference_failure_retains_cost_of_completed_stages() {
    let inference = ScriptedInference::new(vec![Some(filter_stage_output()), None]);
    let store = MockStore {
        search_results: vec![stored("222", &[("name", "Acme Corp")])],
        ..Default::default()
    };

    let failure = MergePipeline::new(&inference, &store)
        .run(&request(false))
        .await
        .expect_err("empty inference output must fail the run");

    assert_eq!(failure.usage.credit_cost(), 1);
    assert_eq!(store.calls(), vec!["search:2"]);
}

#[tokio::test]
async fn test_merge_failure_after_update_is_surfaced_not_rolled_back() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("MERGE", "222")),
        Some(json!({
            "updates": {"name": "Acme Corp"},
            "reasoning": "current name is better formatted"
        })),
    ]);
    let store = MockStore {
        search_results: vec![stored("222", &[("name", "ACME CORP")])],
        fetch_result: Some(stored("222", &[("name", "ACME CORP")])),
        fail_merge: true,
        ..Default::default()
    };

    let failure = MergePipeline::new(&inference, &store)
        .run(&request(true))
        .await
        .expect_err("merge failure must fail the run");

    // All three inference stages completed and stay billed
    assert_eq!(failure.usage.credit_cost(), 3);
    // The update happened and is not compensated
    assert_eq!(
        store.calls(),
        vec!["search:2", "fetch:222", "update:222:1", "merge:222<-111"]
    );
}

#[tokio::test]
async fn test_usage_accumulates_per_stage() {
    let inference = ScriptedInference::new(vec![
        Some(filter_stage_output()),
        Some(decision_output("MERGE", "222")),
        Some(json!({"updates": {}, "reasoning": "nothing to change"})),
    ]);
    let store = MockStore {
        search_results: vec![stored("222", &[("name", "Acme Corp")])],
        fetch_result: Some(stored("222", &[("name", "Acme Corp")])),
        ..Default::default()
    };

    let report = MergePipeline::new(&inference, &store)
        .run(&request(false))
        .await
        .unwrap();

    assert_eq!(report.usage.stages.len(), 3);
    let total = report.usage.total_tokens();
    assert_eq!(total.input_tokens, 3000);
    assert_eq!(total.output_tokens, 300);
    assert!(report.usage.total_cost_usd() > 0.0);
}
