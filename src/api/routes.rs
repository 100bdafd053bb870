//! Company endpoint handlers
//!
//! Request admission is the same for every company endpoint: service API
//! key, CRM provider credential, body validation, access gate. Only then
//! does a pipeline run; usage is tracked afterwards for however many
//! stages actually executed, including on mid-pipeline failure.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::QuotaError;
use crate::pipeline::{
    clean, purge, CleanedField, Confidence, DuplicateSearchResult, FieldMergePlan, MergeDecision,
    MergePipeline, MergeRequest, PipelineUsage, PurgeAction,
};
use crate::records::{validate_input_record, CompanyRecord, RuleSet};
use crate::store::{RecordStore, StoreCredential};

use super::auth::{authenticate, detect_store_credential, AccessDecision};
use super::{ApiError, AppState};

const METER_MERGE: &str = "companies-merge";
const METER_CLEAN: &str = "companies-clean";
const METER_PURGE: &str = "companies-purge";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequestBody {
    #[serde(default)]
    pub company: BTreeMap<String, Value>,
    #[serde(default)]
    pub record_id: String,
    pub duplicate_rules: Option<String>,
    pub primary_rules: Option<String>,
    pub merge_rules: Option<String>,
    #[serde(default)]
    pub merge_property_rules: BTreeMap<String, String>,
    #[serde(default)]
    pub merge_record: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponseBody {
    pub request_id: Uuid,
    pub company: BTreeMap<String, Value>,
    pub record_id: String,
    pub step1_duplicate_search: DuplicateSearchResult,
    pub step2_merge_decision: MergeDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step3_field_merge: Option<FieldMergePlan>,
    pub duplicates_found: bool,
    pub duplicate_count: usize,
    pub duplicates: Vec<CompanyRecord>,
    pub credit_cost: u32,
    pub credits_remaining: u32,
    pub record_updated: bool,
    pub record_merged: bool,
    pub usage: PipelineUsage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanRequestBody {
    #[serde(default)]
    pub company: BTreeMap<String, Value>,
    pub record_id: Option<String>,
    pub clean_rules: Option<String>,
    #[serde(default)]
    pub update_record: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanResponseBody {
    pub request_id: Uuid,
    pub company: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub fields: BTreeMap<String, CleanedField>,
    pub record_updated: bool,
    pub updated_properties: Vec<String>,
    pub credit_cost: u32,
    pub credits_remaining: u32,
    pub usage: PipelineUsage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequestBody {
    #[serde(default)]
    pub company: BTreeMap<String, Value>,
    pub record_id: Option<String>,
    pub purge_rules: Option<String>,
    #[serde(default)]
    pub delete_record: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponseBody {
    pub request_id: Uuid,
    pub company: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub recommended_action: PurgeAction,
    pub confidence: Confidence,
    pub reasoning: String,
    pub record_archived: bool,
    pub credit_cost: u32,
    pub credits_remaining: u32,
    pub usage: PipelineUsage,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

// ============================================================================
// Admission
// ============================================================================

struct Admission {
    user_id: String,
    credential: StoreCredential,
}

/// Credential checks shared by the company endpoints: service API key
/// first, then the CRM provider header. Rejected requests never reach
/// the gate or the pipelines, so they cost nothing.
async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    request_id: Uuid,
) -> Result<Admission, ApiError> {
    let user_id = authenticate(state.validator.as_ref(), headers)
        .await
        .map_err(|e| ApiError::auth(request_id, e))?;

    let credential =
        detect_store_credential(headers).map_err(|e| ApiError::auth(request_id, e))?;

    Ok(Admission {
        user_id,
        credential,
    })
}

/// Consult the access gate once before the pipeline runs.
async fn check_quota(
    state: &AppState,
    user_id: &str,
    meter: &str,
    request_id: Uuid,
) -> Result<AccessDecision, ApiError> {
    let access = state.gate.check_access(user_id, meter).await;
    if !access.allowed {
        return Err(ApiError::quota(
            request_id,
            QuotaError {
                remaining: access.remaining,
                limit: access.limit,
            },
        ));
    }
    Ok(access)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/companies/merge - run the duplicate-detection pipeline
pub async fn merge_company(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MergeRequestBody>,
) -> Result<Json<MergeResponseBody>, ApiError> {
    let request_id = Uuid::new_v4();
    let admission = admit(&state, &headers, request_id).await?;

    validate_input_record(&body.company).map_err(|e| ApiError::validation(request_id, e))?;
    if body.record_id.trim().is_empty() {
        return Err(ApiError::validation(
            request_id,
            crate::error::ValidationError::MissingRecordId,
        ));
    }

    let access = check_quota(&state, &admission.user_id, METER_MERGE, request_id).await?;

    let store = admission
        .credential
        .into_client()
        .map_err(|e| ApiError::auth(request_id, e))?;

    // Pre-verify the current record before spending any inference stage
    ensure_record_exists(store.as_ref(), &body.record_id, request_id).await?;

    let request = MergeRequest {
        company: CompanyRecord::new(body.company.clone()),
        record_id: body.record_id.clone(),
        rules: RuleSet {
            duplicate_rules: body.duplicate_rules,
            primary_rules: body.primary_rules,
            merge_rules: body.merge_rules,
            merge_property_rules: body.merge_property_rules,
        },
        apply: body.merge_record,
    };

    tracing::info!(
        request_id = %request_id,
        record_id = %request.record_id,
        apply = request.apply,
        "merge pipeline started"
    );

    let pipeline = MergePipeline::new(state.inference.as_ref(), store.as_ref());
    match pipeline.run(&request).await {
        Ok(report) => {
            let credit_cost = report.credit_cost();
            state
                .gate
                .track_usage(&admission.user_id, METER_MERGE, credit_cost)
                .await;
            Ok(Json(MergeResponseBody {
                request_id,
                company: body.company,
                record_id: body.record_id,
                duplicates_found: report.duplicates_found(),
                duplicate_count: report.duplicates.len(),
                step1_duplicate_search: report.duplicate_search,
                step2_merge_decision: report.decision,
                step3_field_merge: report.field_merge,
                duplicates: report.duplicates,
                credit_cost,
                credits_remaining: access.remaining.saturating_sub(credit_cost),
                record_updated: report.record_updated,
                record_merged: report.record_merged,
                usage: report.usage,
            }))
        }
        Err(failure) => {
            // Completed stages are billed even though the run failed
            let credit_cost = failure.usage.credit_cost();
            if credit_cost > 0 {
                state
                    .gate
                    .track_usage(&admission.user_id, METER_MERGE, credit_cost)
                    .await;
            }
            Err(ApiError::pipeline(request_id, &failure.source))
        }
    }
}

/// POST /api/companies/clean - per-field cleanup
pub async fn clean_company(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CleanRequestBody>,
) -> Result<Json<CleanResponseBody>, ApiError> {
    let request_id = Uuid::new_v4();
    let admission = admit(&state, &headers, request_id).await?;

    validate_input_record(&body.company).map_err(|e| ApiError::validation(request_id, e))?;
    if body.update_record && body.record_id.is_none() {
        return Err(ApiError::validation(
            request_id,
            crate::error::ValidationError::MissingRecordId,
        ));
    }

    let access = check_quota(&state, &admission.user_id, METER_CLEAN, request_id).await?;

    let store = admission
        .credential
        .into_client()
        .map_err(|e| ApiError::auth(request_id, e))?;

    if let (Some(record_id), true) = (&body.record_id, body.update_record) {
        ensure_record_exists(store.as_ref(), record_id, request_id).await?;
    }

    let request = clean::CleanRequest {
        company: CompanyRecord::new(body.company.clone()),
        record_id: body.record_id.clone(),
        clean_rules: body.clean_rules,
        apply: body.update_record,
    };

    match clean::run(state.inference.as_ref(), store.as_ref(), &request).await {
        Ok(report) => {
            let credit_cost = report.credit_cost();
            state
                .gate
                .track_usage(&admission.user_id, METER_CLEAN, credit_cost)
                .await;
            Ok(Json(CleanResponseBody {
                request_id,
                company: body.company,
                record_id: body.record_id,
                fields: report.fields,
                record_updated: report.record_updated,
                updated_properties: report.updated_properties,
                credit_cost,
                credits_remaining: access.remaining.saturating_sub(credit_cost),
                usage: report.usage,
            }))
        }
        Err(failure) => {
            let credit_cost = failure.usage.credit_cost();
            if credit_cost > 0 {
                state
                    .gate
                    .track_usage(&admission.user_id, METER_CLEAN, credit_cost)
                    .await;
            }
            Err(ApiError::pipeline(request_id, &failure.source))
        }
    }
}

/// POST /api/companies/purge - removal classification
pub async fn purge_company(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PurgeRequestBody>,
) -> Result<Json<PurgeResponseBody>, ApiError> {
    let request_id = Uuid::new_v4();
    let admission = admit(&state, &headers, request_id).await?;

    validate_input_record(&body.company).map_err(|e| ApiError::validation(request_id, e))?;
    if body.delete_record && body.record_id.is_none() {
        return Err(ApiError::validation(
            request_id,
            crate::error::ValidationError::MissingRecordId,
        ));
    }

    let access = check_quota(&state, &admission.user_id, METER_PURGE, request_id).await?;

    let store = admission
        .credential
        .into_client()
        .map_err(|e| ApiError::auth(request_id, e))?;

    if let (Some(record_id), true) = (&body.record_id, body.delete_record) {
        ensure_record_exists(store.as_ref(), record_id, request_id).await?;
    }

    let request = purge::PurgeRequest {
        company: CompanyRecord::new(body.company.clone()),
        record_id: body.record_id.clone(),
        purge_rules: body.purge_rules,
        apply: body.delete_record,
    };

    match purge::run(state.inference.as_ref(), store.as_ref(), &request).await {
        Ok(report) => {
            let credit_cost = report.credit_cost();
            state
                .gate
                .track_usage(&admission.user_id, METER_PURGE, credit_cost)
                .await;
            Ok(Json(PurgeResponseBody {
                request_id,
                company: body.company,
                record_id: body.record_id,
                recommended_action: report.recommended_action,
                confidence: report.confidence,
                reasoning: report.reasoning,
                record_archived: report.record_archived,
                credit_cost,
                credits_remaining: access.remaining.saturating_sub(credit_cost),
                usage: report.usage,
            }))
        }
        Err(failure) => {
            let credit_cost = failure.usage.credit_cost();
            if credit_cost > 0 {
                state
                    .gate
                    .track_usage(&admission.user_id, METER_PURGE, credit_cost)
                    .await;
            }
            Err(ApiError::pipeline(request_id, &failure.source))
        }
    }
}

/// GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn ensure_record_exists(
    store: &dyn RecordStore,
    record_id: &str,
    request_id: Uuid,
) -> Result<(), ApiError> {
    let exists = store
        .exists(record_id)
        .await
        .map_err(|e| ApiError::pipeline(request_id, &e.into()))?;
    if exists {
        Ok(())
    } else {
        Err(ApiError::record_not_found(request_id, record_id))
    }
}
