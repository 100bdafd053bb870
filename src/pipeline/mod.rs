//! Refinement pipelines
//!
//! The merge pipeline is the multi-stage state machine; clean and purge
//! are one-stage workflows built on the same schema technique. All three
//! run against the [`StructuredInference`](crate::inference::StructuredInference)
//! and [`RecordStore`](crate::store::RecordStore) traits so tests drive
//! them with mocks.

pub mod clean;
pub mod merge;
pub mod purge;
pub mod usage;

pub use clean::{CleanAction, CleanReport, CleanRequest, CleanedField};
pub use merge::{
    DuplicateSearchResult, FieldMergePlan, MergeAction, MergeDecision, MergePipeline,
    MergeReport, MergeRequest,
};
pub use purge::{PurgeAction, PurgeReport, PurgeRequest};
pub use usage::{PipelineUsage, StageKind, StageUsage, MAX_CREDIT_COST};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PipelineError;

/// Model self-assessed confidence, shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A pipeline failure together with the usage of the stages that did
/// complete; the model calls happened and are not refunded.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct PipelineFailure {
    #[source]
    pub source: PipelineError,
    pub usage: PipelineUsage,
}
