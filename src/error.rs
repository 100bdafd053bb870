//! Error taxonomy for the refinery pipelines
//!
//! Caller-fault errors (validation, auth, quota) are rejected before any
//! external call is made and carry no credit cost. Inference and store
//! failures are fatal to the request; cost for stages already completed is
//! retained.

use thiserror::Error;

pub use crate::inference::InferenceError;
pub use crate::store::StoreError;

/// Request validation failures. Always rejected at the boundary.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("company object is missing or empty")]
    EmptyRecord,

    #[error("company object has {count} properties, maximum is {max}")]
    TooManyProperties { count: usize, max: usize },

    #[error("property '{property}' is not a scalar value")]
    NestedProperty { property: String },

    #[error("recordId is required")]
    MissingRecordId,
}

/// Credential failures. Rejected before inference.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("no CRM credential header present")]
    MissingStoreCredential,

    #[error("CRM provider '{0}' is not yet supported")]
    UnsupportedProvider(String),
}

/// Metering gate denial. Rejected before inference.
#[derive(Error, Debug)]
#[error("insufficient credits: {remaining} of {limit} remaining")]
pub struct QuotaError {
    pub remaining: u32,
    pub limit: u32,
}

/// Failures raised while a pipeline is running.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("inference failure: {0}")]
    Inference(#[from] InferenceError),

    #[error("record store failure: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// True when the underlying failure was a store-side 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::Store(StoreError::NotFound { .. }))
    }
}
