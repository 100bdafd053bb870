//! CRM Refinery - LLM-assisted company record hygiene
//!
//! This crate exposes an HTTP API that uses a language model to clean,
//! purge and deduplicate CRM company records. The core is the multi-stage
//! merge pipeline: schema-constrained inference builds search filters, a
//! CRM search surfaces candidate duplicates, a decision stage picks the
//! surviving record, and a field-merge stage reconciles values before the
//! records are merged in the store.
//!
//! ## Architecture
//! Every external system sits behind a trait: the text-generation
//! capability behind [`inference::StructuredInference`], the CRM behind
//! [`store::RecordStore`], credential validation and credit metering
//! behind the traits in [`api::auth`]. The pipelines themselves are pure
//! orchestration over those seams.

// Core error handling
pub mod error;

// Request-scoped record and rule types
pub mod records;

// Filter literal cleanup
pub mod sanitize;

// Stage schema construction
pub mod schema;

// Structured inference client
pub mod inference;

// CRM record store client
pub mod store;

// The merge / clean / purge pipelines
pub mod pipeline;

// REST API surface
pub mod api;

pub use error::{AuthError, PipelineError, QuotaError, ValidationError};
pub use pipeline::{MergePipeline, MergeReport, MergeRequest};
pub use records::{CompanyRecord, RuleSet};
