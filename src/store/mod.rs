//! Record store client
//!
//! Typed wrapper over an external CRM's company-record operations. This is
//! the only part of the system that talks to a store the core does not
//! control; everything else is pure data transformation.

pub mod filter;
mod hubspot;

pub use filter::{Filter, FilterGroup, FilterOperator};
pub use hubspot::HubSpotClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::AuthError;
use crate::records::CompanyRecord;

/// Fixed timeout applied to every store call, independent of the others.
pub const STORE_TIMEOUT_SECS: u64 = 15;

/// Store failures. `Timeout` is kept distinct so operators can tell a slow
/// CRM from a rejecting one; callers see a generic stage failure either way.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record store request timed out")]
    Timeout,

    #[error("record '{id}' not found")]
    NotFound { id: String },

    #[error("record store API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("record store transport error: {0}")]
    Http(reqwest::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Http(e)
        }
    }
}

/// Company-record operations the pipelines depend on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Search companies. Filter groups are OR-combined; filters within a
    /// group are AND-combined.
    async fn search(
        &self,
        filter_groups: &[FilterGroup],
        properties: &[String],
        limit: u32,
    ) -> Result<Vec<CompanyRecord>, StoreError>;

    /// Fetch a record by id, requesting at least the given properties.
    /// Fails with [`StoreError::NotFound`] for an unknown id.
    async fn fetch(&self, id: &str, properties: &[String]) -> Result<CompanyRecord, StoreError>;

    /// Report whether a record exists. A store-side 404 reports `false`
    /// rather than an error.
    async fn exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Patch properties on a record.
    async fn update(
        &self,
        id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError>;

    /// Merge `merged_id` into `primary_id`; the primary survives.
    async fn merge(&self, primary_id: &str, merged_id: &str) -> Result<(), StoreError>;

    /// Archive (soft-delete) a record.
    async fn archive(&self, id: &str) -> Result<(), StoreError>;
}

/// CRM provider credential, one variant per provider.
///
/// Detected from request headers by the API layer; the factory below maps
/// a variant to a concrete client. Providers without an implementation
/// fail fast with a clear error instead of a generic dispatch failure.
#[derive(Debug, Clone)]
pub enum StoreCredential {
    HubSpot { access_token: String },
    Salesforce { access_token: String },
}

impl StoreCredential {
    pub fn provider(&self) -> &'static str {
        match self {
            StoreCredential::HubSpot { .. } => "hubspot",
            StoreCredential::Salesforce { .. } => "salesforce",
        }
    }

    /// Build the concrete client for this credential.
    pub fn into_client(self) -> Result<Box<dyn RecordStore>, AuthError> {
        match self {
            StoreCredential::HubSpot { access_token } => {
                Ok(Box::new(HubSpotClient::new(access_token)))
            }
            StoreCredential::Salesforce { .. } => {
                Err(AuthError::UnsupportedProvider("salesforce".to_string()))
            }
        }
    }
}
