//! Credential and metering collaborators
//!
//! The credential validator and access gate are external systems as far
//! as the pipelines are concerned; they are modeled as narrow traits with
//! an environment-backed validator and an in-memory gate as the default
//! wiring. CRM provider credentials are detected from fixed header names.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::error::AuthError;
use crate::store::StoreCredential;

/// Header carrying the service API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Provider credential headers; which one is present selects the CRM.
pub const HUBSPOT_TOKEN_HEADER: &str = "x-hubspot-access-token";
pub const SALESFORCE_TOKEN_HEADER: &str = "x-salesforce-access-token";

/// Maps an API key to its owning user, or rejects it.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, api_key: &str) -> Option<String>;
}

/// Outcome of a pre-pipeline access check.
#[derive(Debug, Clone, Copy)]
pub struct AccessDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
}

/// Credit metering. Consulted once before the pipeline and once after,
/// deducting the credits the run actually cost.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn check_access(&self, user_id: &str, meter: &str) -> AccessDecision;
    async fn track_usage(&self, user_id: &str, meter: &str, amount: u32);
}

/// Detect the CRM credential from request headers.
pub fn detect_store_credential(headers: &HeaderMap) -> Result<StoreCredential, AuthError> {
    if let Some(token) = header_value(headers, HUBSPOT_TOKEN_HEADER) {
        return Ok(StoreCredential::HubSpot {
            access_token: token,
        });
    }
    if let Some(token) = header_value(headers, SALESFORCE_TOKEN_HEADER) {
        return Ok(StoreCredential::Salesforce {
            access_token: token,
        });
    }
    Err(AuthError::MissingStoreCredential)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extract and validate the caller's API key.
pub async fn authenticate(
    validator: &dyn CredentialValidator,
    headers: &HeaderMap,
) -> Result<String, AuthError> {
    let key = header_value(headers, API_KEY_HEADER).ok_or(AuthError::MissingApiKey)?;
    validator.validate(&key).await.ok_or(AuthError::InvalidApiKey)
}

/// Key list loaded from `REFINERY_API_KEYS` ("key:user,key:user").
pub struct EnvKeyValidator {
    keys: HashMap<String, String>,
}

impl EnvKeyValidator {
    pub fn from_env() -> Self {
        let raw = std::env::var("REFINERY_API_KEYS").unwrap_or_default();
        Self::from_spec(&raw)
    }

    pub fn from_spec(spec: &str) -> Self {
        let keys = spec
            .split(',')
            .filter_map(|pair| {
                let (key, user) = pair.split_once(':')?;
                let (key, user) = (key.trim(), user.trim());
                if key.is_empty() || user.is_empty() {
                    None
                } else {
                    Some((key.to_string(), user.to_string()))
                }
            })
            .collect();
        Self { keys }
    }
}

#[async_trait]
impl CredentialValidator for EnvKeyValidator {
    async fn validate(&self, api_key: &str) -> Option<String> {
        self.keys.get(api_key).cloned()
    }
}

/// Per-user credit counter with a shared limit. Usage lives only as long
/// as the process; a production deployment points the gate trait at the
/// real metering service instead.
pub struct InMemoryGate {
    limit: u32,
    used: Mutex<HashMap<String, u32>>,
}

impl InMemoryGate {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        let limit = std::env::var("REFINERY_CREDIT_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        Self::new(limit)
    }

    fn spent(&self, user_id: &str) -> u32 {
        self.used
            .lock()
            .map(|m| m.get(user_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl AccessGate for InMemoryGate {
    async fn check_access(&self, user_id: &str, _meter: &str) -> AccessDecision {
        let spent = self.spent(user_id);
        AccessDecision {
            allowed: spent < self.limit,
            remaining: self.limit.saturating_sub(spent),
            limit: self.limit,
        }
    }

    async fn track_usage(&self, user_id: &str, meter: &str, amount: u32) {
        if let Ok(mut used) = self.used.lock() {
            *used.entry(user_id.to_string()).or_insert(0) += amount;
        }
        tracing::debug!(user_id = %user_id, meter = %meter, amount, "usage tracked");
    }
}
