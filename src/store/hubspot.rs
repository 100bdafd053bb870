//! HubSpot CRM client
//!
//! Company-record operations over the HubSpot v3 objects API. Every call
//! carries its own fixed timeout; a timeout surfaces as
//! [`StoreError::Timeout`] rather than a generic API error.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{FilterGroup, RecordStore, StoreError, STORE_TIMEOUT_SECS};
use crate::records::CompanyRecord;

const HUBSPOT_API_BASE: &str = "https://api.hubapi.com";

/// HubSpot API client scoped to company objects
pub struct HubSpotClient {
    http: Client,
    access_token: String,
}

#[derive(Deserialize)]
struct HsObject {
    id: String,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct HsSearchResponse {
    #[serde(default)]
    results: Vec<HsObject>,
}

impl From<HsObject> for CompanyRecord {
    fn from(obj: HsObject) -> Self {
        CompanyRecord::with_id(obj.id, obj.properties)
    }
}

impl HubSpotClient {
    pub fn new(access_token: String) -> Self {
        Self {
            http: Client::new(),
            access_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{HUBSPOT_API_BASE}{path}")
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(STORE_TIMEOUT_SECS)
    }

    /// Map a non-success response to a store error, keeping the raw body
    /// for server-side logs only.
    async fn fail(response: reqwest::Response, context: &str) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status, context, body = %body.chars().take(500).collect::<String>(), "HubSpot API error");
        StoreError::Api {
            status,
            message: format!("{context} failed with status {status}"),
        }
    }
}

#[async_trait]
impl RecordStore for HubSpotClient {
    async fn search(
        &self,
        filter_groups: &[FilterGroup],
        properties: &[String],
        limit: u32,
    ) -> Result<Vec<CompanyRecord>, StoreError> {
        let body = serde_json::json!({
            "filterGroups": filter_groups,
            "properties": properties,
            "limit": limit,
        });

        let response = self
            .http
            .post(self.url("/crm/v3/objects/companies/search"))
            .bearer_auth(&self.access_token)
            .timeout(self.timeout())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "company search").await);
        }

        let parsed: HsSearchResponse = response.json().await?;
        Ok(parsed.results.into_iter().map(CompanyRecord::from).collect())
    }

    async fn fetch(&self, id: &str, properties: &[String]) -> Result<CompanyRecord, StoreError> {
        let response = self
            .http
            .get(self.url(&format!("/crm/v3/objects/companies/{id}")))
            .bearer_auth(&self.access_token)
            .timeout(self.timeout())
            .query(&[("properties", properties.join(","))])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { id: id.to_string() }),
            status if !status.is_success() => Err(Self::fail(response, "company fetch").await),
            _ => {
                let obj: HsObject = response.json().await?;
                Ok(obj.into())
            }
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let response = self
            .http
            .get(self.url(&format!("/crm/v3/objects/companies/{id}")))
            .bearer_auth(&self.access_token)
            .timeout(self.timeout())
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::fail(response, "company existence check").await),
        }
    }

    async fn update(
        &self,
        id: &str,
        properties: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.url(&format!("/crm/v3/objects/companies/{id}")))
            .bearer_auth(&self.access_token)
            .timeout(self.timeout())
            .json(&serde_json::json!({ "properties": properties }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { id: id.to_string() }),
            status if !status.is_success() => Err(Self::fail(response, "company update").await),
            _ => Ok(()),
        }
    }

    async fn merge(&self, primary_id: &str, merged_id: &str) -> Result<(), StoreError> {
        let body = serde_json::json!({
            "primaryObjectId": primary_id,
            "objectIdToMerge": merged_id,
        });

        let response = self
            .http
            .post(self.url("/crm/v3/objects/companies/merge"))
            .bearer_auth(&self.access_token)
            .timeout(self.timeout())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "company merge").await);
        }
        Ok(())
    }

    async fn archive(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.url(&format!("/crm/v3/objects/companies/{id}")))
            .bearer_auth(&self.access_token)
            .timeout(self.timeout())
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { id: id.to_string() }),
            status if !status.is_success() => Err(Self::fail(response, "company archive").await),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Filter;

    #[test]
    fn test_search_body_shape() {
        let groups = vec![FilterGroup::new(vec![Filter::eq("domain", "acme.com")])];
        let body = serde_json::json!({
            "filterGroups": groups,
            "properties": ["name", "domain"],
            "limit": 25,
        });
        assert_eq!(
            body["filterGroups"][0]["filters"][0]["propertyName"],
            "domain"
        );
        assert_eq!(body["filterGroups"][0]["filters"][0]["operator"], "EQ");
    }

    #[test]
    fn test_object_conversion() {
        let obj = HsObject {
            id: "111".to_string(),
            properties: [("name".to_string(), Value::String("Acme".into()))]
                .into_iter()
                .collect(),
        };
        let record: CompanyRecord = obj.into();
        assert_eq!(record.id.as_deref(), Some("111"));
        assert_eq!(record.property_str("name"), Some("Acme"));
    }
}
