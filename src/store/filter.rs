//! Search filter model
//!
//! Filter groups are OR-combined by the store; filters within a group are
//! AND-combined. A filter carries exactly one of `value` / `values`
//! depending on its operator; the constructors enforce that, and decoded
//! model output is normalized through [`Filter::normalized`].

use serde::{Deserialize, Serialize};

use crate::sanitize::sanitize_filter_value;

/// Operators understood by the record store search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Eq,
    ContainsToken,
    In,
    NotIn,
    HasProperty,
    NotHasProperty,
}

impl FilterOperator {
    /// Operators that carry a single literal.
    pub fn takes_value(self) -> bool {
        matches!(self, FilterOperator::Eq | FilterOperator::ContainsToken)
    }

    /// Operators that carry a value list.
    pub fn takes_values(self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }
}

/// One search condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: FilterOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl Filter {
    pub fn eq(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property_name: property.into(),
            operator: FilterOperator::Eq,
            value: Some(value.into()),
            values: None,
        }
    }

    pub fn contains_token(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property_name: property.into(),
            operator: FilterOperator::ContainsToken,
            value: Some(value.into()),
            values: None,
        }
    }

    pub fn in_list(property: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            property_name: property.into(),
            operator: FilterOperator::In,
            value: None,
            values: Some(values),
        }
    }

    pub fn not_in_list(property: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            property_name: property.into(),
            operator: FilterOperator::NotIn,
            value: None,
            values: Some(values),
        }
    }

    pub fn has_property(property: impl Into<String>) -> Self {
        Self {
            property_name: property.into(),
            operator: FilterOperator::HasProperty,
            value: None,
            values: None,
        }
    }

    pub fn not_has_property(property: impl Into<String>) -> Self {
        Self {
            property_name: property.into(),
            operator: FilterOperator::NotHasProperty,
            value: None,
            values: None,
        }
    }

    /// Normalize a decoded filter: sanitize literals and drop whichever
    /// of `value` / `values` the operator does not carry.
    pub fn normalized(self) -> Self {
        let value = if self.operator.takes_value() {
            self.value.as_deref().map(sanitize_filter_value)
        } else {
            None
        };
        let values = if self.operator.takes_values() {
            self.values
                .map(|vs| vs.iter().map(|v| sanitize_filter_value(v)).collect())
        } else {
            None
        };
        Self {
            value,
            values,
            ..self
        }
    }
}

/// AND-combined set of filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

impl FilterGroup {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn normalized(self) -> Self {
        Self {
            filters: self.filters.into_iter().map(Filter::normalized).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_wire_names() {
        assert_eq!(
            serde_json::to_value(FilterOperator::ContainsToken).unwrap(),
            json!("CONTAINS_TOKEN")
        );
        assert_eq!(
            serde_json::to_value(FilterOperator::NotHasProperty).unwrap(),
            json!("NOT_HAS_PROPERTY")
        );
    }

    #[test]
    fn test_constructors_are_mutually_exclusive() {
        let f = Filter::eq("domain", "acme.com");
        assert!(f.value.is_some() && f.values.is_none());

        let f = Filter::in_list("city", vec!["Berlin".into(), "Munich".into()]);
        assert!(f.value.is_none() && f.values.is_some());

        let f = Filter::has_property("website");
        assert!(f.value.is_none() && f.values.is_none());
    }

    #[test]
    fn test_serialization_skips_absent_side() {
        let wire = serde_json::to_value(Filter::eq("domain", "acme.com")).unwrap();
        assert_eq!(
            wire,
            json!({"propertyName": "domain", "operator": "EQ", "value": "acme.com"})
        );

        let wire = serde_json::to_value(Filter::has_property("website")).unwrap();
        assert_eq!(
            wire,
            json!({"propertyName": "website", "operator": "HAS_PROPERTY"})
        );
    }

    #[test]
    fn test_normalized_sanitizes_literals() {
        let f = Filter::eq("domain", "https://acme.com/about").normalized();
        assert_eq!(f.value.as_deref(), Some("acme.com"));

        let f = Filter::in_list("domain", vec!["acme.com}]".into()]).normalized();
        assert_eq!(f.values, Some(vec!["acme.com".to_string()]));
    }

    #[test]
    fn test_normalized_drops_wrong_side() {
        // Model occasionally fills both slots; the operator decides which survives
        let f = Filter {
            property_name: "domain".into(),
            operator: FilterOperator::HasProperty,
            value: Some("junk".into()),
            values: Some(vec!["junk".into()]),
        }
        .normalized();
        assert!(f.value.is_none() && f.values.is_none());
    }
}
