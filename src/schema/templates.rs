//! Base JSON-Schema templates for each inference stage
//!
//! Templates are held in `Lazy` statics and never handed out by reference:
//! the builder clones them before patching descriptions, so concurrent
//! requests can never observe each other's rule text.
//!
//! Every property appears in `required`: strict structured decoding
//! rejects schemas with optional keys, so "may be absent" is expressed as
//! a nullable type instead.

use once_cell::sync::Lazy;
use serde_json::{json, Value};

/// Confidence levels shared by every stage
pub(super) const CONFIDENCE_LEVELS: [&str; 3] = ["LOW", "MEDIUM", "HIGH"];

pub(super) static FILTER_SEARCH: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "description": "Search filters for locating duplicate company records in the CRM. \
            Build at most 5 filter groups. Filter groups are OR-combined; filters within \
            a group are AND-combined. Prefer exact matches (EQ) on identity properties \
            such as domain, and token matches (CONTAINS_TOKEN) on the company name. \
            Use bare domains without scheme, port or path.",
        "properties": {
            "filterGroups": {
                "type": "array",
                "description": "Alternative ways the same company could appear in the store. \
                    No more than 5 groups.",
                "items": {
                    "type": "object",
                    "properties": {
                        "filters": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "propertyName": {
                                        "type": "string",
                                        "description": "CRM property the filter applies to."
                                    },
                                    "operator": {
                                        "type": "string",
                                        "enum": [
                                            "EQ",
                                            "CONTAINS_TOKEN",
                                            "IN",
                                            "NOT_IN",
                                            "HAS_PROPERTY",
                                            "NOT_HAS_PROPERTY"
                                        ]
                                    },
                                    "value": {
                                        "type": ["string", "null"],
                                        "description": "Literal for EQ and CONTAINS_TOKEN; null for every other operator."
                                    },
                                    "values": {
                                        "type": ["array", "null"],
                                        "items": { "type": "string" },
                                        "description": "Value list for IN and NOT_IN; null for every other operator."
                                    }
                                },
                                "required": ["propertyName", "operator", "value", "values"],
                                "additionalProperties": false
                            }
                        }
                    },
                    "required": ["filters"],
                    "additionalProperties": false
                }
            },
            "confidence": {
                "type": "string",
                "enum": CONFIDENCE_LEVELS,
                "description": "How likely these filters are to surface true duplicates."
            },
            "reasoning": {
                "type": "string",
                "description": "Why these filters were chosen."
            }
        },
        "required": ["filterGroups", "confidence", "reasoning"],
        "additionalProperties": false
    })
});

pub(super) static MERGE_DECISION: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "description": "Decide whether the current record should be merged into one of the \
            candidate duplicates, and which record survives. Score each candidate on data \
            completeness (40%), data quality (25%), engagement signals (20%), source \
            reliability (10%) and record history (5%). When two candidates are within 5 \
            points of each other on this composite, prefer the record with the earliest \
            creation date. Recommend KEEP when no candidate is a true duplicate of the \
            current record.",
        "properties": {
            "recommendedAction": {
                "type": "string",
                "enum": ["MERGE", "KEEP"],
                "description": "MERGE when the current record duplicates a candidate; KEEP otherwise."
            },
            "primaryRecordId": {
                "type": "string",
                "description": "Id of the surviving record. For KEEP this must be the current \
                    record's id; for MERGE it must be one of the candidate ids."
            },
            "confidence": {
                "type": "string",
                "enum": CONFIDENCE_LEVELS
            },
            "reasoning": {
                "type": "string",
                "description": "Scoring summary behind the decision."
            }
        },
        "required": ["recommendedAction", "primaryRecordId", "confidence", "reasoning"],
        "additionalProperties": false
    })
});

/// Envelope for the field-merge stage. Per-request property slots are
/// inserted by the builder; the envelope itself stays empty.
pub(super) static FIELD_MERGE: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "description": "Field-level reconciliation between the current record and the primary \
            record it is being merged into. For each property, return the current record's \
            value only when it is clearly better than the primary's (more complete, better \
            formatted, more recent); return null to leave the primary untouched.",
        "properties": {
            "updates": {
                "type": "object",
                "description": "Replacement values keyed by property name.",
                "properties": {},
                "required": [],
                "additionalProperties": false
            },
            "reasoning": {
                "type": "string",
                "description": "Why the chosen properties should be overwritten."
            }
        },
        "required": ["updates", "reasoning"],
        "additionalProperties": false
    })
});

/// Per-property slot inserted into the field-merge envelope
pub(super) fn field_merge_property_slot() -> Value {
    json!({
        "type": ["string", "null"],
        "description": "Replacement value from the current record, or null to keep the primary's value."
    })
}

/// Envelope for the clean stage; per-field slots are inserted dynamically
/// so the model can only answer about the fields the caller supplied.
pub(super) static CLEAN: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "description": "Normalize each supplied company field: fix casing and formatting, \
            strip boilerplate, standardize domains to bare hostnames and phone numbers to \
            a consistent format. Never invent data that is not present in the input.",
        "properties": {
            "fields": {
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": false
            }
        },
        "required": ["fields"],
        "additionalProperties": false
    })
});

pub(super) fn clean_field_slot() -> Value {
    json!({
        "type": "object",
        "properties": {
            "cleanedValue": {
                "type": ["string", "null"],
                "description": "The cleaned value, or null when the field should be cleared."
            },
            "action": {
                "type": "string",
                "enum": ["CLEANED", "UNCHANGED", "CLEARED"]
            },
            "confidence": {
                "type": "string",
                "enum": CONFIDENCE_LEVELS
            },
            "reasoning": { "type": "string" }
        },
        "required": ["cleanedValue", "action", "confidence", "reasoning"],
        "additionalProperties": false
    })
}

pub(super) static PURGE: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "description": "Classify whether this company record should be removed from the CRM. \
            Be conservative: recommend REMOVE only on clear signals such as test or fake \
            data, placeholder names, or a record with no usable identity. When in doubt, \
            recommend KEEP.",
        "properties": {
            "recommendedAction": {
                "type": "string",
                "enum": ["REMOVE", "KEEP"]
            },
            "confidence": {
                "type": "string",
                "enum": CONFIDENCE_LEVELS
            },
            "reasoning": { "type": "string" }
        },
        "required": ["recommendedAction", "confidence", "reasoning"],
        "additionalProperties": false
    })
});
