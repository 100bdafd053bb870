//! Stage schema construction
//!
//! Each pipeline stage asks the inference client for output shaped by a
//! JSON-Schema document. The documents are deep copies of static base
//! templates with caller rule text appended to `description` fields;
//! structural fields (`type`, `enum`, `required`, `additionalProperties`)
//! are never touched.

mod templates;

use std::collections::BTreeMap;

use serde_json::Value;

/// Characters stripped from rule text before it is embedded in a schema
/// description. Anything that could desynchronize the surrounding JSON
/// document is removed; the rest is passed through verbatim.
const STRUCTURAL_CHARS: [char; 7] = ['{', '}', '[', ']', '<', '>', '\\'];

/// Strip structural characters from caller rule text.
pub fn strip_rule_text(text: &str) -> String {
    text.chars()
        .filter(|c| !STRUCTURAL_CHARS.contains(c))
        .collect()
}

/// Append rule text to a schema node's `description`. Blank or
/// whitespace-only text leaves the node byte-identical.
fn append_rule(node: &mut Value, rule: Option<&str>) {
    let Some(rule) = rule else { return };
    let stripped = strip_rule_text(rule);
    let stripped = stripped.trim();
    if stripped.is_empty() {
        return;
    }
    let description = node
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let combined = if description.is_empty() {
        format!("Caller instructions: {stripped}")
    } else {
        format!("{description} Caller instructions: {stripped}")
    };
    node["description"] = Value::String(combined);
}

/// Schema for the duplicate-search filter stage.
pub fn filter_search(duplicate_rules: Option<&str>) -> Value {
    let mut schema = templates::FILTER_SEARCH.clone();
    append_rule(&mut schema, duplicate_rules);
    schema
}

/// Schema for the merge-decision stage.
pub fn merge_decision(primary_rules: Option<&str>) -> Value {
    let mut schema = templates::MERGE_DECISION.clone();
    append_rule(&mut schema, primary_rules);
    schema
}

/// Schema for the field-merge stage, built over the current record's
/// property names. Per-property rule text lands on the matching slot's
/// description; properties without a slot in the current record are
/// ignored.
pub fn field_merge(
    property_names: impl IntoIterator<Item = impl AsRef<str>>,
    merge_rules: Option<&str>,
    property_rules: &BTreeMap<String, String>,
) -> Value {
    let mut schema = templates::FIELD_MERGE.clone();
    append_rule(&mut schema, merge_rules);

    let updates = &mut schema["properties"]["updates"];
    for name in property_names {
        let name = name.as_ref();
        let mut slot = templates::field_merge_property_slot();
        append_rule(&mut slot, property_rules.get(name).map(String::as_str));
        updates["properties"][name] = slot;
        updates["required"]
            .as_array_mut()
            .expect("field-merge template carries a required array")
            .push(Value::String(name.to_string()));
    }
    schema
}

/// Schema for the clean stage, restricted to exactly the caller's fields.
pub fn clean(
    field_names: impl IntoIterator<Item = impl AsRef<str>>,
    clean_rules: Option<&str>,
) -> Value {
    let mut schema = templates::CLEAN.clone();
    append_rule(&mut schema, clean_rules);

    let fields = &mut schema["properties"]["fields"];
    for name in field_names {
        let name = name.as_ref();
        fields["properties"][name] = templates::clean_field_slot();
        fields["required"]
            .as_array_mut()
            .expect("clean template carries a required array")
            .push(Value::String(name.to_string()));
    }
    schema
}

/// Schema for the purge classification stage.
pub fn purge(purge_rules: Option<&str>) -> Value {
    let mut schema = templates::PURGE.clone();
    append_rule(&mut schema, purge_rules);
    schema
}
