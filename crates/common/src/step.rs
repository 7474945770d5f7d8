// Canonical step schema and the normalization boundary for untyped client
// step payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields whose shape is contractually fixed regardless of step kind.
const CONTRACT_FIELDS: [&str; 3] = ["attachments", "options", "branches"];

/// One typed unit of a workflow's ordered content.
///
/// Identity is positional: a step exists only as an element of its owning
/// workflow's sequence, so reordering the sequence is the identity change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Discriminator, e.g. `question` or `action`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// All remaining fields, carried through under their string keys.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Step {
    /// The step's attachment list. Always an array on the canonical shape.
    pub fn attachments(&self) -> &[Value] {
        self.fields.get("attachments").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Convert an arbitrary untyped steps payload into the canonical step list.
///
/// Lenient by design: autosave must never be blocked by a malformed client
/// payload, so a shape mismatch degrades to an empty collection for that
/// field instead of failing the whole operation. Absent or non-array input
/// yields an empty list; non-mapping elements are dropped.
pub fn normalize_steps(raw: Option<&Value>) -> Vec<Step> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items.iter().filter_map(Value::as_object).map(normalize_step).collect()
}

fn normalize_step(raw: &Map<String, Value>) -> Step {
    let mut step = Step::default();
    for (key, value) in raw {
        if key == "type" {
            step.kind = value.as_str().unwrap_or_default().to_string();
        } else if key == "attachments" {
            step.fields.insert(key.clone(), coerce_array(value));
        } else if key == "options" || key == "branches" {
            step.fields.insert(key.clone(), coerce_mapping_array(value));
        } else {
            step.fields.insert(key.clone(), value.clone());
        }
    }

    // Contract fields are always present on the canonical shape.
    for field in CONTRACT_FIELDS {
        step.fields.entry(field).or_insert_with(|| Value::Array(Vec::new()));
    }

    step
}

fn coerce_array(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        _ => Value::Array(Vec::new()),
    }
}

/// Arrays keep their element order; mapping elements are rebuilt with string
/// keys one level deep, non-mapping elements pass through unchanged.
fn coerce_mapping_array(value: &Value) -> Value {
    let Value::Array(items) = value else {
        return Value::Array(Vec::new());
    };
    Value::Array(
        items
            .iter()
            .map(|item| match item {
                Value::Object(mapping) => Value::Object(
                    mapping.iter().map(|(key, value)| (key.clone(), value.clone())).collect(),
                ),
                other => other.clone(),
            })
            .collect(),
    )
}
