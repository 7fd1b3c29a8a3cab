//! Read-only queries over opaque port schemas (spec §4.2).
//!
//! Schemas are plain `serde_json::Value` trees shaped like JSON Schema. This
//! module never constructs or validates schemas — it only answers questions
//! a scheduler needs about them. The optional `json-validation` feature wires
//! `jsonschema` in for callers that want full validation; the inspector
//! queries below work without it.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{GraphError, Result};

/// `x-stream` port extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    None,
    Append,
    Replace,
}

/// `x-ui-iteration` port extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationMode {
    ForceArray,
    ForceScalar,
    Infer,
}

/// Coarse type classification used by auto-connection and iteration analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Primitive,
    TypedArray,
    Object,
    Array,
    Unknown,
}

/// `properties(schema) -> mapping portName -> portSchema | null`.
///
/// Returns `None` if `schema` has no `properties` object at all (as opposed
/// to an empty one).
pub fn properties(schema: &Value) -> Option<BTreeMap<String, Value>> {
    schema.get("properties")?.as_object().map(|map| {
        map.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    })
}

/// `isRequired(schema, portName) -> bool`.
pub fn is_required(schema: &Value, port_name: &str) -> bool {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|req| req.iter().any(|v| v.as_str() == Some(port_name)))
        .unwrap_or(false)
}

/// `streamMode(portSchema) -> none | append | replace`, from `x-stream`.
pub fn stream_mode(port_schema: &Value) -> StreamMode {
    match port_schema.get("x-stream").and_then(Value::as_str) {
        Some("append") => StreamMode::Append,
        Some("replace") => StreamMode::Replace,
        _ => StreamMode::None,
    }
}

/// `outputStreamMode(schema)`: the stream mode implied by a task's output
/// schema as a whole. Fails fast with [`GraphError::MixedStreamModes`] if any
/// two output ports declare different non-`none` stream modes.
pub fn output_stream_mode(kind: &str, output_schema: &Value) -> Result<StreamMode> {
    let Some(props) = properties(output_schema) else {
        return Ok(StreamMode::None);
    };
    let mut seen: Option<StreamMode> = None;
    for port_schema in props.values() {
        let mode = stream_mode(port_schema);
        if mode == StreamMode::None {
            continue;
        }
        match seen {
            None => seen = Some(mode),
            Some(existing) if existing == mode => {}
            Some(_) => {
                return Err(GraphError::MixedStreamModes { kind: kind.to_string() });
            }
        }
    }
    Ok(seen.unwrap_or(StreamMode::None))
}

/// `iterationMode(portSchema) -> force-array | force-scalar | infer`, from
/// `x-ui-iteration`.
pub fn iteration_mode(port_schema: &Value) -> IterationMode {
    match port_schema.get("x-ui-iteration").and_then(Value::as_bool) {
        Some(true) => IterationMode::ForceArray,
        Some(false) => IterationMode::ForceScalar,
        None => IterationMode::Infer,
    }
}

/// `typeTag(portSchema) -> primitive | typed-array | object | array | unknown`.
pub fn type_tag(port_schema: &Value) -> TypeTag {
    if format(port_schema).as_deref() == Some("TypedArray") {
        return TypeTag::TypedArray;
    }
    match port_schema.get("type").and_then(Value::as_str) {
        Some("array") => TypeTag::Array,
        Some("object") => TypeTag::Object,
        Some("string") | Some("number") | Some("integer") | Some("boolean") | Some("null") => {
            TypeTag::Primitive
        }
        _ => {
            if admits_both_scalar_and_array(port_schema) {
                TypeTag::Unknown
            } else {
                TypeTag::Unknown
            }
        }
    }
}

/// `format(portSchema) -> optional string`, traversing `oneOf`/`anyOf`
/// wrappers the way the auto-connection matcher needs to (spec §4.6).
pub fn format(port_schema: &Value) -> Option<String> {
    if let Some(f) = port_schema.get("format").and_then(Value::as_str) {
        return Some(f.to_string());
    }
    for key in ["oneOf", "anyOf"] {
        if let Some(variants) = port_schema.get(key).and_then(Value::as_array) {
            for variant in variants {
                if let Some(f) = format(variant) {
                    return Some(f);
                }
            }
        }
    }
    None
}

/// Does this schema admit both a scalar and an array shape, i.e. is it a
/// `oneOf`/`anyOf` wrapper over mixed branches? Used by iterator tasks to
/// classify "flexible" ports (spec §4.6).
pub fn admits_both_scalar_and_array(port_schema: &Value) -> bool {
    for key in ["oneOf", "anyOf"] {
        if let Some(variants) = port_schema.get(key).and_then(Value::as_array) {
            let has_array = variants
                .iter()
                .any(|v| v.get("type").and_then(Value::as_str) == Some("array"));
            let has_scalar = variants.iter().any(|v| {
                !matches!(v.get("type").and_then(Value::as_str), Some("array") | None)
            });
            if has_array && has_scalar {
                return true;
            }
        }
    }
    false
}

/// Is `port_schema`'s declared type strictly `array` (not a flexible
/// `oneOf`/`anyOf` wrapper)?
pub fn is_strict_array(port_schema: &Value) -> bool {
    port_schema.get("type").and_then(Value::as_str) == Some("array")
}
