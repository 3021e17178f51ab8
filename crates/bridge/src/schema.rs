//! JSON Schema cleanup for Gemini-style gateways
//!
//! Gemini's function-calling schema dialect rejects several standard JSON
//! Schema keywords. The normalizer strips them recursively, resolving `$ref`
//! against `$defs` first so no reference dangles after `$defs` is removed.

use serde_json::{Map, Value, json};

/// Keywords Gemini rejects outright.
const STRIP_KEYS: &[&str] = &[
    "additionalProperties",
    "minLength",
    "maxLength",
    "format",
    "minimum",
    "maximum",
    "pattern",
    "$defs",
    "$ref",
];

/// Normalize one tool parameter schema for a Gemini-named provider.
pub fn normalize_for_gemini(schema: &Value) -> Value {
    let defs = schema.get("$defs").cloned();
    clean(schema, defs.as_ref())
}

fn clean(value: &Value, defs: Option<&Value>) -> Value {
    match value {
        Value::Object(map) => clean_object(map, defs),
        Value::Array(items) => Value::Array(items.iter().map(|v| clean(v, defs)).collect()),
        other => other.clone(),
    }
}

fn clean_object(map: &Map<String, Value>, defs: Option<&Value>) -> Value {
    // Resolve the reference before anything else; the target is then cleaned
    // like any inline schema.
    if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
        if let Some(resolved) = resolve_ref(reference, defs) {
            return clean(&resolved, defs);
        }
    }

    let mut out = Map::new();
    for (key, val) in map {
        if STRIP_KEYS.contains(&key.as_str()) {
            continue;
        }
        match key.as_str() {
            // ["string","null"] → "string"
            "type" => out.insert(key.clone(), drop_null_type(val)),
            // const → single-element enum
            "const" => out.insert("enum".to_string(), json!([val])),
            "anyOf" => {
                if let Some(literals) = literal_any_of(val) {
                    out.insert("enum".to_string(), Value::Array(literals))
                } else {
                    out.insert(key.clone(), clean(val, defs))
                }
            }
            _ => out.insert(key.clone(), clean(val, defs)),
        };
    }
    Value::Object(out)
}

fn resolve_ref(reference: &str, defs: Option<&Value>) -> Option<Value> {
    let name = reference.strip_prefix("#/$defs/")?;
    defs?.get(name).cloned()
}

fn drop_null_type(type_value: &Value) -> Value {
    if let Some(types) = type_value.as_array() {
        if types.iter().any(|t| t == "null") {
            if let Some(non_null) = types.iter().find(|t| *t != "null") {
                return non_null.clone();
            }
        }
        return type_value.clone();
    }
    type_value.clone()
}

/// An `anyOf` of pure literals flattens into an enum at the parent.
fn literal_any_of(any_of: &Value) -> Option<Vec<Value>> {
    let variants = any_of.as_array()?;
    if variants.is_empty() {
        return None;
    }
    let mut literals = Vec::with_capacity(variants.len());
    for variant in variants {
        let object = variant.as_object()?;
        let value = object.get("const")?;
        // Only `const` plus an optional `type` qualifies as a pure literal
        if object.keys().any(|k| k != "const" && k != "type") {
            return None;
        }
        literals.push(value.clone());
    }
    Some(literals)
}
