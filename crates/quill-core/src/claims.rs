//! Claim maps and dotted-path navigation over JSON values.

use serde_json::{Map, Value};

use crate::error::CoreError;

/// A claim set: a JSON object keyed by claim name.
pub type Claims = Map<String, Value>;

/// Resolve a dotted path (`credentialSubject.age`) inside a claim map.
pub fn navigate<'a>(claims: &'a Claims, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = claims.get(first)?;
    for segment in segments {
        current = step(current, segment)?;
    }
    Some(current)
}

/// Resolve a dotted path inside an arbitrary JSON value.
pub fn navigate_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, step)
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Write `value` at a dotted path, creating intermediate objects.
pub fn insert_path(claims: &mut Claims, path: &str, value: Value) -> Result<(), CoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::Validation(format!("invalid claim path '{path}'")));
    }
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| CoreError::Validation("empty claim path".into()))?;

    let mut current = claims;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(CoreError::Validation(format!(
                    "claim path '{path}' crosses non-object value at '{segment}'"
                )))
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Merge `source` into `target`; later keys overwrite earlier ones.
pub fn merge(target: &mut Claims, source: Claims) {
    for (key, value) in source {
        target.insert(key, value);
    }
}

/// String form used for loose equality: strings unquoted, everything else as JSON text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
