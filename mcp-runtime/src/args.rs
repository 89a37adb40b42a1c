//! Typed access to tool arguments.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::ToolError;

pub(crate) fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(ToolError::invalid_arguments(format!("'{key}' must be a boolean")).with_field(key)),
    }
}

pub(crate) fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args.get(key).ok_or_else(|| {
        ToolError::invalid_arguments(format!("Missing required field '{key}'")).with_field(key)
    })?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Value::String(_) => {
            Err(ToolError::invalid_arguments(format!("'{key}' must not be empty")).with_field(key))
        }
        _ => Err(ToolError::invalid_arguments(format!("'{key}' must be a string")).with_field(key)),
    }
}

pub(crate) fn arg_optional_string(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.trim().to_string())),
        Some(_) => Err(ToolError::invalid_arguments(format!("'{key}' must be a string")).with_field(key)),
    }
}

pub(crate) fn arg_u64(args: &Map<String, Value>, key: &str, default: u64) -> Result<u64, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            ToolError::invalid_arguments(format!("'{key}' must be an unsigned integer")).with_field(key)
        }),
        Some(_) => Err(
            ToolError::invalid_arguments(format!("'{key}' must be an unsigned integer")).with_field(key),
        ),
    }
}

pub(crate) fn arg_string_array(args: &Map<String, Value>, key: &str) -> Result<Vec<String>, ToolError> {
    let Some(value) = args.get(key) else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }
    let items = value.as_array().ok_or_else(|| {
        ToolError::invalid_arguments(format!("'{key}' must be an array of strings")).with_field(key)
    })?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let text = item.as_str().ok_or_else(|| {
            ToolError::invalid_arguments(format!("'{key}' items must be strings")).with_field(key)
        })?;
        let normalized = text.trim();
        if !normalized.is_empty() {
            out.push(normalized.to_string());
        }
    }
    Ok(out)
}

pub(crate) fn arg_string_map(
    args: &Map<String, Value>,
    key: &str,
) -> Result<BTreeMap<String, String>, ToolError> {
    let Some(value) = args.get(key) else {
        return Ok(BTreeMap::new());
    };
    if value.is_null() {
        return Ok(BTreeMap::new());
    }
    let entries = value.as_object().ok_or_else(|| {
        ToolError::invalid_arguments(format!("'{key}' must be an object of strings")).with_field(key)
    })?;
    let mut out = BTreeMap::new();
    for (name, item) in entries {
        let text = item.as_str().ok_or_else(|| {
            ToolError::invalid_arguments(format!("'{key}.{name}' must be a string")).with_field(key)
        })?;
        out.insert(name.clone(), text.trim().to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn blank_optional_strings_read_as_absent() {
        let a = args(json!({ "name": "  ", "other": null }));
        assert_eq!(arg_optional_string(&a, "name").unwrap(), None);
        assert_eq!(arg_optional_string(&a, "other").unwrap(), None);
        assert_eq!(arg_optional_string(&a, "missing").unwrap(), None);
    }

    #[test]
    fn required_string_rejects_blank_values() {
        let err = required_string(&args(json!({ "workspace_id": " " })), "workspace_id").unwrap_err();
        assert_eq!(err.field.as_deref(), Some("workspace_id"));
        assert!(err.message.contains("must not be empty"));
    }

    #[test]
    fn string_arrays_drop_blank_items() {
        let a = args(json!({ "filter": [" pointset ", "", "line"] }));
        assert_eq!(arg_string_array(&a, "filter").unwrap(), vec!["pointset", "line"]);
        assert!(arg_string_array(&a, "missing").unwrap().is_empty());
    }

    #[test]
    fn numeric_defaults_apply_only_when_absent() {
        let a = args(json!({ "limit": 7, "bad": -1 }));
        assert_eq!(arg_u64(&a, "limit", 50).unwrap(), 7);
        assert_eq!(arg_u64(&a, "missing", 50).unwrap(), 50);
        assert!(arg_u64(&a, "bad", 50).is_err());
    }

    #[test]
    fn string_maps_are_trimmed() {
        let a = args(json!({ "columns": { "x": " Easting " } }));
        assert_eq!(arg_string_map(&a, "columns").unwrap()["x"], "Easting");
    }
}
