//! Tool implementations and the startup registry.

mod admin;
mod data;
mod general;

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::platform::{ObjectMetadata, Workspace};
use crate::registry::{RegistryError, ToolRegistry};

/// Every tool the server knows, general tools first.
pub fn default_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    for descriptor in general::descriptors()
        .into_iter()
        .chain(admin::descriptors())
        .chain(data::descriptors())
    {
        registry.register(descriptor)?;
    }
    Ok(registry)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|e| ToolError::internal(format!("failed to encode tool result: {e}")))
}

pub(crate) fn workspace_summary(workspace: &Workspace) -> Value {
    json!({
        "id": workspace.id,
        "name": workspace.name,
        "description": workspace.description,
        "user_role": workspace.user_role,
        "labels": workspace.labels,
        "created_at": workspace.created_at,
        "updated_at": workspace.updated_at,
    })
}

pub(crate) fn object_summary(object: &ObjectMetadata) -> Value {
    json!({
        "id": object.id,
        "name": object.name,
        "path": object.path,
        "schema_id": object.schema_id,
        "version_id": object.version_id,
        "created_at": object.created_at,
    })
}

/// `/objects/pointset/1.3.0/pointset.schema.json` → `pointset`.
pub(crate) fn schema_classification(schema_id: &str) -> String {
    let mut segments = schema_id.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("objects"), Some(kind)) => kind.to_string(),
        (Some(first), _) => first.to_string(),
        (None, _) => "unknown".to_string(),
    }
}

/// Blob identifiers referenced by an object definition: every string value
/// stored under a `data` key, in document order, without duplicates.
pub(crate) fn extract_data_references(definition: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, item) in map {
                    match item {
                        Value::String(id) if key == "data" => {
                            if !out.contains(id) {
                                out.push(id.clone());
                            }
                        }
                        other => walk(other, out),
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(definition, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ToolCategory, ToolFilter};

    #[test]
    fn registry_contains_every_tool_once() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.len(), 15);
        let data: Vec<&str> = registry
            .list_visible(ToolFilter::Data)
            .iter()
            .filter(|t| t.category == ToolCategory::Data)
            .map(|t| t.name)
            .collect();
        assert_eq!(data, vec!["list_local_data_files", "preview_csv_file", "import_csv"]);
    }

    #[test]
    fn mutating_tools_are_not_marked_read_only() {
        let registry = default_registry().unwrap();
        for name in [
            "select_instance",
            "create_workspace",
            "workspace_copy_object",
            "workspace_duplicate_workspace",
            "import_csv",
        ] {
            assert!(!registry.resolve(name).unwrap().read_only, "{name}");
        }
        assert!(registry.resolve("list_workspaces").unwrap().read_only);
    }

    #[test]
    fn schema_classification_takes_the_object_family() {
        assert_eq!(
            schema_classification("/objects/downhole-intervals/1.3.0/downhole-intervals.schema.json"),
            "downhole-intervals"
        );
        assert_eq!(schema_classification("custom"), "custom");
        assert_eq!(schema_classification(""), "unknown");
    }

    #[test]
    fn data_references_are_collected_once_in_order() {
        // `attributes` sorts before `coordinates`; document order must win.
        let definition = json!({
            "locations": {
                "coordinates": { "data": "blob-a", "length": 3 },
                "attributes": [
                    { "values": { "data": "blob-b" } },
                    { "values": { "data": "blob-a" } },
                    { "values": { "data": [1.0, 2.0] } }
                ]
            }
        });
        assert_eq!(extract_data_references(&definition), vec!["blob-a", "blob-b"]);
    }
}
