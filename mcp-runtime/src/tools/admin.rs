//! Workspace administration: creation, summaries, snapshots and copies.

use std::collections::BTreeMap;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};

use super::{extract_data_references, object_summary, schema_classification};
use crate::args::{arg_bool, arg_optional_string, arg_string_array, required_string};
use crate::config::ToolCategory;
use crate::dispatcher::ToolContext;
use crate::error::ToolError;
use crate::platform::{
    NewWorkspace, ObjectFilter, ObjectLocator, ObjectMetadata, ObjectReference, PlatformError,
    RemoteCategory,
};
use crate::registry::{ParamDef, ParamType, ToolDescriptor};
use crate::session::Session;

const DEFAULT_DUPLICATE_DESCRIPTION: &str = "Duplicated workspace";

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "create_workspace",
            description: "Create a new workspace in the selected instance.",
            category: ToolCategory::Admin,
            read_only: false,
            params: vec![
                ParamDef::required("name", ParamType::String, "Workspace name"),
                ParamDef::optional("description", ParamType::String, "Workspace description"),
                ParamDef::optional("labels", ParamType::StringList, "Labels to attach"),
            ],
            handler: create_workspace,
        },
        ToolDescriptor {
            name: "get_workspace_summary",
            description: "Count the objects in a workspace, grouped by schema type.",
            category: ToolCategory::Admin,
            read_only: true,
            params: vec![ParamDef::required("workspace_id", ParamType::String, "Workspace id")],
            handler: get_workspace_summary,
        },
        ToolDescriptor {
            name: "create_workspace_snapshot",
            description: "Record every object and version currently in a workspace. Optionally lists the data blobs each object references.",
            category: ToolCategory::Admin,
            read_only: true,
            params: vec![
                ParamDef::required("workspace_id", ParamType::String, "Workspace id"),
                ParamDef::optional(
                    "snapshot_name",
                    ParamType::String,
                    "Snapshot name; defaults to snapshot_<timestamp>",
                ),
                ParamDef::required(
                    "include_data_references",
                    ParamType::Bool,
                    "Fetch each object and list its data blob references",
                )
                .with_default(json!(false)),
            ],
            handler: create_workspace_snapshot,
        },
        ToolDescriptor {
            name: "workspace_copy_object",
            description: "Copy one object definition into another workspace at the same path.",
            category: ToolCategory::Admin,
            read_only: false,
            params: vec![
                ParamDef::required("source_workspace_id", ParamType::String, "Workspace to copy from"),
                ParamDef::required("target_workspace_id", ParamType::String, "Workspace to copy into"),
                ParamDef::required("object_id", ParamType::String, "Object to copy"),
                ParamDef::optional("version", ParamType::String, "Version to copy; latest when omitted"),
            ],
            handler: workspace_copy_object,
        },
        ToolDescriptor {
            name: "workspace_duplicate_workspace",
            description: "Create a new workspace and copy the source workspace's objects into it, optionally filtered by schema or name.",
            category: ToolCategory::Admin,
            read_only: false,
            params: vec![
                ParamDef::required("source_workspace_id", ParamType::String, "Workspace to duplicate"),
                ParamDef::required("target_name", ParamType::String, "Name of the new workspace"),
                ParamDef::required(
                    "target_description",
                    ParamType::String,
                    "Description of the new workspace",
                )
                .with_default(json!(DEFAULT_DUPLICATE_DESCRIPTION)),
                ParamDef::optional(
                    "schema_filter",
                    ParamType::StringList,
                    "Copy only objects whose schema id contains one of these",
                ),
                ParamDef::optional(
                    "name_filter",
                    ParamType::StringList,
                    "Copy only objects whose name contains one of these",
                ),
            ],
            handler: workspace_duplicate_workspace,
        },
    ]
}

fn create_workspace<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let request = NewWorkspace {
            name: required_string(args, "name")?,
            description: arg_optional_string(args, "description")?,
            labels: arg_string_array(args, "labels")?,
        };
        let session = ctx.scoped_session().await?;
        let workspace = ctx.platform.create_workspace(&session, &request).await?;
        tracing::info!(workspace_id = %workspace.id, name = %workspace.name, "workspace created");
        Ok(json!({
            "id": workspace.id,
            "name": workspace.name,
            "description": workspace.description,
            "labels": workspace.labels,
            "created_at": workspace.created_at,
        }))
    })
}

fn get_workspace_summary<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let workspace_id = required_string(args, "workspace_id")?;
        let session = ctx.scoped_session().await?;
        let objects = all_objects(ctx, &session, &workspace_id).await?;
        let mut by_schema: BTreeMap<String, usize> = BTreeMap::new();
        for object in &objects {
            *by_schema
                .entry(schema_classification(&object.schema_id))
                .or_default() += 1;
        }
        Ok(json!({
            "workspace_id": workspace_id,
            "total_objects": objects.len(),
            "objects_by_schema": by_schema,
        }))
    })
}

fn create_workspace_snapshot<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let workspace_id = required_string(args, "workspace_id")?;
        let now = Utc::now();
        let snapshot_name = arg_optional_string(args, "snapshot_name")?
            .unwrap_or_else(|| format!("snapshot_{}", now.format("%Y%m%d_%H%M%S")));
        let include_refs = arg_bool(args, "include_data_references", false)?;

        let session = ctx.scoped_session().await?;
        let workspace = ctx.platform.get_workspace(&session, &workspace_id).await?;
        let objects = all_objects(ctx, &session, &workspace_id).await?;

        let mut entries = Vec::with_capacity(objects.len());
        let mut reference_count = 0;
        for object in &objects {
            let mut entry = object_summary(object);
            if include_refs {
                let references = match ctx
                    .platform
                    .get_object(
                        &session,
                        &workspace_id,
                        &ObjectLocator::Id(object.id.clone()),
                        object.version_id.as_deref(),
                    )
                    .await
                {
                    Ok(document) => extract_data_references(&document.definition),
                    Err(err) => {
                        tracing::warn!(object_id = %object.id, error = %err, "could not read object for snapshot");
                        Vec::new()
                    }
                };
                reference_count += references.len();
                entry["data_references"] = json!(references);
            }
            entries.push(entry);
        }

        Ok(json!({
            "snapshot": {
                "snapshot_name": snapshot_name,
                "snapshot_timestamp": now,
                "workspace_id": workspace.id,
                "workspace_name": workspace.name,
                "workspace_description": workspace.description,
                "object_count": entries.len(),
                "objects": entries,
            },
            "summary": {
                "object_count": objects.len(),
                "include_data_references": include_refs,
                "data_reference_count": reference_count,
            },
        }))
    })
}

fn workspace_copy_object<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let source = required_string(args, "source_workspace_id")?;
        let target = required_string(args, "target_workspace_id")?;
        let object_id = required_string(args, "object_id")?;
        let version = arg_optional_string(args, "version")?;
        let session = ctx.scoped_session().await?;

        let metadata = ObjectMetadata {
            id: object_id,
            name: String::new(),
            path: String::new(),
            schema_id: String::new(),
            version_id: version,
            created_at: None,
            modified_at: None,
        };
        let copied = copy_object(ctx, &session, &source, &target, &metadata).await?;
        Ok(json!({
            "source_workspace_id": source,
            "target_workspace_id": target,
            "id": copied.reference.object_id,
            "name": copied.name,
            "path": copied.reference.path,
            "version_id": copied.reference.version_id,
            "data_references": copied.data_references,
        }))
    })
}

fn workspace_duplicate_workspace<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let source = required_string(args, "source_workspace_id")?;
        let request = NewWorkspace {
            name: required_string(args, "target_name")?,
            description: Some(
                arg_optional_string(args, "target_description")?
                    .unwrap_or_else(|| DEFAULT_DUPLICATE_DESCRIPTION.to_string()),
            ),
            labels: Vec::new(),
        };
        let schema_filter = lowercase_all(arg_string_array(args, "schema_filter")?);
        let name_filter = lowercase_all(arg_string_array(args, "name_filter")?);

        let session = ctx.scoped_session().await?;
        let objects = all_objects(ctx, &session, &source).await?;
        let selected: Vec<&ObjectMetadata> = objects
            .iter()
            .filter(|o| matches_any(&o.schema_id, &schema_filter))
            .filter(|o| matches_any(&o.name, &name_filter))
            .collect();

        let target = ctx.platform.create_workspace(&session, &request).await?;
        tracing::info!(source = %source, target = %target.id, objects = selected.len(), "duplicating workspace");

        let mut copied = 0;
        let mut data_references = 0;
        let mut failures = Vec::new();
        for object in selected.iter().copied() {
            match copy_object(ctx, &session, &source, &target.id, object).await {
                Ok(result) => {
                    copied += 1;
                    data_references += result.data_references;
                }
                Err(err) => {
                    tracing::warn!(object_id = %object.id, path = %object.path, error = %err.message, "object copy failed");
                    failures.push(json!({
                        "object_id": object.id,
                        "path": object.path,
                        "error": err.to_body(),
                    }));
                }
            }
        }

        Ok(json!({
            "target_workspace_id": target.id,
            "target_workspace_name": target.name,
            "objects_selected": selected.len(),
            "objects_copied": copied,
            "objects_failed": failures.len(),
            "data_references": data_references,
            "failures": failures,
        }))
    })
}

struct CopiedObject {
    reference: ObjectReference,
    name: String,
    data_references: usize,
}

/// Fetch `object` from `source` and create it at the same path in `target`.
/// The copy gets a fresh identity; referenced data blobs are not duplicated.
async fn copy_object(
    ctx: &ToolContext,
    session: &Session,
    source: &str,
    target: &str,
    object: &ObjectMetadata,
) -> Result<CopiedObject, ToolError> {
    let document = ctx
        .platform
        .get_object(
            session,
            source,
            &ObjectLocator::Id(object.id.clone()),
            object.version_id.as_deref(),
        )
        .await?;
    let mut definition = document.definition;
    let Some(map) = definition.as_object_mut() else {
        return Err(PlatformError::remote(
            RemoteCategory::InvalidResponse,
            None,
            "get_object",
            format!("object {} has no JSON definition", object.id),
        )
        .into());
    };
    map.insert("uuid".to_string(), Value::Null);
    let data_references = extract_data_references(&definition).len();
    let reference = ctx
        .platform
        .create_object(session, target, &document.metadata.path, &definition)
        .await?;
    Ok(CopiedObject {
        reference,
        name: document.metadata.name,
        data_references,
    })
}

async fn all_objects(
    ctx: &ToolContext,
    session: &Session,
    workspace_id: &str,
) -> Result<Vec<ObjectMetadata>, ToolError> {
    Ok(ctx
        .platform
        .list_objects(session, workspace_id, &ObjectFilter::default())
        .await?)
}

fn lowercase_all(items: Vec<String>) -> Vec<String> {
    items.into_iter().map(|s| s.to_lowercase()).collect()
}

/// Empty filter matches everything.
fn matches_any(value: &str, needles: &[String]) -> bool {
    if needles.is_empty() {
        return true;
    }
    let value = value.to_lowercase();
    needles.iter().any(|n| value.contains(n.as_str()))
}
