//! Tools visible under every filter: health, discovery and instance selection.

use evo_core::error::ErrorKind;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};

use super::{object_summary, to_json, workspace_summary};
use crate::args::{arg_bool, arg_optional_string, arg_u64, required_string};
use crate::config::ToolCategory;
use crate::dispatcher::ToolContext;
use crate::error::ToolError;
use crate::platform::{ObjectFilter, ObjectLocator, WorkspaceFilter};
use crate::registry::{ParamDef, ParamType, ToolDescriptor};

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "workspace_health_check",
            description: "Check that the Evo workspace service is reachable. When workspace_id is given, also checks the geoscience object service.",
            category: ToolCategory::General,
            read_only: true,
            params: vec![ParamDef::optional(
                "workspace_id",
                ParamType::String,
                "Workspace whose object service should also be checked",
            )],
            handler: workspace_health_check,
        },
        ToolDescriptor {
            name: "list_workspaces",
            description: "List workspaces in the selected instance, optionally filtered by name.",
            category: ToolCategory::General,
            read_only: true,
            params: vec![
                ParamDef::optional("name", ParamType::String, "Only workspaces whose name matches"),
                ParamDef::required("deleted", ParamType::Bool, "List deleted workspaces instead")
                    .with_default(json!(false)),
                ParamDef::required("limit", ParamType::Int, "Maximum number of workspaces")
                    .with_default(json!(50)),
            ],
            handler: list_workspaces,
        },
        ToolDescriptor {
            name: "get_workspace",
            description: "Get one workspace by id or by exact name.",
            category: ToolCategory::General,
            read_only: true,
            params: vec![
                ParamDef::optional("workspace_id", ParamType::String, "Workspace id"),
                ParamDef::optional("workspace_name", ParamType::String, "Exact workspace name"),
            ],
            handler: get_workspace,
        },
        ToolDescriptor {
            name: "list_objects",
            description: "List geoscience objects in a workspace, optionally filtered by schema id.",
            category: ToolCategory::General,
            read_only: true,
            params: vec![
                ParamDef::required("workspace_id", ParamType::String, "Workspace id"),
                ParamDef::optional("schema_id", ParamType::String, "Only objects of this schema"),
                ParamDef::required("deleted", ParamType::Bool, "List deleted objects instead")
                    .with_default(json!(false)),
                ParamDef::required("limit", ParamType::Int, "Maximum number of objects")
                    .with_default(json!(100)),
            ],
            handler: list_objects,
        },
        ToolDescriptor {
            name: "get_object",
            description: "Get object metadata by id or path, optionally at a specific version.",
            category: ToolCategory::General,
            read_only: true,
            params: vec![
                ParamDef::required("workspace_id", ParamType::String, "Workspace id"),
                ParamDef::optional("object_id", ParamType::String, "Object id"),
                ParamDef::optional("object_path", ParamType::String, "Object path"),
                ParamDef::optional("version", ParamType::String, "Version id; latest when omitted"),
                ParamDef::required(
                    "include_definition",
                    ParamType::Bool,
                    "Include the full JSON definition",
                )
                .with_default(json!(false)),
            ],
            handler: get_object,
        },
        ToolDescriptor {
            name: "list_my_instances",
            description: "List the Evo instances (organisation and hub) available to the signed-in user.",
            category: ToolCategory::General,
            read_only: true,
            params: Vec::new(),
            handler: list_my_instances,
        },
        ToolDescriptor {
            name: "select_instance",
            description: "Select the Evo instance subsequent calls operate on, by organisation id or display name.",
            category: ToolCategory::General,
            read_only: false,
            params: vec![ParamDef::required(
                "instance",
                ParamType::String,
                "Organisation id or display name",
            )],
            handler: select_instance,
        },
    ]
}

fn workspace_health_check<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let session = ctx.scoped_session().await?;
        let workspace_service = ctx.platform.service_health(&session, "workspace").await?;
        let mut result = json!({
            "instance": session.instance,
            "workspace_service": workspace_service,
        });
        if let Some(workspace_id) = arg_optional_string(args, "workspace_id")? {
            let object_service = ctx
                .platform
                .service_health(&session, "geoscience-object")
                .await?;
            result["workspace_id"] = json!(workspace_id);
            result["object_service"] = to_json(&object_service)?;
        }
        Ok(result)
    })
}

fn list_workspaces<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let filter = WorkspaceFilter {
            name: arg_optional_string(args, "name")?,
            deleted: arg_bool(args, "deleted", false)?,
            limit: Some(arg_u64(args, "limit", 50)?),
        };
        let session = ctx.scoped_session().await?;
        let workspaces = ctx.platform.list_workspaces(&session, &filter).await?;
        let items: Vec<Value> = workspaces.iter().map(workspace_summary).collect();
        Ok(json!({ "count": items.len(), "workspaces": items }))
    })
}

fn get_workspace<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let id = arg_optional_string(args, "workspace_id")?;
        let name = arg_optional_string(args, "workspace_name")?;
        let session = ctx.scoped_session().await?;
        let workspace = match (id, name) {
            (Some(id), _) => ctx.platform.get_workspace(&session, &id).await?,
            (None, Some(name)) => {
                let filter = WorkspaceFilter {
                    name: Some(name.clone()),
                    ..WorkspaceFilter::default()
                };
                ctx.platform
                    .list_workspaces(&session, &filter)
                    .await?
                    .into_iter()
                    .find(|w| w.name == name)
                    .ok_or_else(|| {
                        ToolError::new(
                            ErrorKind::RemotePermanent,
                            format!("No workspace named '{name}' was found"),
                        )
                        .with_field("workspace_name")
                        .with_details(json!({ "category": "not_found" }))
                        .with_docs_hint("Call list_workspaces to see the available names.")
                    })?
            }
            (None, None) => {
                return Err(ToolError::invalid_arguments(
                    "Either workspace_id or workspace_name must be provided",
                )
                .with_field("workspace_id"));
            }
        };
        Ok(workspace_summary(&workspace))
    })
}

fn list_objects<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let workspace_id = required_string(args, "workspace_id")?;
        let filter = ObjectFilter {
            schema: arg_optional_string(args, "schema_id")?,
            deleted: arg_bool(args, "deleted", false)?,
            limit: Some(arg_u64(args, "limit", 100)?),
        };
        let session = ctx.scoped_session().await?;
        let objects = ctx
            .platform
            .list_objects(&session, &workspace_id, &filter)
            .await?;
        let items: Vec<Value> = objects.iter().map(object_summary).collect();
        Ok(json!({
            "workspace_id": workspace_id,
            "count": items.len(),
            "objects": items,
        }))
    })
}

fn get_object<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let workspace_id = required_string(args, "workspace_id")?;
        let locator = match (
            arg_optional_string(args, "object_id")?,
            arg_optional_string(args, "object_path")?,
        ) {
            (Some(id), None) => ObjectLocator::Id(id),
            (None, Some(path)) => ObjectLocator::Path(path),
            (Some(_), Some(_)) => {
                return Err(ToolError::invalid_arguments(
                    "Provide either object_id or object_path, not both",
                )
                .with_field("object_path"));
            }
            (None, None) => {
                return Err(ToolError::invalid_arguments(
                    "Either object_id or object_path must be provided",
                )
                .with_field("object_id"));
            }
        };
        let version = arg_optional_string(args, "version")?;
        let session = ctx.scoped_session().await?;
        let document = ctx
            .platform
            .get_object(&session, &workspace_id, &locator, version.as_deref())
            .await?;
        let mut result = object_summary(&document.metadata);
        result["modified_at"] = json!(document.metadata.modified_at);
        if arg_bool(args, "include_definition", false)? {
            result["definition"] = document.definition;
        }
        Ok(result)
    })
}

fn list_my_instances<'a>(
    ctx: &'a ToolContext,
    _args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let instances = ctx.platform.list_instances(&ctx.session).await?;
        let selected = ctx.session.instance.as_ref();
        let items: Vec<Value> = instances
            .iter()
            .map(|instance| {
                json!({
                    "org_id": instance.org_id,
                    "display_name": instance.display_name,
                    "hub_url": instance.hub_url,
                    "selected": selected.is_some_and(|s| s.org_id == instance.org_id),
                })
            })
            .collect();
        Ok(json!({ "count": items.len(), "instances": items }))
    })
}

fn select_instance<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let wanted = required_string(args, "instance")?;
        let instances = ctx.platform.list_instances(&ctx.session).await?;
        let found = instances
            .iter()
            .find(|i| i.org_id == wanted)
            .or_else(|| {
                instances
                    .iter()
                    .find(|i| i.display_name.eq_ignore_ascii_case(&wanted))
            })
            .cloned();
        let Some(instance) = found else {
            let available: Vec<&str> = instances.iter().map(|i| i.display_name.as_str()).collect();
            return Err(ToolError::invalid_arguments(format!(
                "No instance matches '{wanted}'"
            ))
            .with_field("instance")
            .with_details(json!({ "available": available })));
        };
        let session = ctx.select_instance(instance).await?;
        Ok(json!({ "selected": session.instance }))
    })
}
