//! Dispatcher behaviour: filter enforcement, argument validation, instance
//! scoping and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use evo_core::error::ErrorKind;
use evo_mcp_runtime::config::{ToolCategory, ToolFilter};
use evo_mcp_runtime::dispatcher::ToolContext;
use evo_mcp_runtime::error::ToolError;
use evo_mcp_runtime::registry::{ToolDescriptor, ToolRegistry};
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use common::{FakePlatform, args, dispatcher, dispatcher_with};

fn visible_names(filter: ToolFilter) -> Vec<&'static str> {
    let dispatcher = dispatcher(filter, Arc::new(FakePlatform::default()));
    dispatcher.visible_tools().iter().map(|t| t.name).collect()
}

#[test]
fn data_filter_lists_data_tools_but_not_admin_tools() {
    let names = visible_names(ToolFilter::Data);
    assert!(names.contains(&"import_csv"));
    assert!(names.contains(&"list_workspaces"));
    assert!(!names.contains(&"create_workspace"));
    assert!(!names.contains(&"workspace_duplicate_workspace"));
}

#[test]
fn every_filter_lists_tools_in_registration_order() {
    for filter in [ToolFilter::Admin, ToolFilter::Data, ToolFilter::All] {
        assert_eq!(visible_names(filter), visible_names(filter));
    }
    let all = visible_names(ToolFilter::All);
    assert_eq!(all.len(), 15);
    assert_eq!(all.first(), Some(&"workspace_health_check"));
    assert_eq!(all.last(), Some(&"import_csv"));
}

#[tokio::test]
async fn filtered_out_tool_is_indistinguishable_from_unknown_tool() {
    let dispatcher = dispatcher(ToolFilter::Data, Arc::new(FakePlatform::default()));

    let hidden = dispatcher
        .dispatch("create_workspace", args(json!({ "name": "x" })), CancellationToken::new())
        .await
        .unwrap_err();
    let missing = dispatcher
        .dispatch("no_such_tool", args(json!({ "name": "x" })), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(hidden.kind, ErrorKind::UnknownTool);
    assert_eq!(missing.kind, ErrorKind::UnknownTool);
    assert_eq!(hidden.docs_hint, missing.docs_hint);
    assert_eq!(
        hidden.message.replace("create_workspace", "?"),
        missing.message.replace("no_such_tool", "?")
    );
}

#[tokio::test]
async fn invalid_arguments_name_the_offending_field() {
    let dispatcher = dispatcher(ToolFilter::All, Arc::new(FakePlatform::default()));

    let err = dispatcher
        .dispatch("list_objects", Map::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArguments);
    assert_eq!(err.field.as_deref(), Some("workspace_id"));

    let err = dispatcher
        .dispatch(
            "list_workspaces",
            args(json!({ "limit": "many" })),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.field.as_deref(), Some("limit"));

    let err = dispatcher
        .dispatch(
            "list_workspaces",
            args(json!({ "colour": "blue" })),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.field.as_deref(), Some("colour"));
}

#[tokio::test]
async fn first_instance_is_selected_when_none_is_chosen() {
    let platform = Arc::new(FakePlatform::default());
    let dispatcher = dispatcher(ToolFilter::Admin, platform.clone());

    let result = dispatcher
        .dispatch("list_workspaces", Map::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result["count"], 2);

    let session = dispatcher.sessions().current().await.unwrap();
    assert_eq!(session.instance.unwrap().org_id, "org-1");

    dispatcher
        .dispatch("list_workspaces", Map::new(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(platform.instance_lookups(), 1);
}

#[tokio::test]
async fn select_instance_accepts_display_name_and_lists_choices_on_miss() {
    let dispatcher = dispatcher(ToolFilter::All, Arc::new(FakePlatform::default()));

    dispatcher
        .dispatch(
            "select_instance",
            args(json!({ "instance": "beta survey" })),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let session = dispatcher.sessions().current().await.unwrap();
    assert_eq!(session.instance.unwrap().org_id, "org-2");

    let err = dispatcher
        .dispatch(
            "select_instance",
            args(json!({ "instance": "gamma" })),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArguments);
    assert!(err.details.is_some());
}

#[tokio::test]
async fn dry_run_import_validates_without_touching_the_platform() {
    let platform = Arc::new(FakePlatform::default());
    let dispatcher = dispatcher(ToolFilter::Data, platform.clone());

    let report = dispatcher
        .dispatch(
            "import_csv",
            args(json!({
                "workspace_id": "ws-1",
                "target_kind": "pointset",
                "object_path": "samples/points.json",
                "csv_text": "X,Y,Z,grade\n1,2,3,0.5\n4,,6,0.7\n",
                "dry_run": true,
            })),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report["total_rows"], 2);
    assert_eq!(report["rows"][0]["status"], "validated");
    assert_eq!(report["rows"][1]["status"], "validation_failed");
    assert_eq!(platform.create_calls(), 0);
    assert_eq!(platform.instance_lookups(), 0);
}

#[tokio::test]
async fn committed_import_reports_created_objects() {
    let platform = Arc::new(FakePlatform::default());
    let dispatcher = dispatcher(ToolFilter::Data, platform.clone());

    let report = dispatcher
        .dispatch(
            "import_csv",
            args(json!({
                "workspace_id": "ws-1",
                "target_kind": "pointset",
                "object_path": "samples/points",
                "csv_text": "east,north,elev\n1,2,3\n4,5,6\n",
                "columns": { "x": "east", "y": "north", "z": "elev" },
            })),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report["created"], 2);
    assert_eq!(report["rows"][1]["path"], "samples/points.json");
    assert_eq!(platform.completed_paths(), vec!["samples/points.json"]);
}

#[tokio::test]
async fn import_rejects_both_csv_sources() {
    let dispatcher = dispatcher(ToolFilter::Data, Arc::new(FakePlatform::default()));
    let err = dispatcher
        .dispatch(
            "import_csv",
            args(json!({
                "workspace_id": "ws-1",
                "target_kind": "pointset",
                "object_path": "p.json",
                "csv_text": "x,y,z\n1,2,3\n",
                "csv_file": "p.csv",
            })),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArguments);
}

fn sleeping_tool<'a>(
    _ctx: &'a ToolContext,
    _args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!({ "done": true }))
    })
}

fn slow_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (name, read_only) in [("slow_write", false), ("slow_read", true)] {
        registry
            .register(ToolDescriptor {
                name,
                description: "Sleeps",
                category: ToolCategory::Admin,
                read_only,
                params: Vec::new(),
                handler: sleeping_tool,
            })
            .unwrap();
    }
    registry
}

async fn cancel_after_start(tool: &str) -> ToolError {
    let dispatcher = dispatcher_with(
        slow_registry(),
        ToolFilter::All,
        Arc::new(FakePlatform::default()),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    dispatcher.dispatch(tool, Map::new(), cancel).await.unwrap_err()
}

#[tokio::test]
async fn cancelled_mutation_is_flagged_as_possibly_applied() {
    let err = cancel_after_start("slow_write").await;
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(err.details.unwrap()["possibly_partially_applied"], true);
}

#[tokio::test]
async fn cancelled_read_is_a_clean_abort() {
    let err = cancel_after_start("slow_read").await;
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(err.details.unwrap()["possibly_partially_applied"], false);
}

#[tokio::test]
async fn mutation_cancelled_before_it_starts_is_a_clean_abort() {
    let dispatcher = dispatcher_with(
        slow_registry(),
        ToolFilter::All,
        Arc::new(FakePlatform::default()),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = dispatcher
        .dispatch("slow_write", Map::new(), cancel)
        .await
        .unwrap_err();
    assert_eq!(err.details.unwrap()["possibly_partially_applied"], false);
}
