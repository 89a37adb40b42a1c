//! Committing half of the import pipeline: submits planned objects and
//! reports an outcome for every input row.

use std::sync::atomic::{AtomicBool, Ordering};

use evo_core::error::ErrorKind;
use evo_core::objects::{TargetKind, ValidationError};
use evo_core::plan::{ImportPlan, PlanError, PlanOptions, PlannedObject, RowPlan, plan_import};
use evo_core::tabular::{HeaderMapping, Table};
use futures::StreamExt;
use serde::Serialize;

use crate::error::ToolError;
use crate::platform::{ObjectReference, PlatformApi, PlatformError};
use crate::session::Session;

const HALT_REASON: &str = "batch halted after a transient submission failure";

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub workspace_id: String,
    pub target_kind: TargetKind,
    pub options: PlanOptions,
    pub dry_run: bool,
    pub max_parallel: usize,
}

/// Final state of one planned object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObjectStatus {
    Created {
        object_id: String,
        version_id: Option<String>,
    },
    UploadFailed {
        kind: ErrorKind,
        message: String,
    },
    NotAttempted {
        reason: String,
    },
    Validated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectOutcome {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub name: String,
    pub row_count: usize,
    pub element_count: usize,
    #[serde(flatten)]
    pub status: ObjectStatus,
}

/// Outcome of one data row. `row` is the zero-based data row index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowOutcome {
    Created {
        row: usize,
        object_id: String,
        path: String,
        version_id: Option<String>,
    },
    ValidationFailed {
        row: usize,
        errors: Vec<ValidationError>,
    },
    UploadFailed {
        row: usize,
        path: String,
        kind: ErrorKind,
        message: String,
    },
    NotAttempted {
        row: usize,
        path: String,
        reason: String,
    },
    Validated {
        row: usize,
        path: String,
    },
}

impl RowOutcome {
    pub fn row(&self) -> usize {
        match self {
            RowOutcome::Created { row, .. }
            | RowOutcome::ValidationFailed { row, .. }
            | RowOutcome::UploadFailed { row, .. }
            | RowOutcome::NotAttempted { row, .. }
            | RowOutcome::Validated { row, .. } => *row,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub target_kind: TargetKind,
    pub dry_run: bool,
    pub total_rows: usize,
    pub created: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub mapping: HeaderMapping,
    pub objects: Vec<ObjectOutcome>,
    pub rows: Vec<RowOutcome>,
}

impl From<PlanError> for ToolError {
    fn from(err: PlanError) -> Self {
        let field = match &err {
            PlanError::EmptyObjectPath => "object_path",
            PlanError::Mapping(evo_core::tabular::MappingError::UnknownGroupColumn(_)) => "group_by",
            PlanError::Mapping(_) => "columns",
        };
        ToolError::invalid_arguments(err.to_string()).with_field(field)
    }
}

/// Plan `table`, then submit every object unless `request.dry_run` is set.
///
/// Submissions run with at most `max_parallel` in flight and the report
/// keeps input order. A transient failure stops objects that have not started
/// yet; a permanent failure only affects the rows of that object. Nothing is
/// retried.
pub async fn run_import(
    platform: &dyn PlatformApi,
    session: &Session,
    table: &Table,
    request: &ImportRequest,
) -> Result<ImportReport, PlanError> {
    let plan = plan_import(table, request.target_kind, &request.options)?;
    tracing::info!(
        target_kind = %request.target_kind,
        rows = plan.rows.len(),
        objects = plan.objects.len(),
        rejected = plan.rejected_count(),
        dry_run = request.dry_run,
        "import planned"
    );

    let statuses = if request.dry_run {
        vec![ObjectStatus::Validated; plan.objects.len()]
    } else {
        submit_objects(platform, session, &plan, request).await
    };

    let report = build_report(plan, statuses, request.dry_run);
    tracing::info!(
        created = report.created,
        failed = report.failed,
        not_attempted = report.not_attempted,
        "import finished"
    );
    Ok(report)
}

async fn submit_objects(
    platform: &dyn PlatformApi,
    session: &Session,
    plan: &ImportPlan,
    request: &ImportRequest,
) -> Vec<ObjectStatus> {
    let halted = AtomicBool::new(false);
    // Futures are inert until the stream polls them, so the halt check in
    // each one runs only when its slot opens.
    let submissions: Vec<_> = plan
        .objects
        .iter()
        .map(|planned| submit_one(platform, session, &request.workspace_id, planned, &halted))
        .collect();
    futures::stream::iter(submissions)
        .buffered(request.max_parallel.max(1))
        .collect()
        .await
}

async fn submit_one(
    platform: &dyn PlatformApi,
    session: &Session,
    workspace_id: &str,
    planned: &PlannedObject,
    halted: &AtomicBool,
) -> ObjectStatus {
    if halted.load(Ordering::SeqCst) {
        return ObjectStatus::NotAttempted {
            reason: HALT_REASON.to_string(),
        };
    }
    let payload = planned.object.serialize_for_upload();
    match platform
        .create_object(session, workspace_id, &planned.path, &payload)
        .await
    {
        Ok(ObjectReference {
            object_id,
            version_id,
            ..
        }) => {
            tracing::debug!(path = %planned.path, %object_id, "object created");
            ObjectStatus::Created {
                object_id,
                version_id,
            }
        }
        Err(err) => {
            if err.is_transient() {
                halted.store(true, Ordering::SeqCst);
            }
            tracing::warn!(path = %planned.path, error = %err, "object submission failed");
            upload_failed(err)
        }
    }
}

fn upload_failed(err: PlatformError) -> ObjectStatus {
    let tool_err = ToolError::from(err);
    ObjectStatus::UploadFailed {
        kind: tool_err.kind,
        message: tool_err.message,
    }
}

fn build_report(plan: ImportPlan, statuses: Vec<ObjectStatus>, dry_run: bool) -> ImportReport {
    let rows: Vec<RowOutcome> = plan
        .rows
        .into_iter()
        .enumerate()
        .map(|(row, verdict)| match verdict {
            RowPlan::Rejected(errors) => RowOutcome::ValidationFailed { row, errors },
            RowPlan::Accepted { object } => {
                let path = plan.objects[object].path.clone();
                match &statuses[object] {
                    ObjectStatus::Created {
                        object_id,
                        version_id,
                    } => RowOutcome::Created {
                        row,
                        object_id: object_id.clone(),
                        path,
                        version_id: version_id.clone(),
                    },
                    ObjectStatus::UploadFailed { kind, message } => RowOutcome::UploadFailed {
                        row,
                        path,
                        kind: *kind,
                        message: message.clone(),
                    },
                    ObjectStatus::NotAttempted { reason } => RowOutcome::NotAttempted {
                        row,
                        path,
                        reason: reason.clone(),
                    },
                    ObjectStatus::Validated => RowOutcome::Validated { row, path },
                }
            }
        })
        .collect();

    let objects: Vec<ObjectOutcome> = plan
        .objects
        .iter()
        .zip(statuses)
        .map(|(planned, status)| ObjectOutcome {
            path: planned.path.clone(),
            group: planned.group.clone(),
            name: planned.object.meta().name.clone(),
            row_count: planned.rows.len(),
            element_count: planned.object.element_count(),
            status,
        })
        .collect();

    let count = |pred: fn(&RowOutcome) -> bool| rows.iter().filter(|r| pred(r)).count();
    ImportReport {
        target_kind: plan.target_kind,
        dry_run,
        total_rows: rows.len(),
        created: count(|r| matches!(r, RowOutcome::Created { .. })),
        failed: count(|r| {
            matches!(
                r,
                RowOutcome::ValidationFailed { .. } | RowOutcome::UploadFailed { .. }
            )
        }),
        not_attempted: count(|r| matches!(r, RowOutcome::NotAttempted { .. })),
        mapping: plan.mapping,
        objects,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evo_core::tabular::parse_csv;

    fn request(dry_run: bool) -> ImportRequest {
        ImportRequest {
            workspace_id: "ws".into(),
            target_kind: TargetKind::Pointset,
            options: PlanOptions {
                object_path: "survey/points.json".into(),
                ..PlanOptions::default()
            },
            dry_run,
            max_parallel: 2,
        }
    }

    #[test]
    fn report_counts_follow_row_outcomes() {
        let table = parse_csv("x,y,z,grade\n1,2,3,0.5\n4,oops,6,0.7\n7,8,9,0.9\n").unwrap();
        let plan = plan_import(&table, TargetKind::Pointset, &request(true).options).unwrap();
        let report = build_report(plan, vec![ObjectStatus::Validated], true);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 0);
        assert!(matches!(report.rows[1], RowOutcome::ValidationFailed { row: 1, .. }));
        assert!(matches!(&report.rows[2], RowOutcome::Validated { row: 2, path } if path == "survey/points.json"));
        assert_eq!(report.objects[0].element_count, 2);
    }

    #[test]
    fn row_outcomes_serialise_with_status_tag() {
        let value = serde_json::to_value(RowOutcome::NotAttempted {
            row: 4,
            path: "a.json".into(),
            reason: HALT_REASON.into(),
        })
        .unwrap();
        assert_eq!(value["status"], "not_attempted");
        assert_eq!(value["row"], 4);

        let object = serde_json::to_value(ObjectOutcome {
            path: "a.json".into(),
            group: None,
            name: "a".into(),
            row_count: 1,
            element_count: 1,
            status: ObjectStatus::UploadFailed {
                kind: ErrorKind::RemotePermanent,
                message: "conflict".into(),
            },
        })
        .unwrap();
        assert_eq!(object["status"], "upload_failed");
        assert_eq!(object["kind"], "remote_permanent");
        assert!(object.get("group").is_none());
    }

    #[test]
    fn plan_errors_name_the_offending_argument() {
        let err: ToolError = PlanError::EmptyObjectPath.into();
        assert_eq!(err.field.as_deref(), Some("object_path"));
        assert_eq!(err.kind, ErrorKind::InvalidArguments);
    }
}
