//! Import pipeline against an in-memory platform: partial success, ordering
//! under parallel submission, and batch halting.

mod common;

use evo_core::error::ErrorKind;
use evo_core::{PlanOptions, TargetKind, parse_csv};
use evo_mcp_runtime::import::{ImportReport, ImportRequest, ObjectStatus, RowOutcome, run_import};
use evo_mcp_runtime::platform::RemoteCategory;
use evo_mcp_runtime::session::Session;

use common::FakePlatform;

const ZONED_POINTS: &str = "\
zone,x,y,z
a,0,0,0
b,1,1,1
c,2,2,2
d,3,3,3
a,4,4,4
";

fn session() -> Session {
    Session {
        access_token: "token".into(),
        refresh_token: None,
        expires_at: None,
        instance: Some(common::instance("org-1", "Acme Mining")),
    }
}

fn request(kind: TargetKind, path: &str, group_by: Option<&str>, max_parallel: usize) -> ImportRequest {
    ImportRequest {
        workspace_id: "ws-1".into(),
        target_kind: kind,
        options: PlanOptions {
            object_path: path.into(),
            group_by: group_by.map(str::to_string),
            ..PlanOptions::default()
        },
        dry_run: false,
        max_parallel,
    }
}

async fn import(platform: &FakePlatform, csv: &str, request: &ImportRequest) -> ImportReport {
    let table = parse_csv(csv).unwrap();
    run_import(platform, &session(), &table, request).await.unwrap()
}

fn statuses(report: &ImportReport) -> Vec<&'static str> {
    report
        .rows
        .iter()
        .map(|row| match row {
            RowOutcome::Created { .. } => "created",
            RowOutcome::ValidationFailed { .. } => "validation_failed",
            RowOutcome::UploadFailed { .. } => "upload_failed",
            RowOutcome::NotAttempted { .. } => "not_attempted",
            RowOutcome::Validated { .. } => "validated",
        })
        .collect()
}

#[tokio::test]
async fn malformed_row_fails_alone() {
    let platform = FakePlatform::default();
    let csv = "x,y,z,grade\n1,1,1,0.2\n2,2,2,0.4\n3,3,,0.6\n4,4,4,0.8\n5,5,5,1.0\n";
    let report = import(&platform, csv, &request(TargetKind::Pointset, "pts.json", None, 4)).await;

    assert_eq!(report.total_rows, 5);
    assert_eq!(
        statuses(&report),
        vec!["created", "created", "validation_failed", "created", "created"]
    );
    match &report.rows[2] {
        RowOutcome::ValidationFailed { row, errors } => {
            assert_eq!(*row, 2);
            assert_eq!(errors[0].field.as_deref(), Some("z"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    for (index, outcome) in report.rows.iter().enumerate() {
        assert_eq!(outcome.row(), index);
    }
    assert_eq!(report.created, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.objects[0].element_count, 4);
    assert_eq!(platform.create_calls(), 1);
}

#[tokio::test]
async fn report_keeps_input_order_when_submissions_finish_out_of_order() {
    let platform = FakePlatform::default()
        .with_delay("zones/a.json", 120)
        .with_delay("zones/b.json", 60)
        .with_delay("zones/c.json", 20);
    let report = import(
        &platform,
        ZONED_POINTS,
        &request(TargetKind::Pointset, "zones.json", Some("zone"), 4),
    )
    .await;

    assert_eq!(
        platform.completed_paths(),
        vec!["zones/d.json", "zones/c.json", "zones/b.json", "zones/a.json"]
    );
    let object_paths: Vec<&str> = report.objects.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(
        object_paths,
        vec!["zones/a.json", "zones/b.json", "zones/c.json", "zones/d.json"]
    );
    let row_paths: Vec<String> = report
        .rows
        .iter()
        .map(|row| match row {
            RowOutcome::Created { path, .. } => path.clone(),
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();
    assert_eq!(
        row_paths,
        vec!["zones/a.json", "zones/b.json", "zones/c.json", "zones/d.json", "zones/a.json"]
    );
}

#[tokio::test]
async fn transient_failure_halts_objects_not_yet_started() {
    let platform = FakePlatform::default().failing("zones/b.json", RemoteCategory::Transient);
    let report = import(
        &platform,
        ZONED_POINTS,
        &request(TargetKind::Pointset, "zones.json", Some("zone"), 1),
    )
    .await;

    assert_eq!(
        statuses(&report),
        vec!["created", "upload_failed", "not_attempted", "not_attempted", "created"]
    );
    assert!(matches!(
        &report.rows[1],
        RowOutcome::UploadFailed { kind: ErrorKind::RemoteTransient, .. }
    ));
    assert!(matches!(report.objects[2].status, ObjectStatus::NotAttempted { .. }));
    assert_eq!(report.not_attempted, 2);
    assert_eq!(platform.create_calls(), 2);
}

#[tokio::test]
async fn permanent_failure_only_affects_its_own_object() {
    let platform = FakePlatform::default().failing("zones/b.json", RemoteCategory::Conflict);
    let report = import(
        &platform,
        ZONED_POINTS,
        &request(TargetKind::Pointset, "zones.json", Some("zone"), 1),
    )
    .await;

    assert_eq!(
        statuses(&report),
        vec!["created", "upload_failed", "created", "created", "created"]
    );
    assert!(matches!(
        &report.rows[1],
        RowOutcome::UploadFailed { kind: ErrorKind::RemotePermanent, .. }
    ));
    assert_eq!(report.not_attempted, 0);
    assert_eq!(platform.create_calls(), 4);
}

#[tokio::test]
async fn overlapping_and_inverted_intervals_are_rejected_by_row() {
    let csv = "\
hole_id,from,to,start_x,start_y,start_z,end_x,end_y,end_z,lith
DH1,0,10,0,0,0,0,0,-10,granite
DH1,8,12,0,0,-8,0,0,-12,granite
DH1,12,20,0,0,-12,0,0,-20,schist
DH2,5,5,10,0,-5,10,0,-5,schist
DH2,0,4,10,0,0,10,0,-4,granite
";
    let platform = FakePlatform::default();
    let report = import(
        &platform,
        csv,
        &request(TargetKind::DownholeIntervals, "logs/lith.json", None, 2),
    )
    .await;

    assert_eq!(
        statuses(&report),
        vec!["validation_failed", "validation_failed", "created", "validation_failed", "created"]
    );
    match (&report.rows[0], &report.rows[1]) {
        (
            RowOutcome::ValidationFailed { errors: first, .. },
            RowOutcome::ValidationFailed { errors: second, .. },
        ) => {
            assert_eq!(first[0].related_rows, vec![1]);
            assert_eq!(second[0].related_rows, vec![0]);
        }
        other => panic!("unexpected outcomes {other:?}"),
    }
    assert_eq!(report.objects.len(), 1);
    assert_eq!(report.objects[0].element_count, 2);
}

#[tokio::test]
async fn dry_run_never_submits() {
    let platform = FakePlatform::default();
    let mut request = request(TargetKind::Pointset, "zones.json", Some("zone"), 4);
    request.dry_run = true;
    let report = import(&platform, ZONED_POINTS, &request).await;

    assert!(report.dry_run);
    assert!(statuses(&report).iter().all(|s| *s == "validated"));
    assert_eq!(report.created, 0);
    assert_eq!(platform.create_calls(), 0);
}

#[tokio::test]
async fn unmapped_required_column_fails_every_row_without_submitting() {
    let platform = FakePlatform::default();
    let csv = "line,seq,x,y,z\nL1,1,0,0,0\nL1,2,1,1,1\n";
    let report = import(
        &platform,
        csv,
        &request(TargetKind::LineSegments, "faults.json", None, 2),
    )
    .await;

    assert_eq!(statuses(&report), vec!["validation_failed", "validation_failed"]);
    assert!(report.objects.is_empty());
    assert_eq!(platform.create_calls(), 0);
}
