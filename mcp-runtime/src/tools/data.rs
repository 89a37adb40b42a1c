//! Local CSV discovery, preview and import into structured objects.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use evo_core::error::ErrorKind;
use evo_core::objects::{ObjectMeta, TargetKind};
use evo_core::plan::PlanOptions;
use evo_core::tabular::{Table, map_headers, parse_csv, parse_f64};
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use walkdir::WalkDir;

use super::to_json;
use crate::args::{arg_bool, arg_optional_string, arg_string_map, arg_u64, required_string};
use crate::config::ToolCategory;
use crate::dispatcher::ToolContext;
use crate::error::ToolError;
use crate::import::{ImportRequest, run_import};
use crate::registry::{ParamDef, ParamType, ToolDescriptor};

const TARGET_KINDS: &[&str] = &[
    "pointset",
    "line_segments",
    "downhole_collection",
    "downhole_intervals",
];
const MAX_SCAN_DEPTH: usize = 8;
const MAX_PREVIEW_ROWS: u64 = 50;

pub(super) fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_local_data_files",
            description: "List data files under the local data directory whose names match a pattern such as *.csv.",
            category: ToolCategory::Data,
            read_only: true,
            params: vec![
                ParamDef::required("file_pattern", ParamType::String, "File name pattern; * and ? wildcards")
                    .with_default(json!("*.csv")),
                ParamDef::optional(
                    "subdirectory",
                    ParamType::String,
                    "Directory below the data directory to search",
                ),
            ],
            handler: list_local_data_files,
        },
        ToolDescriptor {
            name: "preview_csv_file",
            description: "Show a CSV file's headers, row count, first rows, inferred column types and how its columns would map onto each target kind.",
            category: ToolCategory::Data,
            read_only: true,
            params: vec![
                ParamDef::required("file_path", ParamType::String, "Path relative to the data directory"),
                ParamDef::required("max_rows", ParamType::Int, "Rows to include in the preview")
                    .with_default(json!(5)),
            ],
            handler: preview_csv_file,
        },
        ToolDescriptor {
            name: "import_csv",
            description: "Validate CSV rows and create structured geoscience objects from them. Run with dry_run=true first to see per-row validation results without committing anything.",
            category: ToolCategory::Data,
            read_only: false,
            params: vec![
                ParamDef::required("workspace_id", ParamType::String, "Workspace to create objects in"),
                ParamDef::required("target_kind", ParamType::Enum(TARGET_KINDS), "Object kind to build"),
                ParamDef::required(
                    "object_path",
                    ParamType::String,
                    "Object path, e.g. survey/collars.json; with group_by, one object per group below it",
                ),
                ParamDef::optional("csv_text", ParamType::String, "Inline CSV text with a header row"),
                ParamDef::optional("csv_file", ParamType::String, "CSV file relative to the data directory"),
                ParamDef::optional(
                    "columns",
                    ParamType::StringMap,
                    "Field name to CSV header overrides, e.g. {\"x\": \"Easting\"}",
                ),
                ParamDef::optional("group_by", ParamType::String, "Column whose values split rows into objects"),
                ParamDef::optional("object_name", ParamType::String, "Object name; defaults to the file name of object_path"),
                ParamDef::optional("description", ParamType::String, "Object description"),
                ParamDef::optional(
                    "coordinate_reference_system",
                    ParamType::String,
                    "EPSG code (e.g. EPSG:32750) or WKT",
                ),
                ParamDef::optional("tags", ParamType::StringMap, "Tags attached to every object"),
                ParamDef::required("dry_run", ParamType::Bool, "Validate only; create nothing")
                    .with_default(json!(false)),
            ],
            handler: import_csv,
        },
    ]
}

fn list_local_data_files<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let pattern = arg_optional_string(args, "file_pattern")?.unwrap_or_else(|| "*.csv".to_string());
        let root = data_root(ctx)?;
        let search_dir = match arg_optional_string(args, "subdirectory")? {
            Some(sub) => resolve_within(&root, &sub, "subdirectory")?,
            None => root.clone(),
        };
        if !search_dir.is_dir() {
            return Err(ToolError::invalid_arguments(format!(
                "'{}' is not a directory",
                search_dir.display()
            ))
            .with_field("subdirectory"));
        }

        let scan_root = root.clone();
        let scan_pattern = pattern.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut found = scan_dir(&scan_root, &search_dir, &scan_pattern);
            found.sort_by(|a, b| a.0.cmp(&b.0));
            found
        })
        .await
        .map_err(|e| ToolError::internal(format!("file scan failed: {e}")))?;

        let items: Vec<Value> = files
            .into_iter()
            .map(|(path, size)| json!({ "path": path, "size_bytes": size }))
            .collect();
        Ok(json!({
            "data_dir": root.display().to_string(),
            "pattern": pattern,
            "count": items.len(),
            "files": items,
        }))
    })
}

fn preview_csv_file<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let file_path = required_string(args, "file_path")?;
        let max_rows = arg_u64(args, "max_rows", 5)?.min(MAX_PREVIEW_ROWS) as usize;
        let text = read_data_file(ctx, &file_path, "file_path").await?;
        let table = parse_table(&text, "file_path")?;
        Ok(preview(&file_path, &table, max_rows))
    })
}

fn import_csv<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        let workspace_id = required_string(args, "workspace_id")?;
        let target_kind: TargetKind = required_string(args, "target_kind")?
            .parse()
            .map_err(|e: evo_core::objects::UnknownTargetKind| {
                ToolError::invalid_arguments(e.to_string()).with_field("target_kind")
            })?;
        let dry_run = arg_bool(args, "dry_run", false)?;

        let (text, source_field) = match (
            arg_optional_string(args, "csv_text")?,
            arg_optional_string(args, "csv_file")?,
        ) {
            (Some(text), None) => (text, "csv_text"),
            (None, Some(file)) => (read_data_file(ctx, &file, "csv_file").await?, "csv_file"),
            (Some(_), Some(_)) => {
                return Err(ToolError::invalid_arguments(
                    "Provide either csv_text or csv_file, not both",
                )
                .with_field("csv_file"));
            }
            (None, None) => {
                return Err(ToolError::invalid_arguments(
                    "Either csv_text or csv_file must be provided",
                )
                .with_field("csv_text"));
            }
        };
        let table = parse_table(&text, source_field)?;

        let request = ImportRequest {
            workspace_id,
            target_kind,
            options: PlanOptions {
                object_path: required_string(args, "object_path")?,
                columns: arg_string_map(args, "columns")?,
                group_by: arg_optional_string(args, "group_by")?,
                meta: ObjectMeta {
                    name: arg_optional_string(args, "object_name")?.unwrap_or_default(),
                    description: arg_optional_string(args, "description")?,
                    coordinate_reference_system: arg_optional_string(
                        args,
                        "coordinate_reference_system",
                    )?,
                    tags: arg_string_map(args, "tags")?,
                },
            },
            dry_run,
            max_parallel: ctx.settings.import_max_parallel,
        };

        let session = if dry_run {
            ctx.session.clone()
        } else {
            ctx.scoped_session().await?
        };
        let report = run_import(ctx.platform.as_ref(), &session, &table, &request).await?;
        to_json(&report)
    })
}

fn data_root(ctx: &ToolContext) -> Result<PathBuf, ToolError> {
    match &ctx.settings.local_data_dir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().map_err(|e| {
            ToolError::new(
                ErrorKind::ConfigError,
                format!("cannot determine the working directory: {e}"),
            )
            .with_docs_hint("Set EVO_LOCAL_DATA_DIR to the directory holding your data files.")
        }),
    }
}

/// Join `relative` onto `root`, refusing absolute paths and `..` segments.
fn resolve_within(root: &Path, relative: &str, field: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(relative);
    let escapes = candidate.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ToolError::invalid_arguments(format!(
            "'{relative}' must be a path relative to the data directory without '..'"
        ))
        .with_field(field));
    }
    Ok(root.join(candidate))
}

async fn read_data_file(ctx: &ToolContext, relative: &str, field: &str) -> Result<String, ToolError> {
    let path = resolve_within(&data_root(ctx)?, relative, field)?;
    tokio::fs::read_to_string(&path).await.map_err(|e| {
        ToolError::invalid_arguments(format!("cannot read '{}': {e}", path.display()))
            .with_field(field)
            .with_docs_hint("Call list_local_data_files to see the available files.")
    })
}

fn parse_table(text: &str, field: &str) -> Result<Table, ToolError> {
    parse_csv(text)
        .map_err(|e| ToolError::new(ErrorKind::ValidationError, e.to_string()).with_field(field))
}

/// Files under `dir` whose name matches `pattern`, as `/`-separated paths
/// relative to `root` with their size. Hidden entries are skipped.
fn scan_dir(root: &Path, dir: &Path, pattern: &str) -> Vec<(String, u64)> {
    WalkDir::new(dir)
        .max_depth(MAX_SCAN_DEPTH + 1)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| wildcard_match(pattern, &entry.file_name().to_string_lossy()))
        .filter_map(|entry| {
            let size = entry.metadata().ok()?.len();
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            Some((relative, size))
        })
        .collect()
}

/// Case-insensitive match supporting `*` (any run) and `?` (one character).
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, n));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            n = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

fn preview(file_path: &str, table: &Table, max_rows: usize) -> Value {
    let rows: Vec<Value> = table
        .rows
        .iter()
        .take(max_rows)
        .map(|row| {
            let record: Map<String, Value> = table
                .headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), json!(row.cells.get(i).cloned().unwrap_or_default())))
                .collect();
            Value::Object(record)
        })
        .collect();

    let column_types: BTreeMap<&str, &str> = table
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), infer_column_type(table, i)))
        .collect();

    let mut mappings = Map::new();
    for kind in TargetKind::ALL {
        let entry = match map_headers(&table.headers, kind.schema(), &BTreeMap::new(), &[]) {
            Ok(mapping) => {
                let bound: BTreeMap<&str, &str> = mapping
                    .bindings
                    .iter()
                    .filter_map(|b| b.column.as_deref().map(|c| (b.field, c)))
                    .collect();
                let attributes: Vec<&str> = mapping
                    .attribute_columns
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect();
                let missing = mapping.unbound_required();
                json!({
                    "ready": missing.is_empty(),
                    "bound": bound,
                    "missing_required": missing,
                    "attribute_columns": attributes,
                })
            }
            Err(err) => json!({ "ready": false, "error": err.to_string() }),
        };
        mappings.insert(kind.as_str().to_string(), entry);
    }

    json!({
        "file_path": file_path,
        "headers": table.headers,
        "row_count": table.rows.len(),
        "preview_rows": rows,
        "column_types": column_types,
        "target_mappings": mappings,
    })
}

fn infer_column_type(table: &Table, column: usize) -> &'static str {
    let mut seen = false;
    for row in &table.rows {
        match row.cells.get(column).map(String::as_str) {
            None | Some("") => {}
            Some(cell) if parse_f64(cell).is_some() => seen = true,
            Some(_) => return "text",
        }
    }
    if seen { "numeric" } else { "empty" }
}
