//! Pure half of the import pipeline: turns a parsed table into the set of
//! objects to submit and a verdict for every input row. Nothing here talks to
//! the platform.

use std::collections::{BTreeMap, HashMap};

use crate::objects::{
    DownholeCollection, DownholeIntervals, GeoscienceObject, LineSegments, ObjectMeta, Pointset,
    StructuredObject, TargetKind, ValidRow, ValidationError, build_attributes,
};
use crate::tabular::{HeaderMapping, MappedRow, MappingError, Table, map_headers};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("object_path must not be empty")]
    EmptyObjectPath,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanOptions {
    pub object_path: String,
    /// Field name → header name overrides.
    pub columns: BTreeMap<String, String>,
    /// Header whose distinct values split rows into separate objects.
    pub group_by: Option<String>,
    pub meta: ObjectMeta,
}

/// An object ready for submission and the rows that make it up.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedObject {
    pub path: String,
    pub group: Option<String>,
    pub rows: Vec<usize>,
    pub object: GeoscienceObject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowPlan {
    /// Row belongs to `objects[object]` of the plan.
    Accepted { object: usize },
    Rejected(Vec<ValidationError>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportPlan {
    pub target_kind: TargetKind,
    pub mapping: HeaderMapping,
    pub objects: Vec<PlannedObject>,
    /// One entry per data row, in input order.
    pub rows: Vec<RowPlan>,
}

impl ImportPlan {
    pub fn rejected_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r, RowPlan::Rejected(_)))
            .count()
    }
}

pub fn plan_import(
    table: &Table,
    target_kind: TargetKind,
    options: &PlanOptions,
) -> Result<ImportPlan, PlanError> {
    if options.object_path.trim().is_empty() {
        return Err(PlanError::EmptyObjectPath);
    }
    let group_column = match &options.group_by {
        Some(name) => Some(
            table
                .column_index(name)
                .ok_or_else(|| MappingError::UnknownGroupColumn(name.clone()))?,
        ),
        None => None,
    };
    let excluded: Vec<String> = options.group_by.iter().cloned().collect();
    let mapping = map_headers(&table.headers, target_kind.schema(), &options.columns, &excluded)?;

    let (objects, rows) = match target_kind {
        TargetKind::Pointset => plan_kind::<Pointset>(table, &mapping, group_column, options),
        TargetKind::LineSegments => plan_kind::<LineSegments>(table, &mapping, group_column, options),
        TargetKind::DownholeCollection => {
            plan_kind::<DownholeCollection>(table, &mapping, group_column, options)
        }
        TargetKind::DownholeIntervals => {
            plan_kind::<DownholeIntervals>(table, &mapping, group_column, options)
        }
    };

    Ok(ImportPlan {
        target_kind,
        mapping,
        objects,
        rows,
    })
}

fn plan_kind<T>(
    table: &Table,
    mapping: &HeaderMapping,
    group_column: Option<usize>,
    options: &PlanOptions,
) -> (Vec<PlannedObject>, Vec<RowPlan>)
where
    T: StructuredObject + Into<GeoscienceObject>,
{
    let mut verdicts: Vec<Option<RowPlan>> = vec![None; table.rows.len()];
    // First-seen order in `groups`; `group_slots` maps a group value to its slot.
    let mut groups: Vec<(Option<String>, Vec<ValidRow<T::Record>>)> = Vec::new();
    let mut group_slots: HashMap<Option<String>, usize> = HashMap::new();

    for raw in &table.rows {
        if let Some(err) = &raw.parse_error {
            verdicts[raw.index] = Some(RowPlan::Rejected(vec![ValidationError::new(format!(
                "row could not be read: {err}"
            ))]));
            continue;
        }
        let group = match group_column {
            Some(col) => match raw.cells.get(col).filter(|c| !c.is_empty()) {
                Some(value) => Some(value.clone()),
                None => {
                    let column = options.group_by.clone().unwrap_or_default();
                    verdicts[raw.index] = Some(RowPlan::Rejected(vec![ValidationError::field(
                        &column,
                        format!("missing value in group_by column '{column}'"),
                    )]));
                    continue;
                }
            },
            None => None,
        };
        let row = MappedRow::new(raw.index, mapping, &raw.cells);
        match T::validate_row(&row) {
            Ok(record) => {
                let valid = ValidRow {
                    index: raw.index,
                    record,
                    attribute_cells: row.attribute_values(),
                };
                match group_slots.get(&group) {
                    Some(&slot) => groups[slot].1.push(valid),
                    None => {
                        group_slots.insert(group.clone(), groups.len());
                        groups.push((group, vec![valid]));
                    }
                }
            }
            Err(err) => verdicts[raw.index] = Some(RowPlan::Rejected(vec![err])),
        }
    }

    let attribute_names: Vec<String> = mapping
        .attribute_columns
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let mut objects = Vec::new();

    for (group, members) in groups {
        let mut failed: BTreeMap<usize, Vec<ValidationError>> = BTreeMap::new();
        for (index, err) in T::validate_collection(&members) {
            failed.entry(index).or_default().push(err);
        }
        let survivors: Vec<ValidRow<T::Record>> = members
            .into_iter()
            .filter(|m| !failed.contains_key(&m.index))
            .collect();
        for (index, errors) in failed {
            verdicts[index] = Some(RowPlan::Rejected(errors));
        }
        if survivors.is_empty() {
            continue;
        }

        let object_index = objects.len();
        let row_indices: Vec<usize> = survivors.iter().map(|s| s.index).collect();
        for &index in &row_indices {
            verdicts[index] = Some(RowPlan::Accepted {
                object: object_index,
            });
        }
        let cells: Vec<Vec<String>> = survivors.iter().map(|s| s.attribute_cells.clone()).collect();
        let attributes = build_attributes(&attribute_names, &cells);
        let path = object_path_for(&options.object_path, group.as_deref());
        let meta = meta_for(&options.meta, &path, group.as_deref());
        objects.push(PlannedObject {
            path,
            group,
            rows: row_indices,
            object: T::assemble(meta, survivors, attributes).into(),
        });
    }

    let rows = verdicts
        .into_iter()
        .map(|v| {
            v.unwrap_or_else(|| {
                RowPlan::Rejected(vec![ValidationError::new("row was not assigned to any object")])
            })
        })
        .collect();
    (objects, rows)
}

/// `a/b/assays.json` + group `DH1` → `a/b/assays/DH1.json`.
pub fn object_path_for(base: &str, group: Option<&str>) -> String {
    let base = base.trim();
    let stem = base.strip_suffix(".json").unwrap_or(base);
    match group {
        None => format!("{stem}.json"),
        Some(value) => {
            let safe: String = value
                .chars()
                .map(|c| if c == '/' || c == '\\' { '_' } else { c })
                .collect();
            format!("{stem}/{safe}.json")
        }
    }
}

fn meta_for(base: &ObjectMeta, path: &str, group: Option<&str>) -> ObjectMeta {
    let mut meta = base.clone();
    if meta.name.trim().is_empty() {
        let file = path.rsplit('/').next().unwrap_or(path);
        meta.name = file.strip_suffix(".json").unwrap_or(file).to_string();
    } else if let Some(value) = group {
        meta.name = format!("{} - {value}", meta.name);
    }
    meta
}
