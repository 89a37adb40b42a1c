//! Structured geoscience object kinds accepted by the import pipeline.
//!
//! Each kind declares its field schema, validates individual rows, checks
//! invariants that only hold across a whole collection, and serializes the
//! assembled object into the platform's geoscience-object JSON document.

mod attributes;
mod downhole_collection;
mod downhole_intervals;
mod line_segments;
mod pointset;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tabular::MappedRow;

pub use attributes::{Attribute, AttributeValues, build_attributes};
pub use downhole_collection::{DownholeCollection, SurveyStation};
pub use downhole_intervals::{DownholeIntervals, Interval};
pub use line_segments::{LineSegments, LineVertex};
pub use pointset::{Point, Pointset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Pointset,
    LineSegments,
    DownholeCollection,
    DownholeIntervals,
}

impl TargetKind {
    pub const ALL: [TargetKind; 4] = [
        TargetKind::Pointset,
        TargetKind::LineSegments,
        TargetKind::DownholeCollection,
        TargetKind::DownholeIntervals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Pointset => "pointset",
            TargetKind::LineSegments => "line_segments",
            TargetKind::DownholeCollection => "downhole_collection",
            TargetKind::DownholeIntervals => "downhole_intervals",
        }
    }

    pub fn schema(self) -> &'static ObjectSchema {
        match self {
            TargetKind::Pointset => &pointset::SCHEMA,
            TargetKind::LineSegments => &line_segments::SCHEMA,
            TargetKind::DownholeCollection => &downhole_collection::SCHEMA,
            TargetKind::DownholeIntervals => &downhole_intervals::SCHEMA,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown target kind '{0}' (expected one of: pointset, line_segments, downhole_collection, downhole_intervals)")]
pub struct UnknownTargetKind(pub String);

impl FromStr for TargetKind {
    type Err = UnknownTargetKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TargetKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownTargetKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Float,
    Integer,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn required(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: false,
            description,
        }
    }
}

/// Field layout and platform schema id of one object kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObjectSchema {
    pub kind: TargetKind,
    pub schema_id: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

impl ObjectSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }
}

/// Why a row was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    /// Other rows involved in a cross-row violation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related_rows: Vec<usize>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
            related_rows: Vec::new(),
        }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            message: message.into(),
            related_rows: Vec::new(),
        }
    }

    pub fn with_related(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.related_rows.extend(rows);
        self
    }
}

/// Descriptive metadata shared by every object kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub coordinate_reference_system: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ObjectMeta {
    fn crs_value(&self) -> Value {
        let raw = match self.coordinate_reference_system.as_deref().map(str::trim) {
            None | Some("") => return json!("unspecified"),
            Some(raw) if raw.eq_ignore_ascii_case("unspecified") => return json!("unspecified"),
            Some(raw) => raw,
        };
        let code = raw
            .strip_prefix("EPSG:")
            .or_else(|| raw.strip_prefix("epsg:"))
            .unwrap_or(raw);
        match code.parse::<u32>() {
            Ok(epsg_code) => json!({ "epsg_code": epsg_code }),
            Err(_) => json!({ "ogc_wkt": raw }),
        }
    }

    /// Common top-level keys of every geoscience object document.
    fn base_document(&self, schema: &ObjectSchema, bounding_box: Value) -> Value {
        json!({
            "schema": schema.schema_id,
            "uuid": Value::Null,
            "name": self.name,
            "description": self.description,
            "tags": self.tags,
            "coordinate_reference_system": self.crs_value(),
            "bounding_box": bounding_box,
        })
    }
}

/// A row-validated record together with its attribute cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRow<R> {
    pub index: usize,
    pub record: R,
    pub attribute_cells: Vec<String>,
}

/// Behaviour shared by every importable object kind.
pub trait StructuredObject: Sized {
    type Record: Clone + fmt::Debug;

    const KIND: TargetKind;

    /// Validate one mapped row into a typed record.
    fn validate_row(row: &MappedRow<'_>) -> Result<Self::Record, ValidationError>;

    /// Check invariants spanning rows. Returns `(row index, error)` pairs for
    /// every offending row; rows absent from the result are accepted.
    fn validate_collection(_rows: &[ValidRow<Self::Record>]) -> Vec<(usize, ValidationError)> {
        Vec::new()
    }

    /// Assemble the object from rows that passed both validation stages.
    fn assemble(meta: ObjectMeta, rows: Vec<ValidRow<Self::Record>>, attributes: Vec<Attribute>) -> Self;

    fn meta(&self) -> &ObjectMeta;

    /// Number of logical elements (points, segments, holes, intervals).
    fn element_count(&self) -> usize;

    /// Platform JSON document for the object.
    fn serialize_for_upload(&self) -> Value;
}

/// Closed set of assembled objects.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoscienceObject {
    Pointset(Pointset),
    LineSegments(LineSegments),
    DownholeCollection(DownholeCollection),
    DownholeIntervals(DownholeIntervals),
}

impl GeoscienceObject {
    pub fn kind(&self) -> TargetKind {
        match self {
            GeoscienceObject::Pointset(_) => TargetKind::Pointset,
            GeoscienceObject::LineSegments(_) => TargetKind::LineSegments,
            GeoscienceObject::DownholeCollection(_) => TargetKind::DownholeCollection,
            GeoscienceObject::DownholeIntervals(_) => TargetKind::DownholeIntervals,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            GeoscienceObject::Pointset(o) => o.meta(),
            GeoscienceObject::LineSegments(o) => o.meta(),
            GeoscienceObject::DownholeCollection(o) => o.meta(),
            GeoscienceObject::DownholeIntervals(o) => o.meta(),
        }
    }

    pub fn element_count(&self) -> usize {
        match self {
            GeoscienceObject::Pointset(o) => o.element_count(),
            GeoscienceObject::LineSegments(o) => o.element_count(),
            GeoscienceObject::DownholeCollection(o) => o.element_count(),
            GeoscienceObject::DownholeIntervals(o) => o.element_count(),
        }
    }

    pub fn serialize_for_upload(&self) -> Value {
        match self {
            GeoscienceObject::Pointset(o) => o.serialize_for_upload(),
            GeoscienceObject::LineSegments(o) => o.serialize_for_upload(),
            GeoscienceObject::DownholeCollection(o) => o.serialize_for_upload(),
            GeoscienceObject::DownholeIntervals(o) => o.serialize_for_upload(),
        }
    }
}

impl From<Pointset> for GeoscienceObject {
    fn from(value: Pointset) -> Self {
        GeoscienceObject::Pointset(value)
    }
}

impl From<LineSegments> for GeoscienceObject {
    fn from(value: LineSegments) -> Self {
        GeoscienceObject::LineSegments(value)
    }
}

impl From<DownholeCollection> for GeoscienceObject {
    fn from(value: DownholeCollection) -> Self {
        GeoscienceObject::DownholeCollection(value)
    }
}

impl From<DownholeIntervals> for GeoscienceObject {
    fn from(value: DownholeIntervals) -> Self {
        GeoscienceObject::DownholeIntervals(value)
    }
}

/// Axis-aligned extent of a set of 3D coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl BoundingBox {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f64; 3]>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = BoundingBox {
            min_x: first[0],
            max_x: first[0],
            min_y: first[1],
            max_y: first[1],
            min_z: first[2],
            max_z: first[2],
        };
        for p in iter {
            bbox.min_x = bbox.min_x.min(p[0]);
            bbox.max_x = bbox.max_x.max(p[0]);
            bbox.min_y = bbox.min_y.min(p[1]);
            bbox.max_y = bbox.max_y.max(p[1]);
            bbox.min_z = bbox.min_z.min(p[2]);
            bbox.max_z = bbox.max_z.max(p[2]);
        }
        Some(bbox)
    }

    fn to_value(bbox: Option<Self>) -> Value {
        match bbox {
            Some(b) => json!(b),
            None => json!({
                "min_x": 0.0, "max_x": 0.0,
                "min_y": 0.0, "max_y": 0.0,
                "min_z": 0.0, "max_z": 0.0,
            }),
        }
    }
}

pub(crate) fn float_array<const W: usize>(rows: &[[f64; W]]) -> Value {
    let data: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
    json!({
        "data": data,
        "length": rows.len(),
        "width": W,
        "data_type": "float64",
    })
}

pub(crate) fn int_array<const W: usize>(rows: &[[i64; W]]) -> Value {
    let data: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
    json!({
        "data": data,
        "length": rows.len(),
        "width": W,
        "data_type": "int32",
    })
}

/// Categorical lookup of string keys (hole ids, line ids) in first-seen order.
fn category_table(keys: &[String]) -> (Vec<String>, Vec<i64>) {
    let mut table: Vec<String> = Vec::new();
    let mut codes = Vec::with_capacity(keys.len());
    for key in keys {
        let code = match table.iter().position(|k| k == key) {
            Some(pos) => pos,
            None => {
                table.push(key.clone());
                table.len() - 1
            }
        };
        codes.push(code as i64);
    }
    (table, codes)
}

pub(crate) fn category_attribute_value(name: &str, keys: &[String]) -> Value {
    let (table, codes) = category_table(keys);
    let lookup: Vec<Value> = table
        .iter()
        .enumerate()
        .map(|(i, v)| json!([i, v]))
        .collect();
    json!({
        "name": name,
        "key": name,
        "attribute_type": "category",
        "table": {
            "data": lookup,
            "length": table.len(),
            "keys_data_type": "int32",
            "values_data_type": "string",
        },
        "values": {
            "data": codes,
            "length": codes.len(),
            "width": 1,
            "data_type": "int32",
        },
        "nan_description": { "values": [] },
    })
}

/// Group consecutive-or-not rows by a string key preserving first appearance.
pub(crate) fn group_by_key<R, F>(rows: &[ValidRow<R>], key: F) -> Vec<(String, Vec<&ValidRow<R>>)>
where
    F: Fn(&R) -> &str,
{
    let mut groups: Vec<(String, Vec<&ValidRow<R>>)> = Vec::new();
    for row in rows {
        let k = key(&row.record);
        match groups.iter_mut().find(|(existing, _)| existing == k) {
            Some((_, members)) => members.push(row),
            None => groups.push((k.to_string(), vec![row])),
        }
    }
    groups
}

/// Markdown reference of every importable kind and its fields.
pub fn schema_reference_markdown() -> String {
    let mut out = String::from("# Geoscience object import reference\n\n");
    out.push_str(
        "CSV headers bind to fields by exact name (case-insensitive). Use the \
         `columns` argument of `import_csv` to bind a field to a differently named \
         header. Columns not bound to a field are imported as attributes.\n",
    );
    for kind in TargetKind::ALL {
        let schema = kind.schema();
        out.push_str(&format!(
            "\n## `{}`\n\nSchema: `{}`\n\n{}\n\n| field | type | required | description |\n|---|---|---|---|\n",
            kind, schema.schema_id, schema.description
        ));
        for field in schema.fields {
            let ty = match field.field_type {
                FieldType::Float => "number",
                FieldType::Integer => "integer",
                FieldType::Text => "text",
            };
            out.push_str(&format!(
                "| `{}` | {} | {} | {} |\n",
                field.name,
                ty,
                if field.required { "yes" } else { "no" },
                field.description
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_kind_parses_loosely_but_exactly() {
        assert_eq!("pointset".parse::<TargetKind>().unwrap(), TargetKind::Pointset);
        assert_eq!(
            "Downhole-Intervals".parse::<TargetKind>().unwrap(),
            TargetKind::DownholeIntervals
        );
        assert!("point_set".parse::<TargetKind>().is_err());
    }

    #[test]
    fn crs_is_normalized() {
        let mut meta = ObjectMeta::default();
        assert_eq!(meta.crs_value(), json!("unspecified"));
        meta.coordinate_reference_system = Some("EPSG:32750".into());
        assert_eq!(meta.crs_value(), json!({ "epsg_code": 32750 }));
        meta.coordinate_reference_system = Some("LOCAL GRID".into());
        assert_eq!(meta.crs_value(), json!({ "ogc_wkt": "LOCAL GRID" }));
    }

    #[test]
    fn bounding_box_spans_all_points() {
        let points = [[1.0, 5.0, -2.0], [3.0, 2.0, 4.0]];
        let bbox = BoundingBox::from_points(points.iter()).unwrap();
        assert_eq!(bbox.min_x, 1.0);
        assert_eq!(bbox.max_y, 5.0);
        assert_eq!(bbox.min_z, -2.0);
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn fixed_width_rows_serialize_as_nested_arrays() {
        let value = float_array(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(value["data"], json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        assert_eq!(value["width"], 3);
        assert_eq!(value["length"], 2);

        let wide = int_array(&[[0_i64; 40]]);
        assert_eq!(wide["data"][0].as_array().unwrap().len(), 40);
        assert_eq!(wide["data_type"], "int32");
    }

    #[test]
    fn category_table_keeps_first_seen_order() {
        let keys: Vec<String> = ["B", "A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let (table, codes) = category_table(&keys);
        assert_eq!(table, vec!["B", "A", "C"]);
        assert_eq!(codes, vec![0, 1, 0, 2]);
    }

    #[test]
    fn schema_reference_lists_every_kind() {
        let doc = schema_reference_markdown();
        for kind in TargetKind::ALL {
            assert!(doc.contains(kind.schema().schema_id));
        }
        assert!(doc.contains("| `hole_id` |"));
    }
}
