//! CSV ingestion and deterministic header → schema field mapping.
//!
//! Headers bind to schema fields by exact name, ignoring ASCII case, or by an
//! explicit override naming the header to use. There is no fuzzy matching: a
//! required field with no matching header stays unbound and every row fails
//! validation on it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::objects::{FieldSpec, FieldType, ObjectSchema, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("CSV input is empty; a header row is required")]
    MissingHeader,
    #[error("CSV header row could not be read: {0}")]
    Header(#[source] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("column override names unknown field '{field}' (known fields: {known})")]
    UnknownField { field: String, known: String },
    #[error("field '{field}' matches more than one column: {columns:?}")]
    AmbiguousColumn { field: String, columns: Vec<String> },
    #[error("group_by column '{0}' is not present in the CSV header")]
    UnknownGroupColumn(String),
}

/// One data row as read from the file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Zero-based position among data rows (header excluded).
    pub index: usize,
    pub cells: Vec<String>,
    /// Set when the CSV reader could not decode this record.
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name.trim()))
    }
}

/// Parse CSV text with a header row. Rows may be shorter or longer than the
/// header; shape problems surface later as per-row validation failures.
pub fn parse_csv(text: &str) -> Result<Table, TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(TableError::Header)?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(TableError::MissingHeader);
    }

    let rows = reader
        .records()
        .enumerate()
        .map(|(index, record)| match record {
            Ok(record) => RawRow {
                index,
                cells: record.iter().map(str::to_string).collect(),
                parse_error: None,
            },
            Err(err) => RawRow {
                index,
                cells: Vec::new(),
                parse_error: Some(err.to_string()),
            },
        })
        .collect();

    Ok(Table { headers, rows })
}

/// Binding of schema fields to column positions, plus the leftover columns
/// that become attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderMapping {
    pub bindings: Vec<FieldBinding>,
    pub attribute_columns: Vec<AttributeColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldBinding {
    pub field: &'static str,
    pub required: bool,
    #[serde(skip)]
    pub field_type: FieldType,
    /// Header name the field is bound to, if any.
    pub column: Option<String>,
    #[serde(skip)]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeColumn {
    pub name: String,
    #[serde(skip)]
    pub position: usize,
}

impl HeaderMapping {
    pub fn binding(&self, field: &str) -> Option<&FieldBinding> {
        self.bindings.iter().find(|b| b.field == field)
    }

    pub fn unbound_required(&self) -> Vec<&'static str> {
        self.bindings
            .iter()
            .filter(|b| b.required && b.position.is_none())
            .map(|b| b.field)
            .collect()
    }
}

/// Map table headers onto `schema`. `overrides` maps field name → header name.
/// `excluded` lists headers that must not become attributes (e.g. the
/// grouping column).
pub fn map_headers(
    headers: &[String],
    schema: &ObjectSchema,
    overrides: &BTreeMap<String, String>,
    excluded: &[String],
) -> Result<HeaderMapping, MappingError> {
    for field in overrides.keys() {
        if schema.field(field).is_none() {
            return Err(MappingError::UnknownField {
                field: field.clone(),
                known: schema.field_names().join(", "),
            });
        }
    }

    let mut bindings = Vec::with_capacity(schema.fields.len());
    for field_spec in schema.fields {
        let wanted = overrides
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(field_spec.name))
            .map(|(_, column)| column.as_str())
            .unwrap_or(field_spec.name);
        bindings.push(bind_field(headers, field_spec, wanted)?);
    }

    let attribute_columns = headers
        .iter()
        .enumerate()
        .filter(|(position, header)| {
            !header.is_empty()
                && !bindings.iter().any(|b| b.position == Some(*position))
                && !excluded.iter().any(|e| e.eq_ignore_ascii_case(header))
        })
        .map(|(position, header)| AttributeColumn {
            name: header.clone(),
            position,
        })
        .collect();

    Ok(HeaderMapping {
        bindings,
        attribute_columns,
    })
}

fn bind_field(
    headers: &[String],
    field_spec: &FieldSpec,
    wanted: &str,
) -> Result<FieldBinding, MappingError> {
    let matches: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.eq_ignore_ascii_case(wanted.trim()))
        .map(|(i, _)| i)
        .collect();
    if matches.len() > 1 {
        return Err(MappingError::AmbiguousColumn {
            field: field_spec.name.to_string(),
            columns: matches.iter().map(|i| headers[*i].clone()).collect(),
        });
    }
    let position = matches.first().copied();
    Ok(FieldBinding {
        field: field_spec.name,
        required: field_spec.required,
        field_type: field_spec.field_type,
        column: position.map(|i| headers[i].clone()),
        position,
    })
}

/// Typed read access to one row through a [`HeaderMapping`].
#[derive(Debug, Clone, Copy)]
pub struct MappedRow<'a> {
    pub index: usize,
    mapping: &'a HeaderMapping,
    cells: &'a [String],
}

impl<'a> MappedRow<'a> {
    pub fn new(index: usize, mapping: &'a HeaderMapping, cells: &'a [String]) -> Self {
        Self {
            index,
            mapping,
            cells,
        }
    }

    /// Raw cell for `field`; `None` when the field is unbound, the row is
    /// short, or the cell is empty.
    pub fn raw(&self, field: &str) -> Option<&'a str> {
        let position = self.mapping.binding(field)?.position?;
        let cell = self.cells.get(position)?.as_str();
        if cell.is_empty() { None } else { Some(cell) }
    }

    pub fn required_text(&self, field: &str) -> Result<String, ValidationError> {
        self.raw(field)
            .map(str::to_string)
            .ok_or_else(|| self.missing(field))
    }

    pub fn required_f64(&self, field: &str) -> Result<f64, ValidationError> {
        let raw = self.raw(field).ok_or_else(|| self.missing(field))?;
        parse_f64(raw).ok_or_else(|| {
            ValidationError::field(field, format!("'{raw}' is not a finite number"))
        })
    }

    pub fn optional_f64(&self, field: &str) -> Result<Option<f64>, ValidationError> {
        match self.raw(field) {
            None => Ok(None),
            Some(raw) => parse_f64(raw).map(Some).ok_or_else(|| {
                ValidationError::field(field, format!("'{raw}' is not a finite number"))
            }),
        }
    }

    pub fn required_i64(&self, field: &str) -> Result<i64, ValidationError> {
        let raw = self.raw(field).ok_or_else(|| self.missing(field))?;
        raw.parse::<i64>()
            .map_err(|_| ValidationError::field(field, format!("'{raw}' is not an integer")))
    }

    /// Attribute cells in attribute-column order; short rows yield empty cells.
    pub fn attribute_values(&self) -> Vec<String> {
        self.mapping
            .attribute_columns
            .iter()
            .map(|col| self.cells.get(col.position).cloned().unwrap_or_default())
            .collect()
    }

    fn missing(&self, field: &str) -> ValidationError {
        match self.mapping.binding(field).and_then(|b| b.column.as_deref()) {
            Some(column) => ValidationError::field(
                field,
                format!("missing value for required field '{field}' (column '{column}')"),
            ),
            None => ValidationError::field(
                field,
                format!("required field '{field}' is not mapped to any CSV column"),
            ),
        }
    }
}

pub fn parse_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::TargetKind;

    #[test]
    fn parse_csv_keeps_short_rows_and_trims_cells() {
        let table = parse_csv("X,Y,Z\n1, 2 ,3\n4,5\n").unwrap();
        assert_eq!(table.headers, vec!["X", "Y", "Z"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells, vec!["1", "2", "3"]);
        assert_eq!(table.rows[1].cells, vec!["4", "5"]);
        assert_eq!(table.rows[1].index, 1);
    }

    #[test]
    fn parse_csv_rejects_empty_input() {
        assert!(matches!(parse_csv(""), Err(TableError::MissingHeader)));
    }

    #[test]
    fn headers_bind_case_insensitively_and_leftovers_become_attributes() {
        let headers = vec!["x".to_string(), "Y".to_string(), "Z".to_string(), "Grade".to_string()];
        let mapping = map_headers(
            &headers,
            TargetKind::Pointset.schema(),
            &BTreeMap::new(),
            &[],
        )
        .unwrap();
        assert_eq!(mapping.binding("x").unwrap().column.as_deref(), Some("x"));
        assert_eq!(mapping.binding("y").unwrap().column.as_deref(), Some("Y"));
        assert!(mapping.unbound_required().is_empty());
        assert_eq!(mapping.attribute_columns.len(), 1);
        assert_eq!(mapping.attribute_columns[0].name, "Grade");
    }

    #[test]
    fn overrides_redirect_fields_to_other_headers() {
        let headers = vec!["EAST".to_string(), "NORTH".to_string(), "RL".to_string()];
        let overrides = BTreeMap::from([
            ("x".to_string(), "east".to_string()),
            ("y".to_string(), "north".to_string()),
            ("z".to_string(), "rl".to_string()),
        ]);
        let mapping =
            map_headers(&headers, TargetKind::Pointset.schema(), &overrides, &[]).unwrap();
        assert_eq!(mapping.binding("z").unwrap().column.as_deref(), Some("RL"));
        assert!(mapping.attribute_columns.is_empty());
    }

    #[test]
    fn similar_but_different_names_are_not_guessed() {
        let headers = vec!["X_coord".to_string(), "Y".to_string(), "Z".to_string()];
        let mapping = map_headers(
            &headers,
            TargetKind::Pointset.schema(),
            &BTreeMap::new(),
            &[],
        )
        .unwrap();
        assert_eq!(mapping.unbound_required(), vec!["x"]);
    }

    #[test]
    fn unknown_override_field_is_rejected() {
        let headers = vec!["X".to_string()];
        let overrides = BTreeMap::from([("easting".to_string(), "X".to_string())]);
        let err =
            map_headers(&headers, TargetKind::Pointset.schema(), &overrides, &[]).unwrap_err();
        assert!(matches!(err, MappingError::UnknownField { .. }));
    }

    #[test]
    fn duplicate_headers_for_one_field_are_ambiguous() {
        let headers = vec!["X".to_string(), "x".to_string(), "Y".to_string(), "Z".to_string()];
        let err = map_headers(
            &headers,
            TargetKind::Pointset.schema(),
            &BTreeMap::new(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::AmbiguousColumn { .. }));
    }

    #[test]
    fn mapped_row_reports_missing_and_malformed_values() {
        let headers = vec!["X".to_string(), "Y".to_string(), "Z".to_string()];
        let mapping = map_headers(
            &headers,
            TargetKind::Pointset.schema(),
            &BTreeMap::new(),
            &[],
        )
        .unwrap();
        let cells = vec!["1.5".to_string(), "abc".to_string()];
        let row = MappedRow::new(0, &mapping, &cells);
        assert_eq!(row.required_f64("x").unwrap(), 1.5);
        let err = row.required_f64("y").unwrap_err();
        assert_eq!(err.field.as_deref(), Some("y"));
        let err = row.required_f64("z").unwrap_err();
        assert!(err.message.contains("missing value"));
    }
}
