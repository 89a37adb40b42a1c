use serde_json::{Value, json};

use super::{
    Attribute, BoundingBox, FieldSpec, FieldType, ObjectMeta, ObjectSchema, StructuredObject,
    TargetKind, ValidRow, ValidationError, category_attribute_value, float_array, group_by_key,
    int_array,
};
use crate::tabular::MappedRow;

pub(super) const SCHEMA: ObjectSchema = ObjectSchema {
    kind: TargetKind::LineSegments,
    schema_id: "/objects/line-segments/2.2.0/line-segments.schema.json",
    description: "Polylines. Rows are vertices; consecutive vertices of one line form segments.",
    fields: &[
        FieldSpec::required("line_id", FieldType::Text, "Identifier of the polyline"),
        FieldSpec::required(
            "sequence",
            FieldType::Integer,
            "Vertex order within the line, strictly increasing in file order",
        ),
        FieldSpec::required("x", FieldType::Float, "Easting"),
        FieldSpec::required("y", FieldType::Float, "Northing"),
        FieldSpec::required("z", FieldType::Float, "Elevation"),
    ],
};

#[derive(Debug, Clone, PartialEq)]
pub struct LineVertex {
    pub line_id: String,
    pub sequence: i64,
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineSegments {
    pub meta: ObjectMeta,
    pub vertices: Vec<[f64; 3]>,
    /// Vertex index pairs.
    pub segments: Vec<[i64; 2]>,
    /// Line id of each segment.
    pub segment_lines: Vec<String>,
    pub vertex_attributes: Vec<Attribute>,
}

impl StructuredObject for LineSegments {
    type Record = LineVertex;

    const KIND: TargetKind = TargetKind::LineSegments;

    fn validate_row(row: &MappedRow<'_>) -> Result<LineVertex, ValidationError> {
        Ok(LineVertex {
            line_id: row.required_text("line_id")?,
            sequence: row.required_i64("sequence")?,
            position: [
                row.required_f64("x")?,
                row.required_f64("y")?,
                row.required_f64("z")?,
            ],
        })
    }

    fn validate_collection(rows: &[ValidRow<LineVertex>]) -> Vec<(usize, ValidationError)> {
        let mut failures = Vec::new();
        for (line_id, members) in group_by_key(rows, |v| v.line_id.as_str()) {
            let mut accepted: Vec<&ValidRow<LineVertex>> = Vec::new();
            for row in members {
                match accepted.last() {
                    Some(prev) if row.record.sequence <= prev.record.sequence => {
                        failures.push((
                            row.index,
                            ValidationError::field(
                                "sequence",
                                format!(
                                    "sequence {} of line '{}' does not increase after sequence {} on row {}",
                                    row.record.sequence, line_id, prev.record.sequence, prev.index
                                ),
                            )
                            .with_related([prev.index]),
                        ));
                    }
                    _ => accepted.push(row),
                }
            }
            if accepted.len() == 1 {
                let only = accepted[0];
                failures.push((
                    only.index,
                    ValidationError::field(
                        "line_id",
                        format!("line '{line_id}' has a single valid vertex; at least two are required"),
                    ),
                ));
            }
        }
        failures.sort_by_key(|(index, _)| *index);
        failures
    }

    fn assemble(meta: ObjectMeta, rows: Vec<ValidRow<LineVertex>>, attributes: Vec<Attribute>) -> Self {
        // Vertices of one line are stored contiguously, lines in first-seen order.
        let mut order: Vec<usize> = Vec::with_capacity(rows.len());
        for (_, members) in group_by_key(&rows, |v| v.line_id.as_str()) {
            for member in members {
                if let Some(pos) = rows.iter().position(|r| r.index == member.index) {
                    order.push(pos);
                }
            }
        }

        let vertices: Vec<[f64; 3]> = order.iter().map(|&i| rows[i].record.position).collect();
        let mut segments = Vec::new();
        let mut segment_lines = Vec::new();
        for (a, pair) in order.windows(2).enumerate() {
            let first = &rows[pair[0]].record;
            let second = &rows[pair[1]].record;
            if first.line_id == second.line_id {
                segments.push([a as i64, a as i64 + 1]);
                segment_lines.push(first.line_id.clone());
            }
        }
        LineSegments {
            meta,
            vertices,
            segments,
            segment_lines,
            vertex_attributes: attributes.iter().map(|a| a.select(&order)).collect(),
        }
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn element_count(&self) -> usize {
        self.segments.len()
    }

    fn serialize_for_upload(&self) -> Value {
        let bbox = BoundingBox::to_value(BoundingBox::from_points(self.vertices.iter()));
        let mut doc = self.meta.base_document(&SCHEMA, bbox);
        let mut vertices = float_array(&self.vertices);
        vertices["attributes"] = json!(
            self.vertex_attributes
                .iter()
                .map(Attribute::to_value)
                .collect::<Vec<_>>()
        );
        let mut indices = int_array(&self.segments);
        indices["attributes"] = json!([category_attribute_value("line_id", &self.segment_lines)]);
        doc["segments"] = json!({
            "vertices": vertices,
            "indices": indices,
        });
        doc
    }
}
