use serde_json::{Value, json};

use super::{
    Attribute, BoundingBox, FieldSpec, FieldType, ObjectMeta, ObjectSchema, StructuredObject,
    TargetKind, ValidRow, ValidationError, float_array,
};
use crate::tabular::MappedRow;

pub(super) const SCHEMA: ObjectSchema = ObjectSchema {
    kind: TargetKind::Pointset,
    schema_id: "/objects/pointset/1.3.0/pointset.schema.json",
    description: "Unconnected points, one per row.",
    fields: &[
        FieldSpec::required("x", FieldType::Float, "Easting"),
        FieldSpec::required("y", FieldType::Float, "Northing"),
        FieldSpec::required("z", FieldType::Float, "Elevation"),
    ],
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pointset {
    pub meta: ObjectMeta,
    pub coordinates: Vec<[f64; 3]>,
    pub attributes: Vec<Attribute>,
}

impl StructuredObject for Pointset {
    type Record = Point;

    const KIND: TargetKind = TargetKind::Pointset;

    fn validate_row(row: &MappedRow<'_>) -> Result<Point, ValidationError> {
        Ok(Point {
            x: row.required_f64("x")?,
            y: row.required_f64("y")?,
            z: row.required_f64("z")?,
        })
    }

    fn assemble(meta: ObjectMeta, rows: Vec<ValidRow<Point>>, attributes: Vec<Attribute>) -> Self {
        Pointset {
            meta,
            coordinates: rows
                .iter()
                .map(|r| [r.record.x, r.record.y, r.record.z])
                .collect(),
            attributes,
        }
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn element_count(&self) -> usize {
        self.coordinates.len()
    }

    fn serialize_for_upload(&self) -> Value {
        let bbox = BoundingBox::to_value(BoundingBox::from_points(self.coordinates.iter()));
        let mut doc = self.meta.base_document(&SCHEMA, bbox);
        doc["locations"] = json!({
            "coordinates": float_array(&self.coordinates),
            "attributes": self.attributes.iter().map(Attribute::to_value).collect::<Vec<_>>(),
        });
        doc
    }
}
