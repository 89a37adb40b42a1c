use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::{
    Attribute, BoundingBox, FieldSpec, FieldType, ObjectMeta, ObjectSchema, StructuredObject,
    TargetKind, ValidRow, ValidationError, category_attribute_value, float_array, group_by_key,
};
use crate::tabular::MappedRow;

pub(super) const SCHEMA: ObjectSchema = ObjectSchema {
    kind: TargetKind::DownholeIntervals,
    schema_id: "/objects/downhole-intervals/1.3.0/downhole-intervals.schema.json",
    description: "From/to intervals along drillholes. Intervals of one hole must not overlap; \
                  touching intervals are allowed.",
    fields: &[
        FieldSpec::required("hole_id", FieldType::Text, "Drillhole identifier"),
        FieldSpec::required("from", FieldType::Float, "Interval start depth"),
        FieldSpec::required("to", FieldType::Float, "Interval end depth, greater than from"),
        FieldSpec::required("start_x", FieldType::Float, "Easting at interval start"),
        FieldSpec::required("start_y", FieldType::Float, "Northing at interval start"),
        FieldSpec::required("start_z", FieldType::Float, "Elevation at interval start"),
        FieldSpec::required("end_x", FieldType::Float, "Easting at interval end"),
        FieldSpec::required("end_y", FieldType::Float, "Northing at interval end"),
        FieldSpec::required("end_z", FieldType::Float, "Elevation at interval end"),
        FieldSpec::optional("mid_x", FieldType::Float, "Easting at interval midpoint"),
        FieldSpec::optional("mid_y", FieldType::Float, "Northing at interval midpoint"),
        FieldSpec::optional("mid_z", FieldType::Float, "Elevation at interval midpoint"),
    ],
};

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub hole_id: String,
    pub from: f64,
    pub to: f64,
    pub start: [f64; 3],
    pub end: [f64; 3],
    pub mid: [f64; 3],
}

impl Interval {
    fn overlaps(&self, other: &Interval) -> bool {
        self.from < other.to && other.from < self.to
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownholeIntervals {
    pub meta: ObjectMeta,
    pub intervals: Vec<Interval>,
    pub attributes: Vec<Attribute>,
}

impl StructuredObject for DownholeIntervals {
    type Record = Interval;

    const KIND: TargetKind = TargetKind::DownholeIntervals;

    fn validate_row(row: &MappedRow<'_>) -> Result<Interval, ValidationError> {
        let hole_id = row.required_text("hole_id")?;
        let from = row.required_f64("from")?;
        let to = row.required_f64("to")?;
        if from >= to {
            return Err(ValidationError::field(
                "to",
                format!("interval start {from} must be less than interval end {to}"),
            ));
        }
        let start = [
            row.required_f64("start_x")?,
            row.required_f64("start_y")?,
            row.required_f64("start_z")?,
        ];
        let end = [
            row.required_f64("end_x")?,
            row.required_f64("end_y")?,
            row.required_f64("end_z")?,
        ];
        let mid = match (
            row.optional_f64("mid_x")?,
            row.optional_f64("mid_y")?,
            row.optional_f64("mid_z")?,
        ) {
            (Some(x), Some(y), Some(z)) => [x, y, z],
            (None, None, None) => [
                (start[0] + end[0]) / 2.0,
                (start[1] + end[1]) / 2.0,
                (start[2] + end[2]) / 2.0,
            ],
            _ => {
                return Err(ValidationError::field(
                    "mid_x",
                    "mid_x, mid_y and mid_z must be given together or left empty",
                ));
            }
        };
        Ok(Interval {
            hole_id,
            from,
            to,
            start,
            end,
            mid,
        })
    }

    fn validate_collection(rows: &[ValidRow<Interval>]) -> Vec<(usize, ValidationError)> {
        let mut overlapping: BTreeMap<usize, (String, Vec<usize>)> = BTreeMap::new();
        for (hole_id, members) in group_by_key(rows, |i| i.hole_id.as_str()) {
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    if a.record.overlaps(&b.record) {
                        overlapping
                            .entry(a.index)
                            .or_insert_with(|| (hole_id.clone(), Vec::new()))
                            .1
                            .push(b.index);
                        overlapping
                            .entry(b.index)
                            .or_insert_with(|| (hole_id.clone(), Vec::new()))
                            .1
                            .push(a.index);
                    }
                }
            }
        }
        overlapping
            .into_iter()
            .map(|(index, (hole_id, mut others))| {
                others.sort_unstable();
                let listed = others
                    .iter()
                    .map(usize::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    index,
                    ValidationError::field(
                        "from",
                        format!("interval of hole '{hole_id}' overlaps interval(s) on row(s) {listed}"),
                    )
                    .with_related(others),
                )
            })
            .collect()
    }

    fn assemble(meta: ObjectMeta, rows: Vec<ValidRow<Interval>>, attributes: Vec<Attribute>) -> Self {
        DownholeIntervals {
            meta,
            intervals: rows.into_iter().map(|r| r.record).collect(),
            attributes,
        }
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn element_count(&self) -> usize {
        self.intervals.len()
    }

    fn serialize_for_upload(&self) -> Value {
        let starts: Vec<[f64; 3]> = self.intervals.iter().map(|i| i.start).collect();
        let ends: Vec<[f64; 3]> = self.intervals.iter().map(|i| i.end).collect();
        let mids: Vec<[f64; 3]> = self.intervals.iter().map(|i| i.mid).collect();
        let depths: Vec<[f64; 2]> = self.intervals.iter().map(|i| [i.from, i.to]).collect();
        let hole_ids: Vec<String> = self.intervals.iter().map(|i| i.hole_id.clone()).collect();

        let bbox = BoundingBox::to_value(BoundingBox::from_points(starts.iter().chain(ends.iter())));
        let mut doc = self.meta.base_document(&SCHEMA, bbox);
        doc["is_composited"] = json!(false);
        doc["start"] = json!({ "coordinates": float_array(&starts) });
        doc["end"] = json!({ "coordinates": float_array(&ends) });
        doc["mid_points"] = json!({ "coordinates": float_array(&mids) });
        doc["from_to"] = json!({
            "intervals": { "start_and_end": float_array(&depths) },
            "attributes": [],
        });
        doc["hole_id"] = category_attribute_value("hole_id", &hole_ids);
        doc["attributes"] = json!(self.attributes.iter().map(Attribute::to_value).collect::<Vec<_>>());
        doc
    }
}
