use serde_json::{Value, json};

use super::{
    Attribute, BoundingBox, FieldSpec, FieldType, ObjectMeta, ObjectSchema, StructuredObject,
    TargetKind, ValidRow, ValidationError, category_attribute_value, float_array, group_by_key,
    int_array,
};
use crate::tabular::MappedRow;

pub(super) const SCHEMA: ObjectSchema = ObjectSchema {
    kind: TargetKind::DownholeCollection,
    schema_id: "/objects/downhole-collection/1.3.0/downhole-collection.schema.json",
    description: "Drillholes with collar location and survey stations. Rows are survey stations; \
                  collar coordinates repeat on every row of a hole.",
    fields: &[
        FieldSpec::required("hole_id", FieldType::Text, "Drillhole identifier"),
        FieldSpec::required("x", FieldType::Float, "Collar easting"),
        FieldSpec::required("y", FieldType::Float, "Collar northing"),
        FieldSpec::required("z", FieldType::Float, "Collar elevation"),
        FieldSpec::required(
            "depth",
            FieldType::Float,
            "Survey depth along hole, strictly increasing per hole",
        ),
        FieldSpec::required("azimuth", FieldType::Float, "Azimuth in degrees, 0 to 360"),
        FieldSpec::required("dip", FieldType::Float, "Dip in degrees, -90 to 90"),
    ],
};

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyStation {
    pub hole_id: String,
    pub collar: [f64; 3],
    pub depth: f64,
    pub azimuth: f64,
    pub dip: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownholeCollection {
    pub meta: ObjectMeta,
    pub hole_ids: Vec<String>,
    pub collars: Vec<[f64; 3]>,
    /// `[depth, azimuth, dip]` per station, holes stored contiguously.
    pub path: Vec<[f64; 3]>,
    /// `[hole index, first station, station count]` per hole.
    pub holes: Vec<[i64; 3]>,
    pub station_attributes: Vec<Attribute>,
}

impl StructuredObject for DownholeCollection {
    type Record = SurveyStation;

    const KIND: TargetKind = TargetKind::DownholeCollection;

    fn validate_row(row: &MappedRow<'_>) -> Result<SurveyStation, ValidationError> {
        let hole_id = row.required_text("hole_id")?;
        let collar = [
            row.required_f64("x")?,
            row.required_f64("y")?,
            row.required_f64("z")?,
        ];
        let depth = row.required_f64("depth")?;
        if depth < 0.0 {
            return Err(ValidationError::field(
                "depth",
                format!("depth {depth} must not be negative"),
            ));
        }
        let azimuth = row.required_f64("azimuth")?;
        if !(0.0..=360.0).contains(&azimuth) {
            return Err(ValidationError::field(
                "azimuth",
                format!("azimuth {azimuth} is outside [0, 360]"),
            ));
        }
        let dip = row.required_f64("dip")?;
        if !(-90.0..=90.0).contains(&dip) {
            return Err(ValidationError::field(
                "dip",
                format!("dip {dip} is outside [-90, 90]"),
            ));
        }
        Ok(SurveyStation {
            hole_id,
            collar,
            depth,
            azimuth,
            dip,
        })
    }

    fn validate_collection(rows: &[ValidRow<SurveyStation>]) -> Vec<(usize, ValidationError)> {
        let mut failures = Vec::new();
        for (hole_id, members) in group_by_key(rows, |s| s.hole_id.as_str()) {
            let Some(first) = members.first() else {
                continue;
            };
            let collar_row = first.index;
            let collar = first.record.collar;
            let mut last: Option<&ValidRow<SurveyStation>> = None;
            for row in members {
                if row.record.collar != collar {
                    failures.push((
                        row.index,
                        ValidationError::new(format!(
                            "collar of hole '{hole_id}' differs from row {collar_row}"
                        ))
                        .with_related([collar_row]),
                    ));
                    continue;
                }
                match last {
                    Some(prev) if row.record.depth <= prev.record.depth => {
                        failures.push((
                            row.index,
                            ValidationError::field(
                                "depth",
                                format!(
                                    "depth {} of hole '{}' does not increase after depth {} on row {}",
                                    row.record.depth, hole_id, prev.record.depth, prev.index
                                ),
                            )
                            .with_related([prev.index]),
                        ));
                    }
                    _ => last = Some(row),
                }
            }
        }
        failures.sort_by_key(|(index, _)| *index);
        failures
    }

    fn assemble(
        meta: ObjectMeta,
        rows: Vec<ValidRow<SurveyStation>>,
        attributes: Vec<Attribute>,
    ) -> Self {
        let mut hole_ids = Vec::new();
        let mut collars = Vec::new();
        let mut path = Vec::with_capacity(rows.len());
        let mut holes = Vec::new();
        let mut order = Vec::with_capacity(rows.len());

        for (hole_index, (hole_id, members)) in group_by_key(&rows, |s| s.hole_id.as_str())
            .into_iter()
            .enumerate()
        {
            let offset = path.len();
            if let Some(first) = members.first() {
                collars.push(first.record.collar);
            }
            for member in &members {
                path.push([member.record.depth, member.record.azimuth, member.record.dip]);
                if let Some(pos) = rows.iter().position(|r| r.index == member.index) {
                    order.push(pos);
                }
            }
            holes.push([hole_index as i64, offset as i64, members.len() as i64]);
            hole_ids.push(hole_id);
        }

        DownholeCollection {
            meta,
            hole_ids,
            collars,
            path,
            holes,
            station_attributes: attributes.iter().map(|a| a.select(&order)).collect(),
        }
    }

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn element_count(&self) -> usize {
        self.hole_ids.len()
    }

    fn serialize_for_upload(&self) -> Value {
        let bbox = BoundingBox::to_value(BoundingBox::from_points(self.collars.iter()));
        let mut doc = self.meta.base_document(&SCHEMA, bbox);
        let distances: Vec<[f64; 3]> = self
            .holes
            .iter()
            .map(|[_, offset, count]| {
                let last = (offset + count - 1).max(0) as usize;
                let total = self.path.get(last).map(|p| p[0]).unwrap_or(0.0);
                [total, total, total]
            })
            .collect();
        let mut path = float_array(&self.path);
        path["attributes"] = json!(
            self.station_attributes
                .iter()
                .map(Attribute::to_value)
                .collect::<Vec<_>>()
        );
        doc["location"] = json!({
            "coordinates": float_array(&self.collars),
            "distances": float_array(&distances),
            "holes": int_array(&self.holes),
            "hole_id": category_attribute_value("hole_id", &self.hole_ids),
            "path": path,
            "attributes": [],
        });
        doc
    }
}
