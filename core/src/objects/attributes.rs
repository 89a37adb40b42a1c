use serde_json::{Value, json};

use crate::tabular::parse_f64;

/// Per-element values carried alongside an object's geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: AttributeValues,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValues {
    /// Every non-empty cell parsed as a number.
    Continuous(Vec<Option<f64>>),
    /// Text values encoded as codes into a lookup table.
    Categorical {
        table: Vec<String>,
        codes: Vec<Option<i64>>,
    },
}

impl Attribute {
    pub fn len(&self) -> usize {
        match &self.values {
            AttributeValues::Continuous(v) => v.len(),
            AttributeValues::Categorical { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the elements at `positions`, in that order.
    pub fn select(&self, positions: &[usize]) -> Attribute {
        let values = match &self.values {
            AttributeValues::Continuous(v) => {
                AttributeValues::Continuous(positions.iter().map(|&i| v.get(i).copied().flatten()).collect())
            }
            AttributeValues::Categorical { table, codes } => AttributeValues::Categorical {
                table: table.clone(),
                codes: positions.iter().map(|&i| codes.get(i).copied().flatten()).collect(),
            },
        };
        Attribute {
            name: self.name.clone(),
            values,
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.values {
            AttributeValues::Continuous(values) => json!({
                "name": self.name,
                "key": self.name,
                "attribute_type": "scalar",
                "values": {
                    "data": values,
                    "length": values.len(),
                    "width": 1,
                    "data_type": "float64",
                },
                "nan_description": { "values": [] },
            }),
            AttributeValues::Categorical { table, codes } => {
                let lookup: Vec<Value> = table
                    .iter()
                    .enumerate()
                    .map(|(i, v)| json!([i, v]))
                    .collect();
                json!({
                    "name": self.name,
                    "key": self.name,
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
        }
    }
}

/// Build one attribute per column from row-major attribute cells.
///
/// Columns whose cells are all empty are dropped.
pub fn build_attributes(names: &[String], rows: &[Vec<String>]) -> Vec<Attribute> {
    names
        .iter()
        .enumerate()
        .filter_map(|(col, name)| {
            let cells: Vec<&str> = rows
                .iter()
                .map(|r| r.get(col).map(String::as_str).unwrap_or(""))
                .collect();
            if cells.iter().all(|c| c.is_empty()) {
                return None;
            }
            let numeric = cells
                .iter()
                .filter(|c| !c.is_empty())
                .all(|c| parse_f64(c).is_some());
            let values = if numeric {
                AttributeValues::Continuous(
                    cells
                        .iter()
                        .map(|c| if c.is_empty() { None } else { parse_f64(c) })
                        .collect(),
                )
            } else {
                let mut table: Vec<String> = Vec::new();
                let codes = cells
                    .iter()
                    .map(|c| {
                        if c.is_empty() {
                            return None;
                        }
                        let code = match table.iter().position(|t| t == c) {
                            Some(pos) => pos,
                            None => {
                                table.push((*c).to_string());
                                table.len() - 1
                            }
                        };
                        Some(code as i64)
                    })
                    .collect();
                AttributeValues::Categorical { table, codes }
            };
            Some(Attribute {
                name: name.clone(),
                values,
            })
        })
        .collect()
}
