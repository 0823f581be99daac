//! Dataset assembly for training.
//!
//! Contributed blobs are parsed as a JSON array of objects or as CSV, merged
//! into one numeric table over a common feature set, and missing cells are
//! imputed with the column mean.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::config::{ModelFamily, SectorSchema};

/// One parsed row: column name to numeric value, `None` when missing.
pub type Row = BTreeMap<String, Option<f64>>;

#[derive(Error, Debug, PartialEq)]
pub enum DatasetError {
    #[error("Dataset is empty")]
    Empty,

    #[error("Dataset is not UTF-8 text")]
    Encoding,

    #[error("Invalid JSON dataset: {0}")]
    Json(String),
}

/// Parse one contributed blob.
pub fn parse_table(bytes: &[u8]) -> Result<Vec<Row>, DatasetError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DatasetError::Encoding)?;
    let text = text.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Err(DatasetError::Empty);
    }

    let rows = if text.starts_with('[') || text.starts_with('{') {
        parse_json(text)?
    } else {
        parse_csv(text)
    };

    if rows.is_empty() {
        return Err(DatasetError::Empty);
    }
    Ok(rows)
}

fn parse_json(text: &str) -> Result<Vec<Row>, DatasetError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DatasetError::Json(e.to_string()))?;

    let objects = match value {
        serde_json::Value::Array(items) => items,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => return Err(DatasetError::Json("expected an array of objects".to_string())),
    };

    let mut rows = Vec::with_capacity(objects.len());
    for item in objects {
        let serde_json::Value::Object(fields) = item else {
            return Err(DatasetError::Json("expected an array of objects".to_string()));
        };
        let row = fields
            .into_iter()
            .map(|(key, value)| {
                let cell = match value {
                    serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
                    serde_json::Value::String(s) => parse_cell(&s),
                    _ => None,
                };
                (key.trim().to_string(), cell)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn parse_csv(text: &str) -> Vec<Row> {
    let mut records = csv_records(text).into_iter();
    let Some(header) = records.next() else {
        return Vec::new();
    };
    let columns: Vec<String> = header.into_iter().map(|c| c.trim().to_string()).collect();

    records
        .map(|fields| {
            columns
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(i, name)| (name.clone(), fields.get(i).and_then(|f| parse_cell(f))))
                .collect()
        })
        .collect()
}

/// Split CSV text into records, honoring double quotes and `""` escapes.
/// Quoted fields may span lines; blank lines are dropped.
fn csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                push_record(&mut records, std::mem::take(&mut fields));
            }
            c => current.push(c),
        }
    }
    fields.push(current);
    push_record(&mut records, fields);
    records
}

fn push_record(records: &mut Vec<Vec<String>>, fields: Vec<String>) {
    let blank = matches!(fields.as_slice(), [only] if only.trim().is_empty());
    if !blank {
        records.push(fields);
    }
}

fn parse_cell(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Normalized numeric table handed to the trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// Cells filled with a column mean
    pub imputed: usize,
}

impl Dataset {
    /// Merge parsed tables over the schema's feature set.
    pub fn assemble(tables: &[Vec<Row>], schema: &SectorSchema, family: ModelFamily) -> Self {
        let all_rows = tables.iter().flatten();

        let mut columns: Vec<String> = if schema.features.is_empty() {
            let observed: BTreeSet<&String> = all_rows.clone().flat_map(|r| r.keys()).collect();
            observed.into_iter().cloned().collect()
        } else {
            schema.features.clone()
        };
        columns.retain(|c| c != &schema.target);

        let has_target = all_rows.clone().any(|r| r.contains_key(&schema.target));
        if !family.drops_target() && has_target {
            columns.push(schema.target.clone());
        }

        let sparse: Vec<Vec<Option<f64>>> = all_rows
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).copied().flatten())
                    .collect::<Vec<_>>()
            })
            .filter(|cells| cells.iter().any(Option::is_some))
            .collect();

        let means: Vec<f64> = (0..columns.len())
            .map(|i| {
                let (sum, count) = sparse
                    .iter()
                    .filter_map(|cells| cells[i])
                    .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if count == 0 {
                    0.0
                } else {
                    sum / count as f64
                }
            })
            .collect();

        let mut imputed = 0;
        let rows = sparse
            .into_iter()
            .map(|cells| {
                cells
                    .into_iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        cell.unwrap_or_else(|| {
                            imputed += 1;
                            means[i]
                        })
                    })
                    .collect()
            })
            .collect();

        Self {
            columns,
            rows,
            imputed,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn to_csv(&self) -> String {
        let mut out = self
            .columns
            .iter()
            .map(|c| escape_csv(c))
            .collect::<Vec<_>>()
            .join(",");
        out.push('\n');

        for row in &self.rows {
            let line = row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
