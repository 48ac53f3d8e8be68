use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::DataError;
use crate::subject::SubjectRecord;
use crate::value::{self, FieldValue};

/// Per-subject value matrix for one QC field. Rows are subjects and may be
/// ragged when subjects report different value counts for the same field
/// (different shell counts, for instance).
#[derive(Debug, Clone, Default)]
pub struct QcMatrix {
    rows: Vec<Vec<f64>>,
}

impl QcMatrix {
    pub fn empty() -> Self {
        QcMatrix { rows: Vec::new() }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        QcMatrix { rows }
    }

    /// A matrix with no value columns carries nothing to plot or tabulate.
    pub fn is_empty(&self) -> bool {
        self.ncols() == 0
    }

    pub fn subject_count(&self) -> usize {
        self.rows.len()
    }

    /// Widest row; ragged rows are padded up to this on access.
    pub fn ncols(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row_padded(&self, index: usize) -> Vec<f64> {
        let mut row = self.rows.get(index).cloned().unwrap_or_default();
        row.resize(self.ncols(), f64::NAN);
        row
    }

    /// Per-subject values at one value column, NaN where a ragged row
    /// falls short.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.get(index).copied().unwrap_or(f64::NAN))
            .collect()
    }

    pub fn finite_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.rows
            .iter()
            .flatten()
            .copied()
            .filter(|x| x.is_finite())
    }
}

/// Group-level QC dataset: one value matrix per QC field plus the data
/// fields shared by every subject. Built once, by aggregating subject
/// records or by replaying a previously written table, and read-only
/// afterwards. Owns all of its arrays.
#[derive(Debug, Clone)]
pub struct GroupTable {
    subject_ids: Vec<String>,
    qc: BTreeMap<String, Vec<Vec<f64>>>,
    data: BTreeMap<String, FieldValue>,
}

impl GroupTable {
    /// Folds subject records into a group table.
    ///
    /// QC fields are the union across subjects; a subject lacking a field
    /// gets a NaN row sized from the first subject that has it, so value
    /// columns stay aligned. Data fields are taken from the first subject
    /// and must match on every other; all mismatches are collected into a
    /// single error rather than failing on the first.
    pub fn aggregate(subjects: &[SubjectRecord]) -> Result<GroupTable, DataError> {
        let mut field_names = BTreeSet::new();
        for subject in subjects {
            field_names.extend(subject.qc_field_names().iter().cloned());
        }

        let mut qc = BTreeMap::new();
        for name in field_names {
            let values: Vec<Option<Vec<f64>>> = subjects
                .iter()
                .map(|subject| subject.qc_values(&name))
                .collect();
            let width = values.iter().flatten().next().map(Vec::len);
            let mut rows = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    Some(row) => rows.push(row),
                    None => {
                        let width = width.ok_or_else(|| DataError::NoLengthHint(name.clone()))?;
                        rows.push(vec![f64::NAN; width]);
                    }
                }
            }
            qc.insert(name, rows);
        }

        let mut data = BTreeMap::new();
        let mut violations = Vec::new();
        if let Some((first, rest)) = subjects.split_first() {
            for name in first.data_field_names() {
                if let Some(field) = first.get(name) {
                    data.insert(name.clone(), field.clone());
                }
            }
            for subject in rest {
                for (name, expected) in &data {
                    match subject.get(name) {
                        None => violations.push(format!(
                            "subject {} is missing {name}",
                            subject.subject_id()
                        )),
                        Some(actual) if actual != expected => violations.push(format!(
                            "subject {} disagrees on {name}",
                            subject.subject_id()
                        )),
                        Some(_) => {}
                    }
                }
                for name in subject.data_field_names() {
                    if !data.contains_key(name) {
                        violations.push(format!(
                            "subject {} has unexpected {name}",
                            subject.subject_id()
                        ));
                    }
                }
            }
        }
        if !violations.is_empty() {
            return Err(DataError::Inconsistent(violations));
        }

        data.insert(
            "data_num_subjects".to_string(),
            FieldValue::Scalar(subjects.len() as f64),
        );

        Ok(GroupTable {
            subject_ids: subjects
                .iter()
                .map(|subject| subject.subject_id().to_string())
                .collect(),
            qc,
            data,
        })
    }

    /// Replays a table previously produced by [`GroupTable::write`].
    pub fn load(path: &Path) -> Result<GroupTable, DataError> {
        let raw = fs::read_to_string(path)?;
        let parsed: Value = serde_json::from_str(&raw)?;
        let Value::Object(entries) = parsed else {
            return Err(DataError::NotAnObject(path.to_path_buf()));
        };

        let mut subject_ids: Vec<String> = Vec::new();
        let mut qc = BTreeMap::new();
        let mut data = BTreeMap::new();
        for (name, entry) in entries {
            if name == "subject_ids" {
                subject_ids = serde_json::from_value(entry)?;
            } else if let Some(field) = name.strip_prefix("qc_") {
                qc.insert(field.to_string(), parse_qc_rows(&name, &entry)?);
            } else if name.starts_with("data_") {
                let Some(field) = FieldValue::from_json(&entry) else {
                    return Err(DataError::UnsupportedField(name));
                };
                data.insert(name, field);
            } else {
                tracing::warn!(key = %name, "ignoring unrecognized group table key");
            }
        }

        for (name, rows) in &qc {
            if rows.len() != subject_ids.len() {
                return Err(DataError::MalformedGroupTable(format!(
                    "qc_{name} has {} rows for {} subjects",
                    rows.len(),
                    subject_ids.len()
                )));
            }
        }

        Ok(GroupTable {
            subject_ids,
            qc,
            data,
        })
    }

    /// Serializes with stable key ordering so written tables diff cleanly.
    /// NaN slots become JSON `null`.
    pub fn write(&self, path: &Path) -> Result<(), DataError> {
        let mut root = Map::new();
        for (name, field) in &self.data {
            root.insert(name.clone(), field.to_json());
        }
        for (name, rows) in &self.qc {
            let matrix = Value::Array(
                rows.iter()
                    .map(|row| {
                        Value::Array(row.iter().map(|x| value::json_number(*x)).collect())
                    })
                    .collect(),
            );
            root.insert(format!("qc_{name}"), matrix);
        }
        root.insert(
            "subject_ids".to_string(),
            Value::Array(
                self.subject_ids
                    .iter()
                    .map(|id| Value::String(id.clone()))
                    .collect(),
            ),
        );
        let body = serde_json::to_string_pretty(&Value::Object(root))?;
        fs::write(path, body)?;
        Ok(())
    }

    pub fn subject_count(&self) -> usize {
        self.subject_ids.len()
    }

    pub fn subject_ids(&self) -> &[String] {
        &self.subject_ids
    }

    /// Unprefixed QC field names, sorted.
    pub fn qc_field_names(&self) -> Vec<&str> {
        self.qc.keys().map(String::as_str).collect()
    }

    pub fn data_fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.data
    }

    pub fn data_field(&self, name: &str) -> Option<&FieldValue> {
        self.data.get(name)
    }

    /// The value matrix for an unprefixed QC field name, or the empty
    /// matrix when no subject supplied the field. Callers treat empty as
    /// "skip this panel", never as a failure.
    pub fn get_data(&self, field: &str) -> QcMatrix {
        self.qc
            .get(field)
            .map(|rows| QcMatrix::from_rows(rows.clone()))
            .unwrap_or_else(QcMatrix::empty)
    }
}

fn parse_qc_rows(name: &str, value: &Value) -> Result<Vec<Vec<f64>>, DataError> {
    let Value::Array(rows) = value else {
        return Err(DataError::MalformedGroupTable(format!(
            "{name} is not an array of per-subject rows"
        )));
    };
    let mut parsed = Vec::with_capacity(rows.len());
    for row in rows {
        let numbers = row.as_array().and_then(|items| {
            items
                .iter()
                .map(value::number_or_nan)
                .collect::<Option<Vec<f64>>>()
        });
        match numbers {
            Some(numbers) => parsed.push(numbers),
            None => {
                return Err(DataError::MalformedGroupTable(format!(
                    "{name} rows must be arrays of numbers"
                )));
            }
        }
    }
    Ok(parsed)
}
