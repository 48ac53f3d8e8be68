use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::DataError;
use crate::value::FieldValue;

/// One subject's QC record, merged from one or more QC JSON sources.
///
/// Field names follow the `data_`/`qc_` convention: `data_` fields are
/// acquisition metadata expected to match across a group, `qc_` fields are
/// numeric metrics eligible for aggregation and outlier classification.
/// The partition is fixed at load time; records are never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct SubjectRecord {
    subject_id: String,
    fields: BTreeMap<String, FieldValue>,
    qc_fields: Vec<String>,
    data_fields: Vec<String>,
    source_dir: Option<PathBuf>,
}

impl SubjectRecord {
    pub fn new(subject_id: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        let qc_fields = fields
            .iter()
            .filter_map(|(name, value)| {
                let stripped = name.strip_prefix("qc_")?;
                value.is_qc_numeric().then(|| stripped.to_string())
            })
            .collect();
        let data_fields = fields
            .keys()
            .filter(|name| name.starts_with("data_"))
            .cloned()
            .collect();
        SubjectRecord {
            subject_id: subject_id.into(),
            fields,
            qc_fields,
            data_fields,
            source_dir: None,
        }
    }

    /// Loads and shallow-merges the QC sources in order, later sources
    /// winning on key collision. A source that cannot be read or parsed is
    /// logged and skipped; at least one must succeed.
    pub fn load(subject_id: impl Into<String>, sources: &[PathBuf]) -> Result<Self, DataError> {
        let subject_id = subject_id.into();
        let mut fields = BTreeMap::new();
        let mut source_dir = None;
        let mut loaded = 0usize;
        for path in sources {
            match parse_qc_source(path) {
                Ok(parsed) => {
                    fields.extend(parsed);
                    if source_dir.is_none() {
                        source_dir = path.parent().map(Path::to_path_buf);
                    }
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        subject = %subject_id,
                        path = %path.display(),
                        error = %err,
                        "skipping QC source"
                    );
                }
            }
        }
        if loaded == 0 {
            return Err(DataError::NoUsableSource(subject_id));
        }
        let mut record = SubjectRecord::new(subject_id, fields);
        record.source_dir = source_dir;
        Ok(record)
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// QC field names with the `qc_` prefix stripped, in sorted order.
    /// Only numeric fields qualify; a `qc_`-prefixed flag or string stays
    /// in `fields` but is excluded here. Indexed once at construction.
    pub fn qc_field_names(&self) -> &[String] {
        &self.qc_fields
    }

    /// Full `data_`-prefixed field names, in sorted order.
    pub fn data_field_names(&self) -> &[String] {
        &self.data_fields
    }

    /// Flat numeric values for an unprefixed QC field name.
    pub fn qc_values(&self, name: &str) -> Option<Vec<f64>> {
        self.fields
            .get(&format!("qc_{name}"))
            .and_then(FieldValue::as_numeric_vec)
    }

    /// 2-D values for an unprefixed QC field name, for heatmap panels.
    pub fn qc_matrix(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.fields
            .get(&format!("qc_{name}"))
            .and_then(FieldValue::as_matrix)
    }

    /// Searches the subject's source directory for an image file, trying
    /// the name verbatim and with the common raster/volume extensions.
    pub fn lookup_image(&self, name: &str) -> Option<PathBuf> {
        let dir = self.source_dir.as_deref()?;
        for ext in ["", ".png", ".nii", ".nii.gz"] {
            let candidate = dir.join(format!("{name}{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

fn parse_qc_source(path: &Path) -> Result<BTreeMap<String, FieldValue>, DataError> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let Value::Object(entries) = value else {
        return Err(DataError::NotAnObject(path.to_path_buf()));
    };
    let mut fields = BTreeMap::new();
    for (name, entry) in entries {
        let Some(field) = FieldValue::from_json(&entry) else {
            return Err(DataError::UnsupportedField(name));
        };
        fields.insert(name, field);
    }
    Ok(fields)
}
