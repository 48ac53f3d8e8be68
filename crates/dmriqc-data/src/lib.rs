mod group;
mod subject;
mod value;

pub use group::{GroupTable, QcMatrix};
pub use subject::SubjectRecord;
pub use value::FieldValue;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} is not a JSON object")]
    NotAnObject(PathBuf),
    #[error("unsupported value shape for field {0}")]
    UnsupportedField(String),
    #[error("no usable QC source for subject {0}")]
    NoUsableSource(String),
    #[error("no value length available for QC field {0}")]
    NoLengthHint(String),
    #[error("inconsistent data fields across subjects: {}", .0.join("; "))]
    Inconsistent(Vec<String>),
    #[error("malformed group table: {0}")]
    MalformedGroupTable(String),
}
