mod definition;
mod document;
mod layout;
mod outlier;
mod panels;
mod render;
mod resolve;
mod svg;
mod table;

pub use definition::{DisplayAttr, PanelKind, PanelSpec, ReportDefinition, TickSource};
pub use document::{Document, Page};
pub use layout::{Paginator, balance_colspans};
pub use outlier::{OutlierClassifier, Rag, ReferenceDists};
pub use render::Report;
pub use resolve::{Resolved, resolve};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("format error: {0}")]
    Fmt(#[from] std::fmt::Error),
    #[error("report definition is empty")]
    EmptyDefinition,
    #[error("report definition: {0}")]
    BadDefinition(String),
    #[error("slicer failed: {0}")]
    Slicer(String),
}
