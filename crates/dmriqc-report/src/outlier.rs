use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use dmriqc_data::GroupTable;

use crate::ReportError;

/// Red/amber/green severity bucket for one value against its reference
/// distribution. `Unknown` absorbs NaN inputs so classification stays
/// total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rag {
    Green,
    Amber,
    Red,
    Unknown,
}

impl Rag {
    /// Cell tint for table rendering; `Unknown` leaves the cell untinted.
    pub fn fill(self) -> Option<&'static str> {
        match self {
            Rag::Green => Some("rgba(46, 201, 56, 0.5)"),
            Rag::Amber => Some("rgba(232, 181, 23, 0.5)"),
            Rag::Red => Some("rgba(204, 51, 51, 0.5)"),
            Rag::Unknown => None,
        }
    }
}

/// Reference (mean, std) per unprefixed QC field name, either loaded from
/// a `{"field": [mean, std]}` JSON file or derived from the group itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferenceDists {
    #[serde(flatten)]
    dists: BTreeMap<String, (f64, f64)>,
}

impl ReferenceDists {
    pub fn from_file(path: &Path) -> Result<ReferenceDists, ReportError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Self-referential baseline: mean and population std over every
    /// finite value of each QC field. A small epsilon keeps constant
    /// fields from dividing by zero downstream.
    pub fn from_group(group: &GroupTable) -> ReferenceDists {
        let mut dists = BTreeMap::new();
        for name in group.qc_field_names() {
            let values: Vec<f64> = group.get_data(name).finite_values().collect();
            if values.is_empty() {
                continue;
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance =
                values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
            dists.insert(name.to_string(), (mean, variance.sqrt() + 1e-10));
        }
        ReferenceDists { dists }
    }

    pub fn get(&self, field: &str) -> Option<(f64, f64)> {
        self.dists.get(field).copied()
    }

    pub fn insert(&mut self, field: impl Into<String>, mean: f64, std: f64) {
        self.dists.insert(field.into(), (mean, std));
    }

    pub fn is_empty(&self) -> bool {
        self.dists.is_empty()
    }
}

/// Sigma-threshold outlier classifier. Built once per report from the
/// reference distributions and threshold configuration, then shared
/// read-only by every renderer.
#[derive(Debug, Clone)]
pub struct OutlierClassifier {
    dists: ReferenceDists,
    amber_sigma: f64,
    red_sigma: f64,
}

impl OutlierClassifier {
    pub const DEFAULT_AMBER_SIGMA: f64 = 1.0;
    pub const DEFAULT_RED_SIGMA: f64 = 2.0;

    pub fn new(dists: ReferenceDists, amber_sigma: f64, red_sigma: f64) -> OutlierClassifier {
        OutlierClassifier {
            dists,
            amber_sigma,
            red_sigma,
        }
    }

    pub fn dist(&self, field: &str) -> Option<(f64, f64)> {
        self.dists.get(field)
    }

    /// Total over all inputs: a NaN value, mean or std buckets to
    /// `Unknown` rather than raising. Thresholds compare strictly, so a
    /// value sitting exactly on `amber_sigma` deviations is still green.
    pub fn classify(&self, value: f64, mean: f64, std: f64) -> Rag {
        let z = ((value - mean) / std).abs();
        if z.is_nan() {
            Rag::Unknown
        } else if z > self.red_sigma {
            Rag::Red
        } else if z > self.amber_sigma {
            Rag::Amber
        } else {
            Rag::Green
        }
    }

    /// Classifies against the stored reference for a field; a field with
    /// no reference distribution is `Unknown`.
    pub fn classify_field(&self, field: &str, value: f64) -> Rag {
        match self.dists.get(field) {
            Some((mean, std)) => self.classify(value, mean, std),
            None => Rag::Unknown,
        }
    }
}
