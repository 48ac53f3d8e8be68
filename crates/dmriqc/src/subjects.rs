use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dmriqc_data::SubjectRecord;

/// Subject IDs for a run. An explicit listing file is taken at its word;
/// without one the subject root is scanned, counting only subdirectories
/// that carry at least one of the configured QC sources, so an output
/// directory nested under the root never masquerades as a subject.
pub fn discover(subjdir: &Path, listing: Option<&Path>, qcpaths: &[String]) -> Result<Vec<String>> {
    match listing {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read subject list {}", path.display()))?;
            Ok(raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect())
        }
        None => {
            let entries = fs::read_dir(subjdir).with_context(|| {
                format!("failed to list subject directories in {}", subjdir.display())
            })?;
            let mut ids = Vec::new();
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let has_source = qcpaths.iter().any(|rel| entry.path().join(rel).is_file());
                if has_source && let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
            ids.sort();
            Ok(ids)
        }
    }
}

/// Loads QC data for every subject, merging the configured source paths
/// in order. A subject with no readable source at all fails the run.
pub fn load(subjdir: &Path, ids: &[String], qcpaths: &[String]) -> Result<Vec<SubjectRecord>> {
    let mut subjects = Vec::with_capacity(ids.len());
    for id in ids {
        let dir = subjdir.join(id);
        let sources: Vec<PathBuf> = qcpaths.iter().map(|rel| dir.join(rel)).collect();
        let record = SubjectRecord::load(id, &sources)
            .with_context(|| format!("failed to load QC data for subject {id}"))?;
        subjects.push(record);
    }
    Ok(subjects)
}
