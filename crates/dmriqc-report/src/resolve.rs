use dmriqc_data::{GroupTable, QcMatrix, SubjectRecord};

/// Panel data resolved against the group table: the combined group matrix,
/// the subject's matching values when a subject context is present, and
/// the originating field name of every value column (used to look up the
/// right reference distribution per column).
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub group: QcMatrix,
    pub subject: Option<Vec<f64>>,
    pub names: Vec<String>,
}

impl Resolved {
    pub fn empty() -> Resolved {
        Resolved::default()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    /// Finite subject values exist, so subject-only panels have something
    /// to draw.
    pub fn has_subject_values(&self) -> bool {
        self.subject
            .as_deref()
            .is_some_and(|values| values.iter().any(|x| x.is_finite()))
    }
}

/// Resolves panel variables, concatenating multi-var panels along the
/// value axis. Any variable absent from the group empties the whole
/// result, which callers treat as "skip this panel". The subject vector
/// stays column-aligned with the group matrix: a subject missing a field
/// contributes NaN for that field's columns.
pub fn resolve(
    vars: &[String],
    group: &GroupTable,
    subject: Option<&SubjectRecord>,
) -> Resolved {
    let mut parts = Vec::with_capacity(vars.len());
    for var in vars {
        let matrix = group.get_data(var);
        if matrix.is_empty() {
            return Resolved::empty();
        }
        parts.push((var.as_str(), matrix));
    }
    if parts.is_empty() {
        return Resolved::empty();
    }

    let mut rows = vec![Vec::new(); group.subject_count()];
    let mut names = Vec::new();
    let mut subject_values = subject.map(|_| Vec::new());

    for (var, matrix) in &parts {
        let width = matrix.ncols();
        for (index, row) in rows.iter_mut().enumerate() {
            row.extend(matrix.row_padded(index));
        }
        names.extend((0..width).map(|_| var.to_string()));
        if let (Some(values), Some(subject)) = (subject_values.as_mut(), subject) {
            let mut own = subject.qc_values(var).unwrap_or_default();
            own.resize(width, f64::NAN);
            values.extend(own);
        }
    }

    Resolved {
        group: QcMatrix::from_rows(rows),
        subject: subject_values,
        names,
    }
}
