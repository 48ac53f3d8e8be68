use std::fmt::Write;
use std::mem;

use dmriqc_data::{GroupTable, SubjectRecord};

use crate::ReportError;
use crate::definition::{PanelKind, PanelSpec, ReportDefinition};
use crate::outlier::{OutlierClassifier, Rag};
use crate::panels;
use crate::resolve;
use crate::svg::{self, Cell};

/// One line of a subject summary table: the metric, the subject's value,
/// and the reference distribution it was classified against.
pub(crate) struct TableRow {
    pub label: String,
    pub value: String,
    pub mean: String,
    pub std: String,
    pub rag: Rag,
}

/// Walks the definition in order and turns every dist panel into table
/// rows, one per value column. A changed group title starts a new table;
/// panels without one continue the table in progress, and rows gathered
/// before the first title appears belong to that first table. A table
/// that never receives a title is not emitted.
pub(crate) fn subject_tables(
    definition: &ReportDefinition,
    group: &GroupTable,
    subject: &SubjectRecord,
    classifier: &OutlierClassifier,
) -> Vec<(String, Vec<TableRow>)> {
    let mut tables: Vec<(String, Vec<TableRow>)> = Vec::new();
    let mut title: Option<String> = None;
    let mut rows: Vec<TableRow> = Vec::new();

    for row_panels in definition.groups() {
        for panel in row_panels {
            if panel.kind != PanelKind::Dist {
                continue;
            }
            if let Some(next) = panel.group_title.as_deref()
                && title.as_deref() != Some(next)
            {
                if let Some(done) = title.take() {
                    tables.push((done, mem::take(&mut rows)));
                }
                title = Some(next.to_string());
            }
            let resolved = resolve::resolve(&panel.vars, group, Some(subject));
            let Some(values) = resolved.subject.as_deref() else {
                continue;
            };
            rows.extend(panel_rows(panel, values, &resolved.names, group, classifier));
        }
    }
    if let Some(done) = title {
        tables.push((done, rows));
    }
    tables.retain(|(title, rows)| {
        if rows.is_empty() {
            tracing::warn!(table = %title, "subject table skipped, no rows");
        }
        !rows.is_empty()
    });
    tables
}

fn panel_rows(
    panel: &PanelSpec,
    values: &[f64],
    names: &[String],
    group: &GroupTable,
    classifier: &OutlierClassifier,
) -> Vec<TableRow> {
    let base = panel
        .title()
        .map(str::to_string)
        .or_else(|| names.first().cloned())
        .unwrap_or_default();
    let ticks = panel
        .xticklabels()
        .map(|source| panels::resolve_ticks(source, group))
        .unwrap_or_default();

    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let mut label = base.clone();
            if values.len() > 1 {
                if let Some(tick) = ticks.get(index) {
                    label.push_str(": ");
                    label.push_str(tick);
                } else if names.get(index).is_some_and(|name| *name != base) {
                    label.push_str(": ");
                    label.push_str(&names[index]);
                } else {
                    let _ = write!(label, " [{index}]");
                }
            }
            if let Some(unit) = panel.ylabel() {
                let _ = write!(label, " ({unit})");
            }

            let (mean, std, rag) = match names.get(index).and_then(|name| classifier.dist(name)) {
                Some((mean, std)) => (
                    format!("{mean:.2}"),
                    format!("{std:.2}"),
                    classifier.classify(*value, mean, std),
                ),
                None => ("-".to_string(), "-".to_string(), Rag::Unknown),
            };
            TableRow {
                label,
                value: format!("{value:.2}"),
                mean,
                std,
                rag,
            }
        })
        .collect()
}

/// Draws one table into its half-page cell. Column widths follow the
/// longest entry in each column, and the value cell carries the RAG tint.
pub(crate) fn render_table(
    out: &mut String,
    cell: &Cell,
    title: &str,
    rows: &[TableRow],
) -> Result<(), ReportError> {
    const HEADERS: [&str; 4] = ["metric", "value", "mean", "std"];

    let mut widths = HEADERS.map(str::len);
    for row in rows {
        widths[0] = widths[0].max(row.label.len());
        widths[1] = widths[1].max(row.value.len());
        widths[2] = widths[2].max(row.mean.len());
        widths[3] = widths[3].max(row.std.len());
    }
    let total: f64 = widths.iter().sum::<usize>() as f64;
    let usable = cell.width - 24.0;
    let mut bounds = [0.0f64; 5];
    let mut running = 0usize;
    for (index, width) in widths.iter().enumerate() {
        bounds[index] = cell.x + 12.0 + usable * running as f64 / total;
        running += width;
    }
    bounds[4] = cell.x + 12.0 + usable;

    let mut y = cell.y + 18.0;
    writeln!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"13\" font-weight=\"bold\" fill=\"#333\">{}</text>",
        bounds[0],
        y,
        svg::escape(title)
    )?;
    y += 22.0;

    let available = cell.y + cell.height - y - 6.0;
    let row_height = (available / (rows.len() + 1) as f64).clamp(11.0, 20.0);

    for (index, header) in HEADERS.iter().enumerate() {
        writeln!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" font-weight=\"bold\" fill=\"#444\">{}</text>",
            bounds[index] + 4.0,
            y,
            header
        )?;
    }
    writeln!(
        out,
        "<line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#999\"/>",
        bounds[0],
        y + 4.0,
        bounds[4],
        y + 4.0
    )?;
    y += row_height;

    for row in rows {
        if let Some(tint) = row.rag.fill() {
            writeln!(
                out,
                "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"{}\"/>",
                bounds[1],
                y - row_height + 6.0,
                bounds[2] - bounds[1],
                row_height,
                tint
            )?;
        }
        for (index, text) in [&row.label, &row.value, &row.mean, &row.std]
            .into_iter()
            .enumerate()
        {
            writeln!(
                out,
                "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" fill=\"#333\">{}</text>",
                bounds[index] + 4.0,
                y,
                svg::escape(text)
            )?;
        }
        y += row_height;
    }
    Ok(())
}
