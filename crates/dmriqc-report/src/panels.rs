use std::fmt::Write;
use std::fs;
use std::path::Path;
use std::process::Command;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use dmriqc_data::{FieldValue, GroupTable, SubjectRecord};

use crate::ReportError;
use crate::definition::{DisplayAttr, PanelKind, PanelSpec, TickSource};
use crate::resolve;
use crate::svg::{self, Cell, PlotArea};

pub(crate) struct PanelContext<'a> {
    pub group: &'a GroupTable,
    pub subject: Option<&'a SubjectRecord>,
    pub slicer: &'a str,
}

/// Renders one panel into its grid cell. Returns false when the panel has
/// nothing to draw; nothing is written in that case so the caller can
/// hand the slot to the next panel.
pub(crate) fn render(
    page: &mut String,
    cell: &Cell,
    panel: &PanelSpec,
    ctx: &PanelContext<'_>,
) -> Result<bool, ReportError> {
    let mut buf = String::new();
    let drawn = match panel.kind {
        PanelKind::Dist => dist(&mut buf, cell, panel, ctx)?,
        PanelKind::Bar => bar(&mut buf, cell, panel, ctx)?,
        PanelKind::Line => line(&mut buf, cell, panel, ctx)?,
        PanelKind::Heatmap => heatmap(&mut buf, cell, panel, ctx)?,
        PanelKind::Image => image(&mut buf, cell, panel, ctx)?,
    };
    if !drawn {
        return Ok(false);
    }
    apply_display_attrs(&mut buf, cell, panel, ctx.group)?;
    page.push_str(&buf);
    Ok(true)
}

/// Per-value-column violins over the group matrix, with the subject's own
/// values overlaid as white stars when a subject context exists.
fn dist(
    out: &mut String,
    cell: &Cell,
    panel: &PanelSpec,
    ctx: &PanelContext<'_>,
) -> Result<bool, ReportError> {
    let resolved = resolve::resolve(&panel.vars, ctx.group, ctx.subject);
    if resolved.is_empty() || resolved.group.finite_values().next().is_none() {
        tracing::warn!(vars = ?panel.vars, "dist panel skipped, no group data");
        return Ok(false);
    }
    let plot = cell.plot_area();
    let columns = resolved.group.ncols();

    let overlay: &[f64] = resolved.subject.as_deref().unwrap_or(&[]);
    let (min, max) = svg::value_range(
        resolved
            .group
            .finite_values()
            .chain(overlay.iter().copied()),
    );

    svg::frame(out, &plot)?;
    svg::y_axis(out, &plot, min, max, 5)?;

    let slot = plot.width / columns as f64;
    for index in 0..columns {
        let values: Vec<f64> = resolved
            .group
            .column(index)
            .into_iter()
            .filter(|x| x.is_finite())
            .collect();
        if values.is_empty() {
            continue;
        }
        let center = plot.left + (index as f64 + 0.5) * slot;
        violin(out, &plot, center, slot * 0.42, &values, min, max)?;
    }

    for (index, value) in overlay.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        let center = plot.left + (index as f64 + 0.5) * slot;
        star(out, center, plot.y_for(*value, min, max), 6.0)?;
    }

    if panel.xticklabels().is_none() && columns > 1 {
        svg::x_category_labels(out, &plot, &resolved.names)?;
    }
    Ok(true)
}

/// One bar per resolved subject value.
fn bar(
    out: &mut String,
    cell: &Cell,
    panel: &PanelSpec,
    ctx: &PanelContext<'_>,
) -> Result<bool, ReportError> {
    let resolved = resolve::resolve(&panel.vars, ctx.group, ctx.subject);
    if resolved.is_empty() || !resolved.has_subject_values() {
        tracing::warn!(vars = ?panel.vars, "bar panel skipped, no subject data");
        return Ok(false);
    }
    let values = resolved.subject.as_deref().unwrap_or(&[]);
    let plot = cell.plot_area();
    let (range_min, range_max) = svg::value_range(values.iter().copied());
    let min = range_min.min(0.0);
    let max = range_max.max(0.0);

    svg::frame(out, &plot)?;
    svg::y_axis(out, &plot, min, max, 5)?;

    let slot = plot.width / values.len() as f64;
    let baseline = plot.y_for(0.0, min, max);
    for (index, value) in values.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        let y = plot.y_for(*value, min, max);
        let (top, height) = if y < baseline {
            (y, baseline - y)
        } else {
            (baseline, y - baseline)
        };
        writeln!(
            out,
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"#7db8da\" stroke=\"#4a7fa5\"/>",
            plot.left + index as f64 * slot + slot * 0.125,
            top,
            slot * 0.75,
            height.max(0.5)
        )?;
    }

    if panel.xticklabels().is_none() && values.len() > 1 {
        svg::x_category_labels(out, &plot, &resolved.names)?;
    }
    Ok(true)
}

/// The subject vector as a connected sequence indexed by position, with
/// gaps where values are NaN.
fn line(
    out: &mut String,
    cell: &Cell,
    panel: &PanelSpec,
    ctx: &PanelContext<'_>,
) -> Result<bool, ReportError> {
    let resolved = resolve::resolve(&panel.vars, ctx.group, ctx.subject);
    if resolved.is_empty() || !resolved.has_subject_values() {
        tracing::warn!(vars = ?panel.vars, "line panel skipped, no subject data");
        return Ok(false);
    }
    let values = resolved.subject.as_deref().unwrap_or(&[]);
    let plot = cell.plot_area();
    let (min, max) = svg::value_range(values.iter().copied());

    svg::frame(out, &plot)?;
    svg::y_axis(out, &plot, min, max, 5)?;
    if values.len() > 1 {
        svg::x_axis(out, &plot, 0.0, (values.len() - 1) as f64, 5)?;
    }

    let step = if values.len() > 1 {
        plot.width / (values.len() - 1) as f64
    } else {
        0.0
    };
    let mut path = String::new();
    let mut pen_down = false;
    for (index, value) in values.iter().enumerate() {
        if !value.is_finite() {
            pen_down = false;
            continue;
        }
        let x = plot.left + index as f64 * step;
        let y = plot.y_for(*value, min, max);
        write!(path, "{}{x:.1} {y:.1} ", if pen_down { "L" } else { "M" })?;
        pen_down = true;
    }
    writeln!(
        out,
        "<path d=\"{}\" fill=\"none\" stroke=\"#1f77b4\" stroke-width=\"1.5\"/>",
        path.trim_end()
    )?;
    if values.len() == 1 {
        writeln!(
            out,
            "<circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"2.5\" fill=\"#1f77b4\"/>",
            plot.left,
            plot.y_for(values[0], min, max)
        )?;
    }
    Ok(true)
}

/// Subject 2-D data as a diverging blue-white-red map. Rejects anything
/// that is not a genuinely rectangular matrix.
fn heatmap(
    out: &mut String,
    cell: &Cell,
    panel: &PanelSpec,
    ctx: &PanelContext<'_>,
) -> Result<bool, ReportError> {
    let Some(subject) = ctx.subject else {
        return Ok(false);
    };
    let Some(var) = panel.vars.first() else {
        return Ok(false);
    };
    let Some(rows) = subject.qc_matrix(var) else {
        tracing::warn!(var = %var, "heatmap panel skipped, subject data is not 2-D");
        return Ok(false);
    };
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if width == 0 || rows.iter().any(|row| row.len() != width) {
        tracing::warn!(var = %var, "heatmap panel skipped, matrix is ragged or empty");
        return Ok(false);
    }

    let finite: Vec<f64> = rows
        .iter()
        .flatten()
        .copied()
        .filter(|x| x.is_finite())
        .collect();
    let Some((&first, _)) = finite.split_first() else {
        return Ok(false);
    };
    let min = finite.iter().copied().fold(first, f64::min);
    let max = finite.iter().copied().fold(first, f64::max);
    let span = (max - min).max(1e-12);

    let plot = cell.plot_area();
    svg::frame(out, &plot)?;
    let cell_w = plot.width / width as f64;
    let cell_h = plot.height / rows.len() as f64;
    for (i, row) in rows.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            let fill = if value.is_finite() {
                diverging_color((value - min) / span)
            } else {
                "#cccccc".to_string()
            };
            writeln!(
                out,
                "<rect x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{:.2}\" fill=\"{}\"/>",
                plot.left + j as f64 * cell_w,
                plot.top + i as f64 * cell_h,
                cell_w,
                cell_h,
                fill
            )?;
        }
    }
    writeln!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" fill=\"#666\">{} .. {}</text>",
        plot.left,
        plot.top + plot.height + 14.0,
        svg::fmt_tick(min),
        svg::fmt_tick(max)
    )?;
    Ok(true)
}

/// Embeds the subject's image as a data URI, rasterizing volumes through
/// the external slicer first. All failures degrade to a skipped panel.
fn image(
    out: &mut String,
    cell: &Cell,
    panel: &PanelSpec,
    ctx: &PanelContext<'_>,
) -> Result<bool, ReportError> {
    let Some(subject) = ctx.subject else {
        return Ok(false);
    };
    let Some(name) = panel.image.as_deref() else {
        return Ok(false);
    };
    let Some(path) = subject.lookup_image(name) else {
        tracing::warn!(
            subject = subject.subject_id(),
            image = name,
            "image panel skipped, file not found"
        );
        return Ok(false);
    };
    let bytes = match raster_bytes(ctx.slicer, &path, panel.intensity) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(image = %path.display(), error = %err, "image panel skipped");
            return Ok(false);
        }
    };

    let plot = cell.plot_area();
    writeln!(
        out,
        "<image x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" preserveAspectRatio=\"xMidYMid meet\" href=\"data:image/png;base64,{}\"/>",
        plot.left,
        plot.top,
        plot.width,
        plot.height,
        STANDARD.encode(&bytes)
    )?;
    Ok(true)
}

fn raster_bytes(
    slicer: &str,
    path: &Path,
    intensity: Option<(f64, f64)>,
) -> Result<Vec<u8>, ReportError> {
    if !is_volume(path) {
        return Ok(fs::read(path)?);
    }
    let workdir = tempfile::tempdir()?;
    let rendered = workdir.path().join("slice.png");
    let mut command = Command::new(slicer);
    command.arg(path);
    if let Some((low, high)) = intensity {
        command.arg("-i").arg(low.to_string()).arg(high.to_string());
    }
    command.arg("-a").arg(&rendered);
    let output = command
        .output()
        .map_err(|err| ReportError::Slicer(format!("{slicer}: {err}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReportError::Slicer(format!(
            "{slicer} exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }
    Ok(fs::read(&rendered)?)
}

fn is_volume(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

fn apply_display_attrs(
    out: &mut String,
    cell: &Cell,
    panel: &PanelSpec,
    group: &GroupTable,
) -> Result<(), ReportError> {
    let plot = cell.plot_area();
    for attr in &panel.attrs {
        match attr {
            DisplayAttr::Title(text) => svg::title(out, cell, text)?,
            DisplayAttr::XLabel(text) => svg::x_label(out, &plot, text)?,
            DisplayAttr::YLabel(text) => svg::y_label(out, &plot, text)?,
            DisplayAttr::XTickLabels(source) => {
                let labels = resolve_ticks(source, group);
                svg::x_category_labels(out, &plot, &labels)?;
            }
        }
    }
    Ok(())
}

/// Tick labels are either literal or the name of a data field whose value
/// supplies them; an unmatched name falls back to the literal string.
pub(crate) fn resolve_ticks(source: &TickSource, group: &GroupTable) -> Vec<String> {
    match source {
        TickSource::Labels(labels) => labels.clone(),
        TickSource::Field(name) => match group.data_field(name) {
            Some(field) => field_labels(field),
            None => vec![name.clone()],
        },
    }
}

fn field_labels(field: &FieldValue) -> Vec<String> {
    match field {
        FieldValue::Scalar(x) => vec![svg::fmt_tick(*x)],
        FieldValue::Vector(xs) => xs.iter().map(|x| svg::fmt_tick(*x)).collect(),
        FieldValue::Text(text) => vec![text.clone()],
        FieldValue::Flag(flag) => vec![flag.to_string()],
        FieldValue::Matrix(_) => Vec::new(),
    }
}

/// Mirrored kernel-density silhouette with inner value dots and a median
/// tick.
fn violin(
    out: &mut String,
    plot: &PlotArea,
    center: f64,
    half_width: f64,
    values: &[f64],
    min: f64,
    max: f64,
) -> Result<(), ReportError> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    let bandwidth = 1.06 * std * n.powf(-0.2);

    if values.len() > 1 && bandwidth > 0.0 {
        let samples = 24;
        let lo = (mean - 3.0 * std).max(min);
        let hi = (mean + 3.0 * std).min(max);
        let mut silhouette = Vec::with_capacity(samples);
        let mut peak = 0.0f64;
        for i in 0..samples {
            let y = lo + (hi - lo) * i as f64 / (samples - 1) as f64;
            let density: f64 = values
                .iter()
                .map(|v| (-0.5 * ((y - v) / bandwidth).powi(2)).exp())
                .sum();
            peak = peak.max(density);
            silhouette.push((y, density));
        }
        if peak > 0.0 {
            let mut points = String::new();
            for (y, density) in &silhouette {
                let x = center + half_width * density / peak;
                write!(points, "{:.1},{:.1} ", x, plot.y_for(*y, min, max))?;
            }
            for (y, density) in silhouette.iter().rev() {
                let x = center - half_width * density / peak;
                write!(points, "{:.1},{:.1} ", x, plot.y_for(*y, min, max))?;
            }
            writeln!(
                out,
                "<polygon points=\"{}\" fill=\"#7db8da\" fill-opacity=\"0.6\" stroke=\"#4a7fa5\" stroke-width=\"0.8\"/>",
                points.trim_end()
            )?;
        }
    }

    for value in values {
        writeln!(
            out,
            "<circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"1.8\" fill=\"#335577\"/>",
            center,
            plot.y_for(*value, min, max)
        )?;
    }

    let median_y = plot.y_for(median(values), min, max);
    writeln!(
        out,
        "<line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#333\" stroke-width=\"1.2\"/>",
        center - half_width * 0.5,
        median_y,
        center + half_width * 0.5,
        median_y
    )?;
    Ok(())
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Five-point star marker, white with a dark outline so it stands out on
/// any violin fill.
fn star(out: &mut String, cx: f64, cy: f64, radius: f64) -> Result<(), ReportError> {
    use std::f64::consts::PI;
    let mut points = String::new();
    for i in 0..10 {
        let r = if i % 2 == 0 { radius } else { radius * 0.45 };
        let angle = -PI / 2.0 + i as f64 * PI / 5.0;
        write!(points, "{:.1},{:.1} ", cx + r * angle.cos(), cy + r * angle.sin())?;
    }
    writeln!(
        out,
        "<polygon points=\"{}\" fill=\"#fff\" stroke=\"#333\" stroke-width=\"0.8\"/>",
        points.trim_end()
    )?;
    Ok(())
}

/// 0 maps to blue, 0.5 to white, 1 to red.
fn diverging_color(t: f64) -> String {
    fn lerp(a: f64, b: f64, u: f64) -> u8 {
        (a + (b - a) * u).round().clamp(0.0, 255.0) as u8
    }
    let t = t.clamp(0.0, 1.0);
    let (r, g, b) = if t < 0.5 {
        let u = t / 0.5;
        (lerp(33.0, 255.0, u), lerp(102.0, 255.0, u), lerp(172.0, 255.0, u))
    } else {
        let u = (t - 0.5) / 0.5;
        (lerp(255.0, 178.0, u), lerp(255.0, 24.0, u), lerp(255.0, 43.0, u))
    };
    format!("#{r:02x}{g:02x}{b:02x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn subject(id: &str, entries: &[(&str, FieldValue)]) -> SubjectRecord {
        let mut fields = BTreeMap::new();
        for (name, field) in entries {
            fields.insert(name.to_string(), field.clone());
        }
        SubjectRecord::new(id, fields)
    }

    fn group() -> GroupTable {
        let subjects = vec![
            subject("s01", &[("qc_motion_abs", FieldValue::Scalar(0.2))]),
            subject("s02", &[("qc_motion_abs", FieldValue::Scalar(0.3))]),
        ];
        GroupTable::aggregate(&subjects).expect("aggregate")
    }

    fn cell() -> Cell {
        Cell {
            x: 0.0,
            y: 0.0,
            width: 300.0,
            height: 240.0,
        }
    }

    fn panel(raw: &str) -> PanelSpec {
        let definition =
            crate::ReportDefinition::parse_str(&format!(r#"{{"report": [[{raw}]]}}"#))
                .expect("parse");
        definition.groups()[0][0].clone()
    }

    #[test]
    fn dist_renders_group_data_and_skips_absent_fields() {
        let group = group();
        let ctx = PanelContext {
            group: &group,
            subject: None,
            slicer: "slicer",
        };
        let mut page = String::new();
        let drawn = render(&mut page, &cell(), &panel(r#"{"var": "motion_abs"}"#), &ctx)
            .expect("render");
        assert!(drawn);
        assert!(page.contains("<polygon") || page.contains("<circle"));

        let mut empty_page = String::new();
        let drawn = render(
            &mut empty_page,
            &cell(),
            &panel(r#"{"var": "absent"}"#),
            &ctx,
        )
        .expect("render");
        assert!(!drawn);
        assert!(empty_page.is_empty());
    }

    #[test]
    fn subject_only_panels_need_a_subject() {
        let group = group();
        let no_subject = PanelContext {
            group: &group,
            subject: None,
            slicer: "slicer",
        };
        let spec = panel(r#"{"type": "bar", "var": "motion_abs"}"#);
        let mut page = String::new();
        assert!(!render(&mut page, &cell(), &spec, &no_subject).expect("render"));

        let s01 = subject("s01", &[("qc_motion_abs", FieldValue::Scalar(0.2))]);
        let with_subject = PanelContext {
            group: &group,
            subject: Some(&s01),
            slicer: "slicer",
        };
        assert!(render(&mut page, &cell(), &spec, &with_subject).expect("render"));
        assert!(page.contains("<rect"));
    }

    #[test]
    fn dist_overlays_the_subject_as_a_star() {
        let group = group();
        let s01 = subject("s01", &[("qc_motion_abs", FieldValue::Scalar(0.2))]);
        let ctx = PanelContext {
            group: &group,
            subject: Some(&s01),
            slicer: "slicer",
        };
        let mut page = String::new();
        assert!(render(&mut page, &cell(), &panel(r#"{"var": "motion_abs"}"#), &ctx)
            .expect("render"));
        assert!(page.contains("fill=\"#fff\""));
    }

    #[test]
    fn heatmap_requires_a_rectangular_matrix() {
        let matrix = FieldValue::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let with_matrix = subject("s01", &[("qc_outlier_map", matrix)]);
        let ragged = subject(
            "s02",
            &[(
                "qc_outlier_map",
                FieldValue::Matrix(vec![vec![1.0, 2.0], vec![3.0]]),
            )],
        );
        let flat = subject("s03", &[("qc_outlier_map", FieldValue::Vector(vec![1.0]))]);
        let group = GroupTable::aggregate(&[]).expect("aggregate");
        let spec = panel(r#"{"type": "heatmap", "var": "outlier_map"}"#);

        for (record, expected) in [(&with_matrix, true), (&ragged, false), (&flat, false)] {
            let ctx = PanelContext {
                group: &group,
                subject: Some(record),
                slicer: "slicer",
            };
            let mut page = String::new();
            assert_eq!(
                render(&mut page, &cell(), &spec, &ctx).expect("render"),
                expected
            );
        }
    }

    #[test]
    fn missing_images_skip_without_running_the_slicer() {
        let group = group();
        let s01 = subject("s01", &[]);
        let ctx = PanelContext {
            group: &group,
            subject: Some(&s01),
            slicer: "/nonexistent/slicer",
        };
        let mut page = String::new();
        let drawn = render(
            &mut page,
            &cell(),
            &panel(r#"{"type": "img", "img": "avg_b0"}"#),
            &ctx,
        )
        .expect("render");
        assert!(!drawn);
    }

    #[test]
    fn tick_sources_resolve_against_data_fields() {
        let subjects = vec![subject(
            "s01",
            &[
                ("data_unique_bvals", FieldValue::Vector(vec![0.0, 1000.0])),
                ("qc_snr", FieldValue::Scalar(1.0)),
            ],
        )];
        let group = GroupTable::aggregate(&subjects).expect("aggregate");

        let resolved = resolve_ticks(&TickSource::Field("data_unique_bvals".into()), &group);
        assert_eq!(resolved, vec!["0", "1000"]);

        let fallback = resolve_ticks(&TickSource::Field("not_a_field".into()), &group);
        assert_eq!(fallback, vec!["not_a_field"]);

        let literal = resolve_ticks(
            &TickSource::Labels(vec!["a".into(), "b".into()]),
            &group,
        );
        assert_eq!(literal, vec!["a", "b"]);
    }
}
