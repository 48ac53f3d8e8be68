use std::fmt::Write;

use crate::ReportError;

const MARGIN_LEFT: f64 = 52.0;
const MARGIN_RIGHT: f64 = 16.0;
const MARGIN_TOP: f64 = 26.0;
const MARGIN_BOTTOM: f64 = 40.0;

/// One panel's rectangle inside a page, in page coordinates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cell {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The axes rectangle inside a cell, after the label margins.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlotArea {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Cell {
    pub fn plot_area(&self) -> PlotArea {
        PlotArea {
            left: self.x + MARGIN_LEFT,
            top: self.y + MARGIN_TOP,
            width: (self.width - MARGIN_LEFT - MARGIN_RIGHT).max(1.0),
            height: (self.height - MARGIN_TOP - MARGIN_BOTTOM).max(1.0),
        }
    }
}

impl PlotArea {
    /// Page y for a data value, given the plotted value range.
    pub fn y_for(&self, value: f64, min: f64, max: f64) -> f64 {
        let span = (max - min).max(1e-12);
        self.top + self.height - ((value - min) / span) * self.height
    }
}

pub(crate) fn frame(out: &mut String, plot: &PlotArea) -> Result<(), ReportError> {
    writeln!(
        out,
        "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"#fff\" stroke=\"#ddd\"/>",
        plot.left, plot.top, plot.width, plot.height
    )?;
    Ok(())
}

pub(crate) fn y_axis(
    out: &mut String,
    plot: &PlotArea,
    min: f64,
    max: f64,
    ticks: usize,
) -> Result<(), ReportError> {
    if ticks < 2 || (max - min).abs() < 1e-9 {
        return Ok(());
    }
    let (start, step, count) = nice_ticks(min, max, ticks);
    for i in 0..count {
        let value = start + step * i as f64;
        if value < min - 1e-9 || value > max + 1e-9 {
            continue;
        }
        let y = plot.y_for(value, min, max);
        writeln!(
            out,
            "<line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#eee\"/>",
            plot.left,
            y,
            plot.left + plot.width,
            y
        )?;
        writeln!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" fill=\"#666\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>",
            plot.left - 4.0,
            y,
            fmt_tick(value)
        )?;
    }
    Ok(())
}

/// Categorical x ticks: one label centered under each value column.
pub(crate) fn x_category_labels(
    out: &mut String,
    plot: &PlotArea,
    labels: &[String],
) -> Result<(), ReportError> {
    if labels.is_empty() {
        return Ok(());
    }
    let slot = plot.width / labels.len() as f64;
    for (i, label) in labels.iter().enumerate() {
        writeln!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" fill=\"#666\" text-anchor=\"middle\" dominant-baseline=\"hanging\">{}</text>",
            plot.left + (i as f64 + 0.5) * slot,
            plot.top + plot.height + 4.0,
            escape(label)
        )?;
    }
    Ok(())
}

/// Numeric x ticks for index-based plots (line panels).
pub(crate) fn x_axis(
    out: &mut String,
    plot: &PlotArea,
    min: f64,
    max: f64,
    ticks: usize,
) -> Result<(), ReportError> {
    if ticks < 2 || (max - min).abs() < 1e-9 {
        return Ok(());
    }
    let (start, step, count) = nice_ticks(min, max, ticks);
    for i in 0..count {
        let value = start + step * i as f64;
        if value < min - 1e-9 || value > max + 1e-9 {
            continue;
        }
        let x = plot.left + ((value - min) / (max - min).max(1e-12)) * plot.width;
        writeln!(
            out,
            "<line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#eee\"/>",
            x,
            plot.top,
            x,
            plot.top + plot.height
        )?;
        writeln!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" fill=\"#666\" text-anchor=\"middle\" dominant-baseline=\"hanging\">{}</text>",
            x,
            plot.top + plot.height + 4.0,
            fmt_tick(value)
        )?;
    }
    Ok(())
}

pub(crate) fn title(out: &mut String, cell: &Cell, text: &str) -> Result<(), ReportError> {
    let plot = cell.plot_area();
    writeln!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\" font-weight=\"bold\" fill=\"#333\" text-anchor=\"middle\">{}</text>",
        plot.left + plot.width / 2.0,
        cell.y + 16.0,
        escape(text)
    )?;
    Ok(())
}

pub(crate) fn x_label(out: &mut String, plot: &PlotArea, text: &str) -> Result<(), ReportError> {
    writeln!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"11\" fill=\"#444\" text-anchor=\"middle\">{}</text>",
        plot.left + plot.width / 2.0,
        plot.top + plot.height + 28.0,
        escape(text)
    )?;
    Ok(())
}

pub(crate) fn y_label(out: &mut String, plot: &PlotArea, text: &str) -> Result<(), ReportError> {
    let x = plot.left - 34.0;
    let y = plot.top + plot.height / 2.0;
    writeln!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"11\" fill=\"#444\" text-anchor=\"middle\" transform=\"rotate(-90 {:.1} {:.1})\">{}</text>",
        x,
        y,
        x,
        y,
        escape(text)
    )?;
    Ok(())
}

pub(crate) fn fmt_tick(value: f64) -> String {
    if (value - value.round()).abs() < 0.001 {
        format!("{}", value.round() as i64)
    } else if value.abs() < 10.0 {
        format!("{value:.2}")
    } else {
        format!("{value:.1}")
    }
}

/// Tick start, step and count covering `[min, max]` on round boundaries.
pub(crate) fn nice_ticks(min: f64, max: f64, ticks: usize) -> (f64, f64, usize) {
    let range = (max - min).abs().max(1e-9);
    let rough = range / (ticks as f64 - 1.0);
    let magnitude = 10f64.powf(rough.abs().log10().floor());
    let normalized = rough / magnitude;
    let step = if normalized <= 1.0 {
        1.0
    } else if normalized <= 2.0 {
        2.0
    } else if normalized <= 5.0 {
        5.0
    } else {
        10.0
    } * magnitude;
    let start = (min / step).floor() * step;
    let end = (max / step).ceil() * step;
    let count = ((end - start) / step).round() as usize + 1;
    (start, step, count)
}

/// Padded plotting range over the finite values, widened when degenerate
/// so single-valued data still gets a visible axis span.
pub(crate) fn value_range<I: Iterator<Item = f64>>(values: I) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for value in values.filter(|x| x.is_finite()) {
        min = min.min(value);
        max = max.max(value);
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let span = max - min;
    if span < 1e-9 {
        let pad = min.abs().max(1.0) * 0.1;
        return (min - pad, max + pad);
    }
    (min - span * 0.1, max + span * 0.1)
}

pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
