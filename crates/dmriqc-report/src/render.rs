use std::mem;
use std::path::Path;

use dmriqc_data::{GroupTable, SubjectRecord};

use crate::ReportError;
use crate::definition::ReportDefinition;
use crate::document::{Document, Page};
use crate::layout::{Paginator, balance_colspans};
use crate::outlier::{OutlierClassifier, ReferenceDists};
use crate::panels::{self, PanelContext};
use crate::svg::Cell;
use crate::table;

const PAGE_MARGIN: f64 = 30.0;
const HEADER_HEIGHT: f64 = 46.0;
const FOOTER_HEIGHT: f64 = 24.0;

/// One report run: a parsed definition applied to a group table, with an
/// optional subject overlaid on every panel and summarized in tables.
pub struct Report<'a> {
    definition: &'a ReportDefinition,
    group: &'a GroupTable,
    subject: Option<&'a SubjectRecord>,
    classifier: OutlierClassifier,
    slicer: String,
}

impl<'a> Report<'a> {
    pub fn new(
        definition: &'a ReportDefinition,
        group: &'a GroupTable,
        subject: Option<&'a SubjectRecord>,
        reference: Option<ReferenceDists>,
        amber_sigma: f64,
        red_sigma: f64,
    ) -> Result<Report<'a>, ReportError> {
        if definition.panel_count() == 0 {
            return Err(ReportError::EmptyDefinition);
        }
        let dists = reference.unwrap_or_else(|| ReferenceDists::from_group(group));
        Ok(Report {
            definition,
            group,
            subject,
            classifier: OutlierClassifier::new(dists, amber_sigma, red_sigma),
            slicer: "slicer".to_string(),
        })
    }

    /// Overrides the external command used to rasterize volume images.
    pub fn with_slicer(mut self, slicer: impl Into<String>) -> Report<'a> {
        self.slicer = slicer.into();
        self
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        self.document()?.save(path)
    }

    pub fn document(&self) -> Result<Document, ReportError> {
        let mut document = match self.subject {
            Some(subject) => Document::new(
                format!("Subject report: {}", subject.subject_id()),
                format!("against {} subjects", self.group.subject_count()),
            ),
            None => Document::new(
                "Group report",
                format!("{} subjects", self.group.subject_count()),
            ),
        };
        if let Some(subject) = self.subject {
            self.render_tables(&mut document, subject)?;
        }
        self.render_plots(&mut document)?;
        Ok(document)
    }

    /// Summary tables lead the subject report, two side by side per page.
    /// The leading page is kept even when no table came out of the pass.
    fn render_tables(
        &self,
        document: &mut Document,
        subject: &SubjectRecord,
    ) -> Result<(), ReportError> {
        let tables = table::subject_tables(self.definition, self.group, subject, &self.classifier);
        if tables.is_empty() {
            document.push_page(Page::new());
            return Ok(());
        }
        for pair in tables.chunks(2) {
            let mut page = Page::new();
            for (slot, (title, rows)) in pair.iter().enumerate() {
                table::render_table(page.body_mut(), &table_cell(slot), title, rows)?;
            }
            document.push_page(page);
        }
        Ok(())
    }

    /// Lays the panel groups onto a fixed grid, one group per row. Groups
    /// that draw nothing give their row back, and the page in progress is
    /// always flushed at the end, even when it is still blank.
    fn render_plots(&self, document: &mut Document) -> Result<(), ReportError> {
        let columns = self.definition.max_panel_count().max(1);
        let ctx = PanelContext {
            group: self.group,
            subject: self.subject,
            slicer: &self.slicer,
        };

        let mut paginator = Paginator::new(Paginator::ROWS_PER_PAGE);
        let mut page = Page::new();
        for row_panels in self.definition.groups() {
            let spans: Vec<usize> = row_panels.iter().map(|panel| panel.colspan).collect();
            let spans = balance_colspans(&spans, columns);

            let row = paginator.row_on_page();
            let mut col = 0usize;
            let mut drawn_any = false;
            for (panel, span) in row_panels.iter().zip(&spans) {
                let cell = grid_cell(row, col, *span, columns);
                if panels::render(page.body_mut(), &cell, panel, &ctx)? {
                    col += span;
                    drawn_any = true;
                }
            }
            if drawn_any && paginator.advance() {
                document.push_page(mem::replace(&mut page, Page::new()));
            }
        }
        document.push_page(page);
        Ok(())
    }
}

fn grid_cell(row: usize, col: usize, span: usize, columns: usize) -> Cell {
    let grid_top = HEADER_HEIGHT + 8.0;
    let grid_width = Document::PAGE_WIDTH - 2.0 * PAGE_MARGIN;
    let grid_height = Document::PAGE_HEIGHT - grid_top - FOOTER_HEIGHT - PAGE_MARGIN;
    let cell_width = grid_width / columns as f64;
    let row_height = grid_height / Paginator::ROWS_PER_PAGE as f64;
    Cell {
        x: PAGE_MARGIN + col as f64 * cell_width,
        y: grid_top + row as f64 * row_height,
        width: cell_width * span as f64,
        height: row_height,
    }
}

fn table_cell(slot: usize) -> Cell {
    let grid_top = HEADER_HEIGHT + 8.0;
    let width = (Document::PAGE_WIDTH - 2.0 * PAGE_MARGIN) / 2.0;
    Cell {
        x: PAGE_MARGIN + slot as f64 * width,
        y: grid_top,
        width,
        height: Document::PAGE_HEIGHT - grid_top - FOOTER_HEIGHT - PAGE_MARGIN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmriqc_data::FieldValue;
    use std::collections::BTreeMap;

    fn subject(id: &str, entries: &[(&str, FieldValue)]) -> SubjectRecord {
        let mut fields = BTreeMap::new();
        for (name, field) in entries {
            fields.insert(name.to_string(), field.clone());
        }
        SubjectRecord::new(id, fields)
    }

    fn motion_group() -> GroupTable {
        let subjects = vec![
            subject("s01", &[("qc_motion_abs", FieldValue::Scalar(0.2))]),
            subject("s02", &[("qc_motion_abs", FieldValue::Scalar(0.3))]),
        ];
        GroupTable::aggregate(&subjects).expect("aggregate")
    }

    fn definition_of(groups: usize, var: &str) -> ReportDefinition {
        let row = format!(r#"[{{"var": "{var}"}}]"#);
        let rows = vec![row; groups].join(", ");
        ReportDefinition::parse_str(&format!(r#"{{"report": [{rows}]}}"#)).expect("parse")
    }

    fn report<'a>(
        definition: &'a ReportDefinition,
        group: &'a GroupTable,
        subject: Option<&'a SubjectRecord>,
    ) -> Report<'a> {
        Report::new(
            definition,
            group,
            subject,
            None,
            OutlierClassifier::DEFAULT_AMBER_SIGMA,
            OutlierClassifier::DEFAULT_RED_SIGMA,
        )
        .expect("report")
    }

    #[test]
    fn a_single_panel_group_report_is_one_page() {
        let definition = definition_of(1, "motion_abs");
        let group = motion_group();
        let document = report(&definition, &group, None).document().expect("render");
        assert_eq!(document.page_count(), 1);

        let html = document.to_html().expect("html");
        assert!(html.contains("<polygon"));
        assert!(html.contains("page 1 of 1"));
    }

    #[test]
    fn seven_groups_paginate_as_three_then_three_then_one() {
        let definition = definition_of(7, "motion_abs");
        let group = motion_group();
        let document = report(&definition, &group, None).document().expect("render");
        assert_eq!(document.page_count(), 3);
    }

    #[test]
    fn six_groups_leave_a_trailing_blank_page() {
        let definition = definition_of(6, "motion_abs");
        let group = motion_group();
        let document = report(&definition, &group, None).document().expect("render");
        assert_eq!(document.page_count(), 3);
    }

    #[test]
    fn undrawable_groups_give_their_row_back() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [
                [{"var": "motion_abs"}],
                [{"var": "absent"}],
                [{"var": "motion_abs"}]
            ]}"#,
        )
        .expect("parse");
        let group = motion_group();
        let document = report(&definition, &group, None).document().expect("render");
        assert_eq!(document.page_count(), 1);
    }

    #[test]
    fn a_fully_undrawable_report_is_one_blank_page() {
        let definition = definition_of(2, "absent");
        let group = motion_group();
        let document = report(&definition, &group, None).document().expect("render");
        assert_eq!(document.page_count(), 1);

        let html = document.to_html().expect("html");
        assert!(!html.contains("<polygon"));
    }

    #[test]
    fn skipped_panels_hand_their_slot_to_the_next_one() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [[{"var": "absent"}, {"var": "motion_abs"}]]}"#,
        )
        .expect("parse");
        let group = motion_group();
        let html = report(&definition, &group, None)
            .document()
            .expect("render")
            .to_html()
            .expect("html");

        // Two columns: a panel at the first slot frames at x = 82, at the
        // second slot x = 465.5.
        assert!(html.contains("x=\"82.0\""));
        assert!(!html.contains("x=\"465.5\""));
    }

    #[test]
    fn subject_reports_lead_with_a_classified_table() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [[{"var": "motion_abs", "group_title": "Motion"}]]}"#,
        )
        .expect("parse");
        let group = motion_group();
        let s01 = subject("s01", &[("qc_motion_abs", FieldValue::Scalar(0.2))]);
        let document = report(&definition, &group, Some(&s01))
            .document()
            .expect("render");
        assert_eq!(document.page_count(), 2);

        let html = document.to_html().expect("html");
        assert!(html.contains("Subject report: s01"));
        assert!(html.contains("0.20"));
        assert!(html.contains("0.25"));
        assert!(html.contains("rgba(46, 201, 56, 0.5)"));
        assert!(html.contains("fill=\"#fff\""));
    }

    #[test]
    fn subject_tables_sit_side_by_side() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [
                [{"var": "motion_abs", "group_title": "Motion"}],
                [{"var": "snr", "group_title": "SNR"}]
            ]}"#,
        )
        .expect("parse");
        let subjects = vec![
            subject(
                "s01",
                &[
                    ("qc_motion_abs", FieldValue::Scalar(0.2)),
                    ("qc_snr", FieldValue::Scalar(5.0)),
                ],
            ),
            subject(
                "s02",
                &[
                    ("qc_motion_abs", FieldValue::Scalar(0.3)),
                    ("qc_snr", FieldValue::Scalar(6.0)),
                ],
            ),
        ];
        let group = GroupTable::aggregate(&subjects).expect("aggregate");
        let document = report(&definition, &group, Some(&subjects[0]))
            .document()
            .expect("render");
        assert_eq!(document.page_count(), 2);

        // Both table titles share the row at y = 72; the second starts at
        // the right half of the page.
        let html = document.to_html().expect("html");
        assert!(html.contains("x=\"42.0\" y=\"72.0\""));
        assert!(html.contains("x=\"425.5\" y=\"72.0\""));
    }

    #[test]
    fn a_subject_report_without_tables_keeps_its_leading_page() {
        let definition = definition_of(1, "motion_abs");
        let group = motion_group();
        let s01 = subject("s01", &[("qc_motion_abs", FieldValue::Scalar(0.2))]);
        let document = report(&definition, &group, Some(&s01))
            .document()
            .expect("render");
        assert_eq!(document.page_count(), 2);

        let html = document.to_html().expect("html");
        assert!(html.contains("<polygon"));
        assert!(!html.contains(">metric<"));
    }

    #[test]
    fn external_reference_dists_override_the_group_baseline() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [[{"var": "motion_abs", "group_title": "Motion"}]]}"#,
        )
        .expect("parse");
        let group = motion_group();
        let s01 = subject("s01", &[("qc_motion_abs", FieldValue::Scalar(0.2))]);

        let mut dists = ReferenceDists::default();
        dists.insert("motion_abs", 1.0, 0.1);
        let document = Report::new(&definition, &group, Some(&s01), Some(dists), 1.0, 2.0)
            .expect("report")
            .document()
            .expect("render");

        let html = document.to_html().expect("html");
        assert!(html.contains("rgba(204, 51, 51, 0.5)"));
    }
}
