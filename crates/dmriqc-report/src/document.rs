use std::fmt::Write;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::ReportError;
use crate::svg::escape;

/// One A4 page worth of rendered SVG fragments.
#[derive(Default)]
pub struct Page {
    body: String,
}

impl Page {
    pub fn new() -> Page {
        Page::default()
    }

    pub fn body_mut(&mut self) -> &mut String {
        &mut self.body
    }
}

/// A multi-page report document, written as one standalone HTML file so
/// it opens anywhere without a server or external assets.
pub struct Document {
    title: String,
    subtitle: String,
    pages: Vec<Page>,
    created: DateTime<Local>,
}

impl Document {
    /// A4 portrait at 100 dpi.
    pub const PAGE_WIDTH: f64 = 827.0;
    pub const PAGE_HEIGHT: f64 = 1169.0;

    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Document {
        Document {
            title: title.into(),
            subtitle: subtitle.into(),
            pages: Vec::new(),
            created: Local::now(),
        }
    }

    pub fn push_page(&mut self, page: Page) {
        self.pages.push(page);
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serializes the whole document and writes it in a single call, so a
    /// crash mid-render never leaves a truncated report behind.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let html = self.to_html()?;
        fs::write(path, html)?;
        tracing::info!(path = %path.display(), pages = self.pages.len(), "report written");
        Ok(())
    }

    pub fn to_html(&self) -> Result<String, ReportError> {
        let mut out = String::new();
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html lang=\"en\">")?;
        writeln!(out, "<head>")?;
        writeln!(out, "<meta charset=\"utf-8\">")?;
        writeln!(out, "<title>{}</title>", escape(&self.title))?;
        writeln!(out, "<meta name=\"author\" content=\"dmriqc\">")?;
        writeln!(
            out,
            "<meta name=\"subject\" content=\"{}\">",
            escape(&self.subtitle)
        )?;
        writeln!(out, "<meta name=\"keywords\" content=\"dMRI, quality control\">")?;
        writeln!(
            out,
            "<meta name=\"created\" content=\"{}\">",
            self.created.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(out, "<style>")?;
        writeln!(
            out,
            "body {{ margin: 0; background: #e8e8e8; font-family: \"Helvetica Neue\", Arial, sans-serif; }}"
        )?;
        writeln!(
            out,
            ".page {{ width: {}px; margin: 12px auto; background: #fff; box-shadow: 0 1px 4px rgba(0, 0, 0, 0.3); }}",
            Document::PAGE_WIDTH
        )?;
        writeln!(out, "svg {{ display: block; }}")?;
        writeln!(out, "</style>")?;
        writeln!(out, "</head>")?;
        writeln!(out, "<body>")?;

        let total = self.pages.len();
        for (index, page) in self.pages.iter().enumerate() {
            writeln!(out, "<div class=\"page\">")?;
            writeln!(
                out,
                "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">",
                w = Document::PAGE_WIDTH,
                h = Document::PAGE_HEIGHT
            )?;
            writeln!(
                out,
                "<rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" fill=\"#fff\"/>",
                Document::PAGE_WIDTH,
                Document::PAGE_HEIGHT
            )?;
            writeln!(
                out,
                "<text x=\"{:.1}\" y=\"24\" text-anchor=\"middle\" font-size=\"16\" font-weight=\"bold\" fill=\"#222\">{}</text>",
                Document::PAGE_WIDTH / 2.0,
                escape(&self.title)
            )?;
            writeln!(
                out,
                "<text x=\"{:.1}\" y=\"42\" text-anchor=\"middle\" font-size=\"11\" fill=\"#777\">{}</text>",
                Document::PAGE_WIDTH / 2.0,
                escape(&self.subtitle)
            )?;
            out.push_str(&page.body);
            writeln!(
                out,
                "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"10\" fill=\"#999\">page {} of {}</text>",
                Document::PAGE_WIDTH / 2.0,
                Document::PAGE_HEIGHT - 10.0,
                index + 1,
                total
            )?;
            writeln!(out, "</svg>")?;
            writeln!(out, "</div>")?;
        }

        writeln!(out, "</body>")?;
        writeln!(out, "</html>")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_number_themselves() {
        let mut document = Document::new("Group report", "2 subjects");
        document.push_page(Page::new());
        document.push_page(Page::new());

        let html = document.to_html().expect("html");
        assert!(html.contains("page 1 of 2"));
        assert!(html.contains("page 2 of 2"));
        assert!(html.contains("<title>Group report</title>"));
    }

    #[test]
    fn blank_pages_still_render() {
        let mut document = Document::new("Subject report", "s01");
        document.push_page(Page::new());
        assert_eq!(document.page_count(), 1);
        let html = document.to_html().expect("html");
        assert_eq!(html.matches("<svg").count(), 1);
    }

    #[test]
    fn save_writes_one_standalone_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.html");
        let mut document = Document::new("Subject report: s01 & friends", "s01");
        let mut page = Page::new();
        page.body_mut().push_str("<circle cx=\"1\" cy=\"1\" r=\"1\"/>\n");
        document.push_page(page);
        document.save(&path).expect("save");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert!(written.starts_with("<!DOCTYPE html>"));
        assert!(written.contains("s01 &amp; friends"));
        assert!(written.contains("<circle"));
    }
}
