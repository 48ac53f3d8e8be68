use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    Dist,
    Bar,
    Line,
    Heatmap,
    Image,
}

impl PanelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PanelKind::Dist => "dist",
            PanelKind::Bar => "bar",
            PanelKind::Line => "line",
            PanelKind::Heatmap => "heatmap",
            PanelKind::Image => "img",
        }
    }

    fn parse(raw: &str) -> Option<PanelKind> {
        match raw {
            "dist" => Some(PanelKind::Dist),
            "bar" => Some(PanelKind::Bar),
            "line" => Some(PanelKind::Line),
            "heatmap" => Some(PanelKind::Heatmap),
            "img" => Some(PanelKind::Image),
            _ => None,
        }
    }
}

/// Where x tick labels come from: a literal list, or a single string that
/// is tried as a group data-field name at render time and used verbatim
/// when no such field exists.
#[derive(Debug, Clone, PartialEq)]
pub enum TickSource {
    Labels(Vec<String>),
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayAttr {
    Title(String),
    XLabel(String),
    YLabel(String),
    XTickLabels(TickSource),
}

/// One panel of a report row, parsed once from the definition tree.
/// Display attributes the renderer applies after the core draw are kept
/// in `attrs`; unknown attribute names are warned about and dropped.
#[derive(Debug, Clone)]
pub struct PanelSpec {
    pub kind: PanelKind,
    pub vars: Vec<String>,
    pub image: Option<String>,
    pub colspan: usize,
    pub group_title: Option<String>,
    pub intensity: Option<(f64, f64)>,
    pub attrs: Vec<DisplayAttr>,
}

impl PanelSpec {
    pub fn title(&self) -> Option<&str> {
        self.attrs.iter().find_map(|attr| match attr {
            DisplayAttr::Title(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn ylabel(&self) -> Option<&str> {
        self.attrs.iter().find_map(|attr| match attr {
            DisplayAttr::YLabel(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn xticklabels(&self) -> Option<&TickSource> {
        self.attrs.iter().find_map(|attr| match attr {
            DisplayAttr::XTickLabels(source) => Some(source),
            _ => None,
        })
    }
}

/// Parsed report layout: an ordered list of groups, each one row of
/// panels. A definition with no panels at all is rejected up front rather
/// than silently rendering nothing.
#[derive(Debug, Clone)]
pub struct ReportDefinition {
    groups: Vec<Vec<PanelSpec>>,
}

impl ReportDefinition {
    pub fn from_file(path: &Path) -> Result<ReportDefinition, ReportError> {
        let raw = fs::read_to_string(path)?;
        ReportDefinition::parse_str(&raw)
    }

    pub fn parse_str(raw: &str) -> Result<ReportDefinition, ReportError> {
        let value: Value = serde_json::from_str(raw)?;
        ReportDefinition::parse(&value)
    }

    pub fn parse(value: &Value) -> Result<ReportDefinition, ReportError> {
        let Value::Object(entries) = value else {
            return Err(ReportError::BadDefinition(
                "definition is not a JSON object".into(),
            ));
        };
        // The conventional top-level key is "report"; any single-key
        // document is accepted since the key carries no semantics.
        let layout = match entries.get("report") {
            Some(layout) => layout,
            None if entries.len() == 1 => entries.values().next().ok_or_else(|| {
                ReportError::BadDefinition("definition has no layout key".into())
            })?,
            None if entries.is_empty() => return Err(ReportError::EmptyDefinition),
            None => {
                return Err(ReportError::BadDefinition(
                    "definition has no report key".into(),
                ));
            }
        };
        let Value::Array(raw_groups) = layout else {
            return Err(ReportError::BadDefinition(
                "layout is not an array of groups".into(),
            ));
        };

        let mut groups = Vec::with_capacity(raw_groups.len());
        for raw_group in raw_groups {
            let Value::Array(raw_panels) = raw_group else {
                return Err(ReportError::BadDefinition(
                    "group is not an array of panels".into(),
                ));
            };
            let panels = raw_panels
                .iter()
                .map(parse_panel)
                .collect::<Result<Vec<_>, _>>()?;
            groups.push(panels);
        }

        let definition = ReportDefinition { groups };
        if definition.panel_count() == 0 {
            return Err(ReportError::EmptyDefinition);
        }
        Ok(definition)
    }

    pub fn groups(&self) -> &[Vec<PanelSpec>] {
        &self.groups
    }

    pub fn panel_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Page column count: the widest group's panel count.
    pub fn max_panel_count(&self) -> usize {
        self.groups.iter().map(Vec::len).max().unwrap_or(0)
    }
}

fn parse_panel(value: &Value) -> Result<PanelSpec, ReportError> {
    let Value::Object(entries) = value else {
        return Err(ReportError::BadDefinition("panel is not an object".into()));
    };

    let mut kind = PanelKind::Dist;
    let mut vars = Vec::new();
    let mut image = None;
    let mut colspan = 1usize;
    let mut group_title = None;
    let mut intensity = None;
    let mut attrs = Vec::new();

    for (key, entry) in entries {
        match key.as_str() {
            "type" => {
                let raw = entry.as_str().ok_or_else(|| {
                    ReportError::BadDefinition("panel type is not a string".into())
                })?;
                kind = PanelKind::parse(raw).ok_or_else(|| {
                    ReportError::BadDefinition(format!("unknown panel type {raw}"))
                })?;
            }
            "var" => vars = parse_vars(entry)?,
            "img" => {
                let name = entry.as_str().ok_or_else(|| {
                    ReportError::BadDefinition("img is not a string".into())
                })?;
                image = Some(name.to_string());
            }
            "colspan" => {
                let span = entry.as_u64().ok_or_else(|| {
                    ReportError::BadDefinition("colspan is not an integer".into())
                })?;
                colspan = (span as usize).max(1);
            }
            "group_title" => {
                let title = entry.as_str().ok_or_else(|| {
                    ReportError::BadDefinition("group_title is not a string".into())
                })?;
                group_title = Some(title.to_string());
            }
            "intensity" => intensity = Some(parse_intensity(entry)?),
            "title" => attrs.push(DisplayAttr::Title(label_text(entry))),
            "xlabel" => attrs.push(DisplayAttr::XLabel(label_text(entry))),
            "ylabel" => attrs.push(DisplayAttr::YLabel(label_text(entry))),
            "xticklabels" => attrs.push(DisplayAttr::XTickLabels(parse_ticks(entry))),
            other => {
                tracing::warn!(attribute = other, "ignoring unknown display attribute");
            }
        }
    }

    if kind == PanelKind::Image {
        if image.is_none() {
            return Err(ReportError::BadDefinition(
                "img panel has no image name".into(),
            ));
        }
    } else if vars.is_empty() {
        return Err(ReportError::BadDefinition(format!(
            "{} panel has no var",
            kind.as_str()
        )));
    }

    Ok(PanelSpec {
        kind,
        vars,
        image,
        colspan,
        group_title,
        intensity,
        attrs,
    })
}

fn parse_vars(value: &Value) -> Result<Vec<String>, ReportError> {
    match value {
        Value::String(name) => Ok(vec![name.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ReportError::BadDefinition("var list entries must be strings".into())
                })
            })
            .collect(),
        _ => Err(ReportError::BadDefinition(
            "var must be a string or a list of strings".into(),
        )),
    }
}

fn parse_intensity(value: &Value) -> Result<(f64, f64), ReportError> {
    let window = value
        .as_array()
        .filter(|items| items.len() == 2)
        .and_then(|items| Some((items[0].as_f64()?, items[1].as_f64()?)));
    window.ok_or_else(|| {
        ReportError::BadDefinition("intensity must be a [min, max] pair".into())
    })
}

fn parse_ticks(value: &Value) -> TickSource {
    match value {
        Value::Array(items) => TickSource::Labels(items.iter().map(label_text).collect()),
        other => TickSource::Field(label_text(other)),
    }
}

fn label_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_type_defaults_to_dist() {
        let definition =
            ReportDefinition::parse_str(r#"{"report": [[{"var": "motion_abs"}]]}"#).expect("parse");
        let panel = &definition.groups()[0][0];
        assert_eq!(panel.kind, PanelKind::Dist);
        assert_eq!(panel.vars, vec!["motion_abs"]);
        assert_eq!(panel.colspan, 1);
    }

    #[test]
    fn var_accepts_a_list_of_names() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [[{"var": ["snr", "cnr"], "colspan": 2}]]}"#,
        )
        .expect("parse");
        let panel = &definition.groups()[0][0];
        assert_eq!(panel.vars, vec!["snr", "cnr"]);
        assert_eq!(panel.colspan, 2);
    }

    #[test]
    fn unknown_panel_types_are_rejected() {
        let err = ReportDefinition::parse_str(
            r#"{"report": [[{"type": "pie", "var": "snr"}]]}"#,
        )
        .expect_err("bad type");
        let ReportError::BadDefinition(message) = err else {
            panic!("expected a definition error");
        };
        assert!(message.contains("pie"));
    }

    #[test]
    fn empty_definitions_are_fatal() {
        for raw in ["{}", r#"{"report": []}"#, r#"{"report": [[]]}"#] {
            let err = ReportDefinition::parse_str(raw).expect_err("empty");
            assert!(matches!(err, ReportError::EmptyDefinition), "{raw}");
        }
    }

    #[test]
    fn any_single_layout_key_is_accepted() {
        let definition =
            ReportDefinition::parse_str(r#"{"qc_report": [[{"var": "snr"}]]}"#).expect("parse");
        assert_eq!(definition.panel_count(), 1);
    }

    #[test]
    fn unknown_attributes_are_dropped() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [[{"var": "snr", "zlabel": "nope", "title": "SNR"}]]}"#,
        )
        .expect("parse");
        let panel = &definition.groups()[0][0];
        assert_eq!(panel.attrs, vec![DisplayAttr::Title("SNR".into())]);
        assert_eq!(panel.title(), Some("SNR"));
    }

    #[test]
    fn tick_labels_parse_as_list_or_field_reference() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [[
                {"var": "snr", "xticklabels": ["b0", "b1000"]},
                {"var": "cnr", "xticklabels": "data_unique_bvals"}
            ]]}"#,
        )
        .expect("parse");
        let panels = &definition.groups()[0];
        assert_eq!(
            panels[0].xticklabels(),
            Some(&TickSource::Labels(vec!["b0".into(), "b1000".into()]))
        );
        assert_eq!(
            panels[1].xticklabels(),
            Some(&TickSource::Field("data_unique_bvals".into()))
        );
    }

    #[test]
    fn image_panels_use_img_instead_of_var() {
        let definition = ReportDefinition::parse_str(
            r#"{"report": [[{"type": "img", "img": "avg_b0", "intensity": [0, 1000]}]]}"#,
        )
        .expect("parse");
        let panel = &definition.groups()[0][0];
        assert_eq!(panel.kind, PanelKind::Image);
        assert_eq!(panel.image.as_deref(), Some("avg_b0"));
        assert_eq!(panel.intensity, Some((0.0, 1000.0)));

        let err = ReportDefinition::parse_str(r#"{"report": [[{"type": "img"}]]}"#)
            .expect_err("missing img");
        assert!(matches!(err, ReportError::BadDefinition(_)));

        let err = ReportDefinition::parse_str(r#"{"report": [[{"type": "bar"}]]}"#)
            .expect_err("missing var");
        assert!(matches!(err, ReportError::BadDefinition(_)));
    }
}
