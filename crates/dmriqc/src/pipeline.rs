use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use dmriqc_data::{GroupTable, SubjectRecord};
use dmriqc_report::{ReferenceDists, Report, ReportDefinition};

use crate::subjects;

/// One resolved invocation. Validation of the mode flags happens in
/// `run`, not at parse time, so callers other than the binary get the
/// same rules.
pub struct RunConfig {
    pub subjdir: PathBuf,
    pub subjects: Option<PathBuf>,
    pub qcpaths: Vec<String>,
    pub extract: bool,
    pub group_data: Option<PathBuf>,
    pub group_report: bool,
    pub subject_reports: bool,
    pub report_def: Option<PathBuf>,
    pub reference_dists: Option<PathBuf>,
    pub amber_sigma: f64,
    pub red_sigma: f64,
    pub slicer_cmd: String,
    pub output: PathBuf,
    pub overwrite: bool,
}

pub fn run(config: &RunConfig) -> Result<()> {
    if config.extract == config.group_data.is_some() {
        bail!(
            "exactly one of --extract and --group-data must be given: extract builds the \
             group table from subject directories, --group-data replays a previous one"
        );
    }

    let definition = if config.group_report || config.subject_reports {
        let Some(path) = &config.report_def else {
            bail!("report generation requires --report-def");
        };
        Some(
            ReportDefinition::from_file(path).with_context(|| {
                format!("failed to parse report definition {}", path.display())
            })?,
        )
    } else {
        None
    };

    let reference = match &config.reference_dists {
        Some(path) => Some(ReferenceDists::from_file(path).with_context(|| {
            format!("failed to parse reference distributions {}", path.display())
        })?),
        None => None,
    };

    if config.output.exists() && !config.overwrite {
        bail!(
            "output directory {} already exists; remove it or pass --overwrite",
            config.output.display()
        );
    }
    fs::create_dir_all(&config.output).with_context(|| {
        format!("failed to create output directory {}", config.output.display())
    })?;

    // Subject directories are only touched by the modes that need them;
    // replaying group data for a group report reads nothing else.
    let subjects = if config.extract || config.subject_reports {
        let ids = subjects::discover(&config.subjdir, config.subjects.as_deref(), &config.qcpaths)?;
        if ids.is_empty() {
            bail!("no subjects found under {}", config.subjdir.display());
        }
        subjects::load(&config.subjdir, &ids, &config.qcpaths)?
    } else {
        Vec::new()
    };

    let group = match &config.group_data {
        None => {
            tracing::info!(subjects = subjects.len(), "aggregating group data");
            let group = GroupTable::aggregate(&subjects).context("group aggregation failed")?;
            let path = config.output.join("group_data.json");
            group
                .write(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            group
        }
        Some(path) => GroupTable::load(path)
            .with_context(|| format!("failed to load group data {}", path.display()))?,
    };

    let Some(definition) = definition else {
        return Ok(());
    };

    if config.group_report {
        let path = config.output.join("group_report.html");
        Report::new(
            &definition,
            &group,
            None,
            reference.clone(),
            config.amber_sigma,
            config.red_sigma,
        )?
        .with_slicer(&config.slicer_cmd)
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if config.subject_reports {
        let mut failed = 0usize;
        for subject in &subjects {
            if let Err(err) = subject_report(&definition, &group, subject, reference.clone(), config)
            {
                failed += 1;
                tracing::error!(
                    subject = subject.subject_id(),
                    error = %err,
                    "subject report failed"
                );
            }
        }
        if failed > 0 {
            bail!("{failed} of {} subject reports failed", subjects.len());
        }
    }

    Ok(())
}

fn subject_report(
    definition: &ReportDefinition,
    group: &GroupTable,
    subject: &SubjectRecord,
    reference: Option<ReferenceDists>,
    config: &RunConfig,
) -> Result<()> {
    let path = config
        .output
        .join(format!("{}_report.html", subject.subject_id()));
    Report::new(
        definition,
        group,
        Some(subject),
        reference,
        config.amber_sigma,
        config.red_sigma,
    )?
    .with_slicer(&config.slicer_cmd)
    .save(&path)
    .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
