use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dmriqc::pipeline::{RunConfig, run};
use dmriqc_report::OutlierClassifier;

#[derive(Debug, Parser)]
#[command(author, version, about = "Study-wise diffusion MRI quality assessment")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Directory containing per-subject output directories"
    )]
    subjdir: PathBuf,

    #[arg(
        long,
        help = "Text file listing subject IDs; defaults to the subdirectories of --subjdir that contain a QC source"
    )]
    subjects: Option<PathBuf>,

    #[arg(
        long,
        default_value = "qc.json",
        help = "QC JSON path relative to each subject directory; repeat to merge several sources"
    )]
    qcpath: Vec<String>,

    #[arg(
        long,
        conflicts_with = "group_data",
        help = "Extract single-subject QC output into a group data file"
    )]
    extract: bool,

    #[arg(long, help = "Previously extracted group QC data file to replay")]
    group_data: Option<PathBuf>,

    #[arg(long, requires = "report_def", help = "Generate the group report")]
    group_report: bool,

    #[arg(long, requires = "report_def", help = "Generate one report per subject")]
    subject_reports: bool,

    #[arg(long, help = "JSON report definition file")]
    report_def: Option<PathBuf>,

    #[arg(
        long,
        help = "Reference distributions file (field to [mean, std]); defaults to distributions computed from the group"
    )]
    reference_dists: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = OutlierClassifier::DEFAULT_AMBER_SIGMA,
        help = "Z-score above which a subject value is flagged amber"
    )]
    amber_sigma: f64,

    #[arg(
        long,
        default_value_t = OutlierClassifier::DEFAULT_RED_SIGMA,
        help = "Z-score above which a subject value is flagged red"
    )]
    red_sigma: f64,

    #[arg(
        long,
        default_value = "slicer",
        help = "External command used to rasterize NIfTI volumes for image panels"
    )]
    slicer_cmd: String,

    #[arg(short, long, default_value = "dmriqc_out", help = "Output directory")]
    output: PathBuf,

    #[arg(long, help = "Allow writing into an existing output directory")]
    overwrite: bool,
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    run(&RunConfig {
        subjdir: cli.subjdir,
        subjects: cli.subjects,
        qcpaths: cli.qcpath,
        extract: cli.extract,
        group_data: cli.group_data,
        group_report: cli.group_report,
        subject_reports: cli.subject_reports,
        report_def: cli.report_def,
        reference_dists: cli.reference_dists,
        amber_sigma: cli.amber_sigma,
        red_sigma: cli.red_sigma,
        slicer_cmd: cli.slicer_cmd,
        output: cli.output,
        overwrite: cli.overwrite,
    })
}
