pub mod clean;
pub mod cli;
pub mod config;
pub mod data;
pub mod emit;
pub mod error;
pub mod graph;
pub mod infer;
pub mod ingest;
pub mod io_utils;
pub mod keys;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod table;

use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::AnalysisConfig,
    pipeline::{AnalysisOutcome, Upload},
    report::AnalysisReport,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("table_profiler", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze(args) => handle_analyze(&args),
        Commands::Probe(args) => handle_probe(&args),
        Commands::Config(args) => handle_config(&args),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => {
            AnalysisConfig::load(path).with_context(|| format!("Loading configuration from {path:?}"))
        }
        None => Ok(AnalysisConfig::default()),
    }
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = fs::read(path).with_context(|| format!("Reading input file {path:?}"))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Upload::new(name, io_utils::mime_for_path(path), bytes))
}

fn handle_analyze(args: &cli::AnalyzeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(sample_size) = args.sample_size {
        config.inference.sample_size = sample_size;
    }
    if let Some(threshold) = args.fk_threshold {
        config.keys.fk_overlap_threshold = threshold;
    }
    if let Some(cutoff) = args.cutoff {
        config.keys.constraint_cutoff = cutoff;
    }
    config.validate().context("Validating configuration")?;

    let uploads = args
        .inputs
        .iter()
        .map(|path| read_upload(path))
        .collect::<Result<Vec<_>>>()?;
    info!("Analyzing {} upload(s)", uploads.len());

    let outcome = pipeline::analyze(&uploads, &config);
    let outcome_json =
        serde_json::to_string_pretty(&outcome).context("Serializing analysis outcome")?;
    if args.json {
        println!("{outcome_json}");
    }
    match outcome {
        AnalysisOutcome::Complete { report } => {
            if !args.json {
                print!("{}", report.narrative);
            }
            if let Some(dir) = &args.output {
                write_artifacts(dir, &report, &outcome_json)?;
            }
            Ok(())
        }
        AnalysisOutcome::Failed { error } => Err(error).context("Analysis failed"),
    }
}

fn write_artifacts(dir: &Path, report: &AnalysisReport, outcome_json: &str) -> Result<()> {
    let cleaned_dir = dir.join("cleaned");
    fs::create_dir_all(&cleaned_dir)
        .with_context(|| format!("Creating output directory {cleaned_dir:?}"))?;
    for table in report.cleaned_tables() {
        let path = cleaned_dir.join(format!("{}.csv", table.name()));
        let text = table
            .to_delimited(io_utils::DEFAULT_DELIMITER)
            .with_context(|| format!("Serializing cleaned table '{}'", table.name()))?;
        fs::write(&path, text).with_context(|| format!("Writing {path:?}"))?;
    }

    let graph_json =
        serde_json::to_string_pretty(&report.graph).context("Serializing schema graph")?;
    let artifacts = [
        ("schema.sql", report.schema_sql.as_str()),
        ("graph.json", graph_json.as_str()),
        ("report.txt", report.narrative.as_str()),
        ("analysis.json", outcome_json),
    ];
    for (file_name, contents) in artifacts {
        let path = dir.join(file_name);
        fs::write(&path, contents).with_context(|| format!("Writing {path:?}"))?;
    }
    info!(
        "Wrote {} cleaned table(s) and report artifacts to {dir:?}",
        report.cleaned_tables().len()
    );
    Ok(())
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(sample_size) = args.sample_size {
        config.inference.sample_size = sample_size;
    }
    config.validate().context("Validating configuration")?;

    let upload = read_upload(&args.input)?;
    let tables = ingest::ingest_all(
        &upload.name,
        &upload.bytes,
        &upload.declared_mime,
        &config,
    )
    .with_context(|| format!("Ingesting {:?}", args.input))?;
    for raw in &tables {
        let typed = infer::infer(raw, &config.inference);
        if tables.len() > 1 {
            println!("{}:", typed.name());
        }
        let rows: Vec<Vec<String>> = typed
            .columns()
            .iter()
            .map(|column| {
                vec![
                    column.name.clone(),
                    column.inferred_type.label().to_string(),
                    if column.nullable { "yes" } else { "no" }.to_string(),
                    format!("{:.2}", column.sample_cardinality),
                    column.format_hint.clone().unwrap_or_default(),
                ]
            })
            .collect();
        table::print_table(&["column", "type", "nullable", "cardinality", "hint"], &rows);
        if typed.row_count() == 0 {
            warn!("'{}' has a header but no data rows", typed.name());
        }
    }
    Ok(())
}

fn handle_config(args: &cli::ConfigArgs) -> Result<()> {
    let config = AnalysisConfig::default();
    match &args.output {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("Writing configuration to {path:?}"))?;
            info!("Default configuration written to {path:?}");
        }
        None => print!("{}", config.to_yaml_string()?),
    }
    Ok(())
}
