use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Profile tabular uploads and infer a relational schema", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Clean, profile and relate one or more CSV or spreadsheet files
    Analyze(AnalyzeArgs),
    /// Ingest a single file and print the inferred column types
    Probe(ProbeArgs),
    /// Print or save the default analysis configuration as YAML
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Input files (.csv, .tsv, .txt, .xlsx, .xls, .ods)
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// YAML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory receiving cleaned tables, schema.sql, graph.json, report.txt and analysis.json
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Number of non-null values sampled per column during type inference
    #[arg(long)]
    pub sample_size: Option<usize>,
    /// Minimum value overlap for a foreign key candidate
    #[arg(long)]
    pub fk_threshold: Option<f64>,
    /// Minimum confidence for a key to be emitted as a constraint
    #[arg(long)]
    pub cutoff: Option<f64>,
    /// Print the analysis outcome as JSON instead of the narrative
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Number of non-null values sampled per column
    #[arg(long)]
    pub sample_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Destination YAML file; printed to stdout when omitted
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}
