//! Run configuration.
//!
//! Every tunable of the engine lives in [`AnalysisConfig`] and is handed to
//! each stage explicitly. Nothing here is global; two runs with different
//! configurations can execute side by side.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub ingest: IngestConfig,
    pub inference: InferenceConfig,
    pub cleaning: CleaningConfig,
    pub keys: KeyConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    #[default]
    Auto,
    Present,
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Rows examined when ranking candidate delimiters.
    pub delimiter_sample_rows: usize,
    pub header: HeaderMode,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            delimiter_sample_rows: 50,
            header: HeaderMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Maximum non-empty cells sampled per column.
    pub sample_size: usize,
    /// Distinct/sampled ratio at or below which a string column is categorical.
    pub categorical_ratio: f64,
    pub date_formats: Vec<String>,
    pub datetime_formats: Vec<String>,
    /// Lower-case tokens treated as empty cells.
    pub null_tokens: Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            sample_size: 500,
            categorical_ratio: 0.5,
            date_formats: [
                "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y",
                "%b %d, %Y", "%d %b %Y",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
            datetime_formats: [
                "%Y-%m-%dT%H:%M:%S",
                "%Y-%m-%d %H:%M:%S",
                "%Y-%m-%dT%H:%M",
                "%Y-%m-%d %H:%M",
                "%d/%m/%Y %H:%M:%S",
                "%m/%d/%Y %H:%M:%S",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
            null_tokens: ["na", "n/a", "null", "none", "nan", "-"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl InferenceConfig {
    pub fn is_null_token(&self, value: &str) -> bool {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return true;
        }
        let lowered = trimmed.to_ascii_lowercase();
        self.null_tokens.iter().any(|token| *token == lowered)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleaningConfig {
    /// Canonical chrono format for date-only values.
    pub date_format: String,
    /// Canonical chrono format for values carrying a time of day.
    pub datetime_format: String,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y-%m-%d".to_string(),
            datetime_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyConfig {
    /// Share of distinct FK values that must exist in the referenced key.
    pub fk_overlap_threshold: f64,
    /// Overlaps at or above this floor but below the threshold are reported as near misses.
    pub near_miss_floor: f64,
    /// Confidence required before a key or edge becomes a hard constraint.
    pub constraint_cutoff: f64,
    pub composite_keys: bool,
    pub self_reference_in_single_table: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            fk_overlap_threshold: 0.8,
            near_miss_floor: 0.5,
            constraint_cutoff: 0.7,
            composite_keys: true,
            self_reference_in_single_table: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub max_chart_recommendations: usize,
    /// Most frequent values listed per categorical column.
    pub top_values: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_chart_recommendations: 6,
            top_values: 5,
        }
    }
}

fn ensure_ratio(name: &str, value: f64) -> Result<()> {
    ensure!(
        (0.0..=1.0).contains(&value),
        "{name} must be between 0 and 1 (got {value})"
    );
    Ok(())
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.ingest.delimiter_sample_rows > 0,
            "ingest.delimiter_sample_rows must be positive"
        );
        ensure!(
            self.inference.sample_size > 0,
            "inference.sample_size must be positive"
        );
        ensure_ratio("inference.categorical_ratio", self.inference.categorical_ratio)?;
        ensure!(
            !self.inference.date_formats.is_empty(),
            "inference.date_formats cannot be empty"
        );
        ensure!(
            !self.cleaning.date_format.trim().is_empty(),
            "cleaning.date_format cannot be empty"
        );
        ensure!(
            !self.cleaning.datetime_format.trim().is_empty(),
            "cleaning.datetime_format cannot be empty"
        );
        ensure_ratio("keys.fk_overlap_threshold", self.keys.fk_overlap_threshold)?;
        ensure_ratio("keys.near_miss_floor", self.keys.near_miss_floor)?;
        ensure_ratio("keys.constraint_cutoff", self.keys.constraint_cutoff)?;
        ensure!(
            self.keys.near_miss_floor <= self.keys.fk_overlap_threshold,
            "keys.near_miss_floor ({}) cannot exceed keys.fk_overlap_threshold ({})",
            self.keys.near_miss_floor,
            self.keys.fk_overlap_threshold
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: AnalysisConfig =
            serde_yaml::from_reader(reader).context("Parsing config YAML")?;
        config
            .validate()
            .with_context(|| format!("Validating config {path:?}"))?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing config to YAML string")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let file = File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing config YAML")
    }
}
