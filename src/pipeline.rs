//! Runs every stage over a batch of uploads and returns a closed outcome.
//!
//! Ingest, inference and cleaning fan out per upload on the rayon pool; key
//! detection joins on the full set of cleaned tables.

use std::collections::HashSet;

use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    clean::{self, CleanedTable},
    config::AnalysisConfig,
    emit,
    error::{AnalysisError, AnalysisResult},
    infer,
    ingest::{self, RawTable},
    keys,
    report::{self, AnalysisReport},
};

/// One uploaded buffer, fully materialized.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub declared_mime: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, declared_mime: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            declared_mime: declared_mime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn csv(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, "text/csv", text.as_bytes())
    }
}

/// Either a complete report (possibly with warnings) or the fatal error that stopped the run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Complete { report: Box<AnalysisReport> },
    Failed { error: AnalysisError },
}

impl AnalysisOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, AnalysisOutcome::Complete { .. })
    }

    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            AnalysisOutcome::Complete { report } => Some(report),
            AnalysisOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        match self {
            AnalysisOutcome::Complete { .. } => None,
            AnalysisOutcome::Failed { error } => Some(error),
        }
    }

    pub fn into_result(self) -> AnalysisResult<AnalysisReport> {
        match self {
            AnalysisOutcome::Complete { report } => Ok(*report),
            AnalysisOutcome::Failed { error } => Err(error),
        }
    }
}

impl From<AnalysisResult<AnalysisReport>> for AnalysisOutcome {
    fn from(result: AnalysisResult<AnalysisReport>) -> Self {
        match result {
            Ok(report) => AnalysisOutcome::Complete {
                report: Box::new(report),
            },
            Err(error) => AnalysisOutcome::Failed { error },
        }
    }
}

pub fn analyze(uploads: &[Upload], config: &AnalysisConfig) -> AnalysisOutcome {
    try_analyze(uploads, config).into()
}

pub fn try_analyze(uploads: &[Upload], config: &AnalysisConfig) -> AnalysisResult<AnalysisReport> {
    if uploads.is_empty() {
        return Err(AnalysisError::empty("no uploads"));
    }

    // Collected in upload order, so the first fatal error is the earliest upload's.
    let ingested: Vec<Vec<RawTable>> = uploads
        .par_iter()
        .map(|upload| {
            ingest::ingest_all(
                &upload.name,
                &upload.bytes,
                &upload.declared_mime,
                config,
            )
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<AnalysisResult<_>>()?;

    let raw_tables = dedupe_names(ingested.into_iter().flatten().collect());
    let cleaned: Vec<CleanedTable> = raw_tables
        .par_iter()
        .map(|raw| {
            let typed = infer::infer(raw, &config.inference);
            debug!(
                "'{}': inferred {}",
                typed.name(),
                typed
                    .columns()
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.inferred_type.label()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            clean::clean(&typed, &config.cleaning)
        })
        .collect();

    let detection = keys::detect_relationships(&cleaned, &config.keys);
    let emitted = emit::emit(&cleaned, &detection.candidates, &detection.edges, &config.keys);
    let report = report::compose(&cleaned, &detection, &emitted, &config.report);
    info!(
        "Analyzed {} table(s): {} relationship(s), quality score {:.1}",
        report.tables.len(),
        report.relationships.len(),
        report.quality.score
    );
    Ok(report)
}

/// Second and later tables sharing a name get `_2`, `_3`, ... suffixes.
fn dedupe_names(tables: Vec<RawTable>) -> Vec<RawTable> {
    let mut seen: HashSet<String> = HashSet::new();
    tables
        .into_iter()
        .map(|table| {
            let base = table.name().to_string();
            let mut name = base.clone();
            let mut suffix = 2;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            if name != base {
                debug!("Renamed duplicate table '{base}' to '{name}'");
                table.with_name(name)
            } else {
                table
            }
        })
        .collect()
}
