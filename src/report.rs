//! Report Composer: aggregates every upstream artifact into an [`AnalysisReport`].
//!
//! Composition only counts and formats. Every figure in the narrative comes
//! straight from a cleaning log, a key detection or the emitted schema.

use std::fmt::Write as _;

use serde::Serialize;

use crate::{
    clean::{ActionKind, ActionOutcome, CleanedTable, CleaningAction},
    config::ReportConfig,
    data::{Cell, Value},
    emit::EmittedSchema,
    error::Warning,
    graph::{LoadOrder, SchemaGraph},
    infer::{self, InferredType, PhysicalType},
    ingest::{SourceFormat, SourceInfo},
    io_utils,
    keys::{KeyCandidate, KeyDetection, KeyKind, RelationshipEdge},
    stats::{self, NumericStats},
    table,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub inferred_type: InferredType,
    pub physical: PhysicalType,
    pub nullable: bool,
    pub sample_cardinality: f64,
    pub distinct_count: usize,
    pub format_hint: Option<String>,
    pub numeric: Option<NumericStats>,
    pub top_values: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct QualityScore {
    pub completeness: f64,
    pub consistency: f64,
    pub uniqueness: f64,
    /// Mean of the three ratios on a 0 to 100 scale.
    pub score: f64,
}

impl QualityScore {
    fn from_ratios(completeness: f64, consistency: f64, uniqueness: f64) -> Self {
        let mean = (completeness + consistency + uniqueness) / 3.0;
        Self {
            completeness,
            consistency,
            uniqueness,
            score: (mean * 1000.0).round() / 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableSummary {
    pub name: String,
    pub source: SourceInfo,
    pub raw_rows: usize,
    pub cleaned_rows: usize,
    pub duplicates_removed: usize,
    pub missing_cells: usize,
    pub filled_cells: usize,
    pub unresolved_cells: usize,
    pub normalized_cells: usize,
    pub malformed_cells: usize,
    pub dropped_columns: Vec<String>,
    pub columns: Vec<ColumnProfile>,
    pub actions: Vec<CleaningAction>,
    pub quality: QualityScore,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    TimeSeries,
    Bar,
    Distribution,
    Histogram,
    CorrelationHeatmap,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartRecommendation {
    pub kind: ChartKind,
    pub table: String,
    pub columns: Vec<String>,
    pub rationale: String,
}

/// Short machine-readable digest of the analysis.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisDigest {
    pub issues_found: String,
    pub actions_taken: String,
    pub missing_value_summary: String,
    pub suspected_primary_keys: Vec<String>,
    pub suspected_foreign_keys: Vec<String>,
    pub recommended_charts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub tables: Vec<TableSummary>,
    pub quality: QualityScore,
    pub primary_keys: Vec<KeyCandidate>,
    pub foreign_keys: Vec<KeyCandidate>,
    pub relationships: Vec<RelationshipEdge>,
    /// Keys and relationships detected below the constraint cutoff.
    pub deferred: Vec<Warning>,
    pub schema_sql: String,
    pub graph: SchemaGraph,
    pub load_order: LoadOrder,
    pub charts: Vec<ChartRecommendation>,
    pub digest: AnalysisDigest,
    pub warnings: Vec<Warning>,
    pub narrative: String,
    #[serde(skip)]
    cleaned: Vec<CleanedTable>,
}

impl AnalysisReport {
    pub fn cleaned_tables(&self) -> &[CleanedTable] {
        &self.cleaned
    }

    pub fn table(&self, name: &str) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn compose(
    tables: &[CleanedTable],
    detection: &KeyDetection,
    emitted: &EmittedSchema,
    options: &ReportConfig,
) -> AnalysisReport {
    let summaries: Vec<TableSummary> = tables.iter().map(|t| summarize(t, options)).collect();
    let quality = overall_quality(&summaries);
    let charts = recommend_charts(&summaries, options.max_chart_recommendations);

    let mut warnings: Vec<Warning> = tables
        .iter()
        .flat_map(|t| t.warnings().iter().cloned())
        .collect();
    warnings.extend(emitted.warnings.iter().cloned());

    let primary_keys: Vec<KeyCandidate> = detection
        .candidates
        .iter()
        .filter(|c| c.kind == KeyKind::PrimaryKey)
        .cloned()
        .collect();
    let foreign_keys: Vec<KeyCandidate> = detection.foreign_keys().cloned().collect();
    let deferred: Vec<Warning> = emitted
        .warnings
        .iter()
        .filter(|w| is_deferred(w))
        .cloned()
        .collect();
    let load_order = emitted.graph.load_order();
    let digest = digest(&summaries, &primary_keys, &foreign_keys, &charts);

    let mut report = AnalysisReport {
        tables: summaries,
        quality,
        primary_keys,
        foreign_keys,
        relationships: emitted.accepted_edges.clone(),
        deferred,
        schema_sql: emitted.schema_sql.clone(),
        graph: emitted.graph.clone(),
        load_order,
        charts,
        digest,
        warnings,
        narrative: String::new(),
        cleaned: tables.to_vec(),
    };
    report.narrative = narrative(&report, emitted);
    report
}

fn is_deferred(warning: &Warning) -> bool {
    matches!(
        warning,
        Warning::LowConfidenceKey { .. } | Warning::LowConfidenceRelationship { .. }
    )
}

fn action_rows(actions: &[CleaningAction], kind: ActionKind, outcome: Option<ActionOutcome>) -> usize {
    actions
        .iter()
        .filter(|a| a.kind == kind && outcome.is_none_or(|o| a.outcome == o))
        .map(|a| a.rows.len())
        .sum()
}

fn summarize(table: &CleanedTable, options: &ReportConfig) -> TableSummary {
    let actions = table.actions().to_vec();
    let missing_cells = action_rows(&actions, ActionKind::MissingValueFill, None);
    let filled_cells = action_rows(&actions, ActionKind::MissingValueFill, Some(ActionOutcome::Applied));
    let normalized_cells = action_rows(
        &actions,
        ActionKind::FormatNormalization,
        Some(ActionOutcome::Applied),
    );
    let malformed_cells = action_rows(
        &actions,
        ActionKind::FormatNormalization,
        Some(ActionOutcome::Unresolved),
    );

    let rows = table.row_count();
    let dropped = table.dropped_columns().len();
    let total_cells = rows * (table.columns().len() + dropped);
    let ratio = |part: usize, whole: usize| {
        if whole == 0 {
            1.0
        } else {
            1.0 - part as f64 / whole as f64
        }
    };
    let quality = QualityScore::from_ratios(
        ratio(missing_cells + rows * dropped, total_cells),
        ratio(malformed_cells, total_cells),
        if table.raw_row_count() == 0 {
            1.0
        } else {
            rows as f64 / table.raw_row_count() as f64
        },
    );

    let columns = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let rendered: Vec<String> = table
                .column_cells(idx)
                .filter(|cell| !cell.is_null())
                .map(|cell| table.render_cell(cell))
                .collect();
            let frequencies = stats::frequencies(rendered.iter().map(String::as_str));
            let numeric = column
                .inferred_type
                .is_numeric()
                .then(|| {
                    let values: Vec<_> = table
                        .column_cells(idx)
                        .filter_map(Cell::value)
                        .filter_map(Value::as_decimal)
                        .collect();
                    NumericStats::from_values(&values)
                })
                .flatten();
            let top_values = if matches!(
                column.inferred_type,
                InferredType::Categorical | InferredType::Boolean
            ) {
                frequencies
                    .iter()
                    .take(options.top_values)
                    .map(|(value, count)| (value.to_string(), *count))
                    .collect()
            } else {
                Vec::new()
            };
            ColumnProfile {
                name: column.name.clone(),
                inferred_type: column.inferred_type,
                physical: column.physical,
                nullable: column.nullable,
                sample_cardinality: column.sample_cardinality,
                distinct_count: frequencies.len(),
                format_hint: column.format_hint.clone(),
                numeric,
                top_values,
            }
        })
        .collect();

    TableSummary {
        name: table.name().to_string(),
        source: table.source().clone(),
        raw_rows: table.raw_row_count(),
        cleaned_rows: rows,
        duplicates_removed: table.duplicates_removed(),
        missing_cells,
        filled_cells,
        unresolved_cells: missing_cells - filled_cells,
        normalized_cells,
        malformed_cells,
        dropped_columns: table.dropped_columns().to_vec(),
        columns,
        actions,
        quality,
    }
}

fn overall_quality(summaries: &[TableSummary]) -> QualityScore {
    if summaries.is_empty() {
        return QualityScore::from_ratios(1.0, 1.0, 1.0);
    }
    let count = summaries.len() as f64;
    let mean = |f: fn(&QualityScore) -> f64| summaries.iter().map(|s| f(&s.quality)).sum::<f64>() / count;
    QualityScore::from_ratios(
        mean(|q| q.completeness),
        mean(|q| q.consistency),
        mean(|q| q.uniqueness),
    )
}

fn columns_of(summary: &TableSummary, wanted: impl Fn(InferredType) -> bool) -> Vec<&str> {
    summary
        .columns
        .iter()
        .filter(|c| wanted(c.inferred_type))
        .map(|c| c.name.as_str())
        .collect()
}

fn recommend_charts(summaries: &[TableSummary], limit: usize) -> Vec<ChartRecommendation> {
    let mut charts = Vec::new();
    for summary in summaries {
        let dates = columns_of(summary, |t| t == InferredType::Date);
        let numerics: Vec<&str> = columns_of(summary, |t| t.is_numeric())
            .into_iter()
            .filter(|name| !infer::is_identifier_like_name(name))
            .collect();
        let categories = columns_of(summary, |t| t == InferredType::Categorical);
        let mut push = |kind: ChartKind, columns: &[&str], rationale: String| {
            charts.push(ChartRecommendation {
                kind,
                table: summary.name.clone(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rationale,
            });
        };

        if let Some(date) = dates.first() {
            for numeric in &numerics {
                push(
                    ChartKind::TimeSeries,
                    &[*date, *numeric],
                    format!("Time series of {numeric} over {date}"),
                );
            }
        }
        if let Some(category) = categories.first() {
            for numeric in &numerics {
                push(
                    ChartKind::Bar,
                    &[*category, *numeric],
                    format!("Bar chart of {numeric} by {category}"),
                );
            }
        }
        for category in &categories {
            push(
                ChartKind::Distribution,
                &[*category],
                format!("Bar chart for {category} distribution"),
            );
        }
        for numeric in &numerics {
            push(
                ChartKind::Histogram,
                &[*numeric],
                format!("Histogram of {numeric}"),
            );
        }
        if numerics.len() >= 2 {
            push(
                ChartKind::CorrelationHeatmap,
                numerics.as_slice(),
                "Correlation heatmap for numeric fields".to_string(),
            );
        }
    }
    charts.truncate(limit);
    charts
}

fn qualified(candidate: &KeyCandidate) -> String {
    format!("{}.{}", candidate.table, candidate.columns.join("+"))
}

fn digest(
    summaries: &[TableSummary],
    primary_keys: &[KeyCandidate],
    foreign_keys: &[KeyCandidate],
    charts: &[ChartRecommendation],
) -> AnalysisDigest {
    let duplicates: usize = summaries.iter().map(|s| s.duplicates_removed).sum();
    let missing: usize = summaries.iter().map(|s| s.missing_cells).sum();
    let filled: usize = summaries.iter().map(|s| s.filled_cells).sum();
    let normalized: usize = summaries.iter().map(|s| s.normalized_cells).sum();
    let malformed: usize = summaries.iter().map(|s| s.malformed_cells).sum();
    let columns_with_missing: usize = summaries
        .iter()
        .map(|s| {
            s.actions
                .iter()
                .filter(|a| a.kind == ActionKind::MissingValueFill)
                .count()
        })
        .sum();
    let dropped: usize = summaries.iter().map(|s| s.dropped_columns.len()).sum();

    AnalysisDigest {
        issues_found: format!(
            "{duplicates} duplicate row(s), {columns_with_missing} column(s) with missing values, \
             {malformed} malformed cell(s), {dropped} empty column(s)"
        ),
        actions_taken: format!(
            "Removed {duplicates} duplicate row(s), filled {filled} missing value(s) using median/mode, \
             normalized {normalized} value(s)"
        ),
        missing_value_summary: format!(
            "Total missing: {missing} cell(s) across {columns_with_missing} column(s)"
        ),
        suspected_primary_keys: primary_keys.iter().map(qualified).collect(),
        suspected_foreign_keys: foreign_keys.iter().map(qualified).collect(),
        recommended_charts: charts.iter().map(|c| c.rationale.clone()).collect(),
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

fn source_line(source: &SourceInfo) -> String {
    match source.format {
        SourceFormat::Workbook => "spreadsheet sheet".to_string(),
        SourceFormat::Delimited => format!(
            "{}, delimiter '{}', {}",
            source.encoding.map(|e| e.label()).unwrap_or("unknown encoding"),
            source
                .delimiter
                .and_then(|d| u8::try_from(d).ok())
                .map(io_utils::printable_delimiter)
                .unwrap_or_default(),
            if source.has_header {
                "header row detected"
            } else {
                "no header row"
            }
        ),
    }
}

fn narrative(report: &AnalysisReport, emitted: &EmittedSchema) -> String {
    let mut out = String::new();
    let names: Vec<&str> = report.tables.iter().map(|t| t.name.as_str()).collect();
    let _ = writeln!(out, "Data Analysis Report for {}", names.join(", "));
    let _ = writeln!(out, "{}", "=".repeat(40));

    let _ = writeln!(out, "\nFile Analysis Summary:");
    for summary in &report.tables {
        let _ = writeln!(
            out,
            "- {}: {} row(s), {} column(s) ({})",
            summary.name,
            summary.cleaned_rows,
            summary.columns.len(),
            source_line(&summary.source)
        );
    }

    let _ = writeln!(out, "\nData Quality Assessment:");
    for summary in &report.tables {
        let _ = writeln!(
            out,
            "- {}: {} duplicate row(s) removed, {} missing cell(s) ({} filled, {} left empty), {} malformed cell(s)",
            summary.name,
            summary.duplicates_removed,
            summary.missing_cells,
            summary.filled_cells,
            summary.unresolved_cells,
            summary.malformed_cells
        );
    }

    let _ = writeln!(out, "\nData Cleaning Actions:");
    let mut step = 0;
    for summary in &report.tables {
        for action in &summary.actions {
            step += 1;
            let target = match &action.column {
                Some(column) => format!("{}.{}", summary.name, column),
                None => summary.name.clone(),
            };
            let _ = writeln!(out, "{step}. {target}: {}", action.description);
        }
    }
    if step == 0 {
        let _ = writeln!(out, "No cleaning was necessary.");
    }

    let _ = writeln!(out, "\nColumn Type Inference:");
    for summary in &report.tables {
        let rows: Vec<Vec<String>> = summary
            .columns
            .iter()
            .map(|c| {
                vec![
                    format!("{}.{}", summary.name, c.name),
                    c.inferred_type.label().to_string(),
                    if c.nullable { "yes" } else { "no" }.to_string(),
                    format!("{:.2}", c.sample_cardinality),
                    c.format_hint.clone().unwrap_or_default(),
                ]
            })
            .collect();
        out.push_str(&table::render_table(
            &["column", "type", "nullable", "cardinality", "hint"],
            &rows,
        ));
    }

    let numeric_rows: Vec<Vec<String>> = report
        .tables
        .iter()
        .flat_map(|summary| {
            summary.columns.iter().filter_map(move |c| {
                c.numeric
                    .as_ref()
                    .map(|stats| stats.render_row(&format!("{}.{}", summary.name, c.name)))
            })
        })
        .collect();
    if !numeric_rows.is_empty() {
        let _ = writeln!(out, "\nNumeric Column Statistics:");
        out.push_str(&table::render_table(
            &["column", "count", "min", "max", "mean", "median", "std_dev"],
            &numeric_rows,
        ));
    }

    let _ = writeln!(out, "\nRelationships Detected:");
    for key in &emitted.accepted_keys {
        let _ = writeln!(
            out,
            "- Primary key: {}({}) (confidence {:.2})",
            key.table,
            key.columns.join(", "),
            key.confidence
        );
    }
    for edge in &report.relationships {
        let _ = writeln!(
            out,
            "- Foreign key: {}.{} -> {}.{} ({}, confidence {:.2})",
            edge.from_table,
            edge.from_column,
            edge.to_table,
            edge.to_column,
            edge.cardinality_hint.label(),
            edge.confidence
        );
    }
    for warning in &report.deferred {
        let _ = writeln!(out, "- Unconfirmed: {warning}");
    }
    if emitted.accepted_keys.is_empty() && report.relationships.is_empty() {
        let _ = writeln!(out, "- None with enough confidence to emit as constraints");
    }
    if report.tables.len() > 1 {
        let _ = writeln!(out, "- Load order: {}", report.load_order.order.join(", "));
        if !report.load_order.cyclic.is_empty() {
            let _ = writeln!(
                out,
                "- Reference cycle between: {}",
                report.load_order.cyclic.join(", ")
            );
        }
    }

    let _ = writeln!(out, "\nRecommended Charts:");
    if report.charts.is_empty() {
        let _ = writeln!(out, "- None; no numeric, date or categorical columns");
    }
    for chart in &report.charts {
        let _ = writeln!(out, "- {}: {}", chart.table, chart.rationale);
    }

    let other_warnings: Vec<&Warning> = report
        .warnings
        .iter()
        .filter(|w| !is_deferred(w))
        .collect();
    if !other_warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in other_warnings {
            let _ = writeln!(out, "- {warning}");
        }
    }

    let _ = writeln!(out, "\nData Quality Score: {:.0}/100", report.quality.score);
    let _ = writeln!(out, "- Completeness: {}", percent(report.quality.completeness));
    let _ = writeln!(out, "- Consistency: {}", percent(report.quality.consistency));
    let _ = writeln!(out, "- Uniqueness: {}", percent(report.quality.uniqueness));
    out
}
