mod common;

use proptest::prelude::*;
use table_profiler::{
    clean::{self, ActionKind, ActionOutcome},
    config::{AnalysisConfig, InferenceConfig},
    error::{AnalysisError, Warning},
    infer::{self, InferredType},
    ingest,
    keys::Cardinality,
    pipeline::{self, AnalysisOutcome, Upload},
};

use common::{default_config, fixture_upload};

#[test]
fn duplicate_signup_row_is_removed() {
    let upload = Upload::csv(
        "signups.csv",
        "id,name,signup_date\n1,Alice,2021-01-05\n2,Bob,2021-01-06\n1,Alice,2021-01-05\n",
    );
    let raw = ingest::ingest(&upload.bytes, "text/csv", &AnalysisConfig::default()).unwrap();
    assert_eq!(raw.row_count(), 3);

    let typed = infer::infer(&raw, &InferenceConfig::default());
    let types: Vec<InferredType> = typed.columns().iter().map(|c| c.inferred_type).collect();
    assert_eq!(types[0], InferredType::Identifier);
    assert!(matches!(types[1], InferredType::Categorical | InferredType::Text));
    assert_eq!(types[2], InferredType::Date);

    let cleaned = clean::clean(&typed, &default_config().cleaning);
    assert_eq!(cleaned.row_count(), 2);
    let duplicates: Vec<_> = cleaned
        .actions()
        .iter()
        .filter(|a| a.kind == ActionKind::DuplicateRow)
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].rows, vec![2]);
}

#[test]
fn missing_integer_is_filled_with_median() {
    let report = pipeline::try_analyze(
        &[Upload::csv("scores.csv", "label,score\na,10\nb,20\nc,\nd,40\n")],
        &default_config(),
    )
    .unwrap();
    let cleaned = &report.cleaned_tables()[0];
    let score = cleaned.column_index("score").unwrap();
    assert_eq!(cleaned.render_cell(&cleaned.rows()[2][score]), "20");

    let fill = cleaned
        .actions()
        .iter()
        .find(|a| a.kind == ActionKind::MissingValueFill)
        .unwrap();
    assert_eq!(fill.column.as_deref(), Some("score"));
    assert_eq!(fill.rows, vec![2]);
    assert_eq!(fill.outcome, ActionOutcome::Applied);
    assert_eq!(report.tables[0].filled_cells, 1);
}

#[test]
fn amounts_near_the_decimal_limit_are_profiled_and_filled() {
    let outcome = pipeline::analyze(
        &[Upload::csv(
            "ledger.csv",
            "label,amount\na,50000000000000000000000000000\nb,60000000000000000000000000000\nc,\n",
        )],
        &default_config(),
    );
    let report = outcome.report().unwrap();
    let amount = &report.tables[0].columns[1];
    assert_eq!(amount.inferred_type, InferredType::Float);
    assert_eq!(
        amount.numeric.as_ref().unwrap().median.to_string(),
        "55000000000000000000000000000"
    );
    assert_eq!(report.tables[0].filled_cells, 1);
}

#[test]
fn orders_reference_customers() {
    let report = pipeline::try_analyze(
        &[fixture_upload("orders.csv"), fixture_upload("customers.csv")],
        &default_config(),
    )
    .unwrap();

    assert_eq!(report.relationships.len(), 1);
    let edge = &report.relationships[0];
    assert_eq!(
        (edge.from_table.as_str(), edge.from_column.as_str()),
        ("orders", "customer_id")
    );
    assert_eq!((edge.to_table.as_str(), edge.to_column.as_str()), ("customers", "id"));
    assert_eq!(edge.confidence, 1.0);
    assert_eq!(edge.cardinality_hint, Cardinality::ManyToOne);

    assert!(report.schema_sql.contains(
        "ALTER TABLE orders ADD CONSTRAINT fk_orders_customer_id FOREIGN KEY (customer_id) REFERENCES customers (id);"
    ));
    assert!(report.schema_sql.contains("CREATE INDEX idx_orders_customer_id ON orders (customer_id);"));
    assert_eq!(report.load_order.order, vec!["customers", "orders"]);
    assert!(report.digest.suspected_foreign_keys.contains(&"orders.customer_id".to_string()));
}

#[test]
fn emitted_edges_never_dangle() {
    let report = pipeline::try_analyze(
        &[fixture_upload("customers.csv"), fixture_upload("orders.csv")],
        &default_config(),
    )
    .unwrap();
    for edge in report.graph.edges() {
        assert!(report.graph.has_column(&edge.from_table, &edge.from_column));
        assert!(report.graph.has_column(&edge.to_table, &edge.to_column));
    }
}

#[test]
fn partial_overlap_is_deferred_not_emitted() {
    let customers = "id,name\n1,Ann\n2,Ben\n3,Cy\n";
    let orders = "order_id,customer_id\n10,1\n11,2\n12,7\n13,8\n14,1\n";
    let report = pipeline::try_analyze(
        &[
            Upload::csv("customers.csv", customers),
            Upload::csv("orders.csv", orders),
        ],
        &default_config(),
    )
    .unwrap();
    assert!(report.relationships.is_empty());
    assert!(!report.schema_sql.contains("FOREIGN KEY"));
    assert!(report.deferred.iter().any(|w| matches!(
        w,
        Warning::LowConfidenceRelationship { from_column, to_table, .. }
            if from_column == "customer_id" && to_table == "customers"
    )));
    assert!(report.narrative.contains("Unconfirmed"));
}

#[test]
fn first_fatal_error_in_upload_order_wins() {
    let uploads = [
        Upload::csv("good.csv", "a,b\n1,2\n"),
        Upload::csv("blank.csv", "   "),
        Upload::new("broken.csv", "text/csv", vec![0u8, 1, 2, 0]),
    ];
    match pipeline::analyze(&uploads, &default_config()) {
        AnalysisOutcome::Failed { error } => {
            assert!(matches!(error, AnalysisError::EmptyInput { .. }));
            assert_eq!(error.source_name(), "blank.csv");
        }
        AnalysisOutcome::Complete { .. } => panic!("expected a fatal error"),
    }
}

#[test]
fn outcome_serializes_with_status_tag() {
    let outcome = pipeline::analyze(&[Upload::csv("x.csv", "")], &default_config());
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["error"]["kind"], "empty_input");

    let outcome = pipeline::analyze(&[fixture_upload("customers.csv")], &default_config());
    assert!(outcome.is_complete());
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "complete");
    assert!(json["report"]["narrative"].is_string());
}

#[test]
fn same_named_uploads_are_renamed() {
    let report = pipeline::try_analyze(
        &[
            Upload::csv("data.csv", "a,b\n1,x\n2,y\n"),
            Upload::csv("nested/data.csv", "a,b\n3,z\n4,w\n"),
        ],
        &default_config(),
    )
    .unwrap();
    let names: Vec<&str> = report.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["data", "data_2"]);
}

#[test]
fn concurrent_runs_with_different_configs_do_not_interfere() {
    let uploads = vec![fixture_upload("orders.csv"), fixture_upload("customers.csv")];
    let mut strict = AnalysisConfig::default();
    strict.keys.constraint_cutoff = 1.0;
    strict.keys.fk_overlap_threshold = 1.0;
    strict.keys.near_miss_floor = 1.0;

    let handles: Vec<_> = [default_config(), strict]
        .into_iter()
        .map(|config| {
            let uploads = uploads.clone();
            std::thread::spawn(move || pipeline::try_analyze(&uploads, &config).unwrap())
        })
        .collect();
    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(reports[0].schema_sql, reports[1].schema_sql);
}

fn cell() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,8}",
        "-?[0-9]{1,5}",
        "[0-9]{1,3}\\.[0-9]{2}",
        Just(String::new()),
        Just("yes".to_string()),
        Just("2021-03-04".to_string()),
        "[a-z]{1,4}, [a-z]{1,4}",
        "[a-z]{1,4}\"[a-z]{1,3}",
    ]
}

fn grid() -> impl Strategy<Value = (Vec<String>, Vec<Vec<String>>)> {
    (1usize..6).prop_flat_map(|width| {
        (
            Just((0..width).map(|idx| format!("field_{idx}")).collect::<Vec<_>>()),
            prop::collection::vec(prop::collection::vec(cell(), width), 1..20),
        )
    })
}

fn to_csv(header: &[String], rows: &[Vec<String>]) -> String {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(header).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    String::from_utf8(writer.into_inner().unwrap()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reingesting_preserves_shape((header, rows) in grid()) {
        let config = AnalysisConfig::default();
        let text = to_csv(&header, &rows);
        let first = ingest::ingest(text.as_bytes(), "text/csv", &config);
        // A grid whose every cell is blank carries no data.
        prop_assume!(first.is_ok());
        let first = first.unwrap();

        let again = ingest::ingest(first.to_delimited(b',').unwrap().as_bytes(), "text/csv", &config).unwrap();
        prop_assert_eq!(again.column_count(), first.column_count());
        prop_assert_eq!(again.row_count(), first.row_count());
    }

    #[test]
    fn inference_is_deterministic_and_cleaning_never_adds_rows((header, rows) in grid()) {
        let raw = table_profiler::ingest::RawTable::from_rows("grid", header, rows);
        let options = InferenceConfig::default();
        let first = infer::infer(&raw, &options);
        let second = infer::infer(&raw, &options);
        let types = |t: &infer::TypedTable| t.columns().iter().map(|c| c.inferred_type).collect::<Vec<_>>();
        prop_assert_eq!(types(&first), types(&second));

        let cleaned = clean::clean(&first, &default_config().cleaning);
        prop_assert!(cleaned.row_count() <= first.row_count());
        let removed: usize = cleaned
            .actions()
            .iter()
            .filter(|a| a.kind == ActionKind::DuplicateRow)
            .map(|a| a.rows.len())
            .sum();
        prop_assert_eq!(removed, first.row_count() - cleaned.row_count());
    }
}
