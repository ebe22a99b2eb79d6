use tabular_ingest::ParseError;
use tabular_ingest::ingestion::ParseOptions;
use tabular_ingest::ingestion::json::parse_structured;
use tabular_ingest::types::ParsedTable;
use tokio_util::sync::CancellationToken;

fn parse(input: &str, options: &ParseOptions) -> Result<ParsedTable, ParseError> {
    parse_structured(input.as_bytes(), options, &CancellationToken::new())
}

#[test]
fn heterogeneous_records_use_union_schema_and_empty_fill() {
    let bytes = std::fs::read("tests/fixtures/heterogeneous.json").unwrap();
    let table = parse_structured(&bytes, &ParseOptions::default(), &CancellationToken::new()).unwrap();

    assert_eq!(table.schema.columns, vec!["a", "b"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.rows[0].get("a"), Some("1"));
    assert_eq!(table.rows[0].get("b"), Some(""));
    assert_eq!(table.rows[1].get("b"), Some("3"));
    assert!(table.rows.iter().all(|r| r.len() == 2));
    assert_eq!(table.dropped_fields, 0);
}

#[test]
fn single_object_is_one_row() {
    let table = parse(r#"{"id": 7, "tags": ["x", "y"], "meta": null}"#, &ParseOptions::default()).unwrap();
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.rows[0].get("id"), Some("7"));
    assert_eq!(table.rows[0].get("tags"), Some(r#"["x","y"]"#));
    assert_eq!(table.rows[0].get("meta"), Some(""));
}

#[test]
fn newline_delimited_objects_are_accepted() {
    let bytes = std::fs::read("tests/fixtures/events.json").unwrap();
    let table = parse_structured(&bytes, &ParseOptions::default(), &CancellationToken::new()).unwrap();
    assert_eq!(table.schema.columns, vec!["id", "name", "active"]);
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.rows[1].get("active"), Some("false"));
    assert_eq!(table.rows[2].get("name"), Some(""));
}

#[test]
fn keys_after_scan_window_are_dropped_and_counted() {
    let opts = ParseOptions {
        schema_scan_limit: 1,
        ..Default::default()
    };
    let table = parse(r#"[{"a":1},{"a":2,"b":3,"c":4}]"#, &opts).unwrap();
    assert_eq!(table.schema.columns, vec!["a"]);
    assert_eq!(table.dropped_fields, 2);
    assert_eq!(table.rows[1].get("b"), None);
}

#[test]
fn non_object_record_is_malformed() {
    let err = parse(r#"[{"a":1}, 2]"#, &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::Malformed { .. }));
    assert!(err.to_string().contains("record 2"), "{err}");
}

#[test]
fn scalar_document_is_malformed() {
    let err = parse("42", &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::Malformed { .. }));
}

#[test]
fn broken_json_reports_json_error() {
    let err = parse(r#"[{"a":1},"#, &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::Json(_)), "{err:?}");
}

#[test]
fn empty_array_has_no_columns() {
    let table = parse("[]", &ParseOptions::default()).unwrap();
    assert!(table.schema.is_empty());
    assert_eq!(table.row_count(), 0);
}

#[test]
fn row_cap_applies() {
    let opts = ParseOptions {
        max_rows: 1,
        ..Default::default()
    };
    let table = parse(r#"[{"a":1},{"a":2}]"#, &opts).unwrap();
    assert_eq!(table.row_count(), 1);
    assert!(table.truncated);
}
