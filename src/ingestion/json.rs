//! Structured-record (JSON) parser.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`
//! - A single object, treated as one row: `{"a":1}`
//! - Newline-delimited objects, as a fallback when the input is not one JSON document
//!
//! Schema policy for heterogeneous records: the schema is the union of keys across the first
//! [`ParseOptions::schema_scan_limit`] records, in first-seen order. Every row carries every
//! schema column; a key missing from a record becomes `""`. Keys first seen after the scan
//! window are dropped and counted in [`ParsedTable::dropped_fields`].
//!
//! Values are rendered as strings: strings verbatim, `null` as `""`, numbers and booleans in
//! their JSON spelling, nested arrays/objects as compact JSON.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ParseError, ParseResult};
use crate::types::{CanonicalRow, CanonicalSchema, FileFormat, ParsedTable};

use super::unified::{FormatParser, ParseOptions};
use super::{BatchCheck, strip_utf8_bom};

/// [`FormatParser`] for `.json` uploads.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredRecordParser;

impl FormatParser for StructuredRecordParser {
    fn format(&self) -> FileFormat {
        FileFormat::StructuredRecord
    }

    fn parse(
        &self,
        bytes: &[u8],
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> ParseResult<ParsedTable> {
        parse_structured(bytes, options, cancel)
    }
}

/// Parse JSON records held in memory.
pub fn parse_structured(
    bytes: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<ParsedTable> {
    let text = std::str::from_utf8(strip_utf8_bom(bytes))
        .map_err(|e| ParseError::malformed(format!("json input is not valid UTF-8: {e}")))?;
    let records = read_records(text.trim())?;
    records_to_table(records, options, cancel)
}

fn read_records(input: &str) -> ParseResult<Vec<Map<String, Value>>> {
    if input.is_empty() {
        return Err(ParseError::malformed("json input is empty"));
    }

    match serde_json::from_str::<Value>(input) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(ParseError::malformed(format!(
                    "record {} is not a json object (found {})",
                    idx + 1,
                    kind_of(&other)
                ))),
            })
            .collect(),
        Ok(Value::Object(map)) => Ok(vec![map]),
        Ok(other) => Err(ParseError::malformed(format!(
            "json must be an object or an array of objects (found {})",
            kind_of(&other)
        ))),
        Err(doc_err) => read_ndjson(input).map_err(|_| ParseError::Json(doc_err)),
    }
}

/// One object per non-blank line. Any failure is reported by the caller as the original
/// whole-document error.
fn read_ndjson(input: &str) -> Result<Vec<Map<String, Value>>, ()> {
    let mut records = Vec::new();
    for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => records.push(map),
            _ => return Err(()),
        }
    }
    if records.len() < 2 {
        return Err(());
    }
    Ok(records)
}

fn records_to_table(
    records: Vec<Map<String, Value>>,
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<ParsedTable> {
    let mut batch = BatchCheck::new(cancel, options.batch_size);
    batch.check()?;

    let mut columns: Vec<String> = Vec::new();
    for record in records.iter().take(options.schema_scan_limit) {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    let schema = CanonicalSchema::new(columns);

    let truncated = records.len() > options.max_rows;
    let mut dropped_fields = 0usize;
    let mut rows = Vec::with_capacity(records.len().min(options.max_rows));
    for record in records.iter().take(options.max_rows) {
        dropped_fields += record.keys().filter(|k| schema.index_of(k).is_none()).count();
        let values = schema
            .columns
            .iter()
            .map(|col| record.get(col).map(value_to_string).unwrap_or_default());
        rows.push(CanonicalRow::from_values(&schema, values));
        batch.tick()?;
    }
    batch.check()?;

    if dropped_fields > 0 {
        debug!(
            dropped_fields,
            scan_limit = options.schema_scan_limit,
            "json fields outside the scanned schema were dropped"
        );
    }

    Ok(ParsedTable {
        schema,
        rows,
        truncated,
        dropped_fields,
    })
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
