//! Markup (XML) parser.
//!
//! The record tag is the first element name that repeats directly under the root (the first
//! root child when no name repeats). Every element with that name under the root is one row;
//! other root children, such as a leading `<meta>` header, are ignored.
//!
//! Within a record:
//! - attributes become columns named after the attribute
//! - each child element becomes a column named after the child tag; its value is all text below
//!   it, joined by single spaces
//! - a repeated child tag joins its values with `", "`
//! - text directly inside the record element becomes a column named after the record tag
//!
//! The schema is the union of those names in first-seen order; absent cells are `""`.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ParseError, ParseResult};
use crate::types::{CanonicalRow, CanonicalSchema, FileFormat, ParsedTable};

use super::unified::{FormatParser, ParseOptions};
use super::{BatchCheck, strip_utf8_bom};

const ROOT_DEPTH: usize = 1;
const RECORD_DEPTH: usize = 2;
const FIELD_DEPTH: usize = 3;

/// [`FormatParser`] for `.xml` uploads.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkupParser;

impl FormatParser for MarkupParser {
    fn format(&self) -> FileFormat {
        FileFormat::Markup
    }

    fn parse(
        &self,
        bytes: &[u8],
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> ParseResult<ParsedTable> {
        parse_markup(bytes, options, cancel)
    }
}

/// A record being assembled: ordered `(column, value)` pairs.
#[derive(Debug, Default)]
struct Record {
    cells: Vec<(String, String)>,
}

impl Record {
    fn push(&mut self, column: String, value: String, columns: &mut Vec<String>) {
        if !columns.contains(&column) {
            columns.push(column.clone());
        }
        match self.cells.iter_mut().find(|(c, _)| *c == column) {
            Some((_, existing)) => {
                if !value.is_empty() {
                    if !existing.is_empty() {
                        existing.push_str(", ");
                    }
                    existing.push_str(&value);
                }
            }
            None => self.cells.push((column, value)),
        }
    }

    fn get(&self, column: &str) -> &str {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }
}

/// Parse an XML document held in memory.
pub fn parse_markup(
    bytes: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> ParseResult<ParsedTable> {
    let mut batch = BatchCheck::new(cancel, options.batch_size);
    batch.check()?;

    let bytes = strip_utf8_bom(bytes);
    let record_tag = detect_record_tag(bytes, &mut batch)?;

    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;
    let mut current: Option<Record> = None;
    let mut field: Option<(String, String)> = None;
    let mut columns: Vec<String> = Vec::new();
    let mut records: Vec<Record> = Vec::new();
    let mut truncated = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                match depth {
                    ROOT_DEPTH => saw_root = true,
                    RECORD_DEPTH => {
                        current = open_record(&e, record_tag.as_deref(), &mut columns)?;
                        if current.is_some() && records.len() >= options.max_rows {
                            truncated = true;
                            current = None;
                        }
                    }
                    FIELD_DEPTH if current.is_some() => {
                        field = Some((element_name(&e), String::new()));
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match depth + 1 {
                ROOT_DEPTH => saw_root = true,
                RECORD_DEPTH => {
                    if let Some(record) = open_record(&e, record_tag.as_deref(), &mut columns)? {
                        if records.len() >= options.max_rows {
                            truncated = true;
                        } else {
                            records.push(record);
                            batch.tick()?;
                        }
                    }
                }
                FIELD_DEPTH => {
                    if let Some(record) = current.as_mut() {
                        record.push(element_name(&e), String::new(), &mut columns);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape()?;
                append_text(&text, depth, &mut field, &mut current, record_tag.as_deref(), &mut columns);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c);
                append_text(&text, depth, &mut field, &mut current, record_tag.as_deref(), &mut columns);
            }
            Event::End(_) => {
                match depth {
                    RECORD_DEPTH => {
                        if let Some(record) = current.take() {
                            records.push(record);
                            batch.tick()?;
                        }
                    }
                    FIELD_DEPTH => {
                        if let (Some((name, value)), Some(record)) = (field.take(), current.as_mut())
                        {
                            record.push(name, value, &mut columns);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    batch.check()?;

    if !saw_root {
        return Err(ParseError::malformed("markup input has no root element"));
    }
    if depth != 0 {
        return Err(ParseError::malformed(format!(
            "markup input ended with {depth} unclosed element(s)"
        )));
    }
    if records.is_empty() || columns.is_empty() {
        return Err(ParseError::NoColumns {
            format: FileFormat::Markup,
        });
    }

    if truncated {
        debug!(max_rows = options.max_rows, "markup input truncated at row limit");
    }

    let schema = CanonicalSchema::new(columns);
    let rows = records
        .iter()
        .map(|record| CanonicalRow::from_values(&schema, schema.column_names().map(|c| record.get(c))))
        .collect();

    Ok(ParsedTable {
        schema,
        rows,
        truncated,
        dropped_fields: 0,
    })
}

/// Scan the root's children and pick the record tag: the first name seen at least twice, else
/// the first name seen. Structural errors are left for the main pass to report.
fn detect_record_tag(bytes: &[u8], batch: &mut BatchCheck<'_>) -> ParseResult<Option<String>> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    // (name, occurrences) in first-seen order.
    let mut seen: Vec<(String, usize)> = Vec::new();

    let mut note = |name: String, seen: &mut Vec<(String, usize)>| -> ParseResult<()> {
        match seen.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += 1,
            None => seen.push((name, 1)),
        }
        batch.tick()
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth == RECORD_DEPTH {
                    note(element_name(&e), &mut seen)?;
                }
            }
            Ok(Event::Empty(e)) if depth + 1 == RECORD_DEPTH => {
                note(element_name(&e), &mut seen)?;
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
        buf.clear();
    }

    let repeating = seen.iter().find(|(_, count)| *count >= 2);
    Ok(repeating
        .or_else(|| seen.first())
        .map(|(name, _)| name.clone()))
}

/// Start a record if `e` carries the record tag.
fn open_record(
    e: &BytesStart<'_>,
    record_tag: Option<&str>,
    columns: &mut Vec<String>,
) -> ParseResult<Option<Record>> {
    let name = element_name(e);
    if record_tag != Some(name.as_str()) {
        return Ok(None);
    }

    let mut record = Record::default();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        record.push(key, value, columns);
    }
    Ok(Some(record))
}

fn append_text(
    text: &str,
    depth: usize,
    field: &mut Option<(String, String)>,
    current: &mut Option<Record>,
    record_tag: Option<&str>,
    columns: &mut Vec<String>,
) {
    if let Some((_, value)) = field.as_mut() {
        if !value.is_empty() {
            value.push(' ');
        }
        value.push_str(text);
    } else if depth == RECORD_DEPTH {
        if let (Some(record), Some(tag)) = (current.as_mut(), record_tag) {
            record.push(tag.to_string(), text.to_string(), columns);
        }
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}
