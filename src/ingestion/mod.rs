//! Format parsers and the unified parse entrypoint.
//!
//! Most callers should use [`parse_upload`] (from [`unified`]) which:
//!
//! - picks a parser from [`ParseOptions::format`], the file extension, or the content type
//! - runs it over the upload bytes, checking the cancellation signal between row batches
//! - rejects results with no columns
//!
//! Format-specific parsers are available under:
//! - [`csv`] (delimited text)
//! - [`json`] (structured records)
//! - [`excel`] (spreadsheets, feature `excel`)
//! - [`xml`] (markup)
//! - [`text`] (plain text)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod json;
pub mod observability;
pub mod text;
pub mod unified;
pub mod xml;

pub use observability::{
    CompositeObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
    TracingObserver,
};
pub use unified::{FormatParser, ParseOptions, parse_upload, parser_for, resolve_format};

use tokio_util::sync::CancellationToken;

use crate::error::{ParseError, ParseResult};

/// Checks a cancellation token once every `interval` rows.
pub(crate) struct BatchCheck<'a> {
    token: &'a CancellationToken,
    interval: usize,
    seen: usize,
}

impl<'a> BatchCheck<'a> {
    pub(crate) fn new(token: &'a CancellationToken, interval: usize) -> Self {
        Self {
            token,
            interval: interval.max(1),
            seen: 0,
        }
    }

    /// Count one row; fails with [`ParseError::Cancelled`] at a batch boundary after cancellation.
    pub(crate) fn tick(&mut self) -> ParseResult<()> {
        self.seen += 1;
        if self.seen % self.interval == 0 && self.token.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        Ok(())
    }

    /// Unconditional check, used once before parsing starts and once at the end.
    pub(crate) fn check(&self) -> ParseResult<()> {
        if self.token.is_cancelled() {
            Err(ParseError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trim header names, synthesize `ColumnN` for blanks, and suffix duplicates (`name_2`, ...).
pub(crate) fn normalize_headers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for (idx, name) in raw.into_iter().enumerate() {
        let trimmed = name.as_ref().trim();
        let base = if trimmed.is_empty() {
            synthetic_column(idx)
        } else {
            trimmed.to_string()
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while out.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        out.push(candidate);
    }
    out
}

/// `Column1`, `Column2`, ... for a zero-based index.
pub(crate) fn synthetic_column(idx: usize) -> String {
    format!("Column{}", idx + 1)
}

pub(crate) fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}
