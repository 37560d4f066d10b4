//! Format normalizers: raw chunks in, ordered field mappings out.
//!
//! Every format implements [`RowNormalizer`]. Chunk boundaries are
//! arbitrary: a chunk may end in the middle of a record, a quoted CSV field
//! or a multi-byte UTF-8 sequence.
//!
//! Normalizers do not interpret reserved fields. Lifting `key`, `version`
//! and `attachments` into a [`Draft`](dat_types::Draft) happens per item in
//! the pipeline, so one malformed record only skips itself.

pub mod binary;
pub mod csv;
pub mod json;

use dat_types::Fields;

use crate::config::{Format, IngestConfig};
use crate::error::IngestResult;

pub use binary::{encode_row, BinaryRowNormalizer};
pub use csv::CsvNormalizer;
pub use json::JsonLinesNormalizer;

/// Incremental parser producing records from one input stream.
///
/// Records completed before an error are still appended to `out`, so the
/// caller can commit them before surfacing the error. After an error the
/// normalizer must not be fed again.
pub trait RowNormalizer: Send {
    /// Feed the next chunk of input.
    fn push(&mut self, chunk: &[u8], out: &mut Vec<Fields>) -> IngestResult<()>;

    /// Signal end of input, flushing any final unterminated record.
    fn finish(&mut self, out: &mut Vec<Fields>) -> IngestResult<()>;

    /// Column names this stream is bound to, once known.
    fn columns(&self) -> Option<&[String]> {
        None
    }
}

/// Build the normalizer for the configured format.
pub fn normalizer_for(config: &IngestConfig) -> IngestResult<Box<dyn RowNormalizer>> {
    Ok(match config.format {
        Format::JsonLines => Box::new(JsonLinesNormalizer::new()),
        Format::Csv => Box::new(CsvNormalizer::new(config)?),
        Format::BinaryRows => Box::new(BinaryRowNormalizer::new(config.binary_schema()?)),
    })
}

/// Run a whole input through a normalizer.
pub fn normalize_all(normalizer: &mut dyn RowNormalizer, input: &[u8]) -> IngestResult<Vec<Fields>> {
    let mut out = Vec::new();
    normalizer.push(input, &mut out)?;
    normalizer.finish(&mut out)?;
    Ok(out)
}
