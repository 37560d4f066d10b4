use bytes::BytesMut;
use dat_types::Fields;
use serde_json::Value;

use crate::error::{IngestError, IngestResult};

use super::RowNormalizer;

/// Line-delimited JSON normalizer.
///
/// Each non-blank line holds one JSON object. Lines are only decoded once
/// complete, so chunks may split values or UTF-8 sequences anywhere. Several
/// objects on the same line are accepted and emitted in order.
#[derive(Debug, Default)]
pub struct JsonLinesNormalizer {
    buf: BytesMut,
    records: u64,
}

impl JsonLinesNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(&mut self, line: &[u8], out: &mut Vec<Fields>) -> IngestResult<()> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        for value in serde_json::Deserializer::from_slice(line).into_iter::<Value>() {
            self.records += 1;
            let record = self.records;
            match value {
                Ok(Value::Object(fields)) => out.push(fields),
                Ok(other) => {
                    return Err(IngestError::Parse {
                        record,
                        reason: format!("expected a JSON object, got `{other}`"),
                    })
                }
                Err(e) => {
                    return Err(IngestError::Parse {
                        record,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

impl RowNormalizer for JsonLinesNormalizer {
    fn push(&mut self, chunk: &[u8], out: &mut Vec<Fields>) -> IngestResult<()> {
        self.buf.extend_from_slice(chunk);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1).freeze();
            self.parse_line(&line[..pos], out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<Fields>) -> IngestResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let tail = self.buf.split().freeze();
        self.parse_line(&tail, out)
    }
}
