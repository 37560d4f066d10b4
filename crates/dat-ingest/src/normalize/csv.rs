use std::collections::HashSet;

use dat_types::Fields;
use serde_json::Value;

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};

use super::RowNormalizer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    /// Saw a quote inside a quoted field: either an escape or the closing quote.
    QuoteInQuoted,
}

/// Incremental RFC 4180 tokenizer.
///
/// Handles quoted fields with embedded delimiters, newlines and doubled
/// quotes. A carriage return outside quotes is dropped, so CRLF and LF line
/// endings behave the same. Field bytes are only decoded as UTF-8 once the
/// field is complete.
#[derive(Debug)]
struct Tokenizer {
    delimiter: u8,
    state: State,
    field: Vec<u8>,
    record: Vec<String>,
    records: u64,
}

impl Tokenizer {
    fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            state: State::FieldStart,
            field: Vec::new(),
            record: Vec::new(),
            records: 0,
        }
    }

    fn feed(&mut self, chunk: &[u8], mut emit: impl FnMut(u64, Vec<String>) -> IngestResult<()>) -> IngestResult<()> {
        for &b in chunk {
            match self.state {
                State::FieldStart => match b {
                    b'"' => self.state = State::Quoted,
                    b'\n' => self.end_record(&mut emit)?,
                    b'\r' => {}
                    _ if b == self.delimiter => self.end_field()?,
                    _ => {
                        self.field.push(b);
                        self.state = State::Unquoted;
                    }
                },
                State::Unquoted => match b {
                    b'\n' => self.end_record(&mut emit)?,
                    b'\r' => {}
                    _ if b == self.delimiter => self.end_field()?,
                    _ => self.field.push(b),
                },
                State::Quoted => match b {
                    b'"' => self.state = State::QuoteInQuoted,
                    _ => self.field.push(b),
                },
                State::QuoteInQuoted => match b {
                    b'"' => {
                        self.field.push(b'"');
                        self.state = State::Quoted;
                    }
                    b'\n' => self.end_record(&mut emit)?,
                    b'\r' => {}
                    _ if b == self.delimiter => self.end_field()?,
                    _ => {
                        // Lenient: text after a closing quote joins the field.
                        self.field.push(b);
                        self.state = State::Unquoted;
                    }
                },
            }
        }
        Ok(())
    }

    fn finish(&mut self, mut emit: impl FnMut(u64, Vec<String>) -> IngestResult<()>) -> IngestResult<()> {
        if self.state == State::Quoted {
            return Err(IngestError::Parse {
                record: self.records + 1,
                reason: "unterminated quoted field".into(),
            });
        }
        if self.state != State::FieldStart || !self.record.is_empty() {
            self.end_record(&mut emit)?;
        }
        Ok(())
    }

    fn end_field(&mut self) -> IngestResult<()> {
        let bytes = std::mem::take(&mut self.field);
        let text = String::from_utf8(bytes).map_err(|e| IngestError::Parse {
            record: self.records + 1,
            reason: format!("invalid UTF-8: {e}"),
        })?;
        self.record.push(text);
        self.state = State::FieldStart;
        Ok(())
    }

    fn end_record(&mut self, emit: &mut impl FnMut(u64, Vec<String>) -> IngestResult<()>) -> IngestResult<()> {
        self.end_field()?;
        let record = std::mem::take(&mut self.record);
        if record.len() == 1 && record[0].is_empty() {
            // Blank line.
            return Ok(());
        }
        self.records += 1;
        emit(self.records, record)
    }
}

/// CSV/TSV normalizer.
///
/// The first record names the columns unless header detection is switched
/// off, in which case the configured column list is used. Every following
/// record must have exactly as many cells as there are columns; values are
/// kept as strings.
#[derive(Debug)]
pub struct CsvNormalizer {
    tokenizer: Tokenizer,
    /// `None` until the header record has been read.
    columns: Option<Vec<String>>,
}

impl CsvNormalizer {
    pub fn new(config: &IngestConfig) -> IngestResult<Self> {
        let columns = match (&config.columns, config.header_row) {
            (_, true) => None,
            (Some(columns), false) if !columns.is_empty() => {
                if let Some(name) = duplicate_column(columns) {
                    return Err(IngestError::Config(format!("column {name:?} is listed twice")));
                }
                Some(columns.clone())
            }
            (_, false) => {
                return Err(IngestError::Config(
                    "CSV without a header row needs an explicit column list".into(),
                ))
            }
        };
        Ok(Self {
            tokenizer: Tokenizer::new(config.csv_delimiter()?),
            columns,
        })
    }

    fn on_record(
        columns: &mut Option<Vec<String>>,
        out: &mut Vec<Fields>,
        number: u64,
        record: Vec<String>,
    ) -> IngestResult<()> {
        let Some(names) = columns.as_ref() else {
            if let Some(name) = duplicate_column(&record) {
                return Err(IngestError::Parse {
                    record: number,
                    reason: format!("duplicate column {name:?} in header"),
                });
            }
            *columns = Some(record);
            return Ok(());
        };
        if record.len() != names.len() {
            return Err(IngestError::ColumnMismatch {
                record: number,
                expected: names.clone(),
                found: record,
            });
        }
        out.push(
            names
                .iter()
                .cloned()
                .zip(record.into_iter().map(Value::String))
                .collect(),
        );
        Ok(())
    }
}

fn duplicate_column(names: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .iter()
        .find(|name| !seen.insert(name.as_str()))
        .map(String::as_str)
}

impl RowNormalizer for CsvNormalizer {
    fn push(&mut self, chunk: &[u8], out: &mut Vec<Fields>) -> IngestResult<()> {
        let Self { tokenizer, columns } = self;
        tokenizer.feed(chunk, |n, record| Self::on_record(columns, out, n, record))
    }

    fn finish(&mut self, out: &mut Vec<Fields>) -> IngestResult<()> {
        let Self { tokenizer, columns } = self;
        tokenizer.finish(|n, record| Self::on_record(columns, out, n, record))
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_all;
    use proptest::prelude::*;
    use serde_json::json;

    fn parse(config: &IngestConfig, input: &str) -> IngestResult<Vec<Fields>> {
        normalize_all(&mut CsvNormalizer::new(config).unwrap(), input.as_bytes())
    }

    fn values(records: &[Fields]) -> Vec<Value> {
        records.iter().cloned().map(Value::Object).collect()
    }

    #[test]
    fn header_and_rows() {
        let drafts = parse(&IngestConfig::csv(), "a,b,c\n1,2,3\n4,5,6").unwrap();
        assert_eq!(
            values(&drafts),
            vec![json!({"a": "1", "b": "2", "c": "3"}), json!({"a": "4", "b": "5", "c": "6"})]
        );
    }

    #[test]
    fn tab_separated() {
        let config = IngestConfig::csv().with_separator("\t");
        let drafts = parse(&config, "a\tb\tc\n1\t2\t3\n4\t5\t6\n").unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].get("c"), Some(&json!("6")));
    }

    #[test]
    fn header_only_yields_nothing() {
        let mut normalizer = CsvNormalizer::new(&IngestConfig::csv()).unwrap();
        let drafts = normalize_all(&mut normalizer, b"a,b,c\n").unwrap();
        assert!(drafts.is_empty());
        assert_eq!(normalizer.columns(), Some(&["a".to_string(), "b".into(), "c".into()][..]));
    }

    #[test]
    fn explicit_columns_without_header() {
        let config = IngestConfig::csv().with_columns(["foo"]).without_header();
        let drafts = parse(&config, "bar").unwrap();
        assert_eq!(values(&drafts), vec![json!({"foo": "bar"})]);
    }

    #[test]
    fn missing_columns_without_header_is_a_config_error() {
        let config = IngestConfig::csv().without_header();
        assert!(matches!(CsvNormalizer::new(&config), Err(IngestError::Config(_))));
    }

    #[test]
    fn duplicate_header_names_are_rejected() {
        let err = parse(&IngestConfig::csv(), "a,b,a\n1,2,3\n").unwrap_err();
        assert!(matches!(err, IngestError::Parse { record: 1, .. }), "{err}");
        assert!(err.is_fatal());

        let config = IngestConfig::csv().with_columns(["a", "a"]).without_header();
        assert!(matches!(CsvNormalizer::new(&config), Err(IngestError::Config(_))));
    }

    #[test]
    fn quoted_fields() {
        let input = "name,quote\n\"Smith, J\",\"He said \"\"hi\"\"\nthen left\"\r\n";
        let drafts = parse(&IngestConfig::csv(), input).unwrap();
        assert_eq!(drafts[0].get("name"), Some(&json!("Smith, J")));
        assert_eq!(drafts[0].get("quote"), Some(&json!("He said \"hi\"\nthen left")));
    }

    #[test]
    fn crlf_and_blank_lines() {
        let drafts = parse(&IngestConfig::csv(), "a,b\r\n\r\n1,2\r\n\n3,4\r\n").unwrap();
        assert_eq!(values(&drafts), vec![json!({"a": "1", "b": "2"}), json!({"a": "3", "b": "4"})]);
    }

    #[test]
    fn empty_trailing_cell() {
        let drafts = parse(&IngestConfig::csv(), "a,b\n1,\n").unwrap();
        assert_eq!(values(&drafts), vec![json!({"a": "1", "b": ""})]);
    }

    #[test]
    fn row_width_mismatch_keeps_earlier_rows() {
        let mut normalizer = CsvNormalizer::new(&IngestConfig::csv()).unwrap();
        let mut out = Vec::new();
        let err = normalizer.push(b"a,b\n1,2\n3,4,5\n6,7\n", &mut out).unwrap_err();
        assert_eq!(out.len(), 1);
        match err {
            IngestError::ColumnMismatch {
                record,
                expected,
                found,
            } => {
                assert_eq!(record, 3);
                assert_eq!(expected, ["a", "b"]);
                assert_eq!(found, ["3", "4", "5"]);
            }
            other => panic!("expected column mismatch, got {other}"),
        }
    }

    #[test]
    fn unterminated_quote_fails_at_finish() {
        let err = parse(&IngestConfig::csv(), "a\n\"open").unwrap_err();
        assert!(matches!(err, IngestError::Parse { record: 2, .. }));
    }

    #[test]
    fn reserved_columns_pass_through_untouched() {
        let drafts = parse(&IngestConfig::csv(), "key,version,name\nfoo,1,bob\n").unwrap();
        assert_eq!(values(&drafts), vec![json!({"key": "foo", "version": "1", "name": "bob"})]);
    }

    #[test]
    fn multibyte_text_split_across_chunks() {
        let input = "name\nJosé Ñúñez\n".as_bytes();
        let mut normalizer = CsvNormalizer::new(&IngestConfig::csv()).unwrap();
        let mut out = Vec::new();
        for byte in input {
            normalizer.push(std::slice::from_ref(byte), &mut out).unwrap();
        }
        normalizer.finish(&mut out).unwrap();
        assert_eq!(out[0].get("name"), Some(&json!("José Ñúñez")));
    }

    proptest! {
        #[test]
        fn chunking_never_changes_the_result(split in 0usize..64) {
            let input = b"a,b,c\n\"x,1\",2,\"3\"\"\"\n4,5,6\r\n7,8,9";
            let split = split.min(input.len());

            let whole = normalize_all(&mut CsvNormalizer::new(&IngestConfig::csv()).unwrap(), input).unwrap();

            let mut normalizer = CsvNormalizer::new(&IngestConfig::csv()).unwrap();
            let mut out = Vec::new();
            normalizer.push(&input[..split], &mut out).unwrap();
            normalizer.push(&input[split..], &mut out).unwrap();
            normalizer.finish(&mut out).unwrap();

            prop_assert_eq!(whole, out);
        }
    }
}
