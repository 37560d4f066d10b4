//! Length-prefixed binary rows.
//!
//! Wire layout:
//!
//! ```text
//! row  := varint(len) body          // body is exactly `len` bytes
//! body := cell*                     // one cell per schema column, in order
//! cell := varint(len) bytes
//! ```
//!
//! Varints are unsigned LEB128. Cell bytes are decoded according to the
//! column's [`FieldType`].

use bytes::{BufMut, BytesMut};
use dat_types::Fields;
use serde_json::{Number, Value};

use crate::config::{ColumnSpec, FieldType};
use crate::error::{IngestError, IngestResult};

use super::RowNormalizer;

/// Rows larger than this are rejected rather than buffered.
const MAX_ROW_LEN: u64 = 64 * 1024 * 1024;

/// Decode a varint from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and
/// the number of bytes it occupied.
fn decode_varint(buf: &[u8]) -> Result<Option<(u64, usize)>, String> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        if i == 10 || (i == 9 && byte > 1) {
            return Err("varint overflows u64".into());
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

fn encode_varint(mut value: u64, out: &mut BytesMut) {
    while value >= 0x80 {
        out.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

/// Normalizer for binary rows with a fixed column schema.
#[derive(Debug)]
pub struct BinaryRowNormalizer {
    schema: Vec<ColumnSpec>,
    buf: BytesMut,
    records: u64,
}

impl BinaryRowNormalizer {
    pub fn new(schema: Vec<ColumnSpec>) -> Self {
        Self {
            schema,
            buf: BytesMut::new(),
            records: 0,
        }
    }

    fn parse_error(&self, reason: impl Into<String>) -> IngestError {
        IngestError::Parse {
            record: self.records + 1,
            reason: reason.into(),
        }
    }

    fn decode_row(&self, mut body: &[u8]) -> IngestResult<Fields> {
        let mut fields = Fields::new();
        for column in &self.schema {
            let (len, used) = decode_varint(body)
                .map_err(|e| self.parse_error(e))?
                .ok_or_else(|| self.parse_error(format!("row ends before column `{}`", column.name)))?;
            body = &body[used..];
            let len = usize::try_from(len)
                .ok()
                .filter(|&len| len <= body.len())
                .ok_or_else(|| self.parse_error(format!("cell `{}` runs past the row", column.name)))?;
            let value = decode_cell(column.kind, &body[..len])
                .map_err(|reason| self.parse_error(format!("column `{}`: {reason}", column.name)))?;
            fields.insert(column.name.clone(), value);
            body = &body[len..];
        }
        if !body.is_empty() {
            return Err(self.parse_error(format!(
                "{} trailing bytes after {} columns",
                body.len(),
                self.schema.len()
            )));
        }
        Ok(fields)
    }
}

impl RowNormalizer for BinaryRowNormalizer {
    fn push(&mut self, chunk: &[u8], out: &mut Vec<Fields>) -> IngestResult<()> {
        self.buf.extend_from_slice(chunk);
        loop {
            let Some((len, used)) = decode_varint(&self.buf).map_err(|e| self.parse_error(e))? else {
                return Ok(());
            };
            if len > MAX_ROW_LEN {
                return Err(self.parse_error(format!("row of {len} bytes exceeds the limit")));
            }
            // Bounded by MAX_ROW_LEN above.
            let len = len as usize;
            if self.buf.len() < used + len {
                return Ok(());
            }
            let row = self.buf.split_to(used + len).freeze();
            let fields = self.decode_row(&row[used..])?;
            self.records += 1;
            out.push(fields);
        }
    }

    fn finish(&mut self, _out: &mut Vec<Fields>) -> IngestResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        Err(self.parse_error(format!("truncated row: {} bytes left over", self.buf.len())))
    }
}

fn decode_cell(kind: FieldType, bytes: &[u8]) -> Result<Value, String> {
    match kind {
        FieldType::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        FieldType::String => std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|e| e.to_string()),
        FieldType::Integer => fixed::<8>(bytes).map(|b| Value::from(i64::from_le_bytes(b))),
        FieldType::Float => fixed::<8>(bytes).map(|b| {
            Number::from_f64(f64::from_le_bytes(b)).map_or(Value::Null, Value::Number)
        }),
        FieldType::Bool => fixed::<1>(bytes).map(|[b]| Value::Bool(b != 0)),
        FieldType::Bytes => Ok(Value::String(hex::encode(bytes))),
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], String> {
    bytes
        .try_into()
        .map_err(|_| format!("expected {N} bytes, got {}", bytes.len()))
}

fn encode_cell(column: &ColumnSpec, value: &Value) -> IngestResult<Vec<u8>> {
    let mismatch = || IngestError::Config(format!("column `{}` cannot hold {value}", column.name));
    Ok(match column.kind {
        FieldType::Json => value.to_string().into_bytes(),
        FieldType::String => value.as_str().ok_or_else(mismatch)?.as_bytes().to_vec(),
        FieldType::Integer => value.as_i64().ok_or_else(mismatch)?.to_le_bytes().to_vec(),
        FieldType::Float => value.as_f64().ok_or_else(mismatch)?.to_le_bytes().to_vec(),
        FieldType::Bool => vec![u8::from(value.as_bool().ok_or_else(mismatch)?)],
        FieldType::Bytes => hex::decode(value.as_str().ok_or_else(mismatch)?).map_err(|_| mismatch())?,
    })
}

/// Encode one row, length prefix included, for a binary-row stream.
///
/// Every schema column must be present in `fields`; extra fields are ignored.
pub fn encode_row(schema: &[ColumnSpec], fields: &Fields) -> IngestResult<Vec<u8>> {
    let mut body = BytesMut::new();
    for column in schema {
        let value = fields.get(&column.name).ok_or_else(|| IngestError::MissingField {
            field: column.name.clone(),
        })?;
        let cell = encode_cell(column, value)?;
        encode_varint(cell.len() as u64, &mut body);
        body.put_slice(&cell);
    }
    let mut row = BytesMut::with_capacity(body.len() + 10);
    encode_varint(body.len() as u64, &mut row);
    row.put_slice(&body);
    Ok(row.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_all;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("id", FieldType::Integer),
            ColumnSpec::new("name", FieldType::String),
            ColumnSpec::new("score", FieldType::Float),
            ColumnSpec::new("active", FieldType::Bool),
            ColumnSpec::new("digest", FieldType::Bytes),
            ColumnSpec::new("meta", FieldType::Json),
        ]
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> Fields {
        fields(json!({
            "id": -42,
            "name": "widget",
            "score": 1.5,
            "active": true,
            "digest": "00ff10",
            "meta": {"tags": ["a", "b"]}
        }))
    }

    #[test]
    fn varint_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            let mut buf = BytesMut::new();
            encode_varint(value, &mut buf);
            assert_eq!(decode_varint(&buf).unwrap(), Some((value, buf.len())));
            assert_eq!(decode_varint(&buf[..buf.len() - 1]).unwrap(), None);
        }
    }

    #[test]
    fn overlong_varint_is_rejected() {
        assert!(decode_varint(&[0xff; 11]).is_err());
    }

    #[test]
    fn decodes_typed_columns() {
        let mut input = encode_row(&schema(), &sample()).unwrap();
        input.extend(encode_row(&schema(), &fields(json!({
            "id": 7, "name": "", "score": 0.0, "active": false, "digest": "", "meta": null
        }))).unwrap());

        let rows = normalize_all(&mut BinaryRowNormalizer::new(schema()), &input).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], sample());
        assert_eq!(rows[1].get("meta"), Some(&Value::Null));
        assert_eq!(rows[1].get("active"), Some(&json!(false)));
    }

    #[test]
    fn columns_follow_schema_order() {
        let input = encode_row(&schema(), &sample()).unwrap();
        let rows = normalize_all(&mut BinaryRowNormalizer::new(schema()), &input).unwrap();
        let names: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(names, ["id", "name", "score", "active", "digest", "meta"]);
    }

    #[test]
    fn nan_floats_become_null() {
        let schema = vec![ColumnSpec::new("x", FieldType::Float)];
        let mut body = BytesMut::new();
        encode_varint(8, &mut body);
        body.put_slice(&f64::NAN.to_le_bytes());
        let mut input = BytesMut::new();
        encode_varint(body.len() as u64, &mut input);
        input.put_slice(&body);

        let rows = normalize_all(&mut BinaryRowNormalizer::new(schema), &input).unwrap();
        assert_eq!(rows[0].get("x"), Some(&Value::Null));
    }

    #[test]
    fn wrong_integer_width_is_a_parse_error() {
        let schema = vec![ColumnSpec::new("n", FieldType::Integer)];
        let input = [3u8, 2, 1, 2];
        let err = normalize_all(&mut BinaryRowNormalizer::new(schema), &input).unwrap_err();
        assert!(matches!(err, IngestError::Parse { record: 1, .. }));
    }

    #[test]
    fn missing_and_extra_cells_are_parse_errors() {
        let one = vec![ColumnSpec::new("a", FieldType::String)];
        let two = vec![
            ColumnSpec::new("a", FieldType::String),
            ColumnSpec::new("b", FieldType::String),
        ];
        let row = encode_row(&one, &fields(json!({"a": "x"}))).unwrap();
        assert!(matches!(
            normalize_all(&mut BinaryRowNormalizer::new(two.clone()), &row),
            Err(IngestError::Parse { .. })
        ));

        let row = encode_row(&two, &fields(json!({"a": "x", "b": "y"}))).unwrap();
        let err = normalize_all(&mut BinaryRowNormalizer::new(one), &row).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn truncated_stream_fails_at_finish() {
        let row = encode_row(&schema(), &sample()).unwrap();
        let mut normalizer = BinaryRowNormalizer::new(schema());
        let mut out = Vec::new();
        normalizer.push(&row[..row.len() - 1], &mut out).unwrap();
        assert!(out.is_empty());
        assert!(matches!(
            normalizer.finish(&mut out),
            Err(IngestError::Parse { record: 1, .. })
        ));
    }

    #[test]
    fn encode_rejects_mismatched_values() {
        let schema = vec![ColumnSpec::new("n", FieldType::Integer)];
        assert!(matches!(
            encode_row(&schema, &fields(json!({"n": "seven"}))),
            Err(IngestError::Config(_))
        ));
        assert!(matches!(
            encode_row(&schema, &fields(json!({}))),
            Err(IngestError::MissingField { .. })
        ));
    }

    proptest! {
        #[test]
        fn any_chunking_yields_the_same_rows(
            names in proptest::collection::vec("[a-zA-Z0-9 ]{0,40}", 1..8),
            chunk in 1usize..17,
        ) {
            let schema = vec![
                ColumnSpec::new("i", FieldType::Integer),
                ColumnSpec::new("s", FieldType::String),
            ];
            let mut input = Vec::new();
            for (i, name) in names.iter().enumerate() {
                input.extend(encode_row(&schema, &fields(json!({"i": i, "s": name}))).unwrap());
            }

            let mut normalizer = BinaryRowNormalizer::new(schema);
            let mut out = Vec::new();
            for piece in input.chunks(chunk) {
                normalizer.push(piece, &mut out).unwrap();
            }
            normalizer.finish(&mut out).unwrap();

            prop_assert_eq!(out.len(), names.len());
            for (i, (row, name)) in out.iter().zip(&names).enumerate() {
                prop_assert_eq!(row.get("i"), Some(&json!(i)));
                prop_assert_eq!(row.get("s"), Some(&json!(name)));
            }
        }
    }
}
