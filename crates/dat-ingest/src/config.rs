use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};
use crate::key::KeyInput;

/// Input format of a stream. Always chosen explicitly, never sniffed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    #[default]
    JsonLines,
    Csv,
    BinaryRows,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JsonLines => write!(f, "json-lines"),
            Self::Csv => write!(f, "csv"),
            Self::BinaryRows => write!(f, "binary-rows"),
        }
    }
}

/// Fields the primary key is taken from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primary {
    /// One field whose value is the key.
    Field(String),
    /// Ordered fields whose values are joined into the key.
    Composite(Vec<String>),
}

impl From<&str> for Primary {
    fn from(field: &str) -> Self {
        Self::Field(field.to_string())
    }
}

impl<const N: usize> From<[&str; N]> for Primary {
    fn from(fields: [&str; N]) -> Self {
        Self::Composite(fields.iter().map(|f| f.to_string()).collect())
    }
}

/// User-supplied key derivation.
///
/// Receives either the whole draft or the resolved primary value and returns
/// the key verbatim. It has no access to the store.
#[derive(Clone)]
pub struct PrimaryFormat(Arc<dyn Fn(KeyInput<'_>) -> String + Send + Sync>);

impl PrimaryFormat {
    pub fn new(f: impl Fn(KeyInput<'_>) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, input: KeyInput<'_>) -> String {
        (self.0)(input)
    }
}

impl fmt::Debug for PrimaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrimaryFormat(..)")
    }
}

/// Cell encoding of a binary-row column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    /// UTF-8 JSON text.
    #[default]
    Json,
    /// UTF-8 string.
    String,
    /// 8-byte little-endian signed integer.
    Integer,
    /// 8-byte little-endian IEEE-754 double.
    Float,
    /// Single byte, zero is false.
    Bool,
    /// Raw bytes, surfaced as a hex string.
    Bytes,
}

/// One column of a binary-row schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Options of one ingestion stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IngestConfig {
    pub format: Format,
    /// Column names for header-less CSV, or untyped binary-row columns.
    pub columns: Option<Vec<String>>,
    /// Whether the first CSV record names the columns.
    pub header_row: bool,
    /// CSV delimiter (default `,`) and composite key separator (default `_`).
    pub separator: Option<String>,
    /// CSV delimiter only, taking precedence over `separator`.
    pub delimiter: Option<String>,
    pub primary: Option<Primary>,
    #[serde(skip)]
    pub primary_format: Option<PrimaryFormat>,
    /// Digest composite keys into a fixed-length hex string.
    pub hash: bool,
    /// Suppress progress logging.
    pub quiet: bool,
    /// Base directory for relative attachment paths.
    pub attachment_root: Option<PathBuf>,
    /// Typed columns for binary rows.
    pub schema: Vec<ColumnSpec>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            format: Format::default(),
            columns: None,
            header_row: true,
            separator: None,
            delimiter: None,
            primary: None,
            primary_format: None,
            hash: false,
            quiet: false,
            attachment_root: None,
            schema: Vec::new(),
        }
    }
}

impl IngestConfig {
    pub const DEFAULT_CSV_DELIMITER: u8 = b',';
    pub const DEFAULT_KEY_SEPARATOR: &'static str = "_";

    pub fn json_lines() -> Self {
        Self::default()
    }

    pub fn csv() -> Self {
        Self {
            format: Format::Csv,
            ..Self::default()
        }
    }

    pub fn binary_rows(schema: Vec<ColumnSpec>) -> Self {
        Self {
            format: Format::BinaryRows,
            schema,
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> IngestResult<Self> {
        toml::from_str(s).map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> IngestResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_primary(mut self, primary: impl Into<Primary>) -> Self {
        self.primary = Some(primary.into());
        self
    }

    pub fn with_primary_format(
        mut self,
        f: impl Fn(KeyInput<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.primary_format = Some(PrimaryFormat::new(f));
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    /// Set the CSV delimiter without touching the key separator.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn without_header(mut self) -> Self {
        self.header_row = false;
        self
    }

    pub fn hashed(mut self) -> Self {
        self.hash = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// The single-byte CSV delimiter.
    pub fn csv_delimiter(&self) -> IngestResult<u8> {
        match self.delimiter.as_deref().or(self.separator.as_deref()) {
            None => Ok(Self::DEFAULT_CSV_DELIMITER),
            Some(s) if s.len() == 1 && s.is_ascii() && s != "\"" && s != "\n" => Ok(s.as_bytes()[0]),
            Some(s) => Err(IngestError::Config(format!(
                "CSV separator must be one ASCII character other than quote or newline, got {s:?}"
            ))),
        }
    }

    /// Separator joining composite key parts.
    pub fn key_separator(&self) -> &str {
        self.separator.as_deref().unwrap_or(Self::DEFAULT_KEY_SEPARATOR)
    }

    /// Effective binary-row schema: `schema`, or `columns` typed as JSON.
    pub fn binary_schema(&self) -> IngestResult<Vec<ColumnSpec>> {
        if !self.schema.is_empty() {
            return Ok(self.schema.clone());
        }
        match &self.columns {
            Some(columns) if !columns.is_empty() => Ok(columns
                .iter()
                .map(|name| ColumnSpec::new(name.clone(), FieldType::Json))
                .collect()),
            _ => Err(IngestError::Config(
                "binary rows need a schema or a column list".into(),
            )),
        }
    }
}
