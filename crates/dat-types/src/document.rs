use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blob::Attachment;
use crate::error::TypeError;

/// Ordered field-name to value mapping.
///
/// Insertion order is preserved, so a CSV header or a binary schema keeps its
/// column order all the way into the store.
pub type Fields = Map<String, Value>;

/// Field names that carry store metadata rather than user data.
pub const RESERVED_FIELDS: [&str; 3] = ["key", "version", "attachments"];

/// How a draft declares one of its attachments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentSpec {
    /// Already stored blob, typically carried by a resubmitted document.
    Stored(Attachment),
    /// External file whose bytes still have to be written to the blob store.
    File { path: PathBuf },
}

/// A normalized document before key resolution or storage.
///
/// Reserved fields found in the input are lifted out of `fields`: `key`
/// into [`Draft::key`], `version` into [`Draft::version`] and `attachments`
/// into [`Draft::attachments`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Draft {
    pub key: Option<String>,
    pub version: Option<u64>,
    pub fields: Fields,
    pub attachments: BTreeMap<String, AttachmentSpec>,
}

impl Draft {
    /// Build a draft from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(map) => Self::from_fields(map),
            other => Err(TypeError::NotAnObject(kind_of(&other).to_string())),
        }
    }

    /// Build a draft from an ordered field map, lifting reserved fields.
    pub fn from_fields(mut fields: Fields) -> Result<Self, TypeError> {
        let key = match fields.shift_remove("key") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(TypeError::InvalidField {
                    field: "key".into(),
                    reason: format!("expected string, got {}", kind_of(&other)),
                })
            }
        };

        let version = match fields.shift_remove("version") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_version(&value)?),
        };

        let attachments = match fields.shift_remove("attachments") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(value) => {
                serde_json::from_value(value).map_err(|e| TypeError::InvalidField {
                    field: "attachments".into(),
                    reason: e.to_string(),
                })?
            }
        };

        Ok(Self {
            key,
            version,
            fields,
            attachments,
        })
    }

    /// Look up a user field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

fn parse_version(value: &Value) -> Result<u64, TypeError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| TypeError::InvalidField {
        field: "version".into(),
        reason: format!("expected a non-negative integer, got {value}"),
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A committed document.
///
/// A `(key, version)` pair is immutable once committed: updates produce a new
/// `Document` with `version + 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub version: u64,
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, Attachment>,
}

impl Document {
    /// Look up a user field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Look up an attachment by name.
    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.get(name)
    }

    /// Flatten into a single JSON object carrying `key` and `version`.
    ///
    /// Feeding the result back through [`Draft::from_value`] yields a write
    /// that targets exactly this version.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 3);
        map.insert("key".into(), Value::String(self.key.clone()));
        map.insert("version".into(), Value::from(self.version));
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.clone());
        }
        if !self.attachments.is_empty() {
            let attachments = self
                .attachments
                .iter()
                .map(|(name, a)| (name.clone(), serde_json::json!({"hash": a.hash, "size": a.size})))
                .collect::<Map<_, _>>();
            map.insert("attachments".into(), Value::Object(attachments));
        }
        Value::Object(map)
    }
}
