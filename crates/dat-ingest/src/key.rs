//! Primary key resolution.

use dat_crypto::ContentHasher;
use dat_types::Draft;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{IngestConfig, Primary, PrimaryFormat};
use crate::error::{IngestError, IngestResult};

/// Argument handed to a user-supplied [`PrimaryFormat`].
#[derive(Clone, Copy, Debug)]
pub enum KeyInput<'a> {
    /// No primary field is configured: the whole draft.
    Draft(&'a Draft),
    /// The resolved primary value (a composite key arrives as a string).
    Value(&'a Value),
}

impl KeyInput<'_> {
    /// The primary value rendered as a string, if this is a value input.
    pub fn value_str(&self) -> Option<String> {
        match self {
            Self::Value(v) => Some(render(v)),
            Self::Draft(_) => None,
        }
    }
}

/// Derives a document key from a draft.
///
/// Resolution order:
/// 1. custom [`PrimaryFormat`], fed the primary value or the whole draft;
/// 2. composite primary fields joined by the separator (or digested);
/// 3. a single primary field;
/// 4. the draft's own `key`;
/// 5. a freshly generated UUID v7.
#[derive(Clone, Debug)]
pub struct KeyResolver {
    primary: Option<Primary>,
    format: Option<PrimaryFormat>,
    hash: bool,
    separator: String,
}

impl KeyResolver {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            primary: config.primary.clone(),
            format: config.primary_format.clone(),
            hash: config.hash,
            separator: config.key_separator().to_string(),
        }
    }

    /// Resolve the key of `draft`.
    ///
    /// Fails with [`IngestError::MissingField`] when a configured primary
    /// field is absent.
    pub fn resolve(&self, draft: &Draft) -> IngestResult<String> {
        let primary = match &self.primary {
            None => None,
            Some(Primary::Field(field)) => Some(lookup(draft, field)?.clone()),
            Some(Primary::Composite(fields)) => Some(Value::String(self.composite(draft, fields)?)),
        };

        if let Some(format) = &self.format {
            let input = match &primary {
                Some(value) => KeyInput::Value(value),
                None => KeyInput::Draft(draft),
            };
            return Ok(format.apply(input));
        }

        if let Some(value) = primary {
            return Ok(render(&value));
        }
        if let Some(key) = &draft.key {
            return Ok(key.clone());
        }
        Ok(generate())
    }

    fn composite(&self, draft: &Draft, fields: &[String]) -> IngestResult<String> {
        let parts = fields
            .iter()
            .map(|field| lookup(draft, field).map(render))
            .collect::<IngestResult<Vec<_>>>()?;
        if self.hash {
            Ok(ContentHasher::KEY.hex_digest(parts.concat().as_bytes()))
        } else {
            Ok(parts.join(&self.separator))
        }
    }
}

/// Opaque key, unique with overwhelming probability and roughly time-ordered.
pub fn generate() -> String {
    Uuid::now_v7().to_string()
}

fn lookup<'a>(draft: &'a Draft, field: &str) -> IngestResult<&'a Value> {
    draft.field(field).ok_or_else(|| IngestError::MissingField {
        field: field.to_string(),
    })
}

/// Strings are used verbatim; other values in compact JSON form.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn draft(value: Value) -> Draft {
        Draft::from_value(value).unwrap()
    }

    fn resolve(config: IngestConfig, value: Value) -> IngestResult<String> {
        KeyResolver::new(&config).resolve(&draft(value))
    }

    #[test]
    fn composite_with_default_separator() {
        let key = resolve(
            IngestConfig::default().with_primary(["a", "b"]),
            json!({"a": "foo", "b": "bar", "c": "hello"}),
        );
        assert_eq!(key.unwrap(), "foo_bar");
    }

    #[test]
    fn composite_with_custom_separator() {
        let cfg = IngestConfig::default().with_primary(["a", "b"]);
        let value = json!({"a": "foo", "b": "bar"});
        assert_eq!(resolve(cfg.clone().with_separator("-"), value.clone()).unwrap(), "foo-bar");
        assert_eq!(resolve(cfg.with_separator("@"), value).unwrap(), "foo@bar");
    }

    #[test]
    fn hashed_composite_digests_the_concatenation() {
        let key = resolve(
            IngestConfig::default().with_primary(["a", "b"]).hashed(),
            json!({"a": "foo", "b": "bar"}),
        )
        .unwrap();
        assert_eq!(key, ContentHasher::KEY.hex_digest(b"foobar"));
        assert_eq!(key.len(), 64);
    }

    #[test]
    fn single_field() {
        let key = resolve(IngestConfig::default().with_primary("foo"), json!({"foo": "bar"}));
        assert_eq!(key.unwrap(), "bar");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let key = resolve(
            IngestConfig::default().with_primary(["id", "ok"]),
            json!({"id": 7, "ok": true}),
        );
        assert_eq!(key.unwrap(), "7_true");
    }

    #[test]
    fn missing_field_is_reported() {
        let err = resolve(IngestConfig::default().with_primary(["a", "zzz"]), json!({"a": 1}))
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingField { ref field } if field == "zzz"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn primary_format_without_primary_sees_the_draft() {
        let cfg = IngestConfig::default().with_primary_format(|input| match input {
            KeyInput::Draft(d) => format!("P-Funk-{}", d.fields.len()),
            KeyInput::Value(_) => unreachable!("no primary configured"),
        });
        assert_eq!(resolve(cfg, json!({"a": "foo"})).unwrap(), "P-Funk-1");
    }

    #[test]
    fn primary_format_with_primary_sees_the_value() {
        let cfg = IngestConfig::default()
            .with_primary("a")
            .with_primary_format(|input| format!("P-{}", input.value_str().unwrap_or_default()));
        assert_eq!(resolve(cfg, json!({"a": "Funk"})).unwrap(), "P-Funk");
    }

    #[test]
    fn primary_format_wins_over_draft_key() {
        let cfg = IngestConfig::default().with_primary_format(|_| "fixed".to_string());
        assert_eq!(resolve(cfg, json!({"key": "own"})).unwrap(), "fixed");
    }

    #[test]
    fn falls_back_to_draft_key() {
        assert_eq!(resolve(IngestConfig::default(), json!({"key": "foo"})).unwrap(), "foo");
    }

    #[test]
    fn generates_unique_keys() {
        let a = resolve(IngestConfig::default(), json!({"foo": "bar"})).unwrap();
        let b = resolve(IngestConfig::default(), json!({"foo": "bar"})).unwrap();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    proptest! {
        #[test]
        fn composite_key_is_deterministic(a in "[a-z0-9]{1,12}", b in "[a-z0-9]{1,12}") {
            let cfg = IngestConfig::default().with_primary(["a", "b"]);
            let first = resolve(cfg.clone(), json!({"a": a, "b": b})).unwrap();
            let second = resolve(cfg, json!({"b": b, "a": a, "extra": 1})).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, format!("{a}_{b}"));
        }
    }
}
