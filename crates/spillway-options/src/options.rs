//! Raw option sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::option::{ConfigOption, OptionValue};
use crate::{OptionsError, Result};

/// Immutable set of raw option values keyed by option key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options {
    entries: BTreeMap<String, String>,
}

impl Options {
    /// Empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a key/value map.
    pub fn from_map(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// Build from key/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a TOML document.
    ///
    /// Nested tables are flattened into dotted keys, so
    /// `[local-sort] max-num-file-handles = 64` is read as
    /// `local-sort.max-num-file-handles`. Scalars are stored in their TOML
    /// textual form; arrays and datetimes are rejected.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let table: toml::Table = document.parse()?;
        let mut entries = BTreeMap::new();
        flatten_table("", &table, &mut entries)?;
        Ok(Self { entries })
    }

    /// Return a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Raw value for a key.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether a value is present for the option.
    pub fn contains<T>(&self, option: &ConfigOption<T>) -> bool {
        self.entries.contains_key(option.key())
    }

    /// Typed value if present; the default is not consulted.
    pub fn get<T: OptionValue>(&self, option: &ConfigOption<T>) -> Result<Option<T>> {
        self.raw(option.key())
            .map(|raw| option.parse(raw))
            .transpose()
    }

    /// Typed value if present, otherwise the option's default.
    pub fn get_or_default<T: OptionValue>(&self, option: &ConfigOption<T>) -> Result<Option<T>> {
        match self.get(option)? {
            Some(value) => Ok(Some(value)),
            None => option.default_parsed(),
        }
    }

    /// Typed value or default; fails when neither exists.
    pub fn require<T: OptionValue>(&self, option: &ConfigOption<T>) -> Result<T> {
        self.get_or_default(option)?
            .ok_or_else(|| OptionsError::MissingRequired(option.key().to_string()))
    }

    /// Iterate over raw key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

fn flatten_table(
    prefix: &str,
    table: &toml::Table,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        let raw = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Table(nested) => {
                flatten_table(&key, nested, out)?;
                continue;
            }
            toml::Value::Array(_) | toml::Value::Datetime(_) => {
                return Err(OptionsError::UnsupportedValue {
                    key,
                    reason: format!("{} values are not supported", value.type_str()),
                });
            }
        };
        out.insert(key, raw);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MemorySize;
    use pretty_assertions::assert_eq;

    const FAN_IN: ConfigOption<usize> = ConfigOption::new("local-sort.max-num-file-handles")
        .default_value("128")
        .with_description("Fan-in.");
    const DIR: ConfigOption<String> = ConfigOption::new("hive-conf-dir");

    #[test]
    fn test_get_and_default() {
        let options = Options::new();
        assert_eq!(options.get(&FAN_IN).unwrap(), None);
        assert_eq!(options.get_or_default(&FAN_IN).unwrap(), Some(128));

        let options = options.with("local-sort.max-num-file-handles", "16");
        assert_eq!(options.get(&FAN_IN).unwrap(), Some(16));
        assert!(options.contains(&FAN_IN));
    }

    #[test]
    fn test_require_missing() {
        let err = Options::new().require(&DIR).unwrap_err();
        assert!(matches!(err, OptionsError::MissingRequired(ref key) if key == "hive-conf-dir"));
    }

    #[test]
    fn test_invalid_value_reports_key() {
        let options = Options::from_pairs([("local-sort.max-num-file-handles", "many")]);
        let err = options.get(&FAN_IN).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("local-sort.max-num-file-handles"));
        assert!(message.contains("many"));
    }

    #[test]
    fn test_from_toml_flattens_tables() {
        let options = Options::from_toml_str(
            r#"
            page-size = "32 kb"
            sort-spill-buffer-size = 1048576

            [local-sort]
            max-num-file-handles = 8
            "#,
        )
        .unwrap();

        assert_eq!(options.len(), 3);
        assert_eq!(options.get(&FAN_IN).unwrap(), Some(8));
        assert_eq!(options.raw("page-size"), Some("32 kb"));
        let buffer: ConfigOption<MemorySize> = ConfigOption::new("sort-spill-buffer-size");
        assert_eq!(options.get(&buffer).unwrap().unwrap().bytes(), 1_048_576);
    }

    #[test]
    fn test_from_toml_rejects_arrays() {
        let err = Options::from_toml_str("io.tmpdirs = [\"/a\", \"/b\"]").unwrap_err();
        assert!(matches!(err, OptionsError::UnsupportedValue { .. }));
    }

    #[test]
    fn test_serde_transparent() {
        let options = Options::from_pairs([("a", "1"), ("b", "two")]);
        let toml_text = toml::to_string(&options).unwrap();
        let back: Options = toml::from_str(&toml_text).unwrap();
        assert_eq!(back, options);
    }
}
