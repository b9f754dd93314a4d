//! Option schemas and load-time validation.

use std::fmt;

use tracing::warn;

use crate::option::{ConfigOption, OptionKind, OptionValue};
use crate::{Options, OptionsError, Result};

/// Untyped view of a [`ConfigOption`], as listed in a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionDescriptor {
    /// Option key.
    pub key: &'static str,
    /// Value kind.
    pub kind: OptionKind,
    /// Raw default value.
    pub default: Option<&'static str>,
    /// Human readable description.
    pub description: &'static str,
}

impl<T: OptionValue> From<&ConfigOption<T>> for OptionDescriptor {
    fn from(option: &ConfigOption<T>) -> Self {
        Self {
            key: option.key(),
            kind: T::KIND,
            default: option.raw_default(),
            description: option.description(),
        }
    }
}

impl fmt::Display for OptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, default: {})",
            self.key,
            self.kind,
            self.default.unwrap_or("none")
        )?;
        if !self.description.is_empty() {
            write!(f, "\n    {}", self.description)?;
        }
        Ok(())
    }
}

/// Ordered collection of known options.
#[derive(Debug, Clone, Default)]
pub struct OptionsSchema {
    name: &'static str,
    descriptors: Vec<OptionDescriptor>,
}

impl OptionsSchema {
    /// Empty schema with a display name.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            descriptors: Vec::new(),
        }
    }

    /// Add an option.
    #[must_use]
    pub fn with<T: OptionValue>(mut self, option: &ConfigOption<T>) -> Self {
        self.register(option);
        self
    }

    /// Add an option in place. Registering a key twice keeps the first entry.
    pub fn register<T: OptionValue>(&mut self, option: &ConfigOption<T>) {
        if self.get(option.key()).is_none() {
            self.descriptors.push(OptionDescriptor::from(option));
        }
    }

    /// Append every option of another schema.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        for descriptor in &other.descriptors {
            if self.get(descriptor.key).is_none() {
                self.descriptors.push(*descriptor);
            }
        }
        self
    }

    /// Schema display name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a descriptor by key.
    pub fn get(&self, key: &str) -> Option<&OptionDescriptor> {
        self.descriptors.iter().find(|d| d.key == key)
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &OptionDescriptor> {
        self.descriptors.iter()
    }

    /// Number of options.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the schema lists no options.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Validate an option set against this schema.
    ///
    /// Every known key must parse as its declared kind. Unknown keys are
    /// reported with a warning and otherwise ignored, since the same option
    /// set is usually shared by several components.
    pub fn validate(&self, options: &Options) -> Result<()> {
        for (key, value) in options.iter() {
            match self.get(key) {
                Some(descriptor) => {
                    descriptor
                        .kind
                        .check(value)
                        .map_err(|reason| OptionsError::InvalidValue {
                            key: key.to_string(),
                            value: value.to_string(),
                            reason,
                        })?;
                }
                None => warn!("Unknown option '{}' for {}", key, self.name),
            }
        }
        Ok(())
    }
}
