//! Typed option descriptors.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Value kind of an option, used by schema validation and documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionKind {
    /// Free-form string.
    String,
    /// `true` / `false`.
    Bool,
    /// Unsigned integer.
    Integer,
    /// Byte size with an optional unit (`64 mb`).
    MemorySize,
    /// Duration with a unit (`30 s`).
    Duration,
}

impl OptionKind {
    /// Check that `raw` parses as this kind.
    pub fn check(self, raw: &str) -> Result<(), String> {
        match self {
            Self::String => String::parse_option(raw).map(drop),
            Self::Bool => bool::parse_option(raw).map(drop),
            Self::Integer => u64::parse_option(raw).map(drop),
            Self::MemorySize => MemorySize::parse_option(raw).map(drop),
            Self::Duration => Duration::parse_option(raw).map(drop),
        }
    }

    /// Lowercase name used in listings.
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::MemorySize => "memory-size",
            Self::Duration => "duration",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A type that can be read from a raw option string.
pub trait OptionValue: Sized {
    /// Kind reported in the schema.
    const KIND: OptionKind;

    /// Parse a raw option string.
    fn parse_option(raw: &str) -> Result<Self, String>;
}

impl OptionValue for String {
    const KIND: OptionKind = OptionKind::String;

    fn parse_option(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl OptionValue for bool {
    const KIND: OptionKind = OptionKind::Bool;

    fn parse_option(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("expected 'true' or 'false', got '{other}'")),
        }
    }
}

macro_rules! integer_option {
    ($($ty:ty),*) => {
        $(
            impl OptionValue for $ty {
                const KIND: OptionKind = OptionKind::Integer;

                fn parse_option(raw: &str) -> Result<Self, String> {
                    raw.trim().replace('_', "").parse::<$ty>().map_err(|e| e.to_string())
                }
            }
        )*
    };
}

integer_option!(u32, u64, usize);

impl OptionValue for Duration {
    const KIND: OptionKind = OptionKind::Duration;

    fn parse_option(raw: &str) -> Result<Self, String> {
        let (amount, unit) = split_number(raw)?;
        let millis = match unit.as_str() {
            "" | "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => amount,
            "s" | "sec" | "secs" | "second" | "seconds" => amount.saturating_mul(1000),
            "min" | "mins" | "minute" | "minutes" => amount.saturating_mul(60_000),
            "h" | "hour" | "hours" => amount.saturating_mul(3_600_000),
            "d" | "day" | "days" => amount.saturating_mul(86_400_000),
            other => return Err(format!("unknown duration unit '{other}'")),
        };
        Ok(Self::from_millis(millis))
    }
}

/// Split `"64 mb"` into `(64, "mb")`.
fn split_number(raw: &str) -> Result<(u64, String), String> {
    let trimmed = raw.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '_')
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(digits_end);
    if number.is_empty() {
        return Err(format!("'{trimmed}' does not start with a number"));
    }
    let amount = number
        .replace('_', "")
        .parse::<u64>()
        .map_err(|e| e.to_string())?;
    Ok((amount, unit.trim().to_ascii_lowercase()))
}

/// A byte size such as a buffer budget or block size.
///
/// Parsed from `1024`, `32kb`, `64 mb`, `1 gb` (binary multiples).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySize(u64);

impl MemorySize {
    /// Size from a byte count.
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Size from a KiB count.
    pub const fn from_kibibytes(kib: u64) -> Self {
        Self(kib * 1024)
    }

    /// Size from a MiB count.
    pub const fn from_mebibytes(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    /// Size in bytes.
    pub const fn bytes(self) -> u64 {
        self.0
    }
}

impl OptionValue for MemorySize {
    const KIND: OptionKind = OptionKind::MemorySize;

    fn parse_option(raw: &str) -> Result<Self, String> {
        let (amount, unit) = split_number(raw)?;
        let shift = match unit.as_str() {
            "" | "b" | "bytes" => 0,
            "k" | "kb" | "kib" | "kibibytes" => 10,
            "m" | "mb" | "mib" | "mebibytes" => 20,
            "g" | "gb" | "gib" | "gibibytes" => 30,
            "t" | "tb" | "tib" | "tebibytes" => 40,
            other => return Err(format!("unknown memory unit '{other}'")),
        };
        amount
            .checked_mul(1u64 << shift)
            .map(Self)
            .ok_or_else(|| format!("'{raw}' overflows a 64-bit byte count"))
    }
}

impl FromStr for MemorySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_option(s)
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u32, &str); 4] = [(40, "tb"), (30, "gb"), (20, "mb"), (10, "kb")];
        for (shift, unit) in UNITS {
            let scale = 1u64 << shift;
            if self.0 >= scale && self.0 % scale == 0 {
                return write!(f, "{} {unit}", self.0 / scale);
            }
        }
        write!(f, "{} bytes", self.0)
    }
}

/// Descriptor of one named option.
///
/// Defaults are kept as raw strings so descriptors can be declared as
/// `const` items and listed uniformly in an [`OptionsSchema`].
///
/// [`OptionsSchema`]: crate::OptionsSchema
pub struct ConfigOption<T> {
    key: &'static str,
    default: Option<&'static str>,
    description: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> ConfigOption<T> {
    /// Option with the given key, no default and no description.
    pub const fn new(key: &'static str) -> Self {
        Self {
            key,
            default: None,
            description: "",
            _value: PhantomData,
        }
    }

    /// Set the raw default value.
    #[must_use]
    pub const fn default_value(mut self, raw: &'static str) -> Self {
        self.default = Some(raw);
        self
    }

    /// Set the human readable description.
    #[must_use]
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Option key.
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// Raw default, if any.
    pub const fn raw_default(&self) -> Option<&'static str> {
        self.default
    }

    /// Whether the option declares a default.
    pub const fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Description text.
    pub const fn description(&self) -> &'static str {
        self.description
    }
}

impl<T: OptionValue> ConfigOption<T> {
    /// Parse a raw value for this option.
    pub fn parse(&self, raw: &str) -> crate::Result<T> {
        T::parse_option(raw).map_err(|reason| crate::OptionsError::InvalidValue {
            key: self.key.to_string(),
            value: raw.to_string(),
            reason,
        })
    }

    /// Parsed default value, if one is declared.
    pub fn default_parsed(&self) -> crate::Result<Option<T>> {
        self.default.map(|raw| self.parse(raw)).transpose()
    }
}

impl<T> Clone for ConfigOption<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ConfigOption<T> {}

impl<T> fmt::Debug for ConfigOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOption")
            .field("key", &self.key)
            .field("default", &self.default)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_memory_size_units() {
        assert_eq!(MemorySize::parse_option("1024").unwrap().bytes(), 1024);
        assert_eq!(MemorySize::parse_option("32kb").unwrap().bytes(), 32 * 1024);
        assert_eq!(
            MemorySize::parse_option("64 mb").unwrap().bytes(),
            64 * 1024 * 1024
        );
        assert_eq!(
            MemorySize::parse_option(" 2 GB ").unwrap().bytes(),
            2 * 1024 * 1024 * 1024
        );
        assert!(MemorySize::parse_option("mb").is_err());
        assert!(MemorySize::parse_option("12 parsecs").is_err());
        assert!(MemorySize::parse_option("99999999999 tb").is_err());
    }

    #[test]
    fn test_memory_size_display() {
        assert_eq!(MemorySize::from_mebibytes(64).to_string(), "64 mb");
        assert_eq!(MemorySize::from_kibibytes(3).to_string(), "3 kb");
        assert_eq!(MemorySize::from_bytes(1000).to_string(), "1000 bytes");
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(
            Duration::parse_option("100").unwrap(),
            Duration::from_millis(100)
        );
        assert_eq!(
            Duration::parse_option("30 s").unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            Duration::parse_option("5 min").unwrap(),
            Duration::from_secs(300)
        );
        assert!(Duration::parse_option("5 fortnights").is_err());
    }

    #[test]
    fn test_bool_and_integer() {
        assert!(bool::parse_option("TRUE").unwrap());
        assert!(!bool::parse_option("false").unwrap());
        assert!(bool::parse_option("yes").is_err());
        assert_eq!(usize::parse_option("1_000").unwrap(), 1000);
        assert!(u32::parse_option("-1").is_err());
    }

    #[test]
    fn test_config_option_default() {
        const OPT: ConfigOption<usize> = ConfigOption::new("fan-in")
            .default_value("128")
            .with_description("Merge fan-in.");
        assert_eq!(OPT.key(), "fan-in");
        assert_eq!(OPT.default_parsed().unwrap(), Some(128));
        assert_eq!(OPT.description(), "Merge fan-in.");

        const NO_DEFAULT: ConfigOption<String> = ConfigOption::new("dir");
        assert!(!NO_DEFAULT.has_default());
        assert_eq!(NO_DEFAULT.default_parsed().unwrap(), None);
    }

    #[test]
    fn test_kind_check() {
        assert!(OptionKind::MemorySize.check("64 mb").is_ok());
        assert!(OptionKind::Integer.check("abc").is_err());
        assert!(OptionKind::String.check("anything").is_ok());
    }

    proptest! {
        #[test]
        fn memory_size_display_parses_back(bytes in 0u64..(1u64 << 50)) {
            let size = MemorySize::from_bytes(bytes);
            let parsed = MemorySize::parse_option(&size.to_string()).unwrap();
            prop_assert_eq!(parsed, size);
        }
    }
}
