//! Named no-field expressions.

use std::fmt;

use chrono::{Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{ExpressionError, Result};

/// Names accepted by [`NoFieldExpression::create`].
pub const SUPPORTED_EXPRESSIONS: [&str; 5] = [
    "PROV",
    "SYSTEM_OP_TS",
    "SYSTEM_PHYSICAL_TABLE",
    "SYSTEM_PHYSICAL_DB",
    "SYSTEM_OP_ID",
];

/// Timestamp format produced for `SYSTEM_OP_TS` without a default.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Type of the value an expression produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Variable length string.
    String,
    /// Timestamp with fractional-second precision.
    Timestamp {
        /// Digits after the decimal point.
        precision: u32,
    },
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("STRING"),
            Self::Timestamp { precision } => write!(f, "TIMESTAMP({precision})"),
        }
    }
}

/// A computed column that does not read any source field.
///
/// Every variant holds the default value configured for the column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "expression", content = "default", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoFieldExpression {
    /// Province / region tag.
    Prov(String),
    /// Operation timestamp.
    SystemOpTs(String),
    /// Physical table the change came from.
    SystemPhysicalTable(String),
    /// Physical database the change came from.
    SystemPhysicalDb(String),
    /// Operation trace id.
    SystemOpId(String),
}

impl NoFieldExpression {
    /// Build an expression from its name (case-insensitive).
    pub fn create(name: &str, default_value: impl Into<String>) -> Result<Self> {
        let default_value = default_value.into();
        match name.to_ascii_uppercase().as_str() {
            "PROV" => Ok(Self::Prov(default_value)),
            "SYSTEM_OP_TS" => Ok(Self::SystemOpTs(default_value)),
            "SYSTEM_OP_ID" => Ok(Self::SystemOpId(default_value)),
            "SYSTEM_PHYSICAL_TABLE" => Ok(Self::SystemPhysicalTable(default_value)),
            "SYSTEM_PHYSICAL_DB" => Ok(Self::SystemPhysicalDb(default_value)),
            _ => Err(ExpressionError::UnsupportedVariant {
                name: name.to_string(),
                supported: SUPPORTED_EXPRESSIONS.join(","),
            }),
        }
    }

    /// Canonical expression name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Prov(_) => "PROV",
            Self::SystemOpTs(_) => "SYSTEM_OP_TS",
            Self::SystemPhysicalTable(_) => "SYSTEM_PHYSICAL_TABLE",
            Self::SystemPhysicalDb(_) => "SYSTEM_PHYSICAL_DB",
            Self::SystemOpId(_) => "SYSTEM_OP_ID",
        }
    }

    /// Configured default value.
    pub fn default_value(&self) -> &str {
        match self {
            Self::Prov(value)
            | Self::SystemOpTs(value)
            | Self::SystemPhysicalTable(value)
            | Self::SystemPhysicalDb(value)
            | Self::SystemOpId(value) => value,
        }
    }

    /// Type of the produced value.
    ///
    /// A `SYSTEM_OP_TS` default such as `2024-01-01 10:00:00.123` yields
    /// precision 3; a default without fraction (or no default) yields 0.
    /// Only the segment between the first and second `.` counts.
    pub fn output_type(&self) -> DataType {
        match self {
            Self::SystemOpTs(value) => DataType::Timestamp {
                precision: value.split('.').nth(1).map_or(0, |fraction| {
                    u32::try_from(fraction.len()).unwrap_or(u32::MAX)
                }),
            },
            _ => DataType::String,
        }
    }

    /// Evaluate the expression.
    pub fn eval(&self) -> String {
        self.eval_on(Local::now().date_naive())
    }

    /// Evaluate with `today` standing in for the current local date.
    pub fn eval_on(&self, today: NaiveDate) -> String {
        match self {
            Self::SystemOpTs(value) if value.is_empty() => today
                .and_time(NaiveTime::MIN)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            other => other.default_value().to_string(),
        }
    }
}
