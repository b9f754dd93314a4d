//! Declarative option schema for spillway components.
//!
//! Options are plain string key/value pairs (loaded from a map or a TOML
//! document) that are read through typed [`ConfigOption`] descriptors:
//!
//! - **[`ConfigOption`]**: key, optional default, and description of one option
//! - **[`Options`]**: immutable set of raw option values
//! - **[`OptionsSchema`]**: the collection of known options, used to validate
//!   an [`Options`] set at load time
//!
//! # Example
//!
//! ```rust
//! use spillway_options::{ConfigOption, MemorySize, Options};
//!
//! const BUFFER: ConfigOption<MemorySize> = ConfigOption::new("buffer-size")
//!     .default_value("64 mb")
//!     .with_description("Bytes buffered before a spill.");
//!
//! let options = Options::from_pairs([("buffer-size", "32 mb")]);
//! let size = options.get_or_default(&BUFFER)?.unwrap_or_default();
//! assert_eq!(size.bytes(), 32 * 1024 * 1024);
//! # Ok::<(), spillway_options::OptionsError>(())
//! ```

#![warn(missing_docs)]

use thiserror::Error;

// Typed option descriptors and value parsing
pub mod option;

// Raw option sets
pub mod options;

// Schema validation
pub mod schema;

// Catalog option sets
pub mod catalog;

pub use option::{ConfigOption, MemorySize, OptionKind, OptionValue};
pub use options::Options;
pub use schema::{OptionDescriptor, OptionsSchema};

/// Result type for option operations.
pub type Result<T> = std::result::Result<T, OptionsError>;

/// Errors that can occur while loading or reading options.
#[derive(Debug, Error)]
pub enum OptionsError {
    /// A value could not be parsed as the option's type.
    #[error("Invalid value '{value}' for option '{key}': {reason}")]
    InvalidValue {
        /// Option key.
        key: String,
        /// Raw value as supplied.
        value: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A required option has neither a value nor a default.
    #[error("Missing required option: {0}")]
    MissingRequired(String),

    /// The TOML document could not be parsed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The TOML document holds a value that cannot be used as an option.
    #[error("Unsupported value for option '{key}': {reason}")]
    UnsupportedValue {
        /// Option key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}
