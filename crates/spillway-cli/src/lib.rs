//! spillway command-line library
//!
//! Argument types and command handlers for the `spillway` binary.

pub mod commands;

pub use crate::commands::{
    expr::handle as handle_expr, options::handle as handle_options, sort::handle as handle_sort,
};

use clap::{Args, ValueEnum};
use spillway_options::MemorySize;
use std::path::PathBuf;

/// How command results are printed.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable text
    #[default]
    Text,
    /// One JSON document
    Json,
}

/// Arguments of `spillway sort`.
#[derive(Args, Debug, Clone)]
pub struct SortArgs {
    /// Newline-delimited input files; each is sorted independently
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory for the sorted files (default: next to each input)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Block size of spill files (e.g. 64kb)
    #[arg(long)]
    pub block_size: Option<MemorySize>,

    /// Maximum number of runs merged at once
    #[arg(long)]
    pub fan_in: Option<usize>,

    /// Buffered bytes per input before a run is spilled (e.g. 64mb)
    #[arg(short, long)]
    pub memory: Option<MemorySize>,

    /// Directory for spill files (repeatable)
    #[arg(short = 'T', long = "tmp-dir")]
    pub tmp_dirs: Vec<PathBuf>,

    /// Compare lines by their numeric value
    #[arg(short, long)]
    pub numeric: bool,

    /// Reverse the sort order
    #[arg(short, long)]
    pub reverse: bool,
}

/// Option catalogs known to the CLI.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Catalog {
    /// Spill engine options
    Spill,
    /// Hive catalog options
    Hive,
    /// Every catalog
    All,
}

/// Arguments of `spillway options`.
#[derive(Args, Debug, Clone)]
pub struct OptionsArgs {
    /// Catalog to list
    #[arg(long, value_enum, default_value = "all")]
    pub catalog: Catalog,

    /// Validate a TOML options file against the selected catalogs
    #[arg(long)]
    pub check: Option<PathBuf>,
}

/// Arguments of `spillway expr`.
#[derive(Args, Debug, Clone)]
pub struct ExprArgs {
    /// Expression name (e.g. SYSTEM_OP_TS)
    pub name: String,

    /// Default value configured for the column
    #[arg(short, long, default_value = "")]
    pub default: String,
}
