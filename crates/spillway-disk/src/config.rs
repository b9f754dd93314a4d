//! Spill engine configuration.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spillway_options::{ConfigOption, MemorySize, Options, OptionsSchema};

use crate::cancel::MergeSlots;
use crate::channel::block::MIN_BLOCK_SIZE;
use crate::{Result, SpillError};

/// Block size of spill channels.
pub const PAGE_SIZE: ConfigOption<MemorySize> = ConfigOption::new("page-size")
    .default_value("64 kb")
    .with_description("Size of one block of a spill channel.");

/// Merge fan-in.
pub const LOCAL_SORT_MAX_NUM_FILE_HANDLES: ConfigOption<usize> =
    ConfigOption::new("local-sort.max-num-file-handles")
        .default_value("128")
        .with_description(
            "The maximal fan-in for external merge sort. It limits the number of file handles per operator.",
        );

/// Memory threshold of the sort buffer.
pub const SORT_SPILL_BUFFER_SIZE: ConfigOption<MemorySize> =
    ConfigOption::new("sort-spill-buffer-size")
        .default_value("64 mb")
        .with_description("Amount of buffered data before a sorted run is spilled to disk.");

/// Concurrent merge limit.
pub const MAX_CONCURRENT_MERGES: ConfigOption<usize> =
    ConfigOption::new("spill.max-concurrent-merges").with_description(
        "Maximum number of sort tasks merging at the same time. Unlimited when unset.",
    );

/// Temp directories.
pub const IO_TMPDIRS: ConfigOption<String> = ConfigOption::new("io.tmpdirs").with_description(
    "Directories for spill files, separated by ':' or ';'. Defaults to the system temp directory.",
);

/// Schema of every spill option.
pub fn schema() -> OptionsSchema {
    OptionsSchema::new("spill")
        .with(&PAGE_SIZE)
        .with(&LOCAL_SORT_MAX_NUM_FILE_HANDLES)
        .with(&SORT_SPILL_BUFFER_SIZE)
        .with(&MAX_CONCURRENT_MERGES)
        .with(&IO_TMPDIRS)
}

/// Spill engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpillConfig {
    /// Block size of spill channels in bytes
    pub block_size: usize,
    /// Maximum number of runs merged at once
    pub merge_fan_in: usize,
    /// Buffered bytes that trigger a spill
    pub memory_threshold: usize,
    /// Directories for spill files
    pub temp_dirs: Vec<PathBuf>,
    /// Maximum number of tasks merging at once (None for unlimited)
    pub max_concurrent_merges: Option<usize>,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            merge_fan_in: 128,
            memory_threshold: 64 * 1024 * 1024, // 64 MB
            temp_dirs: vec![env::temp_dir()],
            max_concurrent_merges: None,
        }
    }
}

impl SpillConfig {
    /// Set the block size
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the merge fan-in
    pub fn with_merge_fan_in(mut self, fan_in: usize) -> Self {
        self.merge_fan_in = fan_in;
        self
    }

    /// Set the spill threshold
    pub fn with_memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }

    /// Replace the temp directories
    pub fn with_temp_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.temp_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Limit concurrent merges
    pub fn with_max_concurrent_merges(mut self, merges: usize) -> Self {
        self.max_concurrent_merges = Some(merges);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(SpillError::Config(format!(
                "block_size must be at least {MIN_BLOCK_SIZE} bytes"
            )));
        }

        if u32::try_from(self.block_size).is_err() {
            return Err(SpillError::Config(
                "block_size must fit in 32 bits".to_string(),
            ));
        }

        if self.merge_fan_in < 2 {
            return Err(SpillError::Config(
                "merge_fan_in must be at least 2".to_string(),
            ));
        }

        if self.memory_threshold == 0 {
            return Err(SpillError::Config(
                "memory_threshold must be greater than 0".to_string(),
            ));
        }

        if self.temp_dirs.is_empty() {
            return Err(SpillError::Config(
                "at least one temp directory is required".to_string(),
            ));
        }

        if self.max_concurrent_merges == Some(0) {
            return Err(SpillError::Config(
                "max_concurrent_merges must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build a configuration from string options, falling back to option
    /// defaults and then to [`SpillConfig::default`].
    pub fn from_options(options: &Options) -> Result<Self> {
        schema().validate(options)?;
        let defaults = Self::default();

        let block_size = match options.get_or_default(&PAGE_SIZE)? {
            Some(size) => to_usize(PAGE_SIZE.key(), size)?,
            None => defaults.block_size,
        };
        let memory_threshold = match options.get_or_default(&SORT_SPILL_BUFFER_SIZE)? {
            Some(size) => to_usize(SORT_SPILL_BUFFER_SIZE.key(), size)?,
            None => defaults.memory_threshold,
        };
        let merge_fan_in = options
            .get_or_default(&LOCAL_SORT_MAX_NUM_FILE_HANDLES)?
            .unwrap_or(defaults.merge_fan_in);
        let temp_dirs = match options.get(&IO_TMPDIRS)? {
            Some(raw) => split_dirs(&raw),
            None => defaults.temp_dirs,
        };

        let config = Self {
            block_size,
            merge_fan_in,
            memory_threshold,
            temp_dirs,
            max_concurrent_merges: options.get(&MAX_CONCURRENT_MERGES)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Shared merge limiter, if one is configured.
    pub fn merge_slots(&self) -> Option<Arc<MergeSlots>> {
        self.max_concurrent_merges.map(MergeSlots::new)
    }
}

fn to_usize(key: &str, size: MemorySize) -> Result<usize> {
    usize::try_from(size.bytes())
        .map_err(|_| SpillError::Config(format!("{key} of {size} does not fit in memory")))
}

fn split_dirs(raw: &str) -> Vec<PathBuf> {
    raw.split([':', ';'])
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}
