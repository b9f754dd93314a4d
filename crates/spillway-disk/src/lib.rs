//! Spill channels and external merge sort for lakehouse storage engines.
//!
//! When sorting or grouping exceeds memory, sorted runs are spilled to
//! temporary block-structured files ("channels") and later merged back into
//! a single ordered stream:
//!
//! - **Channel writer**: writes sorted records into fixed-size blocks and
//!   seals the channel into immutable [`ChannelWithMeta`]
//! - **Channel reader**: streams records back, honouring the exact byte
//!   count of the final block
//! - **Merge engine**: stable k-way merge with a bounded fan-in, spilling
//!   intermediate merge passes when there are more runs than the fan-in
//! - **External sorter**: owns the in-memory sort buffer, decides when to
//!   spill, and guarantees every channel is deleted on success or failure
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spillway_disk::{ExternalSorter, FileIoManager, I64Codec, SpillConfig, natural_order};
//!
//! # fn example() -> spillway_disk::Result<()> {
//! let config = SpillConfig::default().with_memory_threshold(1024);
//! let io = Arc::new(FileIoManager::new(&config.temp_dirs)?);
//! let sorter = ExternalSorter::new(config, io, I64Codec, natural_order())?;
//!
//! let sorted: Vec<i64> = sorter
//!     .sort([5, 3, 8, 1, 9, 2])?
//!     .collect::<spillway_disk::Result<_>>()?;
//! assert_eq!(sorted, vec![1, 2, 3, 5, 8, 9]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use thiserror::Error;

// Cancellation and merge concurrency limits
pub mod cancel;

// Channel identity, metadata, block layout, writer, reader
pub mod channel;

// Record serialization
pub mod codec;

// Configuration
pub mod config;

// Temp-file provider and channel registry
pub mod io;

// K-way merge
pub mod merge;

// Parallel partition sorting on the tokio runtime
pub mod parallel;

// Spill orchestration
pub mod sorter;

pub use cancel::{CancellationFlag, MergeSlot, MergeSlots};
pub use channel::reader::ChannelReader;
pub use channel::writer::ChannelWriter;
pub use channel::{ChannelId, ChannelWithMeta};
pub use codec::{BytesCodec, I64Codec, JsonCodec, RecordCodec, Utf8Codec};
pub use config::SpillConfig;
pub use io::registry::ChannelRegistry;
pub use io::{ChannelProvider, FileIoManager, IoStats};
pub use merge::iterator::MergeIterator;
pub use merge::{Comparator, MergeEngine, MergeStats, Run, comparator, natural_order};
pub use parallel::sort_partitions;
pub use sorter::{ExternalSorter, SortStats, SortedOutput, SorterState};

/// Result type for spill operations.
pub type Result<T> = std::result::Result<T, SpillError>;

/// Errors that can occur while spilling, reading or merging channels.
#[derive(Debug, Error)]
pub enum SpillError {
    /// A serialized record does not fit into one block.
    #[error("Record of {size} bytes exceeds the block payload limit of {limit} bytes")]
    RecordTooLarge {
        /// Serialized record size.
        size: usize,
        /// Largest record a block can hold.
        limit: usize,
    },

    /// Channel contents or metadata are malformed.
    #[error("Corrupt channel {channel}: {reason}")]
    Corrupt {
        /// Channel description.
        channel: String,
        /// What was wrong.
        reason: String,
    },

    /// The record codec rejected a record or its bytes.
    #[error("Codec error: {0}")]
    Codec(String),

    /// I/O failure on a specific channel.
    #[error("I/O error on {channel}: {source}")]
    ChannelIo {
        /// Channel description.
        channel: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error not tied to a channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel was already closed or aborted.
    #[error("Channel closed: {0}")]
    Closed(String),

    /// A new temporary file could not be allocated.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Runs were not ordered consistently with the comparator.
    #[error("Comparator violation: {0}")]
    ComparatorViolation(String),

    /// The task was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Option lookup failed.
    #[error("Options error: {0}")]
    Options(#[from] spillway_options::OptionsError),

    /// A background sort task failed to complete.
    #[error("Task failed: {0}")]
    Task(String),
}

/// Coarse classification of [`SpillError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Record too large for a block, or malformed bytes on read.
    Serialization,
    /// Read, write or delete failure.
    Io,
    /// A temporary file could not be allocated.
    ResourceExhaustion,
    /// Inconsistent ordering detected during a merge.
    ComparatorViolation,
    /// Cancellation was observed.
    Cancelled,
    /// Configuration or option error.
    Config,
    /// Background task failure.
    Task,
}

impl SpillError {
    /// Classify the error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RecordTooLarge { .. } | Self::Corrupt { .. } | Self::Codec(_) => {
                ErrorKind::Serialization
            }
            Self::ChannelIo { .. } | Self::Io(_) | Self::Closed(_) => ErrorKind::Io,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhaustion,
            Self::ComparatorViolation(_) => ErrorKind::ComparatorViolation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) | Self::Options(_) => ErrorKind::Config,
            Self::Task(_) => ErrorKind::Task,
        }
    }

    pub(crate) fn channel_io(channel: &ChannelId, source: std::io::Error) -> Self {
        Self::ChannelIo {
            channel: channel.to_string(),
            source,
        }
    }

    pub(crate) fn corrupt(channel: &ChannelId, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }
}

/// Version information for the spill engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
