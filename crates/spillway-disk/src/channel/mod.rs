//! Spill channels.
//!
//! A channel is one temporary file holding one sorted run, laid out as a
//! sequence of fixed-size blocks. Every block but the last is padded to the
//! full block size; the last block is written with exactly the bytes it
//! uses, so the channel's byte count is always
//! `(block_count - 1) * block_size + num_bytes_in_last_block`.

pub mod block;
pub mod reader;
pub mod writer;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{Result, SpillError};

/// Identifier of one temporary channel file.
///
/// The index is unique for the lifetime of the provider that allocated it
/// and is never handed out again after the channel is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    index: u64,
    path: PathBuf,
}

impl ChannelId {
    /// Create an identifier for a channel file.
    pub fn new(index: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
        }
    }

    /// Allocation index.
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {} ({})", self.index, self.path.display())
    }
}

/// A sealed channel together with its block layout.
///
/// Produced by [`ChannelWriter::seal`](writer::ChannelWriter::seal) and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelWithMeta {
    channel: ChannelId,
    block_count: u32,
    num_bytes_in_last_block: u32,
    num_bytes: u64,
}

impl ChannelWithMeta {
    /// Describe a sealed channel.
    pub const fn new(
        channel: ChannelId,
        block_count: u32,
        num_bytes_in_last_block: u32,
        num_bytes: u64,
    ) -> Self {
        Self {
            channel,
            block_count,
            num_bytes_in_last_block,
            num_bytes,
        }
    }

    /// Channel identifier.
    pub const fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Number of blocks in the channel.
    pub const fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Bytes used by the final block, header included.
    pub const fn num_bytes_in_last_block(&self) -> u32 {
        self.num_bytes_in_last_block
    }

    /// Total bytes in the channel file.
    pub const fn num_bytes(&self) -> u64 {
        self.num_bytes
    }

    /// Whether the channel holds no blocks.
    pub const fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// Check the layout invariants against a block size.
    pub fn validate(&self, block_size: usize) -> Result<()> {
        let last = self.num_bytes_in_last_block as usize;
        if self.block_count == 0 {
            if self.num_bytes != 0 || last != 0 {
                return Err(SpillError::corrupt(
                    &self.channel,
                    format!(
                        "empty channel reports {} bytes ({} in last block)",
                        self.num_bytes, last
                    ),
                ));
            }
            return Ok(());
        }

        if last < block::BLOCK_HEADER_SIZE || last > block_size {
            return Err(SpillError::corrupt(
                &self.channel,
                format!("last block size {last} outside [{}, {block_size}]", block::BLOCK_HEADER_SIZE),
            ));
        }

        let expected =
            u64::from(self.block_count - 1) * block_size as u64 + u64::from(self.num_bytes_in_last_block);
        if expected != self.num_bytes {
            return Err(SpillError::corrupt(
                &self.channel,
                format!(
                    "{} blocks of {block_size} bytes with {last} in the last block do not add up to {} bytes",
                    self.block_count, self.num_bytes
                ),
            ));
        }
        Ok(())
    }
}
