//! Shared fixtures for spill integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use spillway_disk::{ChannelId, ChannelProvider, FileIoManager, IoStats, Result, SpillConfig};
use tempfile::TempDir;

/// Where a [`FaultyProvider`] injects its failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never fail.
    None,
    /// Allocation of the channel with this index fails.
    Allocate(u64),
    /// Every write to the channel with this index fails.
    Write(u64),
    /// Every read from the channel with this index fails.
    Read(u64),
}

/// File provider that fails on demand.
#[derive(Debug)]
pub struct FaultyProvider {
    inner: FileIoManager,
    fault: Fault,
}

impl FaultyProvider {
    pub fn new(dir: &Path, fault: Fault) -> Self {
        Self {
            inner: FileIoManager::new(&[dir]).expect("create spill directory"),
            fault,
        }
    }

    pub fn stats(&self) -> &IoStats {
        self.inner.stats()
    }

    pub fn remaining_files(&self) -> usize {
        self.inner.channel_files().expect("list channel files").len()
    }
}

impl ChannelProvider for FaultyProvider {
    fn allocate(&self) -> Result<ChannelId> {
        let channel = self.inner.allocate()?;
        if self.fault == Fault::Allocate(channel.index()) {
            self.inner.delete(&channel)?;
            return Err(spillway_disk::SpillError::ResourceExhausted(
                "injected allocation failure".to_string(),
            ));
        }
        Ok(channel)
    }

    fn open_append(&self, channel: &ChannelId) -> Result<Box<dyn Write + Send>> {
        let output = self.inner.open_append(channel)?;
        if self.fault == Fault::Write(channel.index()) {
            return Ok(Box::new(FailingIo(output)));
        }
        Ok(output)
    }

    fn open_read(&self, channel: &ChannelId) -> Result<Box<dyn Read + Send>> {
        let input = self.inner.open_read(channel)?;
        if self.fault == Fault::Read(channel.index()) {
            return Ok(Box::new(FailingIo(input)));
        }
        Ok(input)
    }

    fn delete(&self, channel: &ChannelId) -> Result<()> {
        self.inner.delete(channel)
    }
}

/// Wraps a real handle so it stays counted as open, but fails every call.
struct FailingIo<T>(T);

impl<T> Read for FailingIo<T> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("injected read failure"))
    }
}

impl<T> Write for FailingIo<T> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("injected write failure"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Spill directory plus a provider over it.
pub fn faulty(fault: Fault) -> (TempDir, Arc<FaultyProvider>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let provider = Arc::new(FaultyProvider::new(dir.path(), fault));
    (dir, provider)
}

/// Small configuration: 64-byte blocks, fan-in 2, and a
/// threshold of two `i64` records.
pub fn small_config() -> SpillConfig {
    SpillConfig::default()
        .with_block_size(64)
        .with_merge_fan_in(2)
        .with_memory_threshold(16)
}
