//! Block writer for one spill channel.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tracing::{debug, trace};

use super::block::{
    BLOCK_HEADER_SIZE, BlockHeader, FLAG_LAST_BLOCK, MIN_BLOCK_SIZE, framed_len, max_record_size,
};
use super::{ChannelId, ChannelWithMeta};
use crate::cancel::CancellationFlag;
use crate::codec::RecordCodec;
use crate::io::registry::ChannelRegistry;
use crate::{Result, SpillError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Sealed,
    Aborted,
}

/// Writes already sorted records into one new channel.
///
/// Records are framed into fixed-size blocks. [`seal`](Self::seal) writes the
/// trailing block and returns the channel's metadata. Any failure aborts the
/// writer and deletes the partially written channel before the error is
/// returned; so does dropping a writer that was never sealed.
pub struct ChannelWriter {
    registry: Arc<ChannelRegistry>,
    channel: ChannelId,
    output: Option<Box<dyn Write + Send>>,
    /// Current block, header placeholder included.
    block: Vec<u8>,
    block_size: usize,
    blocks_written: u32,
    bytes_written: u64,
    last_block_len: u32,
    records: u64,
    scratch: Vec<u8>,
    cancel: CancellationFlag,
    state: WriterState,
}

impl ChannelWriter {
    /// Allocate a channel from `registry` and open it for writing.
    pub fn create(
        registry: Arc<ChannelRegistry>,
        block_size: usize,
        cancel: CancellationFlag,
    ) -> Result<Self> {
        if block_size < MIN_BLOCK_SIZE || u32::try_from(block_size).is_err() {
            return Err(SpillError::Config(format!(
                "block size {block_size} is outside [{MIN_BLOCK_SIZE}, {}]",
                u32::MAX
            )));
        }
        cancel.check()?;

        let channel = registry.allocate()?;
        let output = match registry.provider().open_append(&channel) {
            Ok(output) => output,
            Err(e) => {
                registry.discard(&channel);
                return Err(e);
            }
        };
        trace!("Opened {channel} for writing");

        let mut block = Vec::with_capacity(block_size);
        block.resize(BLOCK_HEADER_SIZE, 0);
        Ok(Self {
            registry,
            channel,
            output: Some(output),
            block,
            block_size,
            blocks_written: 0,
            bytes_written: 0,
            last_block_len: 0,
            records: 0,
            scratch: Vec::new(),
            cancel,
            state: WriterState::Open,
        })
    }

    /// Channel being written.
    pub const fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Records written so far.
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Bytes flushed to the channel so far.
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one serialized record.
    pub fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let result = self.append(payload);
        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Encode `record` with `codec` and append it.
    pub fn write_record<C: RecordCodec>(&mut self, codec: &C, record: &C::Record) -> Result<()> {
        self.ensure_open()?;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let result = codec
            .encode(record, &mut scratch)
            .and_then(|()| self.append(&scratch));
        self.scratch = scratch;
        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Write the trailing block and return the channel metadata.
    pub fn seal(mut self) -> Result<ChannelWithMeta> {
        self.ensure_open()?;
        match self.finish() {
            Ok(meta) => {
                self.state = WriterState::Sealed;
                self.registry.seal(meta.clone());
                debug!(
                    "Sealed {} with {} records in {} blocks ({} bytes)",
                    self.channel, self.records, meta.block_count(), meta.num_bytes()
                );
                Ok(meta)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Sealed => Err(SpillError::Closed(format!("{} is sealed", self.channel))),
            WriterState::Aborted => {
                Err(SpillError::Closed(format!("{} was aborted", self.channel)))
            }
        }
    }

    fn append(&mut self, payload: &[u8]) -> Result<()> {
        let limit = max_record_size(self.block_size);
        if payload.len() > limit {
            return Err(SpillError::RecordTooLarge {
                size: payload.len(),
                limit,
            });
        }

        if self.block.len() + framed_len(payload.len()) > self.block_size {
            self.flush_block(false)?;
        }

        let len = payload.len() as u32;
        self.block.extend_from_slice(&len.to_le_bytes());
        self.block.extend_from_slice(payload);
        self.records += 1;
        Ok(())
    }

    fn flush_block(&mut self, last: bool) -> Result<()> {
        self.cancel.check()?;

        let used = self.block.len();
        let header = BlockHeader {
            flags: if last { FLAG_LAST_BLOCK } else { 0 },
            payload_len: (used - BLOCK_HEADER_SIZE) as u32,
        };
        self.block[..BLOCK_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        if !last {
            self.block.resize(self.block_size, 0);
        }

        let output = self
            .output
            .as_mut()
            .ok_or_else(|| SpillError::Closed(self.channel.to_string()))?;
        output
            .write_all(&self.block)
            .map_err(|e| SpillError::channel_io(&self.channel, e))?;

        self.blocks_written = self.blocks_written.checked_add(1).ok_or_else(|| {
            SpillError::ResourceExhausted(format!("{} exceeds the block count limit", self.channel))
        })?;
        self.bytes_written += self.block.len() as u64;
        self.last_block_len = self.block.len() as u32;

        self.block.clear();
        self.block.resize(BLOCK_HEADER_SIZE, 0);
        Ok(())
    }

    fn finish(&mut self) -> Result<ChannelWithMeta> {
        if self.records > 0 {
            self.flush_block(true)?;
        }
        if let Some(mut output) = self.output.take() {
            output
                .flush()
                .map_err(|e| SpillError::channel_io(&self.channel, e))?;
        }
        Ok(ChannelWithMeta::new(
            self.channel.clone(),
            self.blocks_written,
            self.last_block_len,
            self.bytes_written,
        ))
    }

    fn abort(&mut self) {
        if self.state == WriterState::Aborted {
            return;
        }
        self.state = WriterState::Aborted;
        self.output = None;
        self.registry.discard(&self.channel);
        debug!("Aborted {}", self.channel);
    }
}

impl fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("channel", &self.channel)
            .field("block_size", &self.block_size)
            .field("blocks_written", &self.blocks_written)
            .field("records", &self.records)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            self.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::I64Codec;
    use crate::io::FileIoManager;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Arc<FileIoManager>, Arc<ChannelRegistry>) {
        let base = tempfile::tempdir().unwrap();
        let io = Arc::new(FileIoManager::new(&[base.path()]).unwrap());
        let registry = Arc::new(ChannelRegistry::new(io.clone()));
        (base, io, registry)
    }

    #[test]
    fn test_exact_fit_is_packed() {
        let (_base, _io, registry) = setup();
        // 8-byte header + two 12-byte frames fill a 32-byte block exactly.
        let mut writer = ChannelWriter::create(registry.clone(), 32, CancellationFlag::new()).unwrap();
        for value in [1_i64, 2, 3] {
            writer.write_record(&I64Codec, &value).unwrap();
        }
        let meta = writer.seal().unwrap();

        assert_eq!(meta.block_count(), 2);
        assert_eq!(meta.num_bytes_in_last_block(), 20);
        assert_eq!(meta.num_bytes(), 52);
        assert!(meta.validate(32).is_ok());
        assert_eq!(fs::metadata(meta.channel().path()).unwrap().len(), 52);
    }

    #[test]
    fn test_padding_only_on_full_blocks() {
        let (_base, _io, registry) = setup();
        let mut writer = ChannelWriter::create(registry.clone(), 64, CancellationFlag::new()).unwrap();
        // Four frames of 12 bytes fill 56 of 64 bytes; the fifth rolls over.
        for value in 0..5_i64 {
            writer.write_record(&I64Codec, &value).unwrap();
        }
        let meta = writer.seal().unwrap();

        assert_eq!(meta.block_count(), 2);
        assert_eq!(meta.num_bytes_in_last_block(), 20);
        assert_eq!(meta.num_bytes(), 84);

        let bytes = fs::read(meta.channel().path()).unwrap();
        assert_eq!(bytes.len(), 84);
        assert_eq!(&bytes[56..64], &[0; 8]);
        let first = BlockHeader::from_bytes(&bytes[..8]).unwrap();
        assert!(!first.is_last());
        assert_eq!(first.payload_len, 48);
        let second = BlockHeader::from_bytes(&bytes[64..72]).unwrap();
        assert!(second.is_last());
        assert_eq!(second.payload_len, 12);
    }

    #[test]
    fn test_empty_channel() {
        let (_base, _io, registry) = setup();
        let writer = ChannelWriter::create(registry.clone(), 64, CancellationFlag::new()).unwrap();
        let meta = writer.seal().unwrap();

        assert!(meta.is_empty());
        assert_eq!(meta.num_bytes(), 0);
        assert_eq!(registry.sealed(), vec![meta]);
    }

    #[test]
    fn test_record_too_large_aborts() {
        let (_base, io, registry) = setup();
        let mut writer =
            ChannelWriter::create(registry.clone(), 32, CancellationFlag::new()).unwrap();
        writer.write(&[1; 20]).unwrap();

        let err = writer.write(&[0; 21]).unwrap_err();
        assert!(matches!(
            err,
            SpillError::RecordTooLarge {
                size: 21,
                limit: 20
            }
        ));
        assert!(registry.is_empty());
        assert!(io.channel_files().unwrap().is_empty());
        assert!(matches!(writer.write(&[1]), Err(SpillError::Closed(_))));
    }

    #[test]
    fn test_drop_without_seal_deletes_channel() {
        let (_base, io, registry) = setup();
        let mut writer =
            ChannelWriter::create(registry.clone(), 64, CancellationFlag::new()).unwrap();
        writer.write(b"partial").unwrap();
        drop(writer);

        assert!(registry.is_empty());
        assert!(io.channel_files().unwrap().is_empty());
        assert_eq!(io.stats().open_writers(), 0);
    }

    #[test]
    fn test_cancellation_before_block_write() {
        let (_base, io, registry) = setup();
        let cancel = CancellationFlag::new();
        let mut writer = ChannelWriter::create(registry.clone(), 64, cancel.clone()).unwrap();
        writer.write(b"record").unwrap();
        cancel.cancel();

        assert!(matches!(writer.seal(), Err(SpillError::Cancelled)));
        assert!(io.channel_files().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_tiny_blocks() {
        let (_base, _io, registry) = setup();
        assert!(matches!(
            ChannelWriter::create(registry, 8, CancellationFlag::new()),
            Err(SpillError::Config(_))
        ));
    }
}
