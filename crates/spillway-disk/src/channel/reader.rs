//! Forward-only record reader for one sealed channel.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::sync::Arc;

use tracing::trace;

use super::ChannelWithMeta;
use super::block::{BLOCK_HEADER_SIZE, BlockHeader, FRAME_HEADER_SIZE};
use crate::cancel::CancellationFlag;
use crate::codec::RecordCodec;
use crate::io::ChannelProvider;
use crate::{Result, SpillError};

/// Streams the records of a sealed channel in write order.
///
/// Holds exactly one open file handle, released on [`close`](Self::close),
/// on drop, at the end of the channel and on the first error. Once it has
/// returned `None` or an error it only returns `None`. Opening a new reader
/// on the same channel starts from the beginning again.
pub struct ChannelReader<C: RecordCodec> {
    meta: ChannelWithMeta,
    input: Option<Box<dyn Read + Send>>,
    codec: Arc<C>,
    cancel: CancellationFlag,
    block_size: usize,
    block: Vec<u8>,
    /// Next frame offset within `block`.
    pos: usize,
    /// End of the payload within `block`.
    end: usize,
    blocks_read: u32,
    done: bool,
}

impl<C: RecordCodec> ChannelReader<C> {
    /// Open a reader over a sealed channel.
    pub fn open(
        provider: &dyn ChannelProvider,
        meta: ChannelWithMeta,
        block_size: usize,
        codec: Arc<C>,
        cancel: CancellationFlag,
    ) -> Result<Self> {
        meta.validate(block_size)?;
        cancel.check()?;

        let input = if meta.is_empty() {
            None
        } else {
            Some(provider.open_read(meta.channel())?)
        };
        trace!("Opened {} for reading", meta.channel());

        let done = input.is_none();
        Ok(Self {
            meta,
            input,
            codec,
            cancel,
            block_size,
            block: Vec::new(),
            pos: 0,
            end: 0,
            blocks_read: 0,
            done,
        })
    }

    /// Metadata of the channel being read.
    pub const fn metadata(&self) -> &ChannelWithMeta {
        &self.meta
    }

    /// Whether the reader still holds its file handle.
    pub const fn is_open(&self) -> bool {
        self.input.is_some()
    }

    /// Release the file handle. Further calls to `next` return `None`.
    pub fn close(&mut self) {
        self.done = true;
        self.input = None;
        self.block = Vec::new();
    }

    fn next_record(&mut self) -> Result<Option<C::Record>> {
        loop {
            if self.pos < self.end {
                return self.read_frame().map(Some);
            }
            if self.blocks_read == self.meta.block_count() {
                return Ok(None);
            }
            self.read_block()?;
        }
    }

    fn read_frame(&mut self) -> Result<C::Record> {
        let channel = self.meta.channel();
        let start = self.pos + FRAME_HEADER_SIZE;
        if start > self.end {
            return Err(SpillError::corrupt(
                channel,
                format!("truncated frame header in block {}", self.blocks_read - 1),
            ));
        }
        let len_bytes: [u8; FRAME_HEADER_SIZE] = self.block[self.pos..start]
            .try_into()
            .map_err(|_| SpillError::corrupt(channel, "frame header"))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let stop = start + len;
        if stop > self.end {
            return Err(SpillError::corrupt(
                channel,
                format!(
                    "frame of {len} bytes overruns block {} payload",
                    self.blocks_read - 1
                ),
            ));
        }

        let record = self.codec.decode(&self.block[start..stop])?;
        self.pos = stop;
        Ok(record)
    }

    fn read_block(&mut self) -> Result<()> {
        self.cancel.check()?;

        let channel = self.meta.channel();
        let index = self.blocks_read;
        let is_last = index + 1 == self.meta.block_count();
        let len = if is_last {
            self.meta.num_bytes_in_last_block() as usize
        } else {
            self.block_size
        };

        let input = self
            .input
            .as_mut()
            .ok_or_else(|| SpillError::Closed(channel.to_string()))?;
        self.block.resize(len, 0);
        input.read_exact(&mut self.block).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                SpillError::corrupt(channel, format!("channel ends inside block {index}"))
            } else {
                SpillError::channel_io(channel, e)
            }
        })?;

        let header = BlockHeader::from_bytes(&self.block)
            .ok_or_else(|| SpillError::corrupt(channel, format!("bad magic in block {index}")))?;
        if header.is_last() != is_last {
            return Err(SpillError::corrupt(
                channel,
                format!("block {index} has an unexpected last-block flag"),
            ));
        }
        let end = BLOCK_HEADER_SIZE + header.payload_len as usize;
        if end > len {
            return Err(SpillError::corrupt(
                channel,
                format!(
                    "block {index} payload of {} bytes exceeds {len} bytes",
                    header.payload_len
                ),
            ));
        }

        self.pos = BLOCK_HEADER_SIZE;
        self.end = end;
        self.blocks_read += 1;
        Ok(())
    }
}

impl<C: RecordCodec> Iterator for ChannelReader<C> {
    type Item = Result<C::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.close();
                None
            }
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl<C: RecordCodec> std::iter::FusedIterator for ChannelReader<C> {}

impl<C: RecordCodec> fmt::Debug for ChannelReader<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("channel", self.meta.channel())
            .field("blocks_read", &self.blocks_read)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
