//! Block layout.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 2    | Magic `0xC0FE` (LE) |
//! | 0x02   | 2    | Flags (bit 0: last block of the channel) |
//! | 0x04   | 4    | Payload length in bytes (LE) |
//! | 0x08   | n    | Frames: `u32` LE record length + record bytes |
//!
//! Records never span blocks. A frame that fits exactly into the remaining
//! space is packed into the current block; otherwise it starts a new block.

/// Block header size in bytes.
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Record frame header (length prefix) size in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Magic number at the start of every block.
pub const BLOCK_MAGIC: u16 = 0xC0FE;

/// Flag marking the final block of a channel.
pub const FLAG_LAST_BLOCK: u16 = 0x0001;

/// Smallest usable block size.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block flags.
    pub flags: u16,
    /// Payload bytes following the header.
    pub payload_len: u32,
}

impl BlockHeader {
    /// Serialize the header.
    pub fn to_bytes(self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..2].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        buf[2..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Parse a header. Returns `None` for short input or a bad magic.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return None;
        }
        if u16::from_le_bytes([data[0], data[1]]) != BLOCK_MAGIC {
            return None;
        }
        Some(Self {
            flags: u16::from_le_bytes([data[2], data[3]]),
            payload_len: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }

    /// Whether this is the final block of its channel.
    pub const fn is_last(self) -> bool {
        self.flags & FLAG_LAST_BLOCK != 0
    }
}

/// Largest record payload a block of `block_size` bytes can hold.
pub const fn max_record_size(block_size: usize) -> usize {
    block_size.saturating_sub(BLOCK_HEADER_SIZE + FRAME_HEADER_SIZE)
}

/// Bytes a record of `len` bytes occupies inside a block.
pub const fn framed_len(len: usize) -> usize {
    FRAME_HEADER_SIZE + len
}
