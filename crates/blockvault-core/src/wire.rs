//! Wire and On-Disk Binary Formats
//!
//! A backup block as it travels over the wire is one [`BlockHeader`] followed
//! by a sequence of records, each a [`RecordHeader`] plus a variable-size
//! payload. The volume store splits that stream apart and keeps two kinds of
//! fixed-size descriptors instead:
//!
//! ```text
//! wire block                      volume segments
//! ┌──────────────┐
//! │ BlockHeader  │──────────────► blocks:  [BlockDescriptor]   (36 bytes each)
//! ├──────────────┤
//! │ RecordHeader │──────────────► records: [RecordDescriptor]  (36 bytes each)
//! │ payload ...  │──────────────► data-NNNNNNNN: raw payload bytes
//! ├──────────────┤
//! │ RecordHeader │
//! │ payload ...  │
//! └──────────────┘
//! ```
//!
//! All structures are fixed size and native-endian; payload bytes are stored
//! verbatim. `BlockHeader::block_size` covers the header and every record and
//! is authoritative for end-of-block.
//!
//! A block's logical position is a single `u64`, exposed to tape-style
//! callers as a `(file, block)` pair of `u32`s. The split is surface only;
//! see [`block_number`] and [`split_block_number`].

use crate::error::{Error, Result};

/// Identifier bytes stamped into freshly built block headers.
pub const BLOCK_MAGIC: [u8; 4] = *b"BV02";

/// Combine a `(file, block)` pair into the logical block index.
#[inline]
pub const fn block_number(file: u32, block: u32) -> u64 {
    (file as u64) << 32 | block as u64
}

/// Split a logical block index into its `(file, block)` pair.
#[inline]
pub const fn split_block_number(block_num: u64) -> (u32, u32) {
    ((block_num >> 32) as u32, block_num as u32)
}

fn check_len(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(Error::ShortBuffer {
            need,
            have: buf.len(),
        });
    }
    Ok(())
}

#[inline]
fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn get_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(b)
}

/// Header of one wire block.
///
/// `block_size` is the total size of the block including this header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub checksum: u32,
    pub block_size: u32,
    pub block_number: u32,
    pub id: [u8; 4],
    pub session_id: u32,
    pub session_time: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 24;

    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.checksum.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.block_size.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.block_number.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.id);
        buf[16..20].copy_from_slice(&self.session_id.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.session_time.to_ne_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE)?;
        let mut id = [0u8; 4];
        id.copy_from_slice(&buf[12..16]);
        Ok(Self {
            checksum: get_u32(buf, 0),
            block_size: get_u32(buf, 4),
            block_number: get_u32(buf, 8),
            id,
            session_id: get_u32(buf, 16),
            session_time: get_u32(buf, 20),
        })
    }
}

/// Header of one record inside a wire block.
///
/// `data_size` is the declared payload length. The payload that actually
/// follows may be shorter when the record is split across blocks; the codec
/// truncates at the block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub session_id: u32,
    pub session_time: u32,
    pub file_index: i32,
    pub stream: i32,
    pub data_size: u32,
}

impl RecordHeader {
    pub const SIZE: usize = 20;

    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.session_id.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.session_time.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.file_index.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.stream.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.data_size.to_ne_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            session_id: get_u32(buf, 0),
            session_time: get_u32(buf, 4),
            file_index: get_i32(buf, 8),
            stream: get_i32(buf, 12),
            data_size: get_u32(buf, 16),
        })
    }
}

/// Entry in the records segment: the original record header plus the
/// location of its payload in the data segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub header: RecordHeader,
    /// Byte offset of the payload inside its data-segment file.
    pub begin: u64,
    /// Stored payload length. May be less than `header.data_size` when the
    /// payload was truncated at a block boundary.
    pub size: u32,
    /// Index of the data-segment file holding the payload.
    pub data_file: u32,
}

impl RecordDescriptor {
    pub const SIZE: usize = RecordHeader::SIZE + 16;

    pub fn encode_into(&self, buf: &mut [u8]) {
        self.header.encode_into(&mut buf[..RecordHeader::SIZE]);
        buf[20..28].copy_from_slice(&self.begin.to_ne_bytes());
        buf[28..32].copy_from_slice(&self.size.to_ne_bytes());
        buf[32..36].copy_from_slice(&self.data_file.to_ne_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            header: RecordHeader::decode(buf)?,
            begin: get_u64(buf, 20),
            size: get_u32(buf, 28),
            data_file: get_u32(buf, 32),
        })
    }
}

/// Entry in the blocks segment: the original block header plus the
/// contiguous run of record descriptors that belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub header: BlockHeader,
    /// Index of the first record descriptor in the records segment.
    pub start: u64,
    /// Number of record descriptors.
    pub count: u32,
}

impl BlockDescriptor {
    pub const SIZE: usize = BlockHeader::SIZE + 12;

    pub fn encode_into(&self, buf: &mut [u8]) {
        self.header.encode_into(&mut buf[..BlockHeader::SIZE]);
        buf[24..32].copy_from_slice(&self.start.to_ne_bytes());
        buf[32..36].copy_from_slice(&self.count.to_ne_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            header: BlockHeader::decode(buf)?,
            start: get_u64(buf, 24),
            count: get_u32(buf, 32),
        })
    }
}
