//! Volume Error Types
//!
//! Errors from the volume store, the scatter/gather codec, and the device
//! facade. The codec errors (`BlockTooLarge` through `BadRecordHeader`)
//! indicate upstream corruption and are fatal to the operation; any I/O
//! error additionally poisons the volume so later mutating calls fail fast
//! with `NotOk`.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VolumeError>;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Volume config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Wire(#[from] blockvault_core::Error),

    #[error("Volume already locked: {0}")]
    Locked(PathBuf),

    #[error("Not a volume: {0}")]
    NotAVolume(PathBuf),

    #[error("Unsupported volume format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Block size mismatch: volume has {on_disk}, requested {requested}")]
    ConfigMismatch { on_disk: u32, requested: u32 },

    #[error("Volume marked not-ok after an earlier I/O failure")]
    NotOk,

    #[error("Volume is read only")]
    ReadOnly,

    #[error("Block {index} out of range: volume has {size} blocks")]
    BlockOutOfRange { index: u64, size: u64 },

    #[error("Record range {start}+{count} out of range: volume has {size} records")]
    RecordOutOfRange { start: u64, count: u32, size: u64 },

    #[error("Block too large: {0} bytes")]
    BlockTooLarge(usize),

    #[error("Block shorter than a block header: {0} bytes")]
    MissingBlockHeader(usize),

    #[error("Incomplete block: got {got} bytes, header declares {declared}")]
    IncompleteBlock { got: usize, declared: u32 },

    #[error("Record header past end of block at offset {0}")]
    BadRecordHeader(usize),

    #[error("Buffer too small for block: block is {block} bytes, buffer {buffer}")]
    BufferTooSmall { block: usize, buffer: usize },

    #[error("Illegal mode given to open device")]
    IllegalMode,

    #[error("A volume is already open")]
    AlreadyOpen,

    #[error("No volume is open")]
    NotOpen,

    #[error("Unknown file descriptor: {0}")]
    UnknownFd(i32),

    #[error("Write not at end of volume: cursor {cursor}, size {size}")]
    NotAtEnd { cursor: u64, size: u64 },

    #[error("Device options error: {0}")]
    Options(String),

    #[error("Unexpected directory inside volume: {0}")]
    UnexpectedDirectory(PathBuf),

    #[error("Secure erase command failed on {0}")]
    SecureEraseFailed(PathBuf),

    #[error("Unsupported device operation: {0}")]
    Unsupported(&'static str),
}
