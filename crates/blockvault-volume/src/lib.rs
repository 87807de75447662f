//! BlockVault Volume Store
//!
//! This crate implements the storage side of BlockVault: a deduplicating,
//! block-oriented volume format and the tape-style device facade above it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────┐
//! │  storage worker  │  wire blocks in, wire blocks out
//! └────────┬─────────┘
//!          │ write(fd, block) / read(fd, buf)
//!          ▼
//! ┌──────────────────┐
//! │   DedupDevice    │  cursor (file, block), fd counter, EOT flag
//! └────────┬─────────┘
//!          │ scatter / gather
//!          ▼
//! ┌──────────────────┐
//! │      Volume      │  blocks / records / data-NNNNNNNN segments
//! └──────────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`Volume`]: a named directory of three append-only segment streams,
//!   addressed positionally and stateless with respect to the cursor.
//! - [`scatter`] / [`gather`]: the codec between wire blocks and segments.
//! - [`DedupDevice`]: open/close/read/write/reposition/rewind/eod/truncate
//!   over one open volume, with tape-compatible `(file, block)` positioning.
//! - [`DeviceOptions`]: the `key=value` device option string parser.
//!
//! Reads reassemble blocks byte-identically to what was written; `flush` is
//! the durability barrier. A volume that hits an I/O error reports
//! `is_ok() == false` and fails fast afterwards.

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod options;
pub mod volume;

pub use codec::{gather, scatter};
pub use config::{VolumeConfig, DEFAULT_BLOCK_SIZE};
pub use device::{DedupDevice, DeviceConfig};
pub use error::{Result, VolumeError};
pub use options::DeviceOptions;
pub use volume::{DeviceMode, Location, Volume};
