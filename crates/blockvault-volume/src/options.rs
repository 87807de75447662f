//! Device option string parsing.
//!
//! Volume devices are configured with a comma-separated `key=value` string.
//! The only recognized key today is `blocksize`, which accepts k/K, m/M and
//! g/G suffixes. Unknown keys and an unset blocksize produce warnings the
//! device logs on open; a malformed blocksize is fatal.

use crate::config::DEFAULT_BLOCK_SIZE;
use crate::error::{Result, VolumeError};

#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub block_size: u32,
    /// True when `blocksize` appeared in the option string. An explicit
    /// blocksize must match an existing volume's configuration on open.
    pub explicit_block_size: bool,
    pub warnings: Vec<String>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            explicit_block_size: false,
            warnings: Vec::new(),
        }
    }
}

impl DeviceOptions {
    pub fn parse(input: &str) -> Result<Self> {
        let mut options = Self::default();
        let mut unknown = Vec::new();

        for pair in input.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| VolumeError::Options(format!("expected key=value, got {pair:?}")))?;

            match key.trim() {
                "blocksize" => {
                    let value = value.trim();
                    let size = parse_size(value)
                        .ok_or_else(|| VolumeError::Options(format!("bad block size: {value}")))?;
                    options.block_size = u32::try_from(size)
                        .map_err(|_| VolumeError::Options(format!("bad block size: {value}")))?;
                    options.explicit_block_size = true;
                }
                other => unknown.push(other.to_string()),
            }
        }

        if !options.explicit_block_size {
            options
                .warnings
                .push("Blocksize was not set explicitly; set to default 4k".to_string());
        }
        if !unknown.is_empty() {
            options
                .warnings
                .push(format!("Unknown options: {}", unknown.join(" ")));
        }

        Ok(options)
    }
}

/// Parse a size with an optional binary suffix (k/K, m/M, g/G).
fn parse_size(value: &str) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    let (digits, multiplier) = match value.as_bytes()[value.len() - 1] {
        b'k' | b'K' => (&value[..value.len() - 1], 1u64 << 10),
        b'm' | b'M' => (&value[..value.len() - 1], 1u64 << 20),
        b'g' | b'G' => (&value[..value.len() - 1], 1u64 << 30),
        _ => (value, 1),
    };
    let n: u64 = digits.parse().ok()?;
    n.checked_mul(multiplier)
}
