//! Core Error Types
//!
//! Errors raised while decoding wire structures or interpreting catalog
//! character codes. All functions in this crate return `Result<T>` which is
//! aliased to `Result<T, Error>` so callers can propagate with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Short buffer: need {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },

    #[error("Invalid job level code: {0:?}")]
    InvalidJobLevel(char),

    #[error("Invalid job status code: {0:?}")]
    InvalidJobStatus(char),
}
