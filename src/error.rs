//! Crate-wide error type.
//!
//! Every structural check in the parsers (§7 of the format specification)
//! fails with one of these variants. None of the parsing or resolution
//! code in this crate panics on malformed input; `unwrap`/`expect` are
//! reserved for tests.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VhdiError>;

#[derive(Debug, Error)]
pub enum VhdiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unsupported signature in {context}: expected {expected:?}, found {found:?}")]
    UnsupportedSignature {
        context: &'static str,
        expected: &'static [u8],
        found: Vec<u8>,
    },

    #[error("unsupported version in {context}: {value}")]
    UnsupportedVersion { context: &'static str, value: u64 },

    #[error("unsupported value for {field}: {value}")]
    UnsupportedValue { field: &'static str, value: u64 },

    #[error("value out of bounds for {field}: {value}")]
    ValueOutOfBounds { field: &'static str, value: i64 },

    #[error("required value missing: {0}")]
    ValueMissing(&'static str),

    #[error("checksum mismatch in {context}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        context: &'static str,
        expected: u32,
        computed: u32,
    },

    #[error("parent identifier mismatch")]
    ParentIdentifierMismatch,

    #[error("missing known region: {0}")]
    MissingKnownRegion(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("image is not open")]
    NotOpen,

    #[error("image is already open")]
    AlreadyOpen,

    #[error("write access is not supported; this library is read-only")]
    WriteNotSupported,

    #[error("operation aborted")]
    Aborted,
}

impl<I: std::fmt::Debug> From<nom::Err<nom::error::Error<I>>> for VhdiError {
    fn from(err: nom::Err<nom::error::Error<I>>) -> Self {
        VhdiError::Parse(format!("{err:?}"))
    }
}
