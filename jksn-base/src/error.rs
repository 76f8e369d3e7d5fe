// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system

use std::borrow::Cow;
use backtrace_error::DynBacktraceError;
use tracing::error;

#[cfg(test)]
use test_log::test;

#[derive(Debug)]
#[allow(dead_code)]
pub struct Error(DynBacktraceError);
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl std::fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        Error::new(err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        error!(target: "jksn", "{:?}", err);
        let dbe = DynBacktraceError::from(err);
        Error(dbe)
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    let err = SimpleErr(msg.into());
    Error::new(err)
}

/// Structured, matchable taxonomy of the ways a JKSN document can fail to decode or encode.
///
/// Every variant implements `std::error::Error`, so it converts into [`Error`] through the
/// same blanket `From` impl used for I/O and JSON errors; callers that need to distinguish
/// failure modes should match on a downcast or construct against this enum directly before
/// wrapping it.
#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    #[error("unknown opcode 0x{control:02x}")]
    UnknownOpcode { control: u8 },

    #[error("premature end of stream")]
    PrematureEof,

    #[error("malformed varint")]
    MalformedVarint,

    #[error("delta integer with no prior absolute integer in this stream")]
    DeltaWithoutPriorInt,

    #[error("dedup reference to empty hash slot {slot}")]
    DedupRefEmptySlot { slot: u8 },

    #[error("invalid utf-16 text payload")]
    InvalidUtf16,

    #[error("invalid utf-8 text payload")]
    InvalidUtf8,

    #[error("transposed array column value is not an array")]
    TransposedColumnNotArray,

    #[error("JSON-literal payload is not text")]
    JsonLiteralNotText,

    #[error("JSON-literal payload did not parse: {0}")]
    JsonLiteralInvalid(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("long double float values are not supported")]
    NotImplementedLongDouble,

    #[error("container nesting exceeds the maximum supported depth ({max_depth})")]
    MaxDepthExceeded { max_depth: usize },

    #[error("value kind has no JKSN encoding")]
    UnsupportedValueKind,
}

#[test]
fn test_error() {
    let _err = err("test error");
}

#[test]
fn test_error_kind_converts() {
    let _err: Error = ErrorKind::PrematureEof.into();
}
