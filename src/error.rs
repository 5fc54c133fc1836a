use thiserror::Error;

/// The error taxonomy for this crate.
///
/// `Eof` deliberately has no member here: reaching end of input is a normal,
/// expected outcome of a streaming parser and is reported through
/// [`crate::input_stream::PeekResult`] instead of through `Result::Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// The destination buffer was exhausted; retry with more room.
    #[error("destination buffer exhausted")]
    NoMem,

    /// A caller-supplied parameter was invalid (empty label, zero-length
    /// buffer where one is required, etc).
    #[error("invalid parameter: {0}")]
    BadParm(String),

    /// The input contains an ill-formed (decode) or unrepresentable
    /// (encode) sequence and the active [`crate::codec::ErrorMode`] is
    /// `Strict`.
    #[error("invalid byte sequence")]
    Invalid,

    /// The alias file could not be found or read.
    #[error("alias file not found: {0}")]
    FileNotFound(#[from] std::io::Error),

    /// The input ends mid-sequence; more bytes are needed before progress
    /// can resume.
    #[error("incomplete sequence, more data needed")]
    NeedData,

    /// The requested encoding name does not canonicalize, or no registered
    /// codec claims the canonicalized name.
    #[error("unknown or unsupported encoding: {0}")]
    BadEncoding(String),
}
