//! Core error types for the tagpack format

use crate::tags;

/// Encoding and decoding failures.
///
/// All of these are local and final: a caller that sees one should discard
/// the buffer it was working on.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The stream ended before the current unit was complete.
    UnexpectedEnd,
    /// A structural byte was not what the grammar requires at this point.
    InvalidTag { found: u8, expected: &'static str },
    /// The tag is well formed but cannot be read into the requested target.
    CastTag { tag: u8, target: &'static str },
    /// A materialized value cannot be converted into the requested target.
    CastValue { kind: &'static str, target: &'static str },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A reference tag named an index the reader never registered.
    UnresolvedRef(usize),
    /// An object named a class index that was never defined.
    UnknownClass(usize),
    /// A number does not fit the requested target.
    NumberOutOfRange { value: String, target: &'static str },
    /// Bytes that parse as tags but break the grammar (bad counts, dates, ...).
    Malformed(String),
    /// Attempted to write a value the format cannot carry.
    Unsupported(String),
    /// The nested depth of the value exceeded the safety limit.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "unexpected end of stream"),
            Error::InvalidTag { found, expected } => {
                write!(f, "invalid tag {}, expected {}", tags::describe(*found), expected)
            }
            Error::CastTag { tag, target } => {
                write!(f, "cannot cast tag {} to type {}", tags::describe(*tag), target)
            }
            Error::CastValue { kind, target } => {
                write!(f, "cannot convert {} to type {}", kind, target)
            }
            Error::InvalidUtf8 => write!(f, "invalid utf-8 in string data"),
            Error::UnresolvedRef(index) => write!(f, "unresolved reference index {}", index),
            Error::UnknownClass(index) => write!(f, "unknown class index {}", index),
            Error::NumberOutOfRange { value, target } => {
                write!(f, "number {} out of range for {}", value, target)
            }
            Error::Malformed(msg) => write!(f, "malformed data: {}", msg),
            Error::Unsupported(msg) => write!(f, "unsupported value: {}", msg),
            Error::RecursionLimitExceeded => write!(f, "recursion limit exceeded"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for tagpack operations.
pub type Result<T> = std::result::Result<T, Error>;
