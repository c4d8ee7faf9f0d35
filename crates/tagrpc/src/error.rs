//! # Error Definitions
//!
//! Failures are split by where they happen, because only some of them are
//! worth another attempt:
//!
//! - **Transport**: the bytes never made the round trip. Retried on
//!   idempotent calls.
//! - **Codec** / **Protocol**: the bytes arrived but do not parse, or parse
//!   into something that is not a response.
//! - **Remote**: the callee ran and reported failure.
//! - **Panic**: a handler, filter or method panicked and was caught.

use std::fmt;

/// Errors at the byte-moving layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer dropped the connection or it could not be established.
    ConnectionLost(String),
    /// No response arrived within the call timeout.
    Timeout,
    /// The peer refused the connection.
    Refused(String),
    /// Generic I/O failure.
    Io(String),
    /// A frame exceeded the configured size limit.
    PayloadTooLarge(usize),
    /// No transport is registered for the endpoint's scheme.
    UnknownScheme(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Timeout => write!(f, "request timed out"),
            Self::Refused(addr) => write!(f, "connection refused: {}", addr),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
            Self::PayloadTooLarge(len) => write!(f, "payload of {} bytes is too large", len),
            Self::UnknownScheme(uri) => write!(f, "no transport for endpoint {}", uri),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::Refused(e.to_string()),
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionLost(e.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    Transport(TransportError),
    Codec(tagpack::Error),
    /// Well-formed bytes that are not a valid response.
    Protocol { message: String, payload: Vec<u8> },
    /// The remote method reported an error.
    Remote(String),
    Panic { message: String, backtrace: String },
    MethodNotFound(String),
    Promise(pledge::Error),
    Config(String),
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>, payload: &[u8]) -> Self {
        Error::Protocol {
            message: message.into(),
            payload: payload.to_vec(),
        }
    }

    /// Converts a caught panic payload, capturing a backtrace here.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        pledge::Error::from_panic(payload).into()
    }

    /// Only transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport failure: {}", e),
            Error::Codec(e) => write!(f, "codec error: {}", e),
            Error::Protocol { message, payload } => write!(
                f,
                "wrong response: {}\r\n{}",
                message,
                String::from_utf8_lossy(payload)
            ),
            Error::Remote(msg) => write!(f, "{}", msg),
            Error::Panic { message, .. } => write!(f, "panic: {}", message),
            Error::MethodNotFound(name) => write!(f, "can't find this method {}", name),
            Error::Promise(e) => write!(f, "{}", e),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Codec(e) => Some(e),
            Error::Promise(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<tagpack::Error> for Error {
    fn from(e: tagpack::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<pledge::Error> for Error {
    fn from(e: pledge::Error) -> Self {
        // Unwrap our own errors that made a round trip through a promise.
        if let Some(inner) = e.downcast_ref::<Error>() {
            return inner.clone();
        }
        match e {
            pledge::Error::Panic { message, backtrace } => Self::Panic { message, backtrace },
            other => Self::Promise(other),
        }
    }
}

impl From<Error> for pledge::Error {
    fn from(e: Error) -> Self {
        pledge::Error::rejected(e)
    }
}

/// A specialized Result type for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;
