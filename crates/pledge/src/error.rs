//! # Rejection Reasons
//!
//! A rejected promise carries an `Error`. Every descendant of a chain may
//! observe the same reason, so errors are cheap to clone.

use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Error {
    /// An arbitrary error supplied by the code that rejected the promise.
    Rejected(Arc<dyn std::error::Error + Send + Sync>),
    /// The promise did not settle in time.
    Timeout,
    /// A promise was resolved with itself.
    SelfResolution,
    /// `any` was given no promises.
    EmptyIterable,
    /// Every promise given to `any` rejected. Reasons are in input order.
    AllRejected(Vec<Error>),
    /// A continuation panicked.
    Panic { message: String, backtrace: String },
    Message(String),
}

impl Error {
    pub fn rejected<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Error::Rejected(Arc::new(err))
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Error::Message(msg.into())
    }

    /// Converts a caught panic payload, capturing a backtrace at the catch
    /// site (subject to `RUST_BACKTRACE`).
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::Panic {
            message,
            backtrace: Backtrace::capture().to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Looks through `Rejected` for an error of a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Rejected(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Rejected(inner) => write!(f, "{}", inner),
            Error::Timeout => write!(f, "timeout"),
            Error::SelfResolution => write!(f, "self resolution"),
            Error::EmptyIterable => write!(f, "any(): empty iterable"),
            Error::AllRejected(reasons) => {
                write!(f, "all promises rejected")?;
                for (i, reason) in reasons.iter().enumerate() {
                    write!(f, "{} {}", if i == 0 { ":" } else { ";" }, reason)?;
                }
                Ok(())
            }
            Error::Panic { message, .. } => write!(f, "panic: {}", message),
            Error::Message(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Rejected(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` for promise outcomes.
pub type Result<T> = std::result::Result<T, Error>;
