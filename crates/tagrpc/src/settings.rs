//! # Configuration
//!
//! Plain option structs with defaults. Per-call [`InvokeSettings`] override
//! the client's [`ClientOptions`] field by field; anything left `None`
//! falls back to the client.

use std::time::Duration;

/// How the client hands a successful response back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// Decode the result into a value.
    #[default]
    Normal,
    /// Return the encoded result value as bytes, undecoded.
    Serialized,
    /// Return the whole response without its end tag.
    Raw,
    /// Return the whole response, end tag included.
    RawWithEndTag,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Endpoints, shuffled once when the client is built.
    pub uris: Vec<String>,
    pub timeout: Duration,
    /// Attempts after the first, for idempotent calls.
    pub retry: usize,
    pub idempotent: bool,
    /// Rotate to the next endpoint after a transport failure.
    pub failswitch: bool,
    pub byref: bool,
    pub simple: bool,
    pub oneway: bool,
    pub mode: ResultMode,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            uris: Vec::new(),
            timeout: Duration::from_secs(30),
            retry: 10,
            idempotent: false,
            failswitch: false,
            byref: false,
            simple: false,
            oneway: false,
            mode: ResultMode::Normal,
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct InvokeSettings {
    pub timeout: Option<Duration>,
    pub retry: Option<usize>,
    pub idempotent: Option<bool>,
    pub failswitch: Option<bool>,
    pub byref: Option<bool>,
    pub simple: Option<bool>,
    pub oneway: Option<bool>,
    pub mode: Option<ResultMode>,
}

impl InvokeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: usize) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn failswitch(mut self, failswitch: bool) -> Self {
        self.failswitch = Some(failswitch);
        self
    }

    pub fn byref(mut self, byref: bool) -> Self {
        self.byref = Some(byref);
        self
    }

    pub fn simple(mut self, simple: bool) -> Self {
        self.simple = Some(simple);
        self
    }

    pub fn oneway(mut self, oneway: bool) -> Self {
        self.oneway = Some(oneway);
        self
    }

    pub fn mode(mut self, mode: ResultMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// How a service runs and answers one method.
#[derive(Debug, Clone)]
pub struct MethodOptions {
    pub mode: ResultMode,
    /// Encode the result without back references.
    pub simple: bool,
    /// Answer immediately with a null result and run the method detached.
    pub oneway: bool,
    /// Echo (possibly modified) arguments when the caller asks for it.
    pub byref: bool,
    /// Published as `namespace_name`.
    pub namespace: Option<String>,
}

impl Default for MethodOptions {
    fn default() -> Self {
        Self {
            mode: ResultMode::Normal,
            simple: false,
            oneway: false,
            byref: true,
            namespace: None,
        }
    }
}

impl MethodOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: ResultMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn simple(mut self, simple: bool) -> Self {
        self.simple = simple;
        self
    }

    pub fn oneway(mut self, oneway: bool) -> Self {
        self.oneway = oneway;
        self
    }

    pub fn byref(mut self, byref: bool) -> Self {
        self.byref = byref;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Connection handling for the socket transport.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Connections per endpoint; checkout waits once all are busy.
    pub max_connections: usize,
    /// Multiplex requests over one connection, correlated by request id.
    pub full_duplex: bool,
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            full_duplex: false,
            connect_timeout: Duration::from_secs(10),
            max_frame_size: 64 * 1024 * 1024,
        }
    }
}
