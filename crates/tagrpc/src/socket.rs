//! # Socket Transport
//!
//! Length-prefixed frames over TCP.
//!
//! ```text
//! half duplex   [len: u32 be] [payload]
//! full duplex   [len | 0x8000_0000: u32 be] [id: u32 be] [payload]
//! ```
//!
//! Half-duplex connections carry one request at a time and are pooled per
//! endpoint; checkout waits while every connection is busy. A full-duplex
//! connection is shared by all calls to an endpoint and responses are
//! matched to requests by id, in whatever order they arrive.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Semaphore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::service::Service;
use crate::settings::SocketOptions;
use crate::transport::Transport;
use crate::transport::TransportResult;

/// Set in the length word when a request id follows.
pub const DUPLEX_FLAG: u32 = 0x8000_0000;
const LENGTH_MASK: u32 = 0x7fff_ffff;

// ============================================================================
//  FRAMING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Present on full-duplex connections.
    pub id: Option<u32>,
    pub payload: Vec<u8>,
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> TransportResult<()> {
    let len = frame.payload.len();
    if len > LENGTH_MASK as usize {
        return Err(TransportError::PayloadTooLarge(len));
    }
    let mut header = Vec::with_capacity(8);
    match frame.id {
        Some(id) => {
            header.extend_from_slice(&(len as u32 | DUPLEX_FLAG).to_be_bytes());
            header.extend_from_slice(&id.to_be_bytes());
        }
        None => header.extend_from_slice(&(len as u32).to_be_bytes()),
    }
    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `None` means the peer closed the stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> TransportResult<Option<Frame>> {
    let mut word = [0u8; 4];
    match reader.read_exact(&mut word).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let word = u32::from_be_bytes(word);
    let len = (word & LENGTH_MASK) as usize;
    let id = if word & DUPLEX_FLAG != 0 {
        let mut id = [0u8; 4];
        reader.read_exact(&mut id).await?;
        Some(u32::from_be_bytes(id))
    } else {
        None
    };
    if len > max_frame_size {
        return Err(TransportError::PayloadTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Frame { id, payload }))
}

/// Accepts `tcp://host:port` (also `tcp4`, `tcp6`) or a bare `host:port`.
pub fn parse_address(uri: &str) -> TransportResult<String> {
    match uri.split_once("://") {
        Some(("tcp" | "tcp4" | "tcp6", addr)) => Ok(addr.trim_end_matches('/').to_string()),
        Some(_) => Err(TransportError::UnknownScheme(uri.to_string())),
        None => Ok(uri.to_string()),
    }
}

async fn connect(addr: &str, timeout: Duration) -> TransportResult<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout)??;
    stream.set_nodelay(true)?;
    tracing::debug!(%addr, "connected");
    Ok(stream)
}

// ============================================================================
//  HALF DUPLEX POOL
// ============================================================================

struct Pool {
    addr: String,
    idle: Mutex<Vec<TcpStream>>,
    permits: Semaphore,
}

impl Pool {
    fn new(addr: &str, max_connections: usize) -> Self {
        Self {
            addr: addr.to_string(),
            idle: Mutex::new(Vec::new()),
            permits: Semaphore::new(max_connections.max(1)),
        }
    }

    async fn round_trip(&self, request: Vec<u8>, options: &SocketOptions) -> TransportResult<Vec<u8>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportError::ConnectionLost("connection pool closed".into()))?;
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut stream = match idle {
            Some(stream) => stream,
            None => connect(&self.addr, options.connect_timeout).await?,
        };
        write_frame(&mut stream, &Frame { id: None, payload: request }).await?;
        match read_frame(&mut stream, options.max_frame_size).await? {
            Some(frame) => {
                self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(stream);
                Ok(frame.payload)
            }
            None => Err(TransportError::ConnectionLost(format!("{} closed the connection", self.addr))),
        }
    }
}

// ============================================================================
//  FULL DUPLEX CONNECTION
// ============================================================================

type Pending = DashMap<u32, oneshot::Sender<TransportResult<Vec<u8>>>>;

struct Duplex {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Arc<Pending>,
    next_id: AtomicU32,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// Drops the pending entry when the caller stops waiting.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl Duplex {
    async fn open(addr: &str, options: &SocketOptions) -> TransportResult<Self> {
        let stream = connect(addr, options.connect_timeout).await?;
        let (read_half, write_half) = stream.into_split();
        let pending = Arc::new(Pending::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            read_half,
            pending.clone(),
            closed.clone(),
            options.max_frame_size,
        ));
        Ok(Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            next_id: AtomicU32::new(0),
            closed,
            reader,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn round_trip(&self, request: Vec<u8>) -> TransportResult<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) & LENGTH_MASK;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard { pending: &self.pending, id };
        // The reader marks the connection closed before failing what is
        // pending, so an entry inserted after that is caught here.
        if self.is_closed() {
            return Err(TransportError::ConnectionLost("connection closed".into()));
        }
        {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &Frame { id: Some(id), payload: request }).await?;
        }
        rx.await
            .map_err(|_| TransportError::ConnectionLost("connection closed".into()))?
    }
}

impl Drop for Duplex {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_responses(
    mut reader: OwnedReadHalf,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    max_frame_size: usize,
) {
    let reason = loop {
        match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(Frame { id: Some(id), payload })) => match pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(Ok(payload));
                }
                None => tracing::warn!(id, "response for unknown or abandoned request"),
            },
            Ok(Some(Frame { id: None, .. })) => {
                break TransportError::Io("half-duplex frame on a full-duplex connection".into());
            }
            Ok(None) => break TransportError::ConnectionLost("peer closed the connection".into()),
            Err(e) => break e,
        }
    };
    closed.store(true, Ordering::SeqCst);
    tracing::debug!(error = %reason, "full-duplex reader stopped");
    let ids: Vec<u32> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(reason.clone()));
        }
    }
}

// ============================================================================
//  CLIENT TRANSPORT
// ============================================================================

pub struct SocketTransport {
    options: SocketOptions,
    pools: DashMap<String, Arc<Pool>>,
    duplex: tokio::sync::Mutex<HashMap<String, Arc<Duplex>>>,
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new(SocketOptions::default())
    }
}

impl SocketTransport {
    pub fn new(options: SocketOptions) -> Self {
        Self {
            options,
            pools: DashMap::new(),
            duplex: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn pool(&self, addr: &str) -> Arc<Pool> {
        self.pools
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(Pool::new(addr, self.options.max_connections)))
            .value()
            .clone()
    }

    async fn duplex(&self, addr: &str) -> TransportResult<Arc<Duplex>> {
        let mut connections = self.duplex.lock().await;
        if let Some(conn) = connections.get(addr) {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
        }
        let conn = Arc::new(Duplex::open(addr, &self.options).await?);
        connections.insert(addr.to_string(), conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn send_and_receive(&self, uri: &str, request: Vec<u8>) -> TransportResult<Vec<u8>> {
        let addr = parse_address(uri)?;
        if request.len() > self.options.max_frame_size {
            return Err(TransportError::PayloadTooLarge(request.len()));
        }
        if self.options.full_duplex {
            self.duplex(&addr).await?.round_trip(request).await
        } else {
            self.pool(&addr).round_trip(request, &self.options).await
        }
    }
}

// ============================================================================
//  SERVER
// ============================================================================

/// Serves a [`Service`] over TCP. Each connection may speak either
/// framing; full-duplex requests are handled concurrently.
pub struct SocketServer {
    listener: TcpListener,
    service: Arc<Service>,
    max_frame_size: usize,
}

impl SocketServer {
    pub async fn bind(addr: &str, service: Arc<Service>) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service,
            max_frame_size: SocketOptions::default().max_frame_size,
        })
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> TransportResult<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!(%peer, "accepted connection");
            let service = self.service.clone();
            let max_frame_size = self.max_frame_size;
            tokio::spawn(async move {
                if let Err(error) = serve_connection(stream, service, max_frame_size).await {
                    tracing::warn!(%peer, %error, "connection failed");
                }
            });
        }
    }
}

async fn serve_connection(stream: TcpStream, service: Arc<Service>, max_frame_size: usize) -> TransportResult<()> {
    stream.set_nodelay(true)?;
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    while let Some(frame) = read_frame(&mut reader, max_frame_size).await? {
        match frame.id {
            Some(id) => {
                let service = service.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    let response = service.handle(frame.payload).await;
                    let mut writer = writer.lock().await;
                    let reply = Frame { id: Some(id), payload: response };
                    if let Err(error) = write_frame(&mut *writer, &reply).await {
                        tracing::warn!(id, %error, "failed to write response");
                    }
                });
            }
            None => {
                let response = service.handle(frame.payload).await;
                let mut writer = writer.lock().await;
                write_frame(&mut *writer, &Frame { id: None, payload: response }).await?;
            }
        }
    }
    Ok(())
}
