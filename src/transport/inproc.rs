//! In-process transport: a zero-network loopback.
//!
//! A bound endpoint registers in a process-wide table. Connecting builds
//! two byte-queue streams, one per direction, and hands the server-side
//! socket to the acceptor. The byte-queue stream is an unbounded FIFO
//! with non-blocking writes and a read that waits until at least one
//! byte is available; closing it unblocks pending reads with a zero-byte
//! return, mirroring end of stream on a real socket.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};

use super::{Acceptor, DisconnectState, Socket};
use crate::endpoint::Endpoint;
use crate::error::{Result, WirebusError};

type ConnectSender = mpsc::UnboundedSender<Arc<InprocSocket>>;

static REGISTRY: OnceLock<StdMutex<HashMap<Endpoint, ConnectSender>>> = OnceLock::new();

fn registry() -> &'static StdMutex<HashMap<Endpoint, ConnectSender>> {
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// Unbounded byte FIFO shared between two socket ends.
struct ByteQueueStream {
    inner: StdMutex<StreamInner>,
    readable: Notify,
}

struct StreamInner {
    queue: VecDeque<u8>,
    closed: bool,
}

impl ByteQueueStream {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StdMutex::new(StreamInner {
                queue: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
        })
    }

    /// Append bytes; never blocks.
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().expect("stream lock poisoned");
        if inner.closed {
            return Err(WirebusError::ConnectionClosed);
        }
        inner.queue.extend(data);
        drop(inner);
        self.readable.notify_one();
        Ok(())
    }

    /// Read at least one byte, or 0 once the stream is closed and
    /// drained. Partial reads return as soon as any bytes are available.
    async fn read(&self, buf: &mut [u8]) -> usize {
        loop {
            let notified = self.readable.notified();
            {
                let mut inner = self.inner.lock().expect("stream lock poisoned");
                if !inner.queue.is_empty() {
                    let n = buf.len().min(inner.queue.len());
                    for (slot, byte) in buf.iter_mut().zip(inner.queue.drain(..n)) {
                        *slot = byte;
                    }
                    return n;
                }
                if inner.closed {
                    return 0;
                }
            }
            notified.await;
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock().expect("stream lock poisoned");
        inner.closed = true;
        drop(inner);
        self.readable.notify_waiters();
    }
}

/// One end of an in-process connection.
pub struct InprocSocket {
    endpoint: Endpoint,
    read_stream: Arc<ByteQueueStream>,
    write_stream: Arc<ByteQueueStream>,
    state: DisconnectState,
}

#[async_trait]
impl Socket for InprocSocket {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_disconnected(&self) -> bool {
        self.state.is_disconnected()
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.state.is_disconnected() {
            return Ok(0);
        }
        tokio::select! {
            _ = self.state.wait() => Ok(0),
            n = self.read_stream.read(buf) => Ok(n),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.state.is_disconnected() {
            return Err(WirebusError::ConnectionClosed);
        }
        self.write_stream.write(data)
    }

    fn disconnect(&self) {
        if self.state.trigger() {
            // Closing both directions unblocks the peer's pending reads
            // and fails its writes, the same observable sequence as a
            // stream socket teardown.
            self.read_stream.close();
            self.write_stream.close();
        }
    }

    async fn wait_disconnected(&self) {
        self.state.wait().await
    }
}

impl Drop for InprocSocket {
    fn drop(&mut self) {
        // A dropped TCP stream sends FIN; give the in-process peer the
        // same signal.
        if self.state.trigger() {
            self.read_stream.close();
            self.write_stream.close();
        }
    }
}

/// Acceptor for a bound in-process endpoint.
pub struct InprocAcceptor {
    endpoint: Endpoint,
    pending: Mutex<mpsc::UnboundedReceiver<Arc<InprocSocket>>>,
    closed: DisconnectState,
}

#[async_trait]
impl Acceptor for InprocAcceptor {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn accept(&self) -> Result<Arc<dyn Socket>> {
        if self.closed.is_disconnected() {
            return Err(WirebusError::ConnectionClosed);
        }
        tokio::select! {
            _ = self.closed.wait() => Err(WirebusError::ConnectionClosed),
            socket = async {
                let mut pending = self.pending.lock().await;
                pending.recv().await
            } => {
                let socket = socket.ok_or(WirebusError::ConnectionClosed)?;
                tracing::debug!(endpoint = %self.endpoint, "accepted inproc connection");
                Ok(socket as Arc<dyn Socket>)
            }
        }
    }

    fn close(&self) {
        if self.closed.trigger() {
            registry()
                .lock()
                .expect("inproc registry poisoned")
                .remove(&self.endpoint);
        }
    }
}

impl Drop for InprocAcceptor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bind an in-process endpoint. Fails if the path is already bound.
pub fn bind(endpoint: &Endpoint) -> Result<Arc<dyn Acceptor>> {
    let mut bound = registry().lock().expect("inproc registry poisoned");
    if bound.contains_key(endpoint) {
        return Err(WirebusError::AlreadyBound);
    }
    let (tx, rx) = mpsc::unbounded_channel();
    bound.insert(endpoint.clone(), tx);
    Ok(Arc::new(InprocAcceptor {
        endpoint: endpoint.clone(),
        pending: Mutex::new(rx),
        closed: DisconnectState::new(),
    }))
}

/// Connect to a bound in-process endpoint.
pub fn connect(endpoint: &Endpoint) -> Result<Arc<dyn Socket>> {
    let sender = registry()
        .lock()
        .expect("inproc registry poisoned")
        .get(endpoint)
        .cloned()
        .ok_or_else(|| {
            WirebusError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("no inproc listener at {endpoint}"),
            ))
        })?;

    let to_server = ByteQueueStream::new();
    let to_client = ByteQueueStream::new();

    let client = Arc::new(InprocSocket {
        endpoint: endpoint.clone(),
        read_stream: to_client.clone(),
        write_stream: to_server.clone(),
        state: DisconnectState::new(),
    });
    let server = Arc::new(InprocSocket {
        endpoint: endpoint.clone(),
        read_stream: to_server,
        write_stream: to_client,
        state: DisconnectState::new(),
    });

    sender.send(server).map_err(|_| {
        WirebusError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("inproc listener at {endpoint} is gone"),
        ))
    })?;

    Ok(client)
}
