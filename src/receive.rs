//! Per-socket receive loop: framed read, decode, deliver.
//!
//! The loop runs on its own task. Each frame is decoded through the
//! registry; decoded messages go to the `message_received` callback.
//! A decode failure or I/O error reports through its callback and
//! disconnects the socket. The `closed` callback fires exactly once
//! when the loop terminates, however it terminates.

use std::sync::{Arc, Mutex};

use crate::codec::{AnyMessage, MessageRegistry};
use crate::error::WirebusError;
use crate::protocol::FrameReader;
use crate::sync::{CounterSignal, InterlockedBoolean, OnceSignal};
use crate::transport::Socket;

type MessageCallback = Arc<dyn Fn(AnyMessage) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(WirebusError) + Send + Sync>;
type ClosedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    message_received: Option<MessageCallback>,
    deserialization_error: Option<ErrorCallback>,
    socket_error: Option<ErrorCallback>,
    closed: Option<ClosedCallback>,
}

struct LoopInner {
    socket: Arc<dyn Socket>,
    registry: Arc<MessageRegistry>,
    callbacks: Mutex<Callbacks>,
    started: InterlockedBoolean,
    stop: OnceSignal,
    stopped: CounterSignal,
}

/// Continuous decode-and-deliver consumer for one socket.
///
/// Callbacks are registered before `start`; they are invoked without any
/// internal lock held.
#[derive(Clone)]
pub struct ReceiveLoop {
    inner: Arc<LoopInner>,
}

impl ReceiveLoop {
    /// Create a loop over the socket. Nothing runs until [`start`](Self::start).
    pub fn new(socket: Arc<dyn Socket>, registry: Arc<MessageRegistry>) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                socket,
                registry,
                callbacks: Mutex::new(Callbacks::default()),
                started: InterlockedBoolean::new(),
                stop: OnceSignal::new(),
                stopped: CounterSignal::new(1),
            }),
        }
    }

    /// Register the decoded-message callback.
    pub fn on_message(&self, callback: impl Fn(AnyMessage) + Send + Sync + 'static) -> &Self {
        self.callbacks().message_received = Some(Arc::new(callback));
        self
    }

    /// Register the deserialization-failure callback.
    pub fn on_deserialization_error(
        &self,
        callback: impl Fn(WirebusError) + Send + Sync + 'static,
    ) -> &Self {
        self.callbacks().deserialization_error = Some(Arc::new(callback));
        self
    }

    /// Register the socket-failure callback.
    pub fn on_socket_error(
        &self,
        callback: impl Fn(WirebusError) + Send + Sync + 'static,
    ) -> &Self {
        self.callbacks().socket_error = Some(Arc::new(callback));
        self
    }

    /// Register the termination callback. Fires exactly once.
    pub fn on_closed(&self, callback: impl Fn() + Send + Sync + 'static) -> &Self {
        self.callbacks().closed = Some(Arc::new(callback));
        self
    }

    /// Spawn the loop task. Subsequent calls are no-ops.
    pub fn start(&self) {
        if self.inner.started.set() {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(run(inner));
    }

    /// Request termination. The loop exits at its next suspension point.
    /// Does not disconnect the socket by itself.
    pub fn stop(&self) {
        self.inner.stop.trigger();
    }

    /// Wait until the loop task has exited. A loop that was never
    /// started only stops after `stop`.
    pub async fn wait_stopped(&self) {
        if !self.inner.started.get() {
            self.inner.stop.wait().await;
            return;
        }
        self.inner.stopped.wait().await;
    }

    /// The socket this loop consumes.
    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.inner.socket
    }

    fn callbacks(&self) -> std::sync::MutexGuard<'_, Callbacks> {
        self.inner.callbacks.lock().expect("callback lock poisoned")
    }
}

async fn run(inner: Arc<LoopInner>) {
    let mut reader = FrameReader::new(inner.socket.clone());

    loop {
        let frame = tokio::select! {
            _ = inner.stop.wait() => break,
            received = reader.receive() => match received {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(endpoint = %inner.socket.endpoint(), "receive loop failed: {e}");
                    emit_error(&inner, ErrorKind::Socket, e);
                    inner.socket.disconnect();
                    break;
                }
            },
        };

        match inner.registry.decode_frame(&frame) {
            Ok(message) => {
                let callback = inner
                    .callbacks
                    .lock()
                    .expect("callback lock poisoned")
                    .message_received
                    .clone();
                if let Some(callback) = callback {
                    callback(message);
                }
            }
            Err(e) => {
                tracing::error!(
                    type_id = frame.type_id(),
                    "dropping connection on undecodable frame: {e}"
                );
                emit_error(&inner, ErrorKind::Deserialization, e);
                inner.socket.disconnect();
                break;
            }
        }
    }

    let closed = inner
        .callbacks
        .lock()
        .expect("callback lock poisoned")
        .closed
        .clone();
    if let Some(closed) = closed {
        closed();
    }
    inner.stopped.increment();
}

enum ErrorKind {
    Socket,
    Deserialization,
}

fn emit_error(inner: &Arc<LoopInner>, kind: ErrorKind, error: WirebusError) {
    let callback = {
        let callbacks = inner.callbacks.lock().expect("callback lock poisoned");
        match kind {
            ErrorKind::Socket => callbacks.socket_error.clone(),
            ErrorKind::Deserialization => callbacks.deserialization_error.clone(),
        }
    };
    if let Some(callback) = callback {
        callback(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_message, Routable};
    use crate::endpoint::Endpoint;
    use crate::protocol::{write_frame, MessageFrame};
    use crate::transport;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Probe {
        n: u32,
    }

    impl Routable for Probe {
        const TYPE_ID: u16 = 21;
    }

    fn registry() -> Arc<MessageRegistry> {
        let mut registry = MessageRegistry::new();
        registry.register::<Probe>();
        Arc::new(registry)
    }

    async fn socket_pair(path: &str) -> (Arc<dyn Socket>, Arc<dyn Socket>) {
        let endpoint = Endpoint::inproc(path);
        let acceptor = transport::bind(&endpoint).await.unwrap();
        let client = transport::connect(&endpoint).await.unwrap();
        let server = acceptor.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_delivers_decoded_messages() {
        let (client, server) = socket_pair("/receive-deliver").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let rloop = ReceiveLoop::new(server, registry());
        rloop.on_message(move |m| {
            let _ = tx.send(m);
        });
        rloop.start();

        let frame = encode_message(&Probe { n: 7 }).unwrap();
        write_frame(client.as_ref(), &frame).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("message should arrive")
            .unwrap();
        assert_eq!(message.downcast::<Probe>().unwrap().n, 7);
    }

    #[tokio::test]
    async fn test_unknown_type_disconnects_with_error() {
        let (client, server) = socket_pair("/receive-unknown").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let rloop = ReceiveLoop::new(server.clone(), registry());
        rloop.on_deserialization_error(move |e| {
            let _ = tx.send(e.to_string());
        });
        rloop.start();

        write_frame(client.as_ref(), &MessageFrame::from_slice(999, b"junk"))
            .await
            .unwrap();

        let error = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("error should surface")
            .unwrap();
        assert!(error.contains("999"));

        tokio::time::timeout(Duration::from_secs(1), server.wait_disconnected())
            .await
            .expect("socket should be disconnected");
    }

    #[tokio::test]
    async fn test_closed_fires_once_on_peer_disconnect() {
        let (client, server) = socket_pair("/receive-closed").await;

        let closed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let rloop = ReceiveLoop::new(server, registry());
        {
            let closed = closed.clone();
            rloop.on_closed(move || {
                closed.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
            });
        }
        rloop.start();

        client.disconnect();
        rloop.wait_stopped().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(closed.load(std::sync::atomic::Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_stop_terminates_loop() {
        let (_client, server) = socket_pair("/receive-stop").await;

        let rloop = ReceiveLoop::new(server, registry());
        rloop.start();
        rloop.stop();
        tokio::time::timeout(Duration::from_secs(1), rloop.wait_stopped())
            .await
            .expect("loop should stop");
    }
}
