//! Requester: one-at-a-time request/response over a single socket.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use crate::codec::{encode_message, AnyMessage, MessageRegistry, Routable};
use crate::endpoint::Endpoint;
use crate::error::{Result, WirebusError};
use crate::protocol::{write_frame, FrameReader};
use crate::sync::{CounterSignal, OnceSignal};
use crate::transport::{self, Socket};

struct RequesterSession {
    socket: Arc<dyn Socket>,
    /// Serializes requests: one in flight at a time. A request holds
    /// this lock for its whole exchange, so `try_lock` doubles as the
    /// in-flight probe during disconnect.
    reader: Mutex<FrameReader>,
    cancel: OnceSignal,
    stopped: CounterSignal,
}

/// Settles the stopped latch when a cancelled request unwinds, even if
/// the request future itself is dropped rather than polled to an error.
struct InFlightGuard<'a> {
    session: &'a RequesterSession,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.session.cancel.is_set() {
            self.session.stopped.increment();
        }
    }
}

/// Requesting end of the request/response pattern.
///
/// `request` writes one frame and awaits exactly one response frame,
/// decoded through the registry. Dropping the returned future cancels
/// the exchange at its next suspension point.
pub struct Requester {
    registry: Arc<MessageRegistry>,
    session: StdMutex<Option<Arc<RequesterSession>>>,
}

impl Requester {
    /// Create a requester decoding responses through the registry.
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            session: StdMutex::new(None),
        }
    }

    /// Connect to a bound responder endpoint.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        if self.current().is_some() {
            return Err(WirebusError::AlreadyConnected);
        }

        let socket = transport::connect(endpoint).await?;
        let session = Arc::new(RequesterSession {
            socket: socket.clone(),
            reader: Mutex::new(FrameReader::new(socket.clone())),
            cancel: OnceSignal::new(),
            stopped: CounterSignal::new(1),
        });

        let mut slot = self.session.lock().expect("session lock poisoned");
        if slot.is_some() {
            socket.disconnect();
            return Err(WirebusError::AlreadyConnected);
        }
        *slot = Some(session);
        Ok(())
    }

    /// Send a request and await its response.
    ///
    /// # Errors
    ///
    /// Fails when not connected, on transport failure, when the response
    /// cannot be decoded, or with [`WirebusError::Cancelled`] when
    /// `disconnect` interrupts the exchange.
    pub async fn request<T: Routable>(&self, message: &T) -> Result<AnyMessage> {
        let session = self.current().ok_or(WirebusError::NotConnected)?;
        let frame = encode_message(message)?;

        let mut reader = session.reader.lock().await;
        let _in_flight = InFlightGuard { session: &session };

        let exchange = async {
            write_frame(session.socket.as_ref(), &frame).await?;
            match reader.receive().await? {
                Some(response) => self.registry.decode_frame(&response),
                None => Err(WirebusError::ConnectionClosed),
            }
        };

        tokio::select! {
            _ = session.cancel.wait() => Err(WirebusError::Cancelled),
            result = exchange => result,
        }
    }

    /// Close the connection.
    ///
    /// With `wait_for_exit`, an in-flight request is cancelled and the
    /// call waits for it to unwind before disconnecting the socket. An
    /// idle disconnect does not wait.
    pub async fn disconnect(&self, wait_for_exit: bool) -> Result<()> {
        let session = self
            .session
            .lock()
            .expect("session lock poisoned")
            .take()
            .ok_or(WirebusError::NotConnected)?;

        session.cancel.trigger();
        if wait_for_exit && session.reader.try_lock().is_err() {
            session.stopped.wait().await;
        }
        session.socket.disconnect();
        Ok(())
    }

    /// Whether a live connection exists.
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<RequesterSession>> {
        self.session.lock().expect("session lock poisoned").clone()
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.session.lock() {
            if let Some(session) = slot.take() {
                session.cancel.trigger();
                session.socket.disconnect();
            }
        }
    }
}
