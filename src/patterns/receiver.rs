//! Shared connect-and-receive core for the event-driven client actors.
//!
//! [`Subscriber`](super::Subscriber) and
//! [`ServiceQueueReader`](super::ServiceQueueReader) are the same
//! machine: connect a socket, run a receive loop, surface decoded
//! messages through a callback, and support disconnect-then-reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::codec::{AnyMessage, MessageRegistry};
use crate::endpoint::Endpoint;
use crate::error::{Result, WirebusError};
use crate::receive::ReceiveLoop;
use crate::transport::{self, Socket};

type MessageCallback = Arc<dyn Fn(AnyMessage) + Send + Sync>;

struct Session {
    generation: u64,
    socket: Arc<dyn Socket>,
    receive_loop: ReceiveLoop,
}

pub(crate) struct ReceiverCore {
    registry: Arc<MessageRegistry>,
    on_message: Mutex<Option<MessageCallback>>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

impl ReceiverCore {
    pub fn new(registry: Arc<MessageRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            on_message: Mutex::new(None),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn set_on_message(&self, callback: impl Fn(AnyMessage) + Send + Sync + 'static) {
        *self.on_message.lock().expect("callback lock poisoned") = Some(Arc::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().expect("session lock poisoned").is_some()
    }

    pub async fn connect(self: Arc<Self>, endpoint: &Endpoint) -> Result<()> {
        if self.is_connected() {
            return Err(WirebusError::AlreadyConnected);
        }

        let socket = transport::connect(endpoint).await?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel);

        let receive_loop = ReceiveLoop::new(socket.clone(), self.registry.clone());
        if let Some(callback) = self
            .on_message
            .lock()
            .expect("callback lock poisoned")
            .clone()
        {
            receive_loop.on_message(move |message| callback(message));
        }

        // A remote close ends the session so the caller may reconnect.
        let weak: Weak<Self> = Arc::downgrade(&self);
        receive_loop.on_closed(move || {
            if let Some(core) = weak.upgrade() {
                core.clear_session(generation);
            }
        });

        let mut session = self.session.lock().expect("session lock poisoned");
        if session.is_some() {
            socket.disconnect();
            return Err(WirebusError::AlreadyConnected);
        }
        receive_loop.start();
        *session = Some(Session {
            generation,
            socket,
            receive_loop,
        });
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .expect("session lock poisoned")
            .take()
            .ok_or(WirebusError::NotConnected)?;

        session.receive_loop.stop();
        session.socket.disconnect();
        session.receive_loop.wait_stopped().await;
        Ok(())
    }

    fn clear_session(&self, generation: u64) {
        let mut session = self.session.lock().expect("session lock poisoned");
        if let Some(current) = session.as_ref() {
            if current.generation == generation {
                current.socket.disconnect();
                *session = None;
            }
        }
    }
}

impl Drop for ReceiverCore {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.lock() {
            if let Some(session) = session.take() {
                session.receive_loop.stop();
                session.socket.disconnect();
            }
        }
    }
}
