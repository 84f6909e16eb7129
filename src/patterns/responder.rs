//! Responder: serves requests through work units on a thread pool.
//!
//! For each accepted socket the responder registers an outbound queue
//! with its queue processor and starts a receive loop; the triple is
//! registered atomically and torn down if the socket disconnected while
//! registration ran. Each decoded request becomes a work unit via the
//! injected factory; the unit's response frame is enqueued to the
//! originating client's queue in completion order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;

use crate::codec::MessageRegistry;
use crate::endpoint::Endpoint;
use crate::error::{Result, WirebusError};
use crate::queue::{MessageQueue, QueueProcessor};
use crate::receive::ReceiveLoop;
use crate::scheduler::{SchedulerConfig, WorkScheduler, WorkUnitFactory};
use crate::sync::OnceSignal;
use crate::transport::{self, Acceptor, Socket};

type ClientCallback = Arc<dyn Fn(Endpoint) + Send + Sync>;

struct ClientHandle {
    socket: Arc<dyn Socket>,
    queue: Arc<MessageQueue>,
    receive_loop: ReceiveLoop,
}

struct AcceptorEntry {
    acceptor: Arc<dyn Acceptor>,
    _task: JoinHandle<()>,
}

#[derive(Default)]
struct Callbacks {
    client_connected: Option<ClientCallback>,
    client_disconnected: Option<ClientCallback>,
}

struct ResponderShared {
    registry: Arc<MessageRegistry>,
    factory: Arc<dyn WorkUnitFactory>,
    scheduler: WorkScheduler,
    processor: QueueProcessor,
    acceptors: Mutex<HashMap<Endpoint, AcceptorEntry>>,
    clients: Mutex<Vec<ClientHandle>>,
    callbacks: Mutex<Callbacks>,
    stop: OnceSignal,
}

/// Responding end of the request/response pattern.
pub struct Responder {
    shared: Arc<ResponderShared>,
}

impl Responder {
    /// Create a responder with the given work-unit factory and thread
    /// pool bounds.
    ///
    /// # Errors
    ///
    /// Fails on invalid pool bounds.
    pub fn new(
        registry: Arc<MessageRegistry>,
        factory: impl WorkUnitFactory,
        min_threads: usize,
        max_threads: usize,
    ) -> Result<Self> {
        let scheduler = WorkScheduler::new(SchedulerConfig::bounded(min_threads, max_threads))?;
        Ok(Self {
            shared: Arc::new(ResponderShared {
                registry,
                factory: Arc::new(factory),
                scheduler,
                processor: QueueProcessor::new(),
                acceptors: Mutex::new(HashMap::new()),
                clients: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Callbacks::default()),
                stop: OnceSignal::new(),
            }),
        })
    }

    /// Register the client-connected callback.
    pub fn on_client_connected(&self, callback: impl Fn(Endpoint) + Send + Sync + 'static) -> &Self {
        self.shared
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .client_connected = Some(Arc::new(callback));
        self
    }

    /// Register the client-disconnected callback.
    pub fn on_client_disconnected(
        &self,
        callback: impl Fn(Endpoint) + Send + Sync + 'static,
    ) -> &Self {
        self.shared
            .callbacks
            .lock()
            .expect("callback lock poisoned")
            .client_disconnected = Some(Arc::new(callback));
        self
    }

    /// Install an acceptor on the endpoint.
    pub async fn bind(&self, endpoint: &Endpoint) -> Result<()> {
        if self.shared.stop.is_set() {
            return Err(WirebusError::ConnectionClosed);
        }
        {
            let acceptors = self.shared.acceptors.lock().expect("acceptor map poisoned");
            if acceptors.contains_key(endpoint) {
                return Err(WirebusError::AlreadyBound);
            }
        }

        let acceptor = transport::bind(endpoint).await?;
        let task = tokio::spawn(accept_loop(self.shared.clone(), acceptor.clone()));

        let mut acceptors = self.shared.acceptors.lock().expect("acceptor map poisoned");
        if acceptors.contains_key(endpoint) {
            acceptor.close();
            task.abort();
            return Err(WirebusError::AlreadyBound);
        }
        acceptors.insert(
            endpoint.clone(),
            AcceptorEntry {
                acceptor,
                _task: task,
            },
        );
        tracing::debug!(endpoint = %endpoint, "responder bound");
        Ok(())
    }

    /// Remove the acceptor; connected clients stay.
    pub fn unbind(&self, endpoint: &Endpoint) -> Result<()> {
        let entry = self
            .shared
            .acceptors
            .lock()
            .expect("acceptor map poisoned")
            .remove(endpoint)
            .ok_or_else(|| {
                WirebusError::InvalidArgument(format!("endpoint {endpoint} is not bound"))
            })?;
        entry.acceptor.close();
        Ok(())
    }

    /// Currently connected clients.
    pub fn client_count(&self) -> usize {
        self.shared.clients.lock().expect("client set poisoned").len()
    }

    /// Tear down: close acceptors, drop clients, stop the scheduler and
    /// flush worker. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.stop.trigger() {
            return;
        }
        let acceptors: Vec<AcceptorEntry> = {
            let mut map = self.shared.acceptors.lock().expect("acceptor map poisoned");
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in acceptors {
            entry.acceptor.close();
        }
        let clients: Vec<ClientHandle> = {
            let mut set = self.shared.clients.lock().expect("client set poisoned");
            set.drain(..).collect()
        };
        for client in clients {
            client.receive_loop.stop();
            self.shared.processor.unregister(&client.queue);
            client.socket.disconnect();
        }
        self.shared.scheduler.shutdown();
        self.shared.processor.shutdown();
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(shared: Arc<ResponderShared>, acceptor: Arc<dyn Acceptor>) {
    loop {
        let socket = tokio::select! {
            _ = shared.stop.wait() => break,
            accepted = acceptor.accept() => match accepted {
                Ok(socket) => socket,
                Err(_) => break,
            },
        };
        attach_client(&shared, socket);
    }
}

fn attach_client(shared: &Arc<ResponderShared>, socket: Arc<dyn Socket>) {
    if shared.stop.is_set() {
        socket.disconnect();
        return;
    }

    let queue = shared.processor.register(socket.clone(), None);
    let receive_loop = ReceiveLoop::new(socket.clone(), shared.registry.clone());

    {
        let weak: Weak<ResponderShared> = Arc::downgrade(shared);
        let queue = queue.clone();
        receive_loop.on_message(move |request| {
            let Some(shared) = weak.upgrade() else { return };
            let unit = shared.factory.create(request);
            let queue = queue.clone();
            let submitted = shared.scheduler.execute(move || match unit.execute() {
                Ok(response) => queue.enqueue(response),
                Err(e) => tracing::warn!("work unit failed: {e}"),
            });
            if let Err(e) = submitted {
                tracing::debug!("dropping request, scheduler unavailable: {e}");
            }
        });
    }

    {
        let weak: Weak<ResponderShared> = Arc::downgrade(shared);
        let socket = socket.clone();
        receive_loop.on_closed(move || {
            if let Some(shared) = weak.upgrade() {
                detach_client(&shared, &socket);
            }
        });
    }

    receive_loop.start();
    shared
        .clients
        .lock()
        .expect("client set poisoned")
        .push(ClientHandle {
            socket: socket.clone(),
            queue,
            receive_loop,
        });

    // All-or-nothing: a socket that died mid-registration leaves no
    // half-wired triple behind.
    if socket.is_disconnected() {
        detach_client(shared, &socket);
        return;
    }

    tracing::debug!(endpoint = %socket.endpoint(), "client connected");
    let callback = shared
        .callbacks
        .lock()
        .expect("callback lock poisoned")
        .client_connected
        .clone();
    if let Some(callback) = callback {
        callback(socket.endpoint().clone());
    }
}

fn detach_client(shared: &Arc<ResponderShared>, socket: &Arc<dyn Socket>) {
    let removed: Vec<ClientHandle> = {
        let mut clients = shared.clients.lock().expect("client set poisoned");
        let mut kept = Vec::with_capacity(clients.len());
        let mut removed = Vec::new();
        for client in clients.drain(..) {
            if Arc::ptr_eq(&client.socket, socket) {
                removed.push(client);
            } else {
                kept.push(client);
            }
        }
        *clients = kept;
        removed
    };
    if removed.is_empty() {
        return;
    }

    for client in removed {
        client.receive_loop.stop();
        shared.processor.unregister(&client.queue);
    }
    socket.disconnect();
    tracing::debug!(endpoint = %socket.endpoint(), "client disconnected");

    let callback = shared
        .callbacks
        .lock()
        .expect("callback lock poisoned")
        .client_disconnected
        .clone();
    if let Some(callback) = callback {
        callback(socket.endpoint().clone());
    }
}
