//! Publisher: fan-out broadcast to every connected subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::codec::{encode_message, Routable};
use crate::endpoint::Endpoint;
use crate::error::{Result, WirebusError};
use crate::queue::{MessageQueue, QueueProcessor};
use crate::sync::OnceSignal;
use crate::transport::{self, watch_remote_close, Acceptor, Socket};

struct SubscriberBinding {
    seq: u64,
    socket: Arc<dyn Socket>,
    queue: Arc<MessageQueue>,
}

struct AcceptorEntry {
    acceptor: Arc<dyn Acceptor>,
    _task: JoinHandle<()>,
}

struct PublisherShared {
    processor: QueueProcessor,
    acceptors: Mutex<HashMap<Endpoint, AcceptorEntry>>,
    subscribers: Mutex<Vec<SubscriberBinding>>,
    next_seq: Mutex<u64>,
    stop: OnceSignal,
}

/// Broadcasting end of the publish/subscribe pattern.
///
/// Each broadcast is encoded once; the frame is enqueued to every
/// connected subscriber's outbound queue. Queues are unbounded: a slow
/// subscriber accumulates frames rather than slowing the publisher.
pub struct Publisher {
    shared: Arc<PublisherShared>,
}

impl Publisher {
    /// Create a publisher with no bound endpoints.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PublisherShared {
                processor: QueueProcessor::new(),
                acceptors: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                next_seq: Mutex::new(0),
                stop: OnceSignal::new(),
            }),
        }
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
        Ok(())
    }

    /// Remove the acceptor; connected subscribers stay.
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

    /// Broadcast a message to every connected subscriber.
    ///
    /// Encoding happens once; with no subscribers this is a no-op.
    pub fn broadcast<T: Routable>(&self, message: &T) -> Result<()> {
        let frame = encode_message(message)?;
        let queues: Vec<Arc<MessageQueue>> = {
            let subscribers = self
                .shared
                .subscribers
                .lock()
                .expect("subscriber set poisoned");
            subscribers.iter().map(|s| s.queue.clone()).collect()
        };
        for queue in queues {
            queue.enqueue(frame.clone());
        }
        Ok(())
    }

    /// Currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .expect("subscriber set poisoned")
            .len()
    }

    /// Tear down: close acceptors, disconnect subscribers, stop the
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
        let subscribers: Vec<SubscriberBinding> = {
            let mut set = self
                .shared
                .subscribers
                .lock()
                .expect("subscriber set poisoned");
            set.drain(..).collect()
        };
        for subscriber in subscribers {
            self.shared.processor.unregister(&subscriber.queue);
            subscriber.socket.disconnect();
        }
        self.shared.processor.shutdown();
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(shared: Arc<PublisherShared>, acceptor: Arc<dyn Acceptor>) {
    loop {
        let socket = tokio::select! {
            _ = shared.stop.wait() => break,
            accepted = acceptor.accept() => match accepted {
                Ok(socket) => socket,
                Err(_) => break,
            },
        };
        attach_subscriber(&shared, socket);
    }
}

fn attach_subscriber(shared: &Arc<PublisherShared>, socket: Arc<dyn Socket>) {
    if shared.stop.is_set() {
        socket.disconnect();
        return;
    }

    let seq = {
        let mut next = shared.next_seq.lock().expect("seq lock poisoned");
        let seq = *next;
        *next += 1;
        seq
    };
    let queue = shared.processor.register(socket.clone(), None);
    shared
        .subscribers
        .lock()
        .expect("subscriber set poisoned")
        .push(SubscriberBinding {
            seq,
            socket: socket.clone(),
            queue: queue.clone(),
        });
    tracing::debug!(seq, endpoint = %socket.endpoint(), "subscriber joined");

    let shared = shared.clone();
    tokio::spawn(async move {
        watch_remote_close(socket).await;
        let mut subscribers = shared
            .subscribers
            .lock()
            .expect("subscriber set poisoned");
        subscribers.retain(|s| s.seq != seq);
        drop(subscribers);
        shared.processor.unregister(&queue);
        tracing::debug!(seq, "subscriber left");
    });
}
