//! Transport abstraction: sockets, acceptors, and factories.
//!
//! A [`Socket`] is a bidirectional byte channel with an idempotent
//! disconnect; an [`Acceptor`] produces server-side sockets on client
//! connect. [`connect`] and [`bind`] dispatch on the endpoint's
//! transport variant, so everything above this module is
//! transport-agnostic.

pub mod inproc;
pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::{Endpoint, Transport};
use crate::error::Result;
use crate::sync::OnceSignal;

/// A bidirectional byte channel.
///
/// Reads and writes may block; both unblock promptly when the socket is
/// disconnected. A socket transitions into the disconnected state
/// exactly once across its lifetime, regardless of how many times
/// `disconnect` is called or which side closes first.
#[async_trait]
pub trait Socket: Send + Sync {
    /// The endpoint this socket was connected or accepted on.
    fn endpoint(&self) -> &Endpoint;

    /// Whether the socket has transitioned into the disconnected state.
    fn is_disconnected(&self) -> bool;

    /// Read up to `buf.len()` bytes. Returns 0 on end of stream or after
    /// disconnect.
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` as one call.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Disconnect the socket. Idempotent; only the first call performs
    /// the transition.
    fn disconnect(&self);

    /// Wait for the disconnected transition. Completes immediately if it
    /// already happened.
    async fn wait_disconnected(&self);
}

/// Accepts inbound connections on a bound endpoint.
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// The endpoint this acceptor is bound to.
    fn endpoint(&self) -> &Endpoint;

    /// Accept the next connection. Fails once the acceptor is closed.
    async fn accept(&self) -> Result<Arc<dyn Socket>>;

    /// Close the acceptor, unblocking pending `accept` calls. Idempotent.
    fn close(&self);
}

/// Connect a client socket to the endpoint.
pub async fn connect(endpoint: &Endpoint) -> Result<Arc<dyn Socket>> {
    match endpoint.transport() {
        Transport::Tcp => tcp::connect(endpoint).await,
        Transport::Inproc => inproc::connect(endpoint),
    }
}

/// Bind an acceptor on the endpoint.
pub async fn bind(endpoint: &Endpoint) -> Result<Arc<dyn Acceptor>> {
    match endpoint.transport() {
        Transport::Tcp => tcp::bind(endpoint).await,
        Transport::Inproc => inproc::bind(endpoint),
    }
}

/// Shared disconnect state: a one-shot transition plus a wakeup for
/// blocked reads and writes.
#[derive(Debug, Default)]
pub(crate) struct DisconnectState {
    signal: OnceSignal,
}

impl DisconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Perform the transition. Returns `true` only the first time.
    pub fn trigger(&self) -> bool {
        self.signal.trigger()
    }

    pub fn is_disconnected(&self) -> bool {
        self.signal.is_set()
    }

    pub async fn wait(&self) {
        self.signal.wait().await
    }
}

/// Drain a write-only socket to detect the peer closing it.
///
/// Components that only ever send on a socket (service queue workers,
/// publisher fan-out) still need to notice the remote side going away.
/// This loop discards anything the peer sends and disconnects the socket
/// on end of stream or error, then returns.
pub(crate) async fn watch_remote_close(socket: Arc<dyn Socket>) {
    let mut buf = [0u8; 1024];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                tracing::warn!(endpoint = %socket.endpoint(), "discarding unexpected inbound data");
            }
            Err(_) => break,
        }
    }
    socket.disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_state_single_transition() {
        let state = DisconnectState::new();
        assert!(!state.is_disconnected());
        assert!(state.trigger());
        assert!(!state.trigger());
        assert!(!state.trigger());
        assert!(state.is_disconnected());
    }

    #[tokio::test]
    async fn test_disconnect_state_wait_completes() {
        let state = Arc::new(DisconnectState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait().await })
        };
        state.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait should complete")
            .unwrap();
    }
}
