//! TCP transport over `tokio::net`.
//!
//! Connected streams are split into owned halves so reads and writes can
//! proceed independently. `disconnect` shuts the write half down so the
//! peer observes end of stream promptly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use super::{Acceptor, DisconnectState, Socket};
use crate::endpoint::Endpoint;
use crate::error::{Result, WirebusError};

/// A connected TCP socket.
pub struct TcpSocket {
    endpoint: Endpoint,
    reader: Mutex<OwnedReadHalf>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    state: DisconnectState,
}

impl TcpSocket {
    fn new(stream: TcpStream, endpoint: Endpoint) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        Self {
            endpoint,
            reader: Mutex::new(read_half),
            writer: Arc::new(Mutex::new(write_half)),
            state: DisconnectState::new(),
        }
    }
}

#[async_trait]
impl Socket for TcpSocket {
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
            result = async {
                let mut reader = self.reader.lock().await;
                reader.read(buf).await
            } => result.map_err(WirebusError::from),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.state.is_disconnected() {
            return Err(WirebusError::ConnectionClosed);
        }
        tokio::select! {
            _ = self.state.wait() => Err(WirebusError::ConnectionClosed),
            result = async {
                let mut writer = self.writer.lock().await;
                writer.write_all(data).await?;
                writer.flush().await
            } => result.map_err(WirebusError::from),
        }
    }

    fn disconnect(&self) {
        if self.state.trigger() {
            // Send FIN without waiting for the socket's owner to drop it.
            let writer = self.writer.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let mut writer = writer.lock().await;
                    let _ = writer.shutdown().await;
                });
            }
        }
    }

    async fn wait_disconnected(&self) {
        self.state.wait().await
    }
}

/// TCP acceptor wrapping a bound listener.
pub struct TcpAcceptor {
    endpoint: Endpoint,
    listener: TcpListener,
    closed: DisconnectState,
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn accept(&self) -> Result<Arc<dyn Socket>> {
        if self.closed.is_disconnected() {
            return Err(WirebusError::ConnectionClosed);
        }
        tokio::select! {
            _ = self.closed.wait() => Err(WirebusError::ConnectionClosed),
            result = self.listener.accept() => {
                let (stream, _peer) = result?;
                tracing::debug!(endpoint = %self.endpoint, "accepted tcp connection");
                Ok(Arc::new(TcpSocket::new(stream, self.endpoint.clone())) as Arc<dyn Socket>)
            }
        }
    }

    fn close(&self) {
        self.closed.trigger();
    }
}

/// Connect a TCP client socket.
pub async fn connect(endpoint: &Endpoint) -> Result<Arc<dyn Socket>> {
    let host = endpoint.host().unwrap_or("127.0.0.1");
    let stream = TcpStream::connect((host, endpoint.port())).await?;
    Ok(Arc::new(TcpSocket::new(stream, endpoint.clone())))
}

/// Bind a TCP listener on the endpoint's host and port.
pub async fn bind(endpoint: &Endpoint) -> Result<Arc<dyn Acceptor>> {
    let host = endpoint.host().unwrap_or("127.0.0.1");
    let listener = TcpListener::bind((host, endpoint.port())).await?;
    tracing::debug!(endpoint = %endpoint, "tcp listener bound");
    Ok(Arc::new(TcpAcceptor {
        endpoint: endpoint.clone(),
        listener,
        closed: DisconnectState::new(),
    }))
}
