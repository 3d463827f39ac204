//! TCP listener for game clients.
//!
//! Every accepted socket gets one tokio task that owns the read half and a
//! second task that drains the connection's outbound queue into the write
//! half. The read loop stops on a clean close, a fatal protocol error, a full
//! writer queue or server shutdown; the session is then torn down exactly
//! once. Cancellation also interrupts key generation and a hand-off that is
//! waiting for worker queue capacity.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::protocol::message::ConnectionId;
use crate::service::gateway::Gateway;

pub struct Server {
    listener: TcpListener,
    gateway: Arc<Gateway>,
}

impl Server {
    /// Bind the configured listen address.
    pub async fn bind(gateway: Arc<Gateway>) -> Result<Self> {
        let listener = TcpListener::bind(&gateway.config().server.address).await?;
        info!(address = %listener.local_addr()?, "Listening");
        Ok(Self { listener, gateway })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until CTRL+C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Serve until `shutdown_rx` yields (or its sender is dropped).
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let token = CancellationToken::new();
        let max_connections = self.gateway.config().server.max_connections;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    token.cancel();
                    self.drain().await;

                    let gateway = self.gateway.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || gateway.shutdown()).await {
                        error!(error = %e, "Worker pool shutdown failed");
                    }
                    return Ok(());
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let metrics = self.gateway.metrics();
                            if metrics.connections_active.load(Ordering::Relaxed) as usize >= max_connections {
                                metrics.connection_rejected();
                                warn!(peer = %peer, max_connections, "Connection limit reached, closing socket");
                                drop(stream);
                                continue;
                            }

                            metrics.connection_established();
                            let connection = self.gateway.connections().next_id();
                            let gateway = self.gateway.clone();
                            let token = token.child_token();
                            tokio::spawn(async move {
                                serve_connection(stream, peer, connection, gateway.clone(), token).await;
                                gateway.metrics().connection_closed();
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }

    async fn drain(&self) {
        let shutdown_timeout = self.gateway.config().server.shutdown_timeout;
        let timeout = tokio::time::sleep(shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            let connections = self.gateway.metrics().snapshot().connections_active;
            if connections == 0 {
                info!("All connections closed, shutting down");
                return;
            }
            tokio::select! {
                _ = &mut timeout => {
                    warn!(connections, "Shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    debug!(connections, "Waiting for connections to close");
                }
            }
        }
    }
}

#[instrument(skip(stream, gateway, token))]
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    gateway: Arc<Gateway>,
    token: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (read_half, write_half) = stream.into_split();

    let outgoing = gateway.connections().register(connection, token.clone());
    let mut writer = tokio::spawn(write_frames(write_half, outgoing, connection));

    info!(%connection, "Connection accepted");
    tokio::select! {
        _ = token.cancelled() => {
            debug!(%connection, "Connection cancelled during handshake setup");
        }
        opened = gateway.lifecycle().on_connect(connection) => match opened {
            Ok(_) => read_frames(read_half, connection, &gateway, &token).await,
            Err(e) => warn!(%connection, error = %e, "Handshake setup failed"),
        }
    }

    gateway.connections().unregister(connection);
    gateway.lifecycle().on_disconnect(connection);

    let shutdown_timeout = gateway.config().server.shutdown_timeout;
    if tokio::time::timeout(shutdown_timeout, &mut writer).await.is_err() {
        warn!(%connection, "Writer did not flush in time, aborting");
        writer.abort();
    }
    info!(%connection, "Connection closed");
}

async fn read_frames(
    read_half: tokio::net::tcp::OwnedReadHalf,
    connection: ConnectionId,
    gateway: &Gateway,
    token: &CancellationToken,
) {
    let mut frames = FramedRead::new(read_half, gateway.codec());

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(%connection, "Connection cancelled");
                return;
            }
            frame = frames.next() => match frame {
                Some(Ok(frame)) => tokio::select! {
                    _ = token.cancelled() => {
                        debug!(%connection, "Connection cancelled while handing off a frame");
                        return;
                    }
                    handed_off = gateway.inbound().on_frame(connection, frame) => {
                        if let Err(e) = handed_off {
                            warn!(%connection, error = %e, "Closing connection");
                            return;
                        }
                    }
                },
                Some(Err(e)) => {
                    gateway.metrics().protocol_error();
                    warn!(%connection, error = %e, "Framing error, closing connection");
                    return;
                }
                None => {
                    debug!(%connection, "Peer closed the connection");
                    return;
                }
            }
        }
    }
}

async fn write_frames(
    mut write_half: OwnedWriteHalf,
    mut outgoing: mpsc::Receiver<Bytes>,
    connection: ConnectionId,
) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            debug!(%connection, error = %e, "Write failed");
            return;
        }
    }
    let _ = write_half.shutdown().await;
}
