//! Newline-delimited JSON listener for decrypted flows
//!
//! The interception proxy connects and writes one [`DecryptedFlow`] per
//! line. Each connection gets its own task; classification and storage
//! run on the blocking pool since the store is synchronous.

use crate::intercept::{DecryptedFlow, FlowInterceptor};
use lanwatch_core::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// TCP listener feeding a shared [`FlowInterceptor`]
pub struct FlowFeed {
    listener: TcpListener,
    interceptor: Arc<FlowInterceptor>,
    handled: Arc<AtomicU64>,
}

impl FlowFeed {
    pub async fn bind(addr: SocketAddr, interceptor: Arc<FlowInterceptor>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Flow feed listening");
        Ok(Self {
            listener,
            interceptor,
            handled: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns true
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(peer = %peer, "Flow source connected");
                        let interceptor = self.interceptor.clone();
                        let handled = self.handled.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            let result =
                                handle_connection(socket, peer, interceptor, handled, shutdown)
                                    .await;
                            if let Err(e) = result {
                                warn!(peer = %peer, error = %e, "Flow connection failed");
                            }
                            debug!(peer = %peer, "Flow source disconnected");
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept flow connection"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(flows = self.handled.load(Ordering::Relaxed), "Flow feed stopped");
        Ok(())
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    interceptor: Arc<FlowInterceptor>,
    handled: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut lines = BufReader::new(socket).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.changed() => break,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let flow: DecryptedFlow = match serde_json::from_str(line) {
            Ok(flow) => flow,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Skipping malformed flow record");
                continue;
            }
        };

        let interceptor = interceptor.clone();
        match tokio::task::spawn_blocking(move || interceptor.handle(&flow)).await {
            Ok(Ok(events)) => {
                handled.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, events = events.len(), "Flow handled");
            }
            Ok(Err(e)) => warn!(peer = %peer, error = %e, "Failed to store flow"),
            Err(e) => error!(peer = %peer, error = %e, "Flow handler panicked"),
        }
    }

    Ok(())
}
