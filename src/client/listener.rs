//! Device listener for server change signals.
//!
//! The client binds an ephemeral local port and registers its address
//! with the server. The server's only message is the connection itself:
//! when another device mutates the vault, the server dials this port and
//! hangs up. Any accepted connection therefore means "something changed,
//! pull everything" — no bytes are read, no protocol is spoken.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accept loop turning bare TCP connects into re-sync triggers.
pub struct DeviceListener {
    listener: TcpListener,
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl DeviceListener {
    /// Bind an ephemeral port on the loopback interface. The client
    /// cannot participate in fan-out without one, so failure here is
    /// fatal to the caller.
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind device listener")?;
        let addr = listener
            .local_addr()
            .context("Failed to read device listener address")?;
        Ok(Self {
            listener,
            addr,
            cancel: CancellationToken::new(),
        })
    }

    /// The address to register with the server.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle for stopping the accept loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the accept loop until cancelled. Every accepted connection is
    /// dropped immediately and `on_signal` runs to completion before the
    /// next accept — a pull already in flight always finishes, even if
    /// cancellation arrives while it runs.
    pub async fn run<F, Fut>(self, mut on_signal: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::debug!(addr = %self.addr, "Device listener running");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            drop(stream);
                            tracing::debug!(peer = %peer, "Change signal received");
                            on_signal().await;
                        }
                        Err(e) => {
                            tracing::warn!("Device listener accept failed: {e}");
                        }
                    }
                }
            }
        }
        tracing::debug!("Device listener stopped");
    }
}
