use crate::{Authenticator, FrameError, Gateway, Response, TokioTransport, Transport, dispatch};
use cereal_core::LockServer;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Accepts connections and answers frames against a shared lock server.
pub struct Listener<A> {
    listener: TcpListener,
    server: Arc<dyn LockServer>,
    gateway: Arc<Gateway<A>>,
}

impl<A: Authenticator + 'static> Listener<A> {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        server: Arc<dyn LockServer>,
        gateway: Gateway<A>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "lock server listening");
        Ok(Self {
            listener,
            server,
            gateway: Arc::new(gateway),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until the surrounding task is cancelled.
    pub async fn serve(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            debug!(%peer, "connection accepted");

            let server = self.server.clone();
            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                if let Err(e) = connection(TokioTransport::new(stream), server, gateway).await {
                    debug!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn connection<A: Authenticator + 'static>(
    mut transport: impl Transport,
    server: Arc<dyn LockServer>,
    gateway: Arc<Gateway<A>>,
) -> Result<(), FrameError> {
    while let Some(data) = transport.recv_frame().await? {
        let response = match gateway.parse(data) {
            Ok(request) => {
                let server = server.clone();
                // Lock waits block the calling thread.
                tokio::task::spawn_blocking(move || dispatch(server.as_ref(), request))
                    .await
                    .unwrap_or_else(|e| Response::Rejected(format!("request failed: {e}")))
            }
            Err(e) => Response::Rejected(e.to_string()),
        };
        transport.send_frame(&response.encode()?).await?;
    }
    Ok(())
}
