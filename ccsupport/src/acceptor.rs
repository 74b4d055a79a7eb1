//! Inbound connection boundary: where launched chaincodes dial back.

use std::future::Future;
use std::sync::Arc;

use ccsupport_shared::errors::ChaincodeResult;
use tokio::net::TcpListener;

use crate::handler::{Handler, HandlerOptions};
use crate::metrics::HandlerMetricsStorage;
use crate::registry::HandlerRegistry;
use crate::transport::{ChaincodeStream, FramedStream};

/// Wraps each accepted stream in a [`Handler`] bound to the shared registry
/// and drives it until the stream ends. Cheaply cloneable.
#[derive(Clone)]
pub struct ConnectionAcceptor {
    registry: Arc<HandlerRegistry>,
    options: HandlerOptions,
    metrics: HandlerMetricsStorage,
}

impl ConnectionAcceptor {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        options: HandlerOptions,
        metrics: HandlerMetricsStorage,
    ) -> Self {
        Self {
            registry,
            options,
            metrics,
        }
    }

    /// Serve one chaincode stream. Returns when the stream ends.
    pub async fn handle_stream(&self, stream: Arc<dyn ChaincodeStream>) -> ChaincodeResult<()> {
        let handler = Handler::new(
            stream,
            Arc::clone(&self.registry),
            self.options.clone(),
            self.metrics.clone(),
        );
        handler.process_stream().await
    }

    /// Accept TCP connections until `shutdown` resolves, serving each on its
    /// own task with length-delimited framing.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> ChaincodeResult<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "Accepting chaincode connections");

        tokio::pin!(shutdown);
        loop {
            let (socket, remote) = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(address = %local_addr, "Connection acceptor shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept chaincode connection");
                        continue;
                    }
                },
            };

            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
            }
            tracing::debug!(remote = %remote, "Chaincode connected");

            let acceptor = self.clone();
            tokio::spawn(async move {
                let stream: Arc<dyn ChaincodeStream> = Arc::new(FramedStream::new(socket));
                if let Err(e) = acceptor.handle_stream(stream).await {
                    tracing::warn!(remote = %remote, error = %e, "Chaincode connection ended with error");
                }
            });
        }
    }
}
