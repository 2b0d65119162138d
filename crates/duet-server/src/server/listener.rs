//! TCP listener for client connections

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::server::handler::handle_client;

/// Client-facing server for the check-in coordinator
pub struct CheckinServer {
    /// Address to bind
    pub address: String,
    /// Shared coordinator state
    coordinator: Arc<Coordinator>,
    /// Cancellation token for shutdown
    shutdown_token: CancellationToken,
}

impl CheckinServer {
    /// Create a new server
    pub fn new(address: String, coordinator: Arc<Coordinator>) -> Self {
        Self {
            address,
            coordinator,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Accept connections until the shutdown token fires
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind check-in server to {}", self.address))?;

        tracing::info!("Check-in server listening on {}", self.address);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            tracing::debug!("Client connected from {}", peer_addr);
                            let coordinator = Arc::clone(&self.coordinator);

                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, coordinator).await {
                                    tracing::warn!("Client connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Check-in server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
