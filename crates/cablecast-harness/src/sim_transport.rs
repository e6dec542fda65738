//! Loopback transport connecting sessions to a [`SimServer`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use cablecast_client::{Transport, TransportLink};
use cablecast_core::{ConnectRequest, TransportError};

use crate::SimServer;

/// In-process transport. Optional latency delays every open.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    server: Arc<SimServer>,
    latency: Option<Duration>,
}

impl LoopbackTransport {
    /// Transport to `server` with instant opens.
    #[must_use]
    pub fn new(server: Arc<SimServer>) -> Self {
        Self { server, latency: None }
    }

    /// Delay every open by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.server.open(request)
    }
}
