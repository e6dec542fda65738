//! Transport seam.
//!
//! A [`Transport`] opens one connection per attempt and hands back a
//! [`TransportLink`]: a pair of channels bridged to the socket by a spawned
//! I/O task. The link only forwards frames. Protocol logic stays in the
//! sans-IO client.

use async_trait::async_trait;
use cablecast_core::{ConnectRequest, TransportError};
use cablecast_proto::Frame;
use tokio::{sync::mpsc, task::AbortHandle};

/// Inbound event from the I/O task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One text frame from the server
    Frame(Frame),
    /// The connection ended. `None` for a clean close.
    Closed(Option<TransportError>),
}

/// Channels to one open transport.
///
/// Dropping the link aborts its I/O task, which releases the socket.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
    abort_handle: Option<AbortHandle>,
}

impl TransportLink {
    /// Link over the given channels.
    pub fn new(
        outbound: mpsc::UnboundedSender<Frame>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self { outbound, inbound, abort_handle: None }
    }

    /// Attach the I/O task so it is stopped with the link.
    #[must_use]
    pub fn with_task(mut self, abort_handle: AbortHandle) -> Self {
        self.abort_handle = Some(abort_handle);
        self
    }

    /// Queue a frame for the server.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the I/O task has stopped
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed("transport task stopped".to_string()))
    }

    /// Next inbound event. `None` once the I/O task is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.inbound.recv().await
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
    }
}

/// Opens transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection for `request.attempt`.
    ///
    /// Resolves once the socket is established; the protocol handshake
    /// (`welcome`) arrives later as a frame.
    async fn open(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (_inbound_tx, inbound) = mpsc::unbounded_channel();
        let link = TransportLink::new(outbound, inbound);

        assert!(link.send(Frame::new("{}")).is_ok());
        drop(outbound_rx);
        assert!(matches!(link.send(Frame::new("{}")), Err(TransportError::Closed(_))));
    }

    #[tokio::test]
    async fn dropping_link_aborts_task() {
        let (outbound, _outbound_rx) = mpsc::unbounded_channel();
        let (_inbound_tx, inbound) = mpsc::unbounded_channel();
        let task = tokio::spawn(std::future::pending::<()>());
        let link = TransportLink::new(outbound, inbound).with_task(task.abort_handle());

        drop(link);

        assert!(task.await.unwrap_err().is_cancelled());
    }
}
