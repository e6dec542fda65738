//! WebSocket transport.
//!
//! Opens one tokio-tungstenite client connection per attempt. Upgrade request
//! headers (authorization, `Origin`) come from the [`ConnectRequest`]. Text
//! frames are forwarded as [`Frame`]s; close frames and socket errors end the
//! link with [`LinkEvent::Closed`].

use async_trait::async_trait;
use cablecast_core::{ConnectRequest, TransportError};
use cablecast_proto::Frame;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
    },
};

use crate::transport::{LinkEvent, Transport, TransportLink};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError> {
        let mut upgrade = request
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Refused(format!("invalid endpoint: {e}")))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Refused(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Refused(format!("invalid header value for {name}: {e}")))?;
            upgrade.headers_mut().insert(name, value);
        }

        tracing::debug!(attempt = %request.attempt, endpoint = %request.endpoint, "opening websocket");

        let (socket, _response) = connect_async(upgrade).await.map_err(map_connect_error)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_socket(socket, outbound_rx, inbound_tx));

        Ok(TransportLink::new(outbound_tx, inbound_rx).with_task(handle.abort_handle()))
    }
}

fn map_connect_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Io(io) => TransportError::from(io),
        other => TransportError::Refused(other.to_string()),
    }
}

/// Bridge the socket and the link channels until either side ends.
async fn run_socket(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Err(error) = write.send(Message::Text(frame.into_text().into())).await {
                    let _ = inbound.send(LinkEvent::Closed(Some(TransportError::Io(error.to_string()))));
                    break;
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(LinkEvent::Frame(Frame::new(text.as_str()))).is_err() {
                            break;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            let _ = inbound.send(LinkEvent::Closed(Some(TransportError::Closed(
                                "failed to answer ping".to_string(),
                            ))));
                            break;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => format!("close code {}: {}", u16::from(frame.code), frame.reason.as_str()),
                            None => "closed by server".to_string(),
                        };
                        tracing::info!(%reason, "websocket closed by server");
                        let _ = inbound.send(LinkEvent::Closed(Some(TransportError::Closed(reason))));
                        break;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(error)) => {
                        tracing::warn!(%error, "websocket error");
                        let _ = inbound.send(LinkEvent::Closed(Some(TransportError::Io(error.to_string()))));
                        break;
                    },
                    None => {
                        let _ = inbound.send(LinkEvent::Closed(None));
                        break;
                    },
                }
            }
        }
    }
}
