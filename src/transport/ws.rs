//! WebSocket transport implementation
//!
//! Frames are JSON text messages. The bearer token rides on the upgrade
//! request as a query parameter. A close frame with the `Normal` code is the
//! explicit manual-disconnect signal; any other closure is treated as a
//! transport failure.

use super::{Connector, FeedTransport, TransportError, TransportEvent};
use crate::protocol::{parse_server_frame, ClientFrame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector dialing a `ws://` or `wss://` feed endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    server_url: Url,
}

impl WsConnector {
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(server_url)
            .map_err(|_| TransportError::InvalidUrl(server_url.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(server_url.to_string()));
        }
        Ok(Self { server_url: url })
    }

    fn url_with_token(&self, token: &str) -> Url {
        let mut url = self.server_url.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, token: &str) -> Result<WsTransport, TransportError> {
        let url = self.url_with_token(token);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        Ok(WsTransport { stream })
    }
}

/// One established WebSocket connection
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match parse_server_frame(text.as_bytes()) {
                    Ok(frame) => return TransportEvent::Frame(frame),
                    Err(e) => {
                        // Malformed frames are skipped, not fatal
                        warn!(error = %e, "Dropping unparseable server frame");
                    }
                },
                Some(Ok(Message::Close(close))) => {
                    let (graceful, reason) = match close {
                        Some(frame) => (
                            frame.code == CloseCode::Normal,
                            frame.reason.to_string(),
                        ),
                        None => (false, "closed without close frame".to_string()),
                    };
                    return TransportEvent::Closed { graceful, reason };
                }
                Some(Ok(other)) => {
                    // Ping/pong and binary frames carry no protocol payload
                    debug!(frame = ?other, "Ignoring non-text frame");
                }
                Some(Err(e)) => {
                    return TransportEvent::Closed {
                        graceful: false,
                        reason: e.to_string(),
                    }
                }
                None => {
                    return TransportEvent::Closed {
                        graceful: false,
                        reason: "stream ended".to_string(),
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        }));
        if let Err(e) = self.stream.send(close).await {
            debug!(error = %e, "Close frame not delivered");
        }
    }
}
