//! WebSocket transport for the workflow stream.
//!
//! [`WsTransport`] connects to `{ws_url}/workflows/{subject_id}/stream`,
//! authenticates with a bearer token, and spawns a reader task that
//! parses text frames into [`WorkflowEvent`](advisor_core::events::WorkflowEvent)s
//! and forwards them to the engine in arrival order.

use advisor_core::events::parse_event;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::transport::{channel, ChannelHandle, ChannelMessage, ChannelSender, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for the recommendation service's stream endpoint.
pub struct WsTransport {
    ws_url: String,
    event_buffer: usize,
}

impl WsTransport {
    /// * `ws_url`       - WebSocket base URL, e.g. `ws://host:3000`.
    /// * `event_buffer` - parsed events buffered per channel.
    pub fn new(ws_url: impl Into<String>, event_buffer: usize) -> Self {
        Self {
            ws_url: ws_url.into(),
            event_buffer,
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Stream endpoint for one subject.
    pub fn stream_url(&self, subject_id: &str) -> String {
        format!(
            "{}/workflows/{}/stream",
            self.ws_url.trim_end_matches('/'),
            subject_id
        )
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(
        &self,
        subject_id: &str,
        token: Option<&str>,
    ) -> Result<ChannelHandle, TransportError> {
        let url = self.stream_url(subject_id);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Protocol(format!("Invalid stream URL {url}: {e}")))?;

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Protocol(format!("Invalid session token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| connect_error(&url, e))?;

        tracing::info!(subject_id, url = %url, "Connected to workflow stream");

        let (sender, handle) = channel(self.event_buffer);
        let subject_id = subject_id.to_string();
        tokio::spawn(async move {
            forward_frames(ws_stream, sender, &subject_id).await;
            tracing::debug!(subject_id = %subject_id, "Workflow stream reader exited");
        });

        Ok(handle)
    }
}

/// Map a handshake failure to a [`TransportError`]. A `401` answer means
/// the session token was refused.
fn connect_error(url: &str, err: WsError) -> TransportError {
    match err {
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            TransportError::Unauthorized(format!("Stream at {url} rejected the session token"))
        }
        WsError::Url(e) => TransportError::Protocol(format!("Invalid stream URL {url}: {e}")),
        other => TransportError::Connection(format!("Failed to connect to {url}: {other}")),
    }
}

/// Read frames until the stream ends, errors, or the engine closes the
/// channel.
///
/// Binary frames are ignored. Text frames that fail to parse are logged
/// and skipped.
async fn forward_frames(mut ws_stream: WsStream, sender: ChannelSender, subject_id: &str) {
    loop {
        let frame = tokio::select! {
            _ = sender.closed() => {
                if let Err(e) = ws_stream.close(None).await {
                    tracing::debug!(subject_id, error = %e, "Error closing workflow stream");
                }
                return;
            }
            frame = ws_stream.next() => frame,
        };

        let message = match frame {
            Some(Ok(Message::Text(text))) => match parse_event(&text) {
                Ok(event) => ChannelMessage::Event(event),
                Err(e) => {
                    tracing::warn!(
                        subject_id,
                        error = %e,
                        raw_message = %text,
                        "Failed to parse workflow event",
                    );
                    continue;
                }
            },
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(subject_id, "Ignoring binary frame");
                continue;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                // Handled automatically by tungstenite.
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(subject_id, ?frame, "Workflow stream closed by server");
                sender.send(ChannelMessage::Closed).await;
                return;
            }
            Some(Err(e)) => {
                tracing::error!(subject_id, error = %e, "Workflow stream receive error");
                sender.send(ChannelMessage::Disconnected).await;
                return;
            }
            None => {
                tracing::info!(subject_id, "Workflow stream ended");
                sender.send(ChannelMessage::Disconnected).await;
                return;
            }
        };

        if !sender.send(message).await {
            return;
        }
    }
}
