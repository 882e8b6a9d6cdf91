//! Transport collaborator seam.
//!
//! A [`Transport`] opens one server-push channel per run and hands back a
//! [`ChannelHandle`]. The transport owns connection mechanics and
//! framing; the engine only ever sees already-parsed
//! [`ChannelMessage`]s, delivered one at a time in emission order.

use advisor_core::classifier::FailureSignal;
use advisor_core::events::WorkflowEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One item delivered by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// A parsed event from the server.
    Event(WorkflowEvent),
    /// The connection dropped.
    Disconnected,
    /// The server closed the channel cleanly.
    Closed,
}

/// Receiving end of an open channel, held by the engine.
///
/// Dropping the handle closes the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    receiver: mpsc::Receiver<ChannelMessage>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Next message in arrival order. A channel whose sender has gone
    /// away without a final message reads as [`ChannelMessage::Disconnected`].
    pub async fn recv(&mut self) -> ChannelMessage {
        self.receiver
            .recv()
            .await
            .unwrap_or(ChannelMessage::Disconnected)
    }

    /// Ask the transport to shut the channel down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Sending end of a channel, held by the transport's reader task.
#[derive(Clone)]
pub struct ChannelSender {
    sender: mpsc::Sender<ChannelMessage>,
    cancel: CancellationToken,
}

impl ChannelSender {
    /// Deliver a message. Returns `false` once the engine has closed the
    /// channel, so the reader can stop.
    pub async fn send(&self, message: ChannelMessage) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.sender.send(message).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves once the engine closes the channel.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

/// Create a connected sender/handle pair with room for `buffer` messages.
pub fn channel(buffer: usize) -> (ChannelSender, ChannelHandle) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    (
        ChannelSender {
            sender,
            cancel: cancel.clone(),
        },
        ChannelHandle { receiver, cancel },
    )
}

/// Opens server-push channels for workflow runs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the workflow stream for `subject_id`, authenticating with
    /// `token` when one is available.
    async fn open(
        &self,
        subject_id: &str,
        token: Option<&str>,
    ) -> Result<ChannelHandle, TransportError>;
}

/// Errors raised while opening a channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused the credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request could not be built or the handshake was malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Failure signal used to fail the run when the channel never opens.
    pub fn to_signal(&self) -> FailureSignal {
        match self {
            TransportError::Unauthorized(message) => FailureSignal::Unauthorized {
                message: Some(message.clone()),
            },
            TransportError::Connection(_) | TransportError::Protocol(_) => {
                FailureSignal::Disconnected
            }
        }
    }
}
