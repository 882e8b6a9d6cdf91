//! Failure classification.
//!
//! Normalizes the three kinds of raw failure signal (transport
//! disconnect, structured server error payload, authorization failure)
//! into a [`ClassifiedError`]. Classification is a pure, total mapping:
//! anything unrecognized falls back to [`ErrorKind::ServerLogic`].

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// HTTP status treated as an authorization failure.
pub const HTTP_UNAUTHORIZED: u16 = 401;

/// HTTP status treated as server-signaled backpressure.
pub const HTTP_TOO_MANY_REQUESTS: u16 = 429;

const MSG_CONNECTIVITY: &str =
    "Lost connection to the server. Check your network connection and try again.";
const MSG_RATE_LIMITED: &str = "Too many requests. Please wait a moment and try again.";
const MSG_UNAUTHORIZED: &str = "Your session has expired. Please sign in again.";
const MSG_SERVER_LOGIC: &str = "The recommendation workflow failed on the server.";
const MSG_TRANSPORT_CLOSED: &str =
    "The server closed the stream before the workflow finished.";

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Actionable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient transport-level failure.
    Connectivity,
    /// Transient server-signaled backpressure.
    RateLimited,
    /// Fatal to the session.
    Unauthorized,
    /// Fatal to the run, not the session.
    ServerLogic,
    /// Fatal, cause unknown: the server hung up without a terminal event.
    TransportClosed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::ServerLogic => "server_logic",
            ErrorKind::TransportClosed => "transport_closed",
        }
    }

    /// Whether a fresh run is worth attempting after this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::Connectivity | ErrorKind::RateLimited)
    }

    /// Only authorization failures tear the session down.
    pub fn ends_session(&self) -> bool {
        matches!(self, ErrorKind::Unauthorized)
    }

    fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::Connectivity => MSG_CONNECTIVITY,
            ErrorKind::RateLimited => MSG_RATE_LIMITED,
            ErrorKind::Unauthorized => MSG_UNAUTHORIZED,
            ErrorKind::ServerLogic => MSG_SERVER_LOGIC,
            ErrorKind::TransportClosed => MSG_TRANSPORT_CLOSED,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Structured error reported by the server inside the event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerErrorPayload {
    /// Error-type tag, e.g. `"connectivity_error"` or `"rate_limit"`.
    pub error_type: Option<String>,
    pub message: Option<String>,
    pub http_status: Option<u16>,
}

/// Raw failure signal before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    /// The transport dropped before any terminal event.
    Disconnected,
    /// The server reported an error payload.
    Server(ServerErrorPayload),
    /// The channel could not be opened because the credentials were refused.
    Unauthorized { message: Option<String> },
    /// The server closed the channel cleanly without a terminal event.
    ChannelClosed,
}

/// A failure normalized into an [`ErrorKind`] with a display message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable: kind.is_recoverable(),
        }
    }

    pub fn ends_session(&self) -> bool {
        self.kind.ends_session()
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Map a raw failure signal to a [`ClassifiedError`].
///
/// Server messages are kept verbatim; an empty or missing message is
/// replaced with a default for the kind.
pub fn classify(signal: &FailureSignal) -> ClassifiedError {
    match signal {
        FailureSignal::Disconnected => {
            ClassifiedError::new(ErrorKind::Connectivity, MSG_CONNECTIVITY)
        }
        FailureSignal::ChannelClosed => {
            ClassifiedError::new(ErrorKind::TransportClosed, MSG_TRANSPORT_CLOSED)
        }
        FailureSignal::Unauthorized { message } => {
            with_message(ErrorKind::Unauthorized, message.as_deref())
        }
        FailureSignal::Server(payload) => {
            with_message(classify_payload(payload), payload.message.as_deref())
        }
    }
}

fn classify_payload(payload: &ServerErrorPayload) -> ErrorKind {
    if payload.http_status == Some(HTTP_UNAUTHORIZED) {
        return ErrorKind::Unauthorized;
    }

    if let Some(kind) = payload.error_type.as_deref().and_then(kind_from_tag) {
        return kind;
    }

    if payload.http_status == Some(HTTP_TOO_MANY_REQUESTS) {
        return ErrorKind::RateLimited;
    }

    ErrorKind::ServerLogic
}

/// Recognize an error-type tag, with or without an `_error` suffix.
fn kind_from_tag(tag: &str) -> Option<ErrorKind> {
    let tag = tag.trim().to_ascii_lowercase();
    let tag = tag.strip_suffix("_error").unwrap_or(&tag);
    match tag {
        "connectivity" => Some(ErrorKind::Connectivity),
        "rate_limit" | "rate_limited" => Some(ErrorKind::RateLimited),
        "auth" | "unauthorized" => Some(ErrorKind::Unauthorized),
        _ => None,
    }
}

fn with_message(kind: ErrorKind, message: Option<&str>) -> ClassifiedError {
    let message = match message.map(str::trim) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => kind.default_message().to_string(),
    };
    ClassifiedError::new(kind, message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
