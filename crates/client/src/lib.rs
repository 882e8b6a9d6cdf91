//! Streaming client for the recommendation workflow.
//!
//! Provides the [`WorkflowEngine`] façade that owns one run at a time,
//! the [`Transport`] and [`SessionStore`] collaborator seams, a
//! WebSocket transport, and environment-driven configuration.

pub mod config;
pub mod engine;
pub mod session;
pub mod transport;
pub mod ws;

pub use config::EngineConfig;
pub use engine::{drive_renderer, EngineError, WorkflowEngine};
pub use session::{MemorySession, SessionStore};
pub use transport::{channel, ChannelHandle, ChannelMessage, ChannelSender, Transport, TransportError};
pub use ws::WsTransport;
