//! Transport client abstraction.
//!
//! A transport client speaks the delivery protocol to a remote server. The
//! dispatcher drives it through calls (`use_envelope`, `send`, `end`) and
//! learns about its progress only through [`TransportEvent`]s on the channel
//! returned by [`TransportClient::connect`].

pub mod smtp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::mail::Envelope;

pub use smtp::{SmtpClient, SmtpConnector};

/// Readiness signals emitted by a transport client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connected and able to accept a new envelope.
    Idle,
    /// Envelope accepted; message data may be streamed.
    Ready,
    /// Message accepted; carries the server's acknowledgement text.
    Done(String),
    /// Anything that went wrong, including timeouts and rejections.
    Error(String),
}

/// Receiving half of a client's event stream.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Event-driven mail transport client.
///
/// Calls return as soon as the request is handed off; outcomes arrive as
/// events. A returned `Err` means the client could not even accept the call.
#[async_trait]
pub trait TransportClient: Send {
    /// Client name for logging.
    fn name(&self) -> &str;

    /// Open the connection. The client emits [`TransportEvent::Idle`] once ready.
    async fn connect(&mut self) -> Result<EventStream, TransportError>;

    /// Declare sender and recipients for the next message.
    async fn use_envelope(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Stream one chunk of message data.
    async fn send(&mut self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Signal end of message data.
    async fn end(&mut self) -> Result<(), TransportError>;

    /// Tear down the connection.
    async fn close(&mut self);
}

/// Creates transport clients for requests that do not bring their own.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn TransportClient>, TransportError>;
}
