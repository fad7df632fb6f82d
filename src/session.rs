//! Transport session controller.
//!
//! One [`TransportSession`] owns one connected [`TransportClient`] and drives
//! it through the readiness protocol: wait for `Idle`, declare the envelope,
//! wait for `Ready`, stream the payload, wait for `Done`. Every delivery,
//! including the first on a fresh connection and every later one on a reused
//! connection, waits for the client's own `Idle` before declaring. Events are
//! pulled from the client's channel and fed to [`on_event`], a pure
//! transition function over [`SessionState`].

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::TransportError;
use crate::mail::{BuiltPayload, Envelope};
use crate::transport::{EventStream, TransportClient, TransportEvent};

/// State of a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Reset after an error; the client has been closed.
    Disconnected,
    /// `connect` issued, waiting for the first `Idle`.
    Connecting,
    /// Between deliveries; the next envelope waits for the client's `Idle`.
    Idle,
    /// Envelope declared, waiting for `Ready`.
    Sending(Envelope),
    /// Streaming message data.
    AwaitingData,
    /// End of data signalled, waiting for the acknowledgement.
    Completing,
    /// Closed by the controller.
    Closed,
    /// Failed; the session must not be reused.
    Errored(String),
}

impl SessionState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Idle => "idle",
            Self::Sending(_) => "sending",
            Self::AwaitingData => "awaiting_data",
            Self::Completing => "completing",
            Self::Closed => "closed",
            Self::Errored(_) => "errored",
        };
        write!(f, "{s}")
    }
}

/// What the controller must do in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Declare the pending envelope.
    Declare,
    /// Stream the payload and signal end of data.
    Stream,
    /// Delivery finished with the given acknowledgement.
    Complete(String),
    /// Delivery failed.
    Fail(String),
    /// Nothing to do.
    Ignore,
}

/// Transition function for a session with a message pending delivery.
pub fn on_event(state: &SessionState, event: &TransportEvent) -> Transition {
    use SessionState::*;
    use TransportEvent as Ev;

    match (state, event) {
        (Disconnected | Closed | Errored(_), _) => Transition::Ignore,
        (_, Ev::Error(detail)) => Transition::Fail(detail.clone()),
        (Connecting | Idle, Ev::Idle) => Transition::Declare,
        (Sending(_), Ev::Ready) => Transition::Stream,
        (Completing, Ev::Done(ack)) => Transition::Complete(ack.clone()),
        _ => Transition::Ignore,
    }
}

/// A connected transport client and its readiness state.
pub struct TransportSession {
    client: Box<dyn TransportClient>,
    events: EventStream,
    state: SessionState,
    chunk_size: usize,
    event_timeout: Option<Duration>,
}

impl TransportSession {
    /// Connect `client`. The session starts in [`SessionState::Connecting`].
    pub async fn open(
        mut client: Box<dyn TransportClient>,
        config: &DispatchConfig,
    ) -> Result<Self, TransportError> {
        let events = client.connect().await?;
        debug!(client = client.name(), "Transport session connecting");
        Ok(Self {
            client,
            events,
            state: SessionState::Connecting,
            chunk_size: config.chunk_size,
            event_timeout: config.event_timeout,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether the session finished its last delivery cleanly and can carry
    /// another one once the client signals `Idle` again.
    pub fn is_reusable(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Deliver one payload and return the transport's acknowledgement.
    ///
    /// The envelope is declared only after the client emits `Idle`. Any
    /// failure leaves the session in [`SessionState::Errored`].
    pub async fn deliver(&mut self, payload: &BuiltPayload) -> Result<String, TransportError> {
        if !matches!(self.state, SessionState::Connecting | SessionState::Idle) {
            return Err(TransportError::NotReady(self.state.to_string()));
        }

        loop {
            let event = self.next_event().await?;
            match on_event(&self.state, &event) {
                Transition::Declare => self.declare(&payload.envelope).await?,
                Transition::Stream => self.stream(payload).await?,
                Transition::Complete(ack) => {
                    self.state = SessionState::Idle;
                    debug!(ack = %ack, "Transport acknowledged message");
                    return Ok(ack);
                }
                Transition::Fail(detail) => {
                    return Err(self.fail(TransportError::Rejected(detail)));
                }
                Transition::Ignore => {
                    if event != TransportEvent::Idle {
                        warn!(state = %self.state, ?event, "Ignoring unexpected transport event");
                    }
                }
            }
        }
    }

    /// Close the client. Safe to call in any state.
    ///
    /// An errored session is reset to [`SessionState::Disconnected`]; any
    /// other session ends up [`SessionState::Closed`].
    pub async fn close(&mut self) {
        match self.state {
            SessionState::Closed | SessionState::Disconnected => {}
            SessionState::Errored(_) => {
                self.client.close().await;
                self.state = SessionState::Disconnected;
            }
            _ => {
                self.client.close().await;
                self.state = SessionState::Closed;
            }
        }
    }

    async fn declare(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.state = SessionState::Sending(envelope.clone());
        if let Err(e) = self.client.use_envelope(envelope).await {
            return Err(self.fail(e));
        }
        Ok(())
    }

    async fn stream(&mut self, payload: &BuiltPayload) -> Result<(), TransportError> {
        self.state = SessionState::AwaitingData;
        for chunk in payload.chunks(self.chunk_size) {
            if let Err(e) = self.client.send(chunk).await {
                return Err(self.fail(e));
            }
        }
        if let Err(e) = self.client.end().await {
            return Err(self.fail(e));
        }
        self.state = SessionState::Completing;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        let received = match self.event_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.events.recv()).await {
                Ok(received) => received,
                Err(_) => return Err(self.fail(TransportError::Timeout(limit))),
            },
            None => self.events.recv().await,
        };
        match received {
            Some(event) => Ok(event),
            None => Err(self.fail(TransportError::Closed)),
        }
    }

    fn fail(&mut self, error: TransportError) -> TransportError {
        warn!(state = %self.state, "Transport session failed: {error}");
        self.state = SessionState::Errored(error.to_string());
        error
    }
}
