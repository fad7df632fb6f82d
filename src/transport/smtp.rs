//! SMTP transport client backed by lettre.
//!
//! lettre's `SmtpTransport` is blocking, so every network round trip runs in
//! `spawn_blocking` and reports back through the event channel. Streamed
//! chunks are buffered and submitted with `send_raw` when data ends.

use async_trait::async_trait;
use lettre::address::{Address, Envelope as SmtpEnvelope};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::Response;
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{EventStream, TransportClient, TransportEvent, TransportFactory};
use crate::config::SmtpConfig;
use crate::error::TransportError;
use crate::mail::Envelope;

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// One SMTP connection driven through [`TransportEvent`]s.
pub struct SmtpClient {
    config: SmtpConfig,
    transport: Option<SmtpTransport>,
    events: Option<EventSender>,
    envelope: Option<SmtpEnvelope>,
    buffer: Vec<u8>,
}

impl SmtpClient {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            transport: None,
            events: None,
            envelope: None,
            buffer: Vec::new(),
        }
    }

    fn relay(&self) -> Result<SmtpTransport, TransportError> {
        let builder = if self.config.implicit_tls {
            SmtpTransport::relay(&self.config.host)
        } else {
            SmtpTransport::starttls_relay(&self.config.host)
        }
        .map_err(|e| TransportError::Io(format!("SMTP relay error: {e}")))?;

        let mut builder = builder
            .port(self.config.port)
            .timeout(Some(self.config.timeout));
        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.expose_secret().to_string(),
            ));
        }
        Ok(builder.build())
    }

    fn sender(&self) -> Result<EventSender, TransportError> {
        self.events.clone().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl TransportClient for SmtpClient {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn connect(&mut self) -> Result<EventStream, TransportError> {
        let transport = self.relay()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.transport = Some(transport.clone());
        self.events = Some(tx.clone());

        let host = self.config.host.clone();
        tokio::spawn(async move {
            let checked = tokio::task::spawn_blocking(move || transport.test_connection()).await;
            let event = match checked {
                Ok(Ok(true)) => {
                    info!(host = %host, "SMTP connection established");
                    TransportEvent::Idle
                }
                Ok(Ok(false)) => TransportEvent::Error(format!("SMTP server {host} did not answer NOOP")),
                Ok(Err(e)) => TransportEvent::Error(format!("SMTP connect to {host} failed: {e}")),
                Err(e) => TransportEvent::Error(format!("SMTP connect task failed: {e}")),
            };
            let _ = tx.send(event);
        });
        Ok(rx)
    }

    async fn use_envelope(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let tx = self.sender()?;
        match to_smtp_envelope(envelope) {
            Ok(converted) => {
                self.envelope = Some(converted);
                self.buffer.clear();
                let _ = tx.send(TransportEvent::Ready);
            }
            Err(reason) => {
                warn!("Rejected envelope: {reason}");
                let _ = tx.send(TransportEvent::Error(reason));
            }
        }
        Ok(())
    }

    async fn send(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if self.envelope.is_none() {
            let _ = self
                .sender()?
                .send(TransportEvent::Error("data sent before envelope".into()));
            return Ok(());
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn end(&mut self) -> Result<(), TransportError> {
        let tx = self.sender()?;
        let transport = self.transport.clone().ok_or(TransportError::Closed)?;
        let Some(envelope) = self.envelope.take() else {
            let _ = tx.send(TransportEvent::Error("end of data before envelope".into()));
            return Ok(());
        };
        let data = std::mem::take(&mut self.buffer);
        debug!(bytes = data.len(), "Submitting message over SMTP");

        tokio::spawn(async move {
            let sent =
                tokio::task::spawn_blocking(move || transport.send_raw(&envelope, &data)).await;
            match sent {
                Ok(Ok(response)) => {
                    let _ = tx.send(TransportEvent::Done(acknowledgement(&response)));
                    let _ = tx.send(TransportEvent::Idle);
                }
                Ok(Err(e)) => {
                    let _ = tx.send(TransportEvent::Error(format!("SMTP send failed: {e}")));
                }
                Err(e) => {
                    let _ = tx.send(TransportEvent::Error(format!("SMTP send task failed: {e}")));
                }
            }
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.events = None;
        self.transport = None;
        self.envelope = None;
        self.buffer.clear();
        debug!(host = %self.config.host, "SMTP client closed");
    }
}

/// Opens a fresh [`SmtpClient`] for each session the dispatcher needs.
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    config: SmtpConfig,
}

impl SmtpConnector {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for SmtpConnector {
    fn create(&self) -> Result<Box<dyn TransportClient>, TransportError> {
        Ok(Box::new(SmtpClient::new(self.config.clone())))
    }
}

fn to_smtp_envelope(envelope: &Envelope) -> Result<SmtpEnvelope, String> {
    let parse = |raw: &str| {
        raw.parse::<Address>()
            .map_err(|e| format!("invalid address {raw}: {e}"))
    };
    let from = parse(&envelope.from)?;
    let to = envelope
        .to
        .iter()
        .map(|addr| parse(addr))
        .collect::<Result<Vec<_>, _>>()?;
    SmtpEnvelope::new(Some(from), to).map_err(|e| e.to_string())
}

/// Server reply as a single line, e.g. `250 2.0.0 Ok: queued as 1234`.
fn acknowledgement(response: &Response) -> String {
    let text = response.message().collect::<Vec<_>>().join(" ");
    format!("{} {}", response.code(), text)
}
