//! Dispatch queue — serializes send requests onto one transport session.
//!
//! `submit` starts building the payload right away and enqueues the request
//! on an unbounded channel. A single driving task owns the
//! [`TransportSession`] and works through the queue in FIFO order, so
//! deliveries never interleave and replies arrive in submission order even
//! when builds finish out of order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::MessageBuilder;
use crate::config::DispatchConfig;
use crate::crypto::EncryptionEngine;
use crate::error::{BuildError, Error, TransportError};
use crate::keystore::KeyStore;
use crate::mail::{BuiltPayload, MailMessage};
use crate::session::TransportSession;
use crate::transport::{TransportClient, TransportFactory};

/// One send request.
pub struct SendOptions {
    pub mail: MailMessage,
    pub encrypt: bool,
    /// Armored public keys to encrypt to. Required when `encrypt` is set.
    pub public_keys_armored: Vec<String>,
    /// Client to deliver through. `None` reuses the idle session or asks the
    /// configured [`TransportFactory`] for a new client.
    pub transport: Option<Box<dyn TransportClient>>,
}

impl SendOptions {
    /// Plaintext delivery of `mail` through the default transport.
    pub fn new(mail: MailMessage) -> Self {
        Self {
            mail,
            encrypt: false,
            public_keys_armored: Vec::new(),
            transport: None,
        }
    }

    /// Encrypt to `public_keys_armored` and sign with the unlocked key.
    pub fn encrypted(mut self, public_keys_armored: Vec<String>) -> Self {
        self.encrypt = true;
        self.public_keys_armored = public_keys_armored;
        self
    }

    /// Deliver through `client` instead of the default transport.
    pub fn via(mut self, client: Box<dyn TransportClient>) -> Self {
        self.transport = Some(client);
        self
    }
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub request_id: Uuid,
    /// Final acknowledgement text from the transport.
    pub ack: String,
    pub encrypted: bool,
    pub sent_at: DateTime<Utc>,
}

type Reply = oneshot::Sender<Result<SendReceipt, Error>>;

/// A queued request: its build in progress and where to report the outcome.
struct Job {
    id: Uuid,
    encrypted: bool,
    build: JoinHandle<Result<BuiltPayload, Error>>,
    transport: Option<Box<dyn TransportClient>>,
    reply: Reply,
}

/// Completion handle for a submitted request.
pub struct SendHandle {
    id: Uuid,
    rx: oneshot::Receiver<Result<SendReceipt, Error>>,
}

impl SendHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the request to reach a terminal state.
    pub async fn wait(self) -> Result<SendReceipt, Error> {
        self.rx.await.map_err(|_| {
            Error::InvalidState(format!(
                "dispatcher stopped before request {} completed",
                self.id
            ))
        })?
    }
}

/// FIFO queue in front of the driving task.
pub struct DispatchQueue<E: EncryptionEngine> {
    builder: Arc<MessageBuilder<E>>,
    keys: Arc<KeyStore<E>>,
    jobs: mpsc::UnboundedSender<Job>,
    driver: JoinHandle<()>,
}

impl<E: EncryptionEngine> DispatchQueue<E> {
    /// Start the driving task. Must be called within a tokio runtime.
    pub fn start(
        builder: Arc<MessageBuilder<E>>,
        keys: Arc<KeyStore<E>>,
        config: DispatchConfig,
        factory: Option<Arc<dyn TransportFactory>>,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            config,
            factory,
            session: None,
        };
        let driver = tokio::spawn(driver.run(rx));
        Self {
            builder,
            keys,
            jobs,
            driver,
        }
    }

    /// Enqueue `request` and return its completion handle.
    ///
    /// The credential is read now, so a key unlocked after this call does not
    /// apply to this request.
    pub fn submit(&self, request: SendOptions) -> Result<SendHandle, Error> {
        let SendOptions {
            mail,
            encrypt,
            public_keys_armored,
            transport,
        } = request;
        let id = Uuid::new_v4();
        let credential = if encrypt { self.keys.credential() } else { None };

        let builder = Arc::clone(&self.builder);
        let build = tokio::spawn(async move {
            builder
                .build(&mail, &public_keys_armored, encrypt, credential)
                .await
        });

        let (reply, rx) = oneshot::channel();
        let job = Job {
            id,
            encrypted: encrypt,
            build,
            transport,
            reply,
        };
        if self.jobs.send(job).is_err() {
            return Err(Error::InvalidState("dispatcher is not running".into()));
        }
        debug!(request_id = %id, encrypt, "Send request queued");
        Ok(SendHandle { id, rx })
    }

    /// Stop accepting requests, finish the queued ones and close the session.
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(e) = self.driver.await {
            warn!("Dispatch driver ended abnormally: {e}");
        }
    }
}

/// Owns the transport session; the only code that drives a client.
struct Driver {
    config: DispatchConfig,
    factory: Option<Arc<dyn TransportFactory>>,
    session: Option<TransportSession>,
}

impl Driver {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            let Job {
                id,
                encrypted,
                build,
                transport,
                reply,
            } = job;

            let outcome = match self.process(build, transport).await {
                Ok(ack) => {
                    info!(request_id = %id, ack = %ack, encrypted, "Mail delivered");
                    Ok(SendReceipt {
                        request_id: id,
                        ack,
                        encrypted,
                        sent_at: Utc::now(),
                    })
                }
                Err(e) => {
                    warn!(request_id = %id, "Send request failed: {e}");
                    Err(e)
                }
            };

            if reply.send(outcome).is_err() {
                debug!(request_id = %id, "Requester went away before the reply");
            }
        }

        self.reset().await;
        debug!("Dispatch driver stopped");
    }

    async fn process(
        &mut self,
        build: JoinHandle<Result<BuiltPayload, Error>>,
        transport: Option<Box<dyn TransportClient>>,
    ) -> Result<String, Error> {
        let payload = build
            .await
            .map_err(|e| BuildError::Task(e.to_string()))??;

        let session = self.session_for(transport).await?;
        match session.deliver(&payload).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                self.reset().await;
                Err(e.into())
            }
        }
    }

    /// Pick the session for the next delivery.
    ///
    /// A request's own client always gets a fresh session. Otherwise an idle
    /// session is reused, or the factory opens a new one.
    async fn session_for(
        &mut self,
        client: Option<Box<dyn TransportClient>>,
    ) -> Result<&mut TransportSession, TransportError> {
        let reusable = client.is_none()
            && self
                .session
                .as_ref()
                .is_some_and(TransportSession::is_reusable);

        if !reusable {
            self.reset().await;
            let client = match (client, &self.factory) {
                (Some(client), _) => client,
                (None, Some(factory)) => factory.create()?,
                (None, None) => return Err(TransportError::NoClient),
            };
            self.session = Some(TransportSession::open(client, &self.config).await?);
        }

        self.session.as_mut().ok_or(TransportError::NoClient)
    }

    /// Close and forget the current session, if any.
    async fn reset(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}
