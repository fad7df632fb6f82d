//! Public entry point: key setup plus queued sending.

use std::sync::Arc;

use secrecy::SecretString;

use crate::builder::MessageBuilder;
use crate::config::DispatchConfig;
use crate::crypto::{EncryptionEngine, PgpEngine};
use crate::dispatch::{DispatchQueue, SendHandle, SendOptions, SendReceipt};
use crate::error::Error;
use crate::keystore::KeyStore;
use crate::transport::TransportFactory;

/// The dispatcher's own private key and the passphrase that unlocks it.
pub struct PrivateKeyOptions {
    pub private_key_armored: String,
    pub passphrase: SecretString,
}

/// Encrypting, signing mail dispatcher.
pub struct Mailer<E: EncryptionEngine = PgpEngine> {
    keys: Arc<KeyStore<E>>,
    queue: DispatchQueue<E>,
}

impl Mailer<PgpEngine> {
    /// OpenPGP mailer with no default transport.
    pub fn openpgp(config: DispatchConfig) -> Self {
        Self::new(Arc::new(PgpEngine::new()), config)
    }
}

impl<E: EncryptionEngine> Mailer<E> {
    /// Every request must bring its own transport client.
    pub fn new(engine: Arc<E>, config: DispatchConfig) -> Self {
        Self::build(engine, config, None)
    }

    /// Requests without a client use sessions opened by `factory`.
    pub fn with_transport_factory(
        engine: Arc<E>,
        config: DispatchConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self::build(engine, config, Some(factory))
    }

    fn build(
        engine: Arc<E>,
        config: DispatchConfig,
        factory: Option<Arc<dyn TransportFactory>>,
    ) -> Self {
        let keys = Arc::new(KeyStore::new(Arc::clone(&engine)));
        let builder = Arc::new(MessageBuilder::new(engine, &config));
        let queue = DispatchQueue::start(builder, Arc::clone(&keys), config, factory);
        Self { keys, queue }
    }

    /// Unlock the signing key used for encrypted mail.
    pub async fn set_private_key(&self, options: PrivateKeyOptions) -> Result<(), Error> {
        self.keys
            .unlock(options.private_key_armored, options.passphrase)
            .await
    }

    pub fn has_private_key(&self) -> bool {
        self.keys.is_unlocked()
    }

    /// Queue a request without waiting for it.
    pub fn submit(&self, options: SendOptions) -> Result<SendHandle, Error> {
        self.queue.submit(options)
    }

    /// Queue a request and wait for its delivery.
    pub async fn send(&self, options: SendOptions) -> Result<SendReceipt, Error> {
        self.submit(options)?.wait().await
    }

    /// Deliver everything already queued, then close the transport.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }
}
