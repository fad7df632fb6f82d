//! Error types for mailseal.

use std::time::Duration;

/// Top-level error type surfaced to callers of the mailer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to unlock private key: {0}")]
    KeyUnlock(#[source] CryptoError),

    #[error("No private key unlocked; call set_private_key before sending encrypted mail")]
    NoKey,

    #[error("Encryption requested without any recipient public keys")]
    NoRecipients,

    #[error("Failed to build message: {0}")]
    Build(#[from] BuildError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open message: {0}")]
    Open(#[from] OpenError),
}

/// Errors raised by the encryption engine.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid {kind}: {reason}")]
    InvalidKey { kind: &'static str, reason: String },

    #[error("Public key {0} has no encryption subkey")]
    NoEncryptionKey(String),

    #[error("Could not unlock secret key material: {0}")]
    Unlock(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Message is not addressed to this key")]
    NotARecipient,

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Signature verification failed")]
    SignatureVerification,
}

/// Message serialization errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid content type {content_type} for {filename}")]
    InvalidContentType {
        content_type: String,
        filename: String,
    },

    #[error("Message has no recipients")]
    NoEnvelopeRecipients,

    #[error("Failed to encode message: {0}")]
    Encoding(String),

    #[error("Encryption engine error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Build task failed: {0}")]
    Task(String),
}

/// Failures surfaced by (or about) the transport client.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport rejected the message: {0}")]
    Rejected(String),

    #[error("Transport closed the session unexpectedly")]
    Closed,

    #[error("No transport event within {0:?}")]
    Timeout(Duration),

    #[error("No transport client available for this request")]
    NoClient,

    #[error("Transport session cannot accept a message in state {0}")]
    NotReady(String),

    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors while reading a received message.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Input is not a parseable mail message")]
    Unparseable,

    #[error("Message is encrypted but no private key was given")]
    KeyRequired,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result type alias for mailseal.
pub type Result<T> = std::result::Result<T, Error>;
