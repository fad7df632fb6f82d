//! Encryption engine abstraction.
//!
//! The dispatcher never touches key material directly. It asks an
//! [`EncryptionEngine`] to unlock the sender's private key once, then to
//! encrypt-and-sign each inner document into a single armored block.
//!
//! - `openpgp` — OpenPGP keys and messages through rPGP

pub mod openpgp;

use secrecy::SecretString;

use crate::error::CryptoError;

pub use openpgp::{
    DEFAULT_S2K_COUNT, OpenedMessage, PgpEngine, PgpSecretKey, generate_keypair,
};

/// Plaintext handed to the engine together with the filename it is stored under.
#[derive(Debug, Clone, Copy)]
pub struct Literal<'a> {
    pub filename: &'a str,
    pub data: &'a [u8],
}

/// Public-key encryption capability consumed by the message builder.
///
/// Implementations are CPU-bound and synchronous; callers move them onto
/// blocking threads.
pub trait EncryptionEngine: Send + Sync + 'static {
    /// Unlocked private key, shared read-only after unlock.
    type SecretKey: Send + Sync + 'static;

    /// Parse an armored private key and unlock it with `passphrase`.
    fn unlock(
        &self,
        private_key_armored: &str,
        passphrase: &SecretString,
    ) -> Result<Self::SecretKey, CryptoError>;

    /// Encrypt `literal` to every key in `recipients` and sign it with `signer`.
    fn encrypt_and_sign(
        &self,
        literal: Literal<'_>,
        recipients: &[String],
        signer: &Self::SecretKey,
    ) -> Result<String, CryptoError>;

    /// MIME type of the armored output.
    fn armored_content_type(&self) -> &'static str;
}
