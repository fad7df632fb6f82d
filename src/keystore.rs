//! Key store — owns the dispatcher's private credential.
//!
//! The credential is unlocked once on a blocking thread and then handed out
//! as a shared, read-only `Arc` to every build that needs it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use secrecy::SecretString;
use tracing::{info, warn};

use crate::crypto::EncryptionEngine;
use crate::error::{CryptoError, Error};

/// Holds the unlocked private key for an [`EncryptionEngine`].
pub struct KeyStore<E: EncryptionEngine> {
    engine: Arc<E>,
    credential: RwLock<Option<Arc<E::SecretKey>>>,
    unlocking: AtomicBool,
}

/// Clears the in-progress flag when an unlock finishes, successfully or not.
struct UnlockGuard<'a>(&'a AtomicBool);

impl Drop for UnlockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<E: EncryptionEngine> KeyStore<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            credential: RwLock::new(None),
            unlocking: AtomicBool::new(false),
        }
    }

    /// Unlock `private_key_armored` with `passphrase` and keep it.
    ///
    /// Fails with [`Error::InvalidState`] while another unlock is pending and
    /// with [`Error::KeyUnlock`] on a bad passphrase or malformed key. A failed
    /// unlock leaves the previously unlocked credential in place.
    pub async fn unlock(
        &self,
        private_key_armored: String,
        passphrase: SecretString,
    ) -> Result<(), Error> {
        if self.unlocking.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidState(
                "a private key unlock is already in progress".into(),
            ));
        }
        let _guard = UnlockGuard(&self.unlocking);

        let engine = Arc::clone(&self.engine);
        let unlocked = tokio::task::spawn_blocking(move || {
            engine.unlock(&private_key_armored, &passphrase)
        })
        .await
        .map_err(|e| Error::KeyUnlock(CryptoError::Unlock(format!("unlock task failed: {e}"))))?;

        match unlocked {
            Ok(key) => {
                let mut slot = self
                    .credential
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *slot = Some(Arc::new(key));
                info!("Private key unlocked");
                Ok(())
            }
            Err(e) => {
                warn!("Private key unlock failed: {e}");
                Err(Error::KeyUnlock(e))
            }
        }
    }

    /// The unlocked credential, if any.
    pub fn credential(&self) -> Option<Arc<E::SecretKey>> {
        self.credential
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether a credential has been unlocked.
    pub fn is_unlocked(&self) -> bool {
        self.credential().is_some()
    }

    /// Whether an unlock is currently running.
    pub fn is_unlocking(&self) -> bool {
        self.unlocking.load(Ordering::Acquire)
    }
}
