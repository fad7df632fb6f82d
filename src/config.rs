//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default human-readable body placed next to `encrypted.asc`.
pub const DEFAULT_ENCRYPTED_NOTICE: &str = "This message is encrypted. \
Open it with a mail client that supports encrypted messages to read its contents.";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Size of each chunk handed to the transport client while streaming a payload.
    pub chunk_size: usize,
    /// Deadline for each transport event. `None` leaves timeouts to the client.
    pub event_timeout: Option<Duration>,
    /// Outer body of encrypted messages.
    pub encrypted_notice: String,
    /// Value of the `User-Agent` header, if any.
    pub user_agent: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            event_timeout: None,
            encrypted_notice: DEFAULT_ENCRYPTED_NOTICE.to_string(),
            user_agent: Some(format!("mailseal/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

impl DispatchConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// - `MAILSEAL_CHUNK_SIZE` — bytes per streamed chunk
    /// - `MAILSEAL_EVENT_TIMEOUT_SECS` — per-event deadline, `0` disables it
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(chunk_size) = parse_env::<usize>("MAILSEAL_CHUNK_SIZE")? {
            if chunk_size == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "MAILSEAL_CHUNK_SIZE".into(),
                    message: "must be greater than zero".into(),
                });
            }
            config.chunk_size = chunk_size;
        }

        if let Some(secs) = parse_env::<u64>("MAILSEAL_EVENT_TIMEOUT_SECS")? {
            config.event_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

/// SMTP relay configuration for the lettre-backed transport client.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Connect with implicit TLS instead of STARTTLS.
    pub implicit_tls: bool,
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `MAILSEAL_SMTP_HOST` is not set (no default transport).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("MAILSEAL_SMTP_HOST") else {
            return Ok(None);
        };

        let implicit_tls = parse_env::<bool>("MAILSEAL_SMTP_IMPLICIT_TLS")?.unwrap_or(false);
        let port = parse_env::<u16>("MAILSEAL_SMTP_PORT")?
            .unwrap_or(if implicit_tls { 465 } else { 587 });
        let timeout_secs = parse_env::<u64>("MAILSEAL_SMTP_TIMEOUT_SECS")?.unwrap_or(60);

        let username = std::env::var("MAILSEAL_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("MAILSEAL_SMTP_PASSWORD").unwrap_or_default();

        Ok(Some(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            implicit_tls,
            timeout: Duration::from_secs(timeout_secs),
        }))
    }
}

/// Parse an optional environment variable, rejecting unparseable values.
fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert!(config.event_timeout.is_none());
        assert!(config.encrypted_notice.contains("encrypted"));
    }

    #[test]
    fn parse_env_missing_is_none() {
        let value: Option<u16> = parse_env("MAILSEAL_TEST_SURELY_UNSET_VAR").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn parse_env_rejects_garbage() {
        // SAFETY: the variable name is unique to this test; no other thread reads it.
        unsafe { std::env::set_var("MAILSEAL_TEST_BAD_PORT", "not-a-port") };
        let err = parse_env::<u16>("MAILSEAL_TEST_BAD_PORT").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        unsafe { std::env::remove_var("MAILSEAL_TEST_BAD_PORT") };
    }

    #[test]
    fn smtp_from_env_returns_none_when_no_host() {
        // SAFETY: This test runs in isolation; no other thread reads MAILSEAL_SMTP_HOST concurrently.
        unsafe { std::env::remove_var("MAILSEAL_SMTP_HOST") };
        assert!(SmtpConfig::from_env().unwrap().is_none());
    }
}
