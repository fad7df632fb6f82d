//! mailseal — encrypting, signing mail dispatcher.

pub mod builder;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod keystore;
pub mod mail;
pub mod mailer;
pub mod open;
pub mod session;
pub mod transport;

pub use dispatch::{SendHandle, SendOptions, SendReceipt};
pub use error::{Error, Result};
pub use mail::{Attachment, Identity, MailMessage};
pub use mailer::{Mailer, PrivateKeyOptions};
