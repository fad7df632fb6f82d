//! Message builder — turns a [`MailMessage`] into transport-ready bytes.
//!
//! Plain mail becomes a `multipart/mixed` message with the body followed by
//! base64 attachments. Encrypted mail serializes that same multipart content
//! as an inner document, encrypts and signs it, and ships the armored result
//! as the single attachment `encrypted.asc` next to a plaintext notice.
//! Addressing headers and the subject always stay in the clear.

use std::sync::Arc;

use lettre::Message;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment as MimeAttachment, Body, Mailbox, MessageBuilder as Headers};
use lettre::message::{MultiPart, SinglePart};
use tracing::debug;

use crate::config::DispatchConfig;
use crate::crypto::{EncryptionEngine, Literal};
use crate::error::{BuildError, Error};
use crate::mail::{Attachment, BuiltPayload, Envelope, Identity, MailMessage};

/// Filename of the encrypted attachment in the outer message.
pub const ENCRYPTED_FILENAME: &str = "encrypted.asc";

/// Filename stored in the engine's literal packet for the inner document.
pub const INNER_FILENAME: &str = "msg.txt";

/// Builds plain or encrypted payloads with a given engine.
pub struct MessageBuilder<E: EncryptionEngine> {
    engine: Arc<E>,
    notice: String,
    user_agent: Option<String>,
}

impl<E: EncryptionEngine> MessageBuilder<E> {
    pub fn new(engine: Arc<E>, config: &DispatchConfig) -> Self {
        Self {
            engine,
            notice: config.encrypted_notice.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    /// Serialize `mail`, encrypting it to `recipient_keys` when `encrypt` is set.
    ///
    /// `credential` is the unlocked signing key; it is required only for
    /// encrypted mail.
    pub async fn build(
        &self,
        mail: &MailMessage,
        recipient_keys: &[String],
        encrypt: bool,
        credential: Option<Arc<E::SecretKey>>,
    ) -> Result<BuiltPayload, Error> {
        let envelope = Envelope::for_mail(mail);
        if envelope.to.is_empty() {
            return Err(BuildError::NoEnvelopeRecipients.into());
        }

        if !encrypt {
            let content = content_multipart(&mail.body, &mail.attachments)?;
            let message = self.headers(mail)?.multipart(content).map_err(encoding)?;
            debug!(
                attachments = mail.attachments.len(),
                "Built plaintext message"
            );
            return Ok(BuiltPayload {
                envelope,
                message: message.formatted(),
                encrypted: false,
            });
        }

        let credential = credential.ok_or(Error::NoKey)?;
        if recipient_keys.is_empty() {
            return Err(Error::NoRecipients);
        }

        let inner = content_multipart(&mail.body, &mail.attachments)?.formatted();
        let armored = self.seal(inner, recipient_keys, credential).await?;

        let outer = MultiPart::mixed()
            .singlepart(SinglePart::plain(self.notice.clone()))
            .singlepart(attachment_part(
                ENCRYPTED_FILENAME,
                self.engine.armored_content_type(),
                armored.into_bytes(),
            )?);
        let message = self.headers(mail)?.multipart(outer).map_err(encoding)?;

        debug!(
            attachments = mail.attachments.len(),
            recipients = recipient_keys.len(),
            "Built encrypted message"
        );
        Ok(BuiltPayload {
            envelope,
            message: message.formatted(),
            encrypted: true,
        })
    }

    /// Encrypt and sign the inner document on a blocking thread.
    async fn seal(
        &self,
        inner: Vec<u8>,
        recipient_keys: &[String],
        credential: Arc<E::SecretKey>,
    ) -> Result<String, Error> {
        let engine = Arc::clone(&self.engine);
        let recipients = recipient_keys.to_vec();
        let armored = tokio::task::spawn_blocking(move || {
            engine.encrypt_and_sign(
                Literal {
                    filename: INNER_FILENAME,
                    data: &inner,
                },
                &recipients,
                &credential,
            )
        })
        .await
        .map_err(|e| BuildError::Task(e.to_string()))?
        .map_err(BuildError::from)?;
        Ok(armored)
    }

    /// Addressing headers shared by the plain and encrypted forms.
    fn headers(&self, mail: &MailMessage) -> Result<Headers, BuildError> {
        let mut headers = Message::builder()
            .from(mailbox(&mail.from)?)
            .subject(mail.subject.clone())
            .message_id(None);
        for to in &mail.to {
            headers = headers.to(mailbox(to)?);
        }
        for cc in &mail.cc {
            headers = headers.cc(mailbox(cc)?);
        }
        for bcc in &mail.bcc {
            headers = headers.bcc(mailbox(bcc)?);
        }
        if let Some(agent) = &self.user_agent {
            headers = headers.user_agent(agent.clone());
        }
        Ok(headers)
    }
}

/// Body plus attachments, exactly as they appear in an unencrypted message.
fn content_multipart(body: &str, attachments: &[Attachment]) -> Result<MultiPart, BuildError> {
    let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(body.to_string()));
    for attachment in attachments {
        multipart = multipart.singlepart(attachment_part(
            &attachment.filename,
            &attachment.mime_type,
            attachment.content.clone(),
        )?);
    }
    Ok(multipart)
}

/// Base64 attachment part. Base64 keeps binary and empty content byte-exact.
fn attachment_part(
    filename: &str,
    mime_type: &str,
    content: Vec<u8>,
) -> Result<SinglePart, BuildError> {
    let content_type =
        ContentType::parse(mime_type).map_err(|_| BuildError::InvalidContentType {
            content_type: mime_type.to_string(),
            filename: filename.to_string(),
        })?;
    let body = Body::new_with_encoding(content, ContentTransferEncoding::Base64)
        .map_err(|_| BuildError::Encoding(format!("cannot base64-encode {filename}")))?;
    Ok(MimeAttachment::new(filename.to_string()).body(body, content_type))
}

fn mailbox(identity: &Identity) -> Result<Mailbox, BuildError> {
    let address = identity
        .address
        .parse()
        .map_err(|e: lettre::address::AddressError| BuildError::InvalidAddress {
            address: identity.address.clone(),
            reason: e.to_string(),
        })?;
    Ok(Mailbox::new(identity.name.clone(), address))
}

fn encoding(e: lettre::error::Error) -> BuildError {
    BuildError::Encoding(e.to_string())
}
