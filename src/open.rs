//! Reading mail produced by the builder.
//!
//! Parses a raw message with mail-parser. If it carries `encrypted.asc`, the
//! attachment is decrypted, optionally verified against the sender's public
//! key, and the inner document is parsed in its place.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mail_parser::{Encoding, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::debug;

use crate::builder::ENCRYPTED_FILENAME;
use crate::crypto::{PgpEngine, PgpSecretKey};
use crate::error::OpenError;
use crate::mail::Attachment;

/// Readable content of a received message.
#[derive(Debug, Clone)]
pub struct OpenedMail {
    pub subject: Option<String>,
    pub encrypted: bool,
    /// Set when the inner signature was checked against a sender key.
    pub verified: bool,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Open `raw`, decrypting with `key` when the message is encrypted.
///
/// With `sender_public_key`, a signature mismatch is an error.
pub fn open_mail(
    engine: &PgpEngine,
    raw: &[u8],
    key: Option<&PgpSecretKey>,
    sender_public_key: Option<&str>,
) -> Result<OpenedMail, OpenError> {
    let outer = MessageParser::default()
        .parse(raw)
        .ok_or(OpenError::Unparseable)?;
    let subject = outer.subject().map(str::to_string);

    let sealed = outer
        .attachments()
        .find(|part| part.attachment_name() == Some(ENCRYPTED_FILENAME));
    let Some(sealed) = sealed else {
        return Ok(OpenedMail {
            subject,
            encrypted: false,
            verified: false,
            body: body_text(&outer),
            attachments: attachments(&outer),
        });
    };

    let key = key.ok_or(OpenError::KeyRequired)?;
    let armored = String::from_utf8_lossy(&part_bytes(&outer, sealed)).into_owned();
    let opened = engine.decrypt(&armored, key)?;
    let verified = match sender_public_key {
        Some(public) => {
            opened.verify(public)?;
            true
        }
        None => false,
    };
    debug!(filename = %opened.filename, verified, "Decrypted message");

    let inner = MessageParser::default()
        .parse(&opened.data)
        .ok_or(OpenError::Unparseable)?;
    Ok(OpenedMail {
        subject,
        encrypted: true,
        verified,
        body: body_text(&inner),
        attachments: attachments(&inner),
    })
}

fn body_text(message: &Message<'_>) -> String {
    message
        .body_text(0)
        .map(|text| text.into_owned())
        .unwrap_or_default()
}

fn attachments(message: &Message<'_>) -> Vec<Attachment> {
    message
        .attachments()
        .map(|part| {
            let mime_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Attachment {
                mime_type,
                filename: part.attachment_name().unwrap_or_default().to_string(),
                content: part_bytes(message, part),
            }
        })
        .collect()
}

/// Decoded bytes of `part`.
///
/// mail-parser hands back text parts as lossily decoded strings, so base64
/// text parts are decoded again from the raw message.
pub fn part_bytes(message: &Message<'_>, part: &MessagePart<'_>) -> Vec<u8> {
    let is_text = matches!(part.body, PartType::Text(_) | PartType::Html(_));
    if is_text && part.encoding == Encoding::Base64 {
        let start = part.raw_body_offset() as usize;
        let end = part.raw_end_offset() as usize;
        if let Some(segment) = message.raw_message().get(start..end)
            && let Some(bytes) = decode_base64_segment(segment)
        {
            return bytes;
        }
    }
    part.contents().to_vec()
}

fn decode_base64_segment(segment: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(segment).ok()?;
    let encoded: String = text
        .lines()
        .map(str::trim)
        .take_while(|line| !line.starts_with("--"))
        .collect();
    STANDARD.decode(encoded).ok()
}
