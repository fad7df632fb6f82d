//! Mail types — the logical message handed to the dispatcher and the
//! serialized payload handed to the transport.

use serde::{Deserialize, Serialize};

/// A mailbox: optional display name plus address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// An identity with no display name.
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }
}

/// A file attached to a mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    pub filename: String,
    /// Raw content; may be empty. Base64 in JSON.
    #[serde(default, with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        mime_type: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            mime_type: mime_type.into(),
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// A logical mail message as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: Identity,
    pub to: Vec<Identity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Identity>,
    /// Envelope-only recipients, never written to headers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Identity>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl MailMessage {
    /// Every address the transport must deliver to, in header order.
    ///
    /// An address listed more than once (compared case-insensitively) keeps
    /// only its first occurrence.
    pub fn recipient_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::new();
        for id in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !addresses
                .iter()
                .any(|seen| seen.eq_ignore_ascii_case(&id.address))
            {
                addresses.push(id.address.clone());
            }
        }
        addresses
    }
}

/// Sender and recipient declaration for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
}

impl Envelope {
    pub fn for_mail(mail: &MailMessage) -> Self {
        Self {
            from: mail.from.address.clone(),
            to: mail.recipient_addresses(),
        }
    }
}

/// Transport-ready output of the message builder.
#[derive(Debug, Clone)]
pub struct BuiltPayload {
    pub envelope: Envelope,
    /// The full RFC 5322 message.
    pub message: Vec<u8>,
    pub encrypted: bool,
}

impl BuiltPayload {
    /// Iterate over the message in chunks of at most `size` bytes.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = &[u8]> {
        self.message.chunks(size.max(1))
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MailMessage {
        MailMessage {
            from: Identity::new("Alice", "a@a.io"),
            to: vec![Identity::new("foo", "b@b.io"), Identity::address("c@c.io")],
            cc: vec![Identity::address("d@d.io")],
            bcc: vec![Identity::address("e@e.io")],
            subject: "foobar".into(),
            body: "hello, world!".into(),
            attachments: vec![],
        }
    }

    #[test]
    fn envelope_includes_cc_and_bcc() {
        let envelope = Envelope::for_mail(&sample());
        assert_eq!(envelope.from, "a@a.io");
        assert_eq!(envelope.to, vec!["b@b.io", "c@c.io", "d@d.io", "e@e.io"]);
    }

    #[test]
    fn envelope_lists_each_address_once() {
        let mut mail = sample();
        mail.cc.push(Identity::new("again", "b@b.io"));
        mail.bcc.push(Identity::address("C@C.io"));
        mail.bcc.push(Identity::address("d@d.io"));

        let envelope = Envelope::for_mail(&mail);
        assert_eq!(envelope.to, vec!["b@b.io", "c@c.io", "d@d.io", "e@e.io"]);
    }

    #[test]
    fn mail_deserializes_without_optional_fields() {
        let json = r#"{
            "from": {"address": "a@a.io"},
            "to": [{"name": "foo", "address": "b@b.io"}],
            "subject": "hi",
            "body": "there"
        }"#;
        let mail: MailMessage = serde_json::from_str(json).unwrap();
        assert!(mail.cc.is_empty());
        assert!(mail.attachments.is_empty());
        assert_eq!(mail.from.name, None);
    }

    #[test]
    fn attachment_content_is_base64_in_json() {
        let attachment = Attachment::new("application/octet-stream", "x.bin", vec![0u8, 255, 1]);
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["content"], "AP8B");

        let back: Attachment = serde_json::from_value(json).unwrap();
        assert_eq!(back, attachment);
    }

    #[test]
    fn payload_chunks_cover_message() {
        let payload = BuiltPayload {
            envelope: Envelope::for_mail(&sample()),
            message: (0u8..=9).collect(),
            encrypted: false,
        };
        let chunks: Vec<&[u8]> = payload.chunks(4).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), payload.message);
    }
}
