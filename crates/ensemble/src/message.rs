//! # Messages
//!
//! A [`Message`] is the unit of data flowing between actors: an immutable body
//! tagged with a MIME type, plus a map of headers. Forwarding a message with an
//! extra header produces a new message and leaves the original untouched, so
//! every consumer that already holds a reference keeps seeing the same value.

use crate::errors::FormatError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Header stamped with the name of the actor that created the message.
pub const HEADER_SOURCE: &str = "ensemble.source";
/// Header stamped with the per-run sequence number of the producing actor.
pub const HEADER_SEQUENCE: &str = "ensemble.sequence-id";
/// Header stamped with the creation time (RFC 3339).
pub const HEADER_CREATED_AT: &str = "ensemble.created-at";

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageFields")]
pub struct Message {
    body: Bytes,
    mime_type: String,
    headers: Arc<BTreeMap<String, String>>,
}

/// Wire shape of a [`Message`]; deserialization goes through
/// [`Message::create`] so the MIME type is checked.
#[derive(Deserialize)]
struct MessageFields {
    body: Bytes,
    mime_type: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl TryFrom<MessageFields> for Message {
    type Error = FormatError;

    fn try_from(fields: MessageFields) -> Result<Self, Self::Error> {
        let mut message = Message::create(fields.body, fields.mime_type)?;
        message.headers = Arc::new(fields.headers);
        Ok(message)
    }
}

impl Message {
    /// Creates a message with the given body and MIME type.
    ///
    /// Fails with [`FormatError`] when `mime_type` is empty.
    pub fn create(body: impl Into<Bytes>, mime_type: impl Into<String>) -> Result<Self, FormatError> {
        let mime_type = mime_type.into();
        if mime_type.trim().is_empty() {
            return Err(FormatError("mime type must not be empty".to_string()));
        }
        Ok(Self {
            body: body.into(),
            mime_type,
            headers: Arc::new(BTreeMap::new()),
        })
    }

    /// Creates a `text/plain` message.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Bytes::from(body.into()),
            mime_type: MIME_TEXT.to_string(),
            headers: Arc::new(BTreeMap::new()),
        }
    }

    /// Returns a copy of this message carrying `name = value`, replacing any
    /// previous value. The original message is not modified.
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        Arc::make_mut(&mut copy.headers).insert(name.into(), value.into());
        copy
    }

    /// Returns a copy of this message without the named header.
    pub fn without_header(&self, name: &str) -> Self {
        if !self.headers.contains_key(name) {
            return self.clone();
        }
        let mut copy = self.clone();
        Arc::make_mut(&mut copy.headers).remove(name);
        copy
    }

    /// Returns a copy of this message with a replaced body and MIME type,
    /// keeping all headers.
    pub fn with_body(
        &self,
        body: impl Into<Bytes>,
        mime_type: impl Into<String>,
    ) -> Result<Self, FormatError> {
        let mut copy = Self::create(body, mime_type)?;
        copy.headers = Arc::clone(&self.headers);
        Ok(copy)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Reads the body as UTF-8 text.
    pub fn body_text(&self) -> Result<&str, FormatError> {
        std::str::from_utf8(&self.body)
            .map_err(|e| FormatError(format!("body is not valid UTF-8: {}", e)))
    }

    /// The producing actor, when the message was created through an actor context.
    pub fn source(&self) -> Option<&str> {
        self.header(HEADER_SOURCE)
    }

    pub fn sequence_id(&self) -> Option<u64> {
        self.header(HEADER_SEQUENCE).and_then(|s| s.parse().ok())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Message");
        debug.field("mime_type", &self.mime_type);
        match self.body_text() {
            Ok(text) if text.len() <= 64 => debug.field("body", &text),
            _ => debug.field("body_len", &self.body.len()),
        };
        debug.field("headers", &self.headers).finish()
    }
}
