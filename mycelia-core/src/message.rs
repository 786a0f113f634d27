use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MessageError;

/// Uniquely identifies a message within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        MessageId(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Simple,
    Atomic,
    Batch,
    Query,
    Transaction,
    Response,
}

/// Reserved metadata fields the kernel attaches or consults. Custom
/// fields pass through untouched alongside these.
pub const META_IN_REPLY_TO: &str = "inReplyTo";
pub const META_CORRELATION_ID: &str = "correlationId";
pub const META_PROCESS_IMMEDIATELY: &str = "processImmediately";
pub const META_IS_RESPONSE: &str = "isResponse";
pub const META_SUCCESS: &str = "success";
pub const META_ERROR: &str = "error";

/// A message's metadata map: reserved fields plus arbitrary
/// user-defined entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaMap(pub HashMap<String, serde_json::Value>);

impl MetaMap {
    pub fn new() -> Self {
        MetaMap(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn in_reply_to(&self) -> Option<MessageId> {
        self.get(META_IN_REPLY_TO)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(MessageId)
    }

    pub fn set_in_reply_to(&mut self, id: MessageId) {
        self.set(META_IN_REPLY_TO, serde_json::Value::String(id.to_string()));
    }

    pub fn process_immediately(&self) -> bool {
        self.get(META_PROCESS_IMMEDIATELY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_response(&self) -> bool {
        self.get(META_IS_RESPONSE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn success(&self) -> Option<bool> {
        self.get(META_SUCCESS).and_then(|v| v.as_bool())
    }

    pub fn set_success(&mut self, success: bool) {
        self.set(META_SUCCESS, serde_json::Value::Bool(success));
    }

    pub fn set_error(&mut self, error: serde_json::Value) {
        self.set(META_ERROR, error);
    }
}

/// An immutable message envelope addressed by `path`.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub path: String,
    pub body: serde_json::Value,
    pub meta: MetaMap,
    pub message_type: MessageType,
    pub transaction_id: Option<Uuid>,
    pub seq: Option<u64>,
}

impl Message {
    pub fn new(path: impl Into<String>, body: serde_json::Value) -> Result<Self, MessageError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Message {
            id: MessageId::new(),
            path,
            body,
            meta: MetaMap::new(),
            message_type: MessageType::Simple,
            transaction_id: None,
            seq: None,
        })
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_meta(mut self, meta: MetaMap) -> Self {
        self.meta = meta;
        self
    }

    /// The scheme segment of `path`, i.e. the destination subsystem name.
    pub fn scheme(&self) -> &str {
        self.path.split("://").next().unwrap_or("")
    }

    pub fn segments(&self) -> Vec<&str> {
        match self.path.split_once("://") {
            Some((_, rest)) if !rest.is_empty() => rest.split('/').collect(),
            _ => Vec::new(),
        }
    }
}

/// `path := scheme "://" segment ("/" segment)*`. Rejects an empty
/// path and a scheme with no segments.
pub fn validate_path(path: &str) -> Result<(), MessageError> {
    if path.is_empty() {
        return Err(MessageError::EmptyPath);
    }
    let Some((scheme, rest)) = path.split_once("://") else {
        return Err(MessageError::InvalidPath {
            path: path.to_string(),
        });
    };
    if scheme.is_empty() {
        return Err(MessageError::InvalidPath {
            path: path.to_string(),
        });
    }
    if rest.is_empty() {
        return Err(MessageError::SchemeOnlyPath {
            path: path.to_string(),
        });
    }
    if rest.split('/').any(|segment| segment.is_empty()) {
        return Err(MessageError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_rejected() {
        assert!(matches!(validate_path(""), Err(MessageError::EmptyPath)));
    }

    #[test]
    fn scheme_only_path_rejected() {
        assert!(matches!(
            validate_path("foo://"),
            Err(MessageError::SchemeOnlyPath { .. })
        ));
    }

    #[test]
    fn well_formed_path_accepted() {
        assert!(validate_path("echo://ping").is_ok());
        assert!(validate_path("workspace://update/{id}").is_ok());
    }

    #[test]
    fn message_exposes_scheme_and_segments() {
        let message = Message::new("echo://ping/42", serde_json::json!({"n": 1})).unwrap();
        assert_eq!(message.scheme(), "echo");
        assert_eq!(message.segments(), vec!["ping", "42"]);
    }

    #[test]
    fn meta_round_trips_reserved_fields() {
        let mut meta = MetaMap::new();
        let reply_to = MessageId::new();
        meta.set_in_reply_to(reply_to);
        meta.set_success(true);
        assert_eq!(meta.in_reply_to(), Some(reply_to));
        assert_eq!(meta.success(), Some(true));
        assert!(!meta.process_immediately());
    }
}
