//! Message envelope types
//!
//! The wire codec is a collaborator concern; the coordinator only moves
//! opaque payloads around. An envelope carries the target entity id, the
//! encoded request, and an optional reply identifier used to route a
//! response back to the originator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier correlating a request with its reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyId(pub String);

impl ReplyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque request addressed to a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub entity_id: String,
    pub payload: Vec<u8>,
    pub reply_id: Option<ReplyId>,
}

impl Envelope {
    /// Fire-and-forget envelope with no reply routing.
    pub fn new(entity_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            entity_id: entity_id.into(),
            payload,
            reply_id: None,
        }
    }

    pub fn with_reply(mut self, reply_id: ReplyId) -> Self {
        self.reply_id = Some(reply_id);
        self
    }
}
