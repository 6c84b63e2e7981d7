// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire format for announcements.
//!
//! Every bus message is one self-contained JSON envelope:
//!
//! ```text
//! { "op": "load" | "clear" | "set" | "delete", "payload": <optional> }
//! ```
//!
//! An omitted `payload` decodes as absent. The payload shape depends on the
//! operation and the cache variant:
//!
//! | op | value cache | hash cache |
//! |----|-------------|------------|
//! | `load` | reload id (string) | reload id (string) |
//! | `clear` | absent | absent |
//! | `set` | serialized value | `[field, serialized value]` |
//! | `delete` | - | serialized field |
//!
//! `"reload"` is accepted as a synonym of `"load"` when decoding. Unknown
//! operations decode fine and are reported by [`Envelope::tag`] as `None`.

use crate::error::{ReplicaError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTag {
    /// Full reload from the store.
    Load,
    /// Reset to the variant's empty state.
    Clear,
    /// Assign a value (or field).
    Set,
    /// Remove a field.
    Delete,
}

impl OpTag {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpTag::Load => "load",
            OpTag::Clear => "clear",
            OpTag::Set => "set",
            OpTag::Delete => "delete",
        }
    }

    /// Parse a wire name; `None` for unknown operations.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "load" | "reload" => Some(OpTag::Load),
            "clear" => Some(OpTag::Clear),
            "set" => Some(OpTag::Set),
            "delete" => Some(OpTag::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded (or to-be-encoded) bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(tag: OpTag, payload: Option<Value>) -> Self {
        Self {
            op: tag.as_str().to_string(),
            payload,
        }
    }

    /// Known operation, or `None` if this replica does not understand it.
    pub fn tag(&self) -> Option<OpTag> {
        OpTag::parse(&self.op)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ReplicaError::Decode(format!("encode failed: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ReplicaError::Decode(e.to_string()))
    }

    /// Deserialize the payload into the operation's typed shape.
    ///
    /// An absent payload is treated as JSON `null`.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P> {
        let value = self.payload.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            ReplicaError::Decode(format!("invalid payload for op '{}': {}", self.op, e))
        })
    }
}
