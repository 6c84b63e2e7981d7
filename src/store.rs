// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backing store capability.
//!
//! A [`Store`] executes a batch of [`Command`]s as one atomic unit and returns
//! one [`Reply`] per command, in command order. Reads (a full load) and writes
//! (a mutation plus its announcement) both go through the same entry point.
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_cache::store::{BoxFuture, Command, Reply, Store};
//!
//! struct Recording;
//!
//! impl Store for Recording {
//!     fn exec(&self, commands: Vec<Command>) -> BoxFuture<'_, Vec<Reply>> {
//!         Box::pin(async move {
//!             Ok(commands.iter().map(|_| Reply::Status).collect())
//!         })
//!     }
//! }
//! ```

use crate::error::{ReplicaError, Result};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A single store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `GET key`
    Get { key: String },
    /// `SET key value [options...]` - `args[0]` is the value.
    Set { key: String, args: Vec<String> },
    /// `DEL key`
    Del { key: String },
    /// `HGETALL key`
    HGetAll { key: String },
    /// `HSET key field value [field value ...]`
    HSet { key: String, args: Vec<String> },
    /// `HDEL key field [field ...]`
    HDel { key: String, fields: Vec<String> },
    /// `PUBLISH topic payload`
    Publish { topic: String, payload: Vec<u8> },
}

impl Command {
    /// Redis verb for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::HGetAll { .. } => "HGETALL",
            Command::HSet { .. } => "HSET",
            Command::HDel { .. } => "HDEL",
            Command::Publish { .. } => "PUBLISH",
        }
    }

    /// Check argument shapes the store would reject anyway.
    ///
    /// Done before a batch is sent so a bad batch fails as a whole.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::Set { args, .. } if args.is_empty() => Err(ReplicaError::Validation(
                "SET requires a value argument".into(),
            )),
            Command::HSet { args, .. } if args.is_empty() || args.len() % 2 != 0 => {
                Err(ReplicaError::Validation(format!(
                    "HSET requires field/value pairs, got {} arguments",
                    args.len()
                )))
            }
            Command::HDel { fields, .. } if fields.is_empty() => Err(ReplicaError::Validation(
                "HDEL requires at least one field".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Raw result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Missing key (GET on an absent key).
    Nil,
    /// A single string value (GET).
    Value(String),
    /// Field/value pairs (HGETALL). Empty when the hash does not exist.
    Fields(Vec<(String, String)>),
    /// Integer reply (DEL, HSET, HDEL, PUBLISH).
    Integer(i64),
    /// Status reply (SET).
    Status,
}

impl Reply {
    /// Interpret a GET reply.
    pub fn into_value(self) -> Result<Option<String>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Value(value) => Ok(Some(value)),
            other => Err(ReplicaError::store_msg(
                "GET",
                format!("unexpected reply {:?}", other),
            )),
        }
    }

    /// Interpret an HGETALL reply.
    pub fn into_fields(self) -> Result<Vec<(String, String)>> {
        match self {
            Reply::Nil => Ok(Vec::new()),
            Reply::Fields(fields) => Ok(fields),
            other => Err(ReplicaError::store_msg(
                "HGETALL",
                format!("unexpected reply {:?}", other),
            )),
        }
    }
}

/// Take the single reply of a one-command read.
pub(crate) fn single_reply(replies: Vec<Reply>, operation: &str) -> Result<Reply> {
    let mut replies = replies.into_iter();
    match (replies.next(), replies.next()) {
        (Some(reply), None) => Ok(reply),
        _ => Err(ReplicaError::store_msg(
            operation,
            "expected exactly one reply",
        )),
    }
}

/// Atomic multi-command execution against the authoritative store.
pub trait Store: Send + Sync + 'static {
    /// Execute `commands` as one transaction; replies match command order.
    fn exec(&self, commands: Vec<Command>) -> BoxFuture<'_, Vec<Reply>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Get { key: "k".into() }.name(), "GET");
        assert_eq!(Command::HGetAll { key: "k".into() }.name(), "HGETALL");
        assert_eq!(
            Command::Publish {
                topic: "t".into(),
                payload: vec![]
            }
            .name(),
            "PUBLISH"
        );
    }

    #[test]
    fn test_validate_set_requires_value() {
        let cmd = Command::Set {
            key: "k".into(),
            args: vec![],
        };
        assert!(matches!(cmd.validate(), Err(ReplicaError::Validation(_))));

        let cmd = Command::Set {
            key: "k".into(),
            args: vec!["1".into(), "EX".into(), "60".into()],
        };
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_validate_hset_requires_pairs() {
        let odd = Command::HSet {
            key: "h".into(),
            args: vec!["a".into(), "1".into(), "b".into()],
        };
        assert!(odd.validate().is_err());

        let empty = Command::HSet {
            key: "h".into(),
            args: vec![],
        };
        assert!(empty.validate().is_err());

        let ok = Command::HSet {
            key: "h".into(),
            args: vec!["a".into(), "1".into()],
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_hdel_requires_field() {
        let cmd = Command::HDel {
            key: "h".into(),
            fields: vec![],
        };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_reply_into_value() {
        assert_eq!(Reply::Nil.into_value().unwrap(), None);
        assert_eq!(
            Reply::Value("x".into()).into_value().unwrap(),
            Some("x".to_string())
        );
        assert!(Reply::Integer(1).into_value().is_err());
    }

    #[test]
    fn test_reply_into_fields() {
        assert!(Reply::Nil.into_fields().unwrap().is_empty());
        let fields = vec![("a".to_string(), "1".to_string())];
        assert_eq!(Reply::Fields(fields.clone()).into_fields().unwrap(), fields);
        assert!(Reply::Status.into_fields().is_err());
    }

    #[test]
    fn test_single_reply() {
        assert_eq!(single_reply(vec![Reply::Nil], "GET").unwrap(), Reply::Nil);
        assert!(single_reply(vec![], "GET").is_err());
        assert!(single_reply(vec![Reply::Nil, Reply::Nil], "GET").is_err());
    }
}
