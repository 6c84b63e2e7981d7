// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Codec hooks: domain values to store arguments and back.
//!
//! Each cache is parameterized over a codec. A codec composes a domain value
//! into one or more string arguments for the store command that writes it, and
//! revives the stored string into the domain value again.
//!
//! - [`ValueCodec`]: `compose(value)` yields `[value, ...extra SET options]`.
//! - [`FieldCodec`]: `compose(key, value)` yields `[field, value, ...more
//!   field/value pairs]`. Field names go through `compose_field` and
//!   `revive_field`, so the key held in memory may differ from the stored
//!   field name.
//!
//! The element count of composed arguments cannot be expressed in the type,
//! so [`ValueArgs::from_composed`] and [`FieldArgs::from_composed`] check it
//! at runtime, before any command reaches the store.
//!
//! [`JsonCodec`] is the default for both shapes.

use crate::error::{ReplicaError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts a scalar domain value to store arguments and back.
pub trait ValueCodec<T>: Send + Sync + 'static {
    /// Compose `value` into `[serialized, ...extra SET arguments]`.
    fn compose(&self, value: &T) -> Result<Vec<String>>;

    /// Revive a stored string.
    fn revive(&self, raw: &str) -> Result<T>;
}

/// Converts hash fields and their values to store arguments and back.
///
/// Field names map through [`compose_field`](FieldCodec::compose_field) and
/// [`revive_field`](FieldCodec::revive_field) only. Writes, deletes and every
/// reload use the same pair, so the hash the store holds and the map a
/// replica holds stay keyed the same way.
pub trait FieldCodec<T>: Send + Sync + 'static {
    /// Serialize one value.
    fn compose_value(&self, value: &T) -> Result<String>;

    /// Revive one stored value.
    fn revive_value(&self, raw: &str) -> Result<T>;

    /// Stored field name for a state key.
    fn compose_field(&self, key: &str) -> String {
        key.to_string()
    }

    /// State key for a stored field name.
    fn revive_field(&self, field: &str) -> String {
        field.to_string()
    }

    /// Compose into `[field, serialized, ...more field/value pairs]`.
    ///
    /// Overrides may append pairs, but the first element must stay
    /// `compose_field(key)`; the cache rejects anything else before writing.
    fn compose(&self, key: &str, value: &T) -> Result<Vec<String>> {
        Ok(vec![self.compose_field(key), self.compose_value(value)?])
    }
}

/// JSON codec backed by `serde_json`. Hash field names are stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> ValueCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn compose(&self, value: &T) -> Result<Vec<String>> {
        let serialized = serde_json::to_string(value).map_err(ReplicaError::codec)?;
        Ok(vec![serialized])
    }

    fn revive(&self, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(ReplicaError::codec)
    }
}

impl<T> FieldCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn compose_value(&self, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(ReplicaError::codec)
    }

    fn revive_value(&self, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(ReplicaError::codec)
    }
}

/// Validated output of [`ValueCodec::compose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueArgs {
    args: Vec<String>,
}

impl ValueArgs {
    /// Require at least one element (the serialized value).
    pub fn from_composed(args: Vec<String>) -> Result<Self> {
        if args.is_empty() {
            return Err(ReplicaError::Validation(
                "compose must return at least 1 argument (the serialized value)".into(),
            ));
        }
        Ok(Self { args })
    }

    /// The serialized value announced to other replicas.
    pub fn value(&self) -> &str {
        &self.args[0]
    }

    /// Every argument, value first, for the SET command.
    pub fn into_args(self) -> Vec<String> {
        self.args
    }
}

/// Validated output of [`FieldCodec::compose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldArgs {
    args: Vec<String>,
}

impl FieldArgs {
    /// Require at least two elements, the first being `expected_field`.
    pub fn from_composed(args: Vec<String>, expected_field: &str) -> Result<Self> {
        if args.len() < 2 {
            return Err(ReplicaError::Validation(format!(
                "compose must return at least 2 arguments (field and value), got {}",
                args.len()
            )));
        }
        if args[0] != expected_field {
            return Err(ReplicaError::Validation(format!(
                "compose wrote field {:?} but compose_field gives {:?}",
                args[0], expected_field
            )));
        }
        Ok(Self { args })
    }

    /// Serialized field name.
    pub fn field(&self) -> &str {
        &self.args[0]
    }

    /// Serialized value.
    pub fn value(&self) -> &str {
        &self.args[1]
    }

    /// Every argument for the HSET command.
    pub fn into_args(self) -> Vec<String> {
        self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Flag {
        enabled: bool,
        rollout: u8,
    }

    #[test]
    fn test_json_value_codec_roundtrip() {
        let flag = Flag {
            enabled: true,
            rollout: 40,
        };
        let args = ValueCodec::compose(&JsonCodec, &flag).unwrap();
        assert_eq!(args.len(), 1);

        let revived: Flag = ValueCodec::revive(&JsonCodec, &args[0]).unwrap();
        assert_eq!(revived, flag);
    }

    #[test]
    fn test_json_value_codec_revive_error() {
        let result: Result<Flag> = ValueCodec::revive(&JsonCodec, "{not json");
        assert!(matches!(result, Err(ReplicaError::Codec(_))));
    }

    #[test]
    fn test_json_field_codec_keeps_field_name() {
        let args = FieldCodec::compose(&JsonCodec, "user:1", &42u32).unwrap();
        assert_eq!(args, vec!["user:1".to_string(), "42".to_string()]);

        let value: u32 = FieldCodec::revive_value(&JsonCodec, "42").unwrap();
        assert_eq!(value, 42);

        assert_eq!(FieldCodec::<u32>::compose_field(&JsonCodec, "user:1"), "user:1");
        assert_eq!(FieldCodec::<u32>::revive_field(&JsonCodec, "user:1"), "user:1");
    }

    /// Maps names only through the field hooks.
    struct Tagged;

    impl FieldCodec<u32> for Tagged {
        fn compose_value(&self, value: &u32) -> Result<String> {
            Ok(value.to_string())
        }

        fn revive_value(&self, raw: &str) -> Result<u32> {
            raw.parse().map_err(ReplicaError::codec)
        }

        fn compose_field(&self, key: &str) -> String {
            format!("tag:{}", key)
        }
    }

    #[test]
    fn test_default_compose_uses_field_hook() {
        let args = Tagged.compose("ann", &3).unwrap();
        assert_eq!(args, vec!["tag:ann".to_string(), "3".to_string()]);
        assert!(FieldArgs::from_composed(args, &Tagged.compose_field("ann")).is_ok());
    }

    #[test]
    fn test_value_args_requires_one() {
        assert!(matches!(
            ValueArgs::from_composed(vec![]),
            Err(ReplicaError::Validation(_))
        ));

        let args = ValueArgs::from_composed(vec!["1".into(), "EX".into(), "60".into()]).unwrap();
        assert_eq!(args.value(), "1");
        assert_eq!(args.into_args().len(), 3);
    }

    #[test]
    fn test_field_args_requires_two() {
        let err = FieldArgs::from_composed(vec!["only-field".into()], "only-field").unwrap_err();
        assert!(err.to_string().contains("got 1"));

        let args = FieldArgs::from_composed(vec!["f".into(), "v".into()], "f").unwrap();
        assert_eq!(args.field(), "f");
        assert_eq!(args.value(), "v");
    }

    #[test]
    fn test_field_args_rejects_foreign_field() {
        let err = FieldArgs::from_composed(vec!["user:f".into(), "v".into()], "f").unwrap_err();
        assert!(matches!(err, ReplicaError::Validation(_)));
    }
}
