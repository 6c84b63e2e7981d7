//! Replica engine types.
//!
//! Every mutation a replica applies, whether it was issued locally or
//! received from another process, is one [`Operation`]:
//!
//! ```text
//!   bus message ──decode──► Envelope { op, payload }
//!                                │
//!                  OpTag + typed payload (per variant)
//!                                │
//!                                ▼
//!              Operation::{Load, Clear, Set, Delete}
//!                                │
//!               reduce(state, operation) -> state
//! ```

use crate::envelope::OpTag;
use crate::error::ReplicaError;
use std::sync::Arc;

/// One mutation, with the payload type each variant expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<L, S, D> {
    /// Replace the whole state with freshly read store data.
    Load(L),
    /// Reset to the empty state.
    Clear,
    /// Assign a value.
    Set(S),
    /// Remove a field.
    Delete(D),
}

impl<L, S, D> Operation<L, S, D> {
    pub fn tag(&self) -> OpTag {
        match self {
            Operation::Load(_) => OpTag::Load,
            Operation::Clear => OpTag::Clear,
            Operation::Set(_) => OpTag::Set,
            Operation::Delete(_) => OpTag::Delete,
        }
    }
}

/// Handle returned by listener registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Called with the new state after every applied operation.
pub type ChangeListener<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Called with every failure of the inbound replication path.
pub type ErrorListener = Arc<dyn Fn(&ReplicaError) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    type Op = Operation<Vec<u8>, String, String>;

    #[test]
    fn test_operation_tags() {
        assert_eq!(Op::Load(vec![]).tag(), OpTag::Load);
        assert_eq!(Op::Clear.tag(), OpTag::Clear);
        assert_eq!(Op::Set("v".into()).tag(), OpTag::Set);
        assert_eq!(Op::Delete("f".into()).tag(), OpTag::Delete);
    }

    #[test]
    fn test_listener_id_display() {
        assert_eq!(ListenerId(7).to_string(), "listener-7");
        assert!(ListenerId(1) < ListenerId(2));
    }
}
