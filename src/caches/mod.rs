//! Cache variants built on the replica engine.
//!
//! | | [`ValueCache`] | [`HashCache`] |
//! |---|---|---|
//! | store shape | one string key | one hash |
//! | state | `Option<T>` | `HashMap<String, T>` |
//! | codec | [`ValueCodec`](crate::codec::ValueCodec) | [`FieldCodec`](crate::codec::FieldCodec) |
//! | `load` | `GET key` | `HGETALL key` |
//! | `set` | `SET key value [opts]` | `HSET key field value` |
//! | `delete` | - | `HDEL key field` |
//! | `clear` | `DEL key` | `DEL key` |

mod hash;
mod value;

pub use hash::{HashCache, HashReducer};
pub use value::{ValueCache, ValueReducer};
