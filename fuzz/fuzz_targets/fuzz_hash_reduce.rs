//! Fuzz target for the hash reducer.
//!
//! Feeds arbitrary raw field/value pairs through load, set and delete. Bad
//! values must come back as errors, never panics.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_cache::caches::HashReducer;
use replica_cache::{JsonCodec, Operation, ReplicaVariant};

fuzz_target!(|data: (Vec<(String, String)>, String, String)| {
    let (pairs, field, raw) = data;
    let reducer: HashReducer<serde_json::Value, JsonCodec> = HashReducer::new("fuzz", JsonCodec);

    let state = reducer
        .reduce(&reducer.initial_state(), Operation::Load(pairs))
        .unwrap_or_default();

    if let Ok(next) = reducer.reduce(&state, Operation::Set((field.clone(), raw))) {
        assert!(next.contains_key(&field));
    }

    let deleted = reducer
        .reduce(&state, Operation::Delete(field.clone()))
        .expect("delete cannot fail");
    assert!(!deleted.contains_key(&field));
});
