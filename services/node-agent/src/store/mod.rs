//! Embedded key-value persistence for the node agent.
//!
//! Each bucket (`service`, `event`, `configuration`) lives in its own
//! single-file SQLite database holding JSON-encoded records. The
//! repositories in [`crate::repository`] are the only callers.

mod kv;

pub use kv::{Bucket, KvStore, StoreError};
