//! Block access layer
//!
//! Responsibilities:
//! - Turn a remote array of fixed-size blocks into a locally cached store
//!   (`layer::BlockLayer`), write-through on every `put`.
//! - Provide the distributed lock (`acquire`/`release`) built on the
//!   store's read-and-set primitive over the last block.
//! - Keep the cache coherent across clients: each write stamps this
//!   client's id into the marker block, and `acquire` drops the whole cache
//!   when the marker names another client.
//! - Snapshot the full block array to a local file and replay it back.
//!
//! The cache is only trustworthy between `acquire` and `release`; callers
//! bracket every multi-block update with the lock.
pub mod cache;
pub mod layer;
pub mod retry;
pub mod snapshot;

pub use cache::BlockCache;
pub use layer::BlockLayer;
pub use retry::RetryPolicy;
