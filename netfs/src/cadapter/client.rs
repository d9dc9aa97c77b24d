//! Contract of the remote, shared block server.

use crate::error::BlockError;
use async_trait::async_trait;
use bytes::Bytes;

/// Network-addressable array of fixed-size blocks shared by all clients.
///
/// Implementations report transient transport trouble as
/// [`BlockError::Transport`] or [`BlockError::Io`] so the caller can retry,
/// and hard refusals by the server as [`BlockError::Server`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the full contents of `block`.
    async fn get(&self, block: u32) -> Result<Bytes, BlockError>;

    /// Overwrites `block`; `data` is already padded to the block size.
    async fn put(&self, block: u32, data: &[u8]) -> Result<(), BlockError>;

    /// Atomically returns the current contents of `block` and sets its first
    /// byte to 1 (read-and-set-memory).
    async fn rsm(&self, block: u32) -> Result<Bytes, BlockError>;
}
