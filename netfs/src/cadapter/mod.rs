//! Remote block store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the `RemoteStore` contract consumed by the block layer
//! - `mem`: in-memory store for development, tests and the dev server
//! - `rpc`: wire protocol and the TCP client talking to a block server
//!
//! Adapters only move whole blocks. Range checks, padding, caching and
//! retries belong to `crate::block`.
pub mod client;
pub mod mem;
pub mod rpc;

pub use client::RemoteStore;
pub use mem::MemStore;
pub use rpc::RpcStore;
