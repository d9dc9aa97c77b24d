//! Client core of a networked file system whose blocks live on a shared
//! block server.
//!
//! - `cadapter`: remote block store adapters (RPC client, in-memory store)
//! - `daemon`: development block server
//! - `block`: cached, lock-aware block session and snapshots
//! - `meta`: inodes, directory entries, allocation and file I/O
//! - `vfs`: path resolution, hard and symbolic links

pub mod block;
pub mod cadapter;
pub mod config;
pub mod daemon;
pub mod error;
pub mod meta;
pub mod vfs;
