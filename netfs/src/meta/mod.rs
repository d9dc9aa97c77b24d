//! Inodes, directory entries and block allocation
//!
//! Responsibilities:
//! - Encode inodes into the inode table and directory entries into
//!   directory data blocks.
//! - Allocate inodes (first `INVALID` slot) and data blocks (first free
//!   byte in the bitmap).
//! - Expose these as the [`Namespace`] capability consumed by path
//!   resolution in `crate::vfs`.
//!
//! Nothing here takes the distributed lock; callers bracket multi-block
//! updates with `BlockLayer::acquire`/`release`.
pub mod file;
pub mod fs;
pub mod inode;

pub use fs::FileSystem;
pub use inode::{Inode, InodeType};

use crate::config::FsConfig;
use crate::error::FsError;
use async_trait::async_trait;
use bytes::Bytes;

/// Root directory inode number.
pub const ROOT_INODE: u32 = 0;

/// Inode-level operations path resolution is built on.
#[async_trait]
pub trait Namespace: Send + Sync {
    fn config(&self) -> &FsConfig;

    async fn load_inode(&self, ino: u32) -> Result<Inode, FsError>;

    async fn store_inode(&self, ino: u32, inode: &Inode) -> Result<(), FsError>;

    async fn read_block(&self, block: u32) -> Result<Bytes, FsError>;

    /// Inode bound to `name` in directory `dir`, if any.
    async fn lookup(&self, name: &str, dir: u32) -> Result<Option<u32>, FsError>;

    /// Appends `(name, ino)` to `dir`'s entry table and persists `dir`.
    async fn insert_filename_inode_number(
        &self,
        dir: &mut InodeHandle,
        name: &str,
        ino: u32,
    ) -> Result<(), FsError>;

    /// Index of the slot the next entry of `dir` would use, if one is free.
    async fn find_available_file_entry(&self, dir: u32) -> Result<Option<usize>, FsError>;

    async fn find_available_inode(&self) -> Result<Option<u32>, FsError>;

    /// Number of free data blocks, counting no further than `want`.
    async fn free_data_blocks(&self, want: usize) -> Result<usize, FsError>;

    async fn allocate_data_block(&self) -> Result<u32, FsError>;

    async fn write(&self, ino: u32, offset: u32, data: &[u8]) -> Result<usize, FsError>;
}

/// An inode number together with a loaded copy of its record.
#[derive(Clone, Debug)]
pub struct InodeHandle {
    pub number: u32,
    pub inode: Inode,
}

impl InodeHandle {
    pub async fn load<N: Namespace + ?Sized>(ns: &N, number: u32) -> Result<Self, FsError> {
        let inode = ns.load_inode(number).await?;
        Ok(Self { number, inode })
    }

    pub async fn store<N: Namespace + ?Sized>(&self, ns: &N) -> Result<(), FsError> {
        ns.store_inode(self.number, &self.inode).await
    }
}

/// Names are non-empty, slash-free and fit a directory entry.
pub fn valid_name(name: &str, cfg: &FsConfig) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\0'])
        && name.len() <= cfg.max_filename
}
