//! Client configuration and the on-store geometry derived from it.
//!
//! The geometry fields (`block_size` .. `inode_number_dirent_size`) must match
//! across every client sharing a block server; they are also the fingerprint
//! embedded in snapshot files.

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// First block of the free-block bitmap. Block 0 is boot, block 1 is the superblock.
pub const FREEBITMAP_BLOCK_OFFSET: u32 = 2;
/// Bytes of an inode record before the block-number list: size(4) + type(2) + refcnt(2).
pub const INODE_HEADER_SIZE: usize = 8;
/// Width of a block number inside an inode record.
pub const BLOCK_NUMBER_SIZE: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub block_size: usize,
    pub total_num_blocks: u32,
    pub inode_size: usize,
    pub max_num_inodes: u32,
    pub max_filename: usize,
    pub inode_number_dirent_size: usize,

    pub max_clients: u16,
    pub cid: u8,

    // ip/port of the block server
    pub server_address: String,
    pub port: u16,
    pub socket_timeout_ms: u64,

    // bounded retry of transient transport failures
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    pub lock_retry_interval_ms: u64,
    pub lock_deadline_ms: Option<u64>,

    pub cache_capacity: u64,
    pub max_symlink_depth: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            block_size: 128,
            total_num_blocks: 256,
            inode_size: 16,
            max_num_inodes: 16,
            max_filename: 12,
            inode_number_dirent_size: 4,
            max_clients: 8,
            cid: 0,
            server_address: "127.0.0.1".to_string(),
            port: 8000,
            socket_timeout_ms: 5_000,
            max_retries: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            lock_retry_interval_ms: 100,
            lock_deadline_ms: None,
            cache_capacity: 1024,
            max_symlink_depth: 16,
        }
    }
}

impl FsConfig {
    /// Block holding the identity of the client that last wrote through the store.
    pub fn cid_block(&self) -> u32 {
        self.total_num_blocks - 2
    }

    /// Block holding the distributed lock flag.
    pub fn lock_block(&self) -> u32 {
        self.total_num_blocks - 1
    }

    pub fn is_reserved(&self, block: u32) -> bool {
        block >= self.cid_block()
    }

    pub fn freebitmap_num_blocks(&self) -> u32 {
        (self.total_num_blocks as usize).div_ceil(self.block_size) as u32
    }

    pub fn inode_block_offset(&self) -> u32 {
        FREEBITMAP_BLOCK_OFFSET + self.freebitmap_num_blocks()
    }

    pub fn inodes_per_block(&self) -> usize {
        self.block_size / self.inode_size
    }

    pub fn inode_num_blocks(&self) -> u32 {
        (self.max_num_inodes as usize).div_ceil(self.inodes_per_block()) as u32
    }

    /// Number of data-block pointers an inode can hold.
    pub fn max_inode_block_numbers(&self) -> usize {
        (self.inode_size - INODE_HEADER_SIZE) / BLOCK_NUMBER_SIZE
    }

    pub fn max_file_size(&self) -> usize {
        self.max_inode_block_numbers() * self.block_size
    }

    pub fn data_blocks_offset(&self) -> u32 {
        self.inode_block_offset() + self.inode_num_blocks()
    }

    pub fn dirent_size(&self) -> usize {
        self.max_filename + self.inode_number_dirent_size
    }

    pub fn dirents_per_block(&self) -> usize {
        self.block_size / self.dirent_size()
    }

    /// Capacity of a directory, in entries.
    pub fn max_dirents(&self) -> usize {
        self.dirents_per_block() * self.max_inode_block_numbers()
    }

    /// String identifying the geometry; written at the head of every snapshot.
    pub fn fingerprint(&self) -> String {
        format!(
            "BS_{}_NB_{}_IS_{}_MI_{}_MF_{}_IDS_{}",
            self.block_size,
            self.total_num_blocks,
            self.inode_size,
            self.max_num_inodes,
            self.max_filename,
            self.inode_number_dirent_size
        )
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_address, self.port)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn lock_deadline(&self) -> Option<Duration> {
        self.lock_deadline_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            u16::from(self.cid) < self.max_clients,
            "client id {} must be in [0, {})",
            self.cid,
            self.max_clients
        );
        ensure!(
            self.max_clients <= 256,
            "max_clients {} does not fit the one-byte identity marker",
            self.max_clients
        );
        ensure!(self.block_size > 0, "block_size must be positive");
        ensure!(
            self.inode_size >= INODE_HEADER_SIZE + BLOCK_NUMBER_SIZE,
            "inode_size {} leaves no room for block numbers",
            self.inode_size
        );
        ensure!(
            self.block_size % self.inode_size == 0,
            "block_size {} is not a multiple of inode_size {}",
            self.block_size,
            self.inode_size
        );
        ensure!(
            (1..=4).contains(&self.inode_number_dirent_size),
            "inode_number_dirent_size must be between 1 and 4"
        );
        ensure!(
            self.max_filename > 0 && self.dirent_size() <= self.block_size,
            "directory entry of {} bytes does not fit a block",
            self.dirent_size()
        );
        ensure!(
            u64::from(self.max_num_inodes) <= 1u64 << (8 * self.inode_number_dirent_size),
            "max_num_inodes {} does not fit {} byte inode numbers",
            self.max_num_inodes,
            self.inode_number_dirent_size
        );
        // at least one data block besides the two reserved ones
        ensure!(
            self.total_num_blocks >= self.data_blocks_offset() + 3,
            "total_num_blocks {} too small for metadata ending at block {}",
            self.total_num_blocks,
            self.data_blocks_offset()
        );
        ensure!(self.cache_capacity > 0, "cache_capacity must be positive");
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<FsConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: FsConfig = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}
