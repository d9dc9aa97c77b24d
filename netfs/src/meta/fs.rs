//! Inode table, free-block bitmap and directory entries laid out on top of a
//! [`BlockLayer`] session.

use super::inode::{Inode, InodeType};
use super::{InodeHandle, Namespace, ROOT_INODE, valid_name};
use crate::block::BlockLayer;
use crate::cadapter::client::RemoteStore;
use crate::config::{FREEBITMAP_BLOCK_OFFSET, FsConfig};
use crate::error::FsError;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

const BLOCK_FREE: u8 = 0;
const BLOCK_USED: u8 = 1;

pub struct FileSystem<S> {
    blocks: BlockLayer<S>,
}

impl<S: RemoteStore> FileSystem<S> {
    pub fn new(blocks: BlockLayer<S>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &BlockLayer<S> {
        &self.blocks
    }

    fn inode_location(&self, ino: u32) -> Result<(u32, usize), FsError> {
        let cfg = self.blocks.config();
        if ino >= cfg.max_num_inodes {
            return Err(FsError::Corrupt {
                what: "inode number",
                detail: format!("{ino} not below {}", cfg.max_num_inodes),
            });
        }
        let per_block = cfg.inodes_per_block() as u32;
        let block = cfg.inode_block_offset() + ino / per_block;
        let offset = (ino % per_block) as usize * cfg.inode_size;
        Ok((block, offset))
    }

    // one bitmap byte per block
    fn bitmap_location(&self, block: u32) -> (u32, usize) {
        let bs = self.blocks.config().block_size as u32;
        (
            FREEBITMAP_BLOCK_OFFSET + block / bs,
            (block % bs) as usize,
        )
    }

    /// Overwrites `data.len()` bytes of `block` at `offset`.
    pub(crate) async fn patch_block(
        &self,
        block: u32,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FsError> {
        let mut raw = self.read_block(block).await?.to_vec();
        raw[offset..offset + data.len()].copy_from_slice(data);
        self.blocks.put(block, &raw).await?;
        Ok(())
    }

    pub async fn has_free_data_block(&self) -> Result<bool, FsError> {
        Ok(self.free_data_blocks(1).await? > 0)
    }

    fn dirent_location(&self, dir: &Inode, index: usize) -> Result<(u32, usize), FsError> {
        let cfg = self.blocks.config();
        let per_block = cfg.dirents_per_block();
        let block = dir
            .block_numbers
            .get(index / per_block)
            .copied()
            .filter(|b| *b != 0)
            .ok_or_else(|| FsError::Corrupt {
                what: "directory",
                detail: format!("entry {index} has no data block"),
            })?;
        Ok((block, (index % per_block) * cfg.dirent_size()))
    }

    async fn read_dirent(&self, dir: &Inode, index: usize) -> Result<(String, u32), FsError> {
        let cfg = self.blocks.config();
        let (block, offset) = self.dirent_location(dir, index)?;
        let raw = self.read_block(block).await?;
        let entry = &raw[offset..offset + cfg.dirent_size()];

        let name_bytes = &entry[..cfg.max_filename];
        let end = name_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
        let ino = entry[cfg.max_filename..]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        Ok((name, ino))
    }

    fn encode_dirent(cfg: &FsConfig, name: &str, ino: u32) -> Vec<u8> {
        let mut entry = Vec::with_capacity(cfg.dirent_size());
        entry.extend_from_slice(name.as_bytes());
        entry.resize(cfg.max_filename, 0);
        entry.extend_from_slice(&ino.to_be_bytes()[4 - cfg.inode_number_dirent_size..]);
        entry
    }

    /// `(name, inode)` bindings of `dir` in insertion order.
    pub async fn readdir(&self, dir: u32) -> Result<Vec<(String, u32)>, FsError> {
        let inode = self.load_inode(dir).await?;
        if !inode.is_dir() {
            return Ok(Vec::new());
        }
        let count = inode.size as usize / self.blocks.config().dirent_size();
        let mut entries = Vec::with_capacity(count);
        for index in 0..count {
            entries.push(self.read_dirent(&inode, index).await?);
        }
        Ok(entries)
    }

    /// Formats the store: empty bitmap and inode table, root directory with
    /// `.` and `..` bound to itself.
    pub async fn mkfs(&self) -> Result<(), FsError> {
        let cfg = self.blocks.config();
        info!(fingerprint = %cfg.fingerprint(), "formatting file system");
        for block in 0..cfg.data_blocks_offset() {
            self.blocks.put(block, &[]).await?;
        }
        for block in (0..cfg.data_blocks_offset()).chain([cfg.cid_block(), cfg.lock_block()]) {
            let (bitmap, offset) = self.bitmap_location(block);
            self.patch_block(bitmap, offset, &[BLOCK_USED]).await?;
        }

        let mut root = InodeHandle {
            number: ROOT_INODE,
            inode: Inode::new(InodeType::Dir, cfg),
        };
        root.inode.refcnt = 1;
        root.store(self).await?;
        self.insert_filename_inode_number(&mut root, ".", ROOT_INODE)
            .await?;
        self.insert_filename_inode_number(&mut root, "..", ROOT_INODE)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S: RemoteStore> Namespace for FileSystem<S> {
    fn config(&self) -> &FsConfig {
        self.blocks.config()
    }

    async fn load_inode(&self, ino: u32) -> Result<Inode, FsError> {
        let (block, offset) = self.inode_location(ino)?;
        let raw = self.read_block(block).await?;
        Inode::decode(&raw[offset..], self.config())
    }

    async fn store_inode(&self, ino: u32, inode: &Inode) -> Result<(), FsError> {
        let (block, offset) = self.inode_location(ino)?;
        self.patch_block(block, offset, &inode.encode(self.config()))
            .await
    }

    async fn read_block(&self, block: u32) -> Result<Bytes, FsError> {
        let raw = self.blocks.get(block).await?;
        if raw.len() < self.config().block_size {
            return Err(FsError::Corrupt {
                what: "block",
                detail: format!("block {block} holds {} bytes", raw.len()),
            });
        }
        Ok(raw)
    }

    async fn lookup(&self, name: &str, dir: u32) -> Result<Option<u32>, FsError> {
        let inode = self.load_inode(dir).await?;
        if !inode.is_dir() || name.len() > self.config().max_filename {
            return Ok(None);
        }
        let count = inode.size as usize / self.config().dirent_size();
        for index in 0..count {
            let (entry, ino) = self.read_dirent(&inode, index).await?;
            if entry == name {
                return Ok(Some(ino));
            }
        }
        Ok(None)
    }

    async fn insert_filename_inode_number(
        &self,
        dir: &mut InodeHandle,
        name: &str,
        ino: u32,
    ) -> Result<(), FsError> {
        let cfg = self.config();
        if !valid_name(name, cfg) {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let index = dir.inode.size as usize / cfg.dirent_size();
        if index >= cfg.max_dirents() {
            return Err(FsError::DirectoryFull { dir: dir.number });
        }
        let slot = index / cfg.dirents_per_block();
        if dir.inode.block_numbers[slot] == 0 {
            dir.inode.block_numbers[slot] = self.allocate_data_block().await?;
        }
        let (block, offset) = self.dirent_location(&dir.inode, index)?;
        self.patch_block(block, offset, &Self::encode_dirent(cfg, name, ino))
            .await?;
        dir.inode.size += cfg.dirent_size() as u32;
        dir.store(self).await?;
        debug!(dir = dir.number, entry = name, ino, "inserted directory entry");
        Ok(())
    }

    async fn find_available_file_entry(&self, dir: u32) -> Result<Option<usize>, FsError> {
        let inode = self.load_inode(dir).await?;
        if !inode.is_dir() {
            return Ok(None);
        }
        let cfg = self.config();
        let index = inode.size as usize / cfg.dirent_size();
        if index >= cfg.max_dirents() {
            return Ok(None);
        }
        let needs_block = inode.block_numbers[index / cfg.dirents_per_block()] == 0;
        if needs_block && !self.has_free_data_block().await? {
            return Ok(None);
        }
        Ok(Some(index))
    }

    async fn find_available_inode(&self) -> Result<Option<u32>, FsError> {
        for ino in 0..self.config().max_num_inodes {
            if self.load_inode(ino).await?.kind == InodeType::Invalid {
                return Ok(Some(ino));
            }
        }
        Ok(None)
    }

    async fn free_data_blocks(&self, want: usize) -> Result<usize, FsError> {
        let cfg = self.config();
        let mut found = 0;
        for block in cfg.data_blocks_offset()..cfg.cid_block() {
            if found >= want {
                break;
            }
            let (bitmap, offset) = self.bitmap_location(block);
            if self.read_block(bitmap).await?[offset] == BLOCK_FREE {
                found += 1;
            }
        }
        Ok(found)
    }

    async fn allocate_data_block(&self) -> Result<u32, FsError> {
        let cfg = self.config();
        for block in cfg.data_blocks_offset()..cfg.cid_block() {
            let (bitmap, offset) = self.bitmap_location(block);
            if self.read_block(bitmap).await?[offset] == BLOCK_FREE {
                self.patch_block(bitmap, offset, &[BLOCK_USED]).await?;
                debug!(block, "allocated data block");
                return Ok(block);
            }
        }
        Err(FsError::NoFreeBlocks)
    }

    async fn write(&self, ino: u32, offset: u32, data: &[u8]) -> Result<usize, FsError> {
        self.write_at(ino, offset, data).await
    }
}
