//! On-block inode record.
//!
//! Layout (big-endian): `size: u32`, `type: u16`, `refcnt: u16`, then as
//! many `u32` block numbers as fit in `INODE_SIZE`. Block number 0 marks an
//! unused slot; block 0 is never a data block.

use crate::config::{BLOCK_NUMBER_SIZE, FsConfig, INODE_HEADER_SIZE};
use crate::error::FsError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeType {
    Invalid,
    File,
    Dir,
    Sym,
}

impl InodeType {
    fn to_raw(self) -> u16 {
        match self {
            InodeType::Invalid => 0,
            InodeType::File => 1,
            InodeType::Dir => 2,
            InodeType::Sym => 3,
        }
    }

    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(InodeType::Invalid),
            1 => Some(InodeType::File),
            2 => Some(InodeType::Dir),
            3 => Some(InodeType::Sym),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inode {
    pub kind: InodeType,
    pub size: u32,
    pub refcnt: u16,
    pub block_numbers: Vec<u32>,
}

impl Inode {
    pub fn new(kind: InodeType, cfg: &FsConfig) -> Self {
        Self {
            kind,
            size: 0,
            refcnt: 0,
            block_numbers: vec![0; cfg.max_inode_block_numbers()],
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeType::Dir
    }

    pub fn decode(raw: &[u8], cfg: &FsConfig) -> Result<Self, FsError> {
        if raw.len() < cfg.inode_size {
            return Err(FsError::Corrupt {
                what: "inode",
                detail: format!("{} bytes, expected {}", raw.len(), cfg.inode_size),
            });
        }
        let size = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let raw_kind = u16::from_be_bytes([raw[4], raw[5]]);
        let kind = InodeType::from_raw(raw_kind).ok_or_else(|| FsError::Corrupt {
            what: "inode",
            detail: format!("unknown type {raw_kind}"),
        })?;
        let refcnt = u16::from_be_bytes([raw[6], raw[7]]);
        let block_numbers = raw[INODE_HEADER_SIZE..cfg.inode_size]
            .chunks_exact(BLOCK_NUMBER_SIZE)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            kind,
            size,
            refcnt,
            block_numbers,
        })
    }

    pub fn encode(&self, cfg: &FsConfig) -> Vec<u8> {
        let mut raw = Vec::with_capacity(cfg.inode_size);
        raw.extend_from_slice(&self.size.to_be_bytes());
        raw.extend_from_slice(&self.kind.to_raw().to_be_bytes());
        raw.extend_from_slice(&self.refcnt.to_be_bytes());
        for n in self.block_numbers.iter().take(cfg.max_inode_block_numbers()) {
            raw.extend_from_slice(&n.to_be_bytes());
        }
        raw.resize(cfg.inode_size, 0);
        raw
    }
}
