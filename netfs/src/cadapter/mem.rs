//! In-memory block store. Clones share the same blocks, so several client
//! sessions in one process behave like clients of a single block server.

use crate::cadapter::client::RemoteStore;
use crate::error::BlockError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};

pub const RSM_LOCKED: u8 = 1;

#[derive(Clone)]
pub struct MemStore {
    block_size: usize,
    blocks: Arc<Mutex<Vec<Bytes>>>,
}

impl MemStore {
    pub fn new(total_num_blocks: u32, block_size: usize) -> Self {
        let zero = Bytes::from(vec![0u8; block_size]);
        Self {
            block_size,
            blocks: Arc::new(Mutex::new(vec![zero; total_num_blocks as usize])),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_blocks(&self) -> u32 {
        self.lock().len() as u32
    }

    // writers only ever swap whole blocks, so a poisoned lock is still consistent
    fn lock(&self) -> MutexGuard<'_, Vec<Bytes>> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn out_of_range(op: &'static str, block: u32, total: usize) -> BlockError {
        BlockError::Server {
            op,
            block,
            msg: format!("block number larger than {total}"),
        }
    }
}

#[async_trait]
impl RemoteStore for MemStore {
    async fn get(&self, block: u32) -> Result<Bytes, BlockError> {
        let blocks = self.lock();
        blocks
            .get(block as usize)
            .cloned()
            .ok_or_else(|| Self::out_of_range("get", block, blocks.len()))
    }

    async fn put(&self, block: u32, data: &[u8]) -> Result<(), BlockError> {
        if data.len() > self.block_size {
            return Err(BlockError::Server {
                op: "put",
                block,
                msg: format!("block larger than {}: {}", self.block_size, data.len()),
            });
        }
        let mut padded = data.to_vec();
        padded.resize(self.block_size, 0);

        let mut blocks = self.lock();
        let total = blocks.len();
        let slot = blocks
            .get_mut(block as usize)
            .ok_or_else(|| Self::out_of_range("put", block, total))?;
        *slot = Bytes::from(padded);
        Ok(())
    }

    async fn rsm(&self, block: u32) -> Result<Bytes, BlockError> {
        let mut locked = vec![0u8; self.block_size];
        locked[0] = RSM_LOCKED;

        let mut blocks = self.lock();
        let total = blocks.len();
        let slot = blocks
            .get_mut(block as usize)
            .ok_or_else(|| Self::out_of_range("rsm", block, total))?;
        Ok(std::mem::replace(slot, Bytes::from(locked)))
    }
}
