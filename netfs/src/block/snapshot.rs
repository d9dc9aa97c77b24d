//! Snapshot files: the geometry fingerprint followed by every block, both
//! `bincode`-encoded.

use super::layer::BlockLayer;
use crate::cadapter::client::RemoteStore;
use crate::error::SnapshotError;
use bincode::Options;
use std::path::Path;
use tracing::{error, info};

// fixed-width integers like `bincode::serialize`; the limit keeps a corrupt
// length prefix from asking for more bytes than the file holds
fn codec(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
}

impl<S: RemoteStore> BlockLayer<S> {
    /// Writes the fingerprint and all `TOTAL_NUM_BLOCKS` blocks to `path`.
    pub async fn dump_to_disk(&self, path: &Path) -> Result<(), SnapshotError> {
        info!(path = %path.display(), "dumping blocks to file");
        let cfg = self.config();
        let mut blocks = Vec::with_capacity(cfg.total_num_blocks as usize);
        for block in 0..cfg.total_num_blocks {
            blocks.push(self.get(block).await?.to_vec());
        }

        let mut buf = Vec::new();
        codec(u64::MAX)
            .serialize_into(&mut buf, &cfg.fingerprint())
            .and_then(|()| codec(u64::MAX).serialize_into(&mut buf, &blocks))
            .map_err(|e| SnapshotError::Malformed(e.to_string()))?;
        tokio::fs::write(path, buf).await?;
        Ok(())
    }

    /// Replays a snapshot through [`BlockLayer::put`].
    ///
    /// The whole file is decoded and checked against the live geometry
    /// before the first block is written, so a rejected snapshot leaves the
    /// store untouched.
    pub async fn load_from_dump(&self, path: &Path) -> Result<(), SnapshotError> {
        info!(path = %path.display(), "reading blocks from file");
        let raw = tokio::fs::read(path).await?;
        let blocks = self.decode_snapshot(&raw).inspect_err(|e| {
            error!(path = %path.display(), "LoadFromDump: {e}");
        })?;
        for (block, data) in blocks.iter().enumerate() {
            self.put(block as u32, data).await?;
        }
        Ok(())
    }

    fn decode_snapshot(&self, raw: &[u8]) -> Result<Vec<Vec<u8>>, SnapshotError> {
        let cfg = self.config();
        let expected = cfg.fingerprint();
        let mut reader = raw;
        let limit = raw.len() as u64;

        let found: String = codec(limit)
            .deserialize_from(&mut reader)
            .map_err(|e| SnapshotError::Malformed(format!("fingerprint: {e}")))?;
        if found != expected {
            return Err(SnapshotError::FingerprintMismatch { found, expected });
        }

        let blocks: Vec<Vec<u8>> = codec(limit)
            .deserialize_from(&mut reader)
            .map_err(|e| SnapshotError::Malformed(format!("blocks: {e}")))?;
        if blocks.len() != cfg.total_num_blocks as usize {
            return Err(SnapshotError::Malformed(format!(
                "expected {} blocks, found {}",
                cfg.total_num_blocks,
                blocks.len()
            )));
        }
        if let Some((n, b)) = blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.len() > cfg.block_size)
        {
            return Err(SnapshotError::Malformed(format!(
                "block {n} holds {} bytes, more than {}",
                b.len(),
                cfg.block_size
            )));
        }
        Ok(blocks)
    }
}
