//! Client session over a remote block store: range checks, write-through
//! cache, identity stamping, distributed lock and retries.

use super::cache::BlockCache;
use super::retry::RetryPolicy;
use crate::cadapter::client::RemoteStore;
use crate::cadapter::rpc::RpcStore;
use crate::config::FsConfig;
use crate::error::BlockError;
use bytes::Bytes;
use std::future::Future;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

const LOCKED: u8 = 1;

pub struct BlockLayer<S> {
    cfg: FsConfig,
    store: S,
    cache: BlockCache,
    retry: RetryPolicy,
}

impl BlockLayer<RpcStore> {
    /// Session talking to the block server named in `cfg`.
    pub fn connect(cfg: FsConfig) -> anyhow::Result<Self> {
        let store = RpcStore::new(cfg.server_addr(), cfg.socket_timeout());
        Self::new(cfg, store)
    }
}

impl<S: RemoteStore> BlockLayer<S> {
    pub fn new(cfg: FsConfig, store: S) -> anyhow::Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cache: BlockCache::new(cfg.cache_capacity),
            retry: RetryPolicy::from_config(&cfg),
            cfg,
            store,
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn check_range(&self, op: &'static str, block: u32) -> Result<(), BlockError> {
        if block < self.cfg.total_num_blocks {
            return Ok(());
        }
        error!(op, block, total = self.cfg.total_num_blocks, "block out of range");
        Err(BlockError::OutOfRange {
            block,
            total: self.cfg.total_num_blocks,
        })
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        block: u32,
        mut call: F,
    ) -> Result<T, BlockError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BlockError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() => {
                    warn!(op, block, attempt, "SERVER_TIMED_OUT: {e}");
                    if attempt > self.retry.max_retries {
                        return Err(BlockError::Timeout {
                            op,
                            block,
                            attempts: attempt,
                        });
                    }
                    sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) => {
                    error!(op, block, "block server error: {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn put_raw(&self, block: u32, data: &[u8]) -> Result<(), BlockError> {
        self.with_retry("put", block, || self.store.put(block, data))
            .await
    }

    fn cid_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.cfg.block_size];
        buf[0] = self.cfg.cid;
        buf
    }

    /// Publishes this client as the last writer.
    async fn put_cid(&self) -> Result<(), BlockError> {
        self.put_raw(self.cfg.cid_block(), &self.cid_bytes()).await
    }

    /// Writes `data`, zero-padded to the block size.
    ///
    /// Every write except one to the marker block also stamps this client's
    /// id into the marker, and non-reserved blocks are written through to
    /// the cache.
    pub async fn put(&self, block: u32, data: &[u8]) -> Result<(), BlockError> {
        debug!(block, len = data.len(), data = %hex::encode(data), "Put");
        self.check_range("put", block)?;
        if data.len() > self.cfg.block_size {
            error!(block, len = data.len(), "Put: block larger than BLOCK_SIZE");
            return Err(BlockError::Oversized {
                len: data.len(),
                block_size: self.cfg.block_size,
            });
        }
        let mut padded = data.to_vec();
        padded.resize(self.cfg.block_size, 0);
        let padded = Bytes::from(padded);

        self.put_raw(block, &padded).await?;
        if block != self.cfg.cid_block() {
            self.put_cid().await?;
            if !self.cfg.is_reserved(block) {
                self.cache.insert(block, padded);
                debug!(block, "CACHE_WRITE_THROUGH");
            }
        }
        Ok(())
    }

    /// Reads a block, from the cache when possible.
    pub async fn get(&self, block: u32) -> Result<Bytes, BlockError> {
        debug!(block, "Get");
        self.check_range("get", block)?;
        let cacheable = !self.cfg.is_reserved(block);
        if cacheable {
            if let Some(data) = self.cache.get(block) {
                debug!(block, "CACHE_HIT");
                return Ok(data);
            }
        }
        debug!(block, "CACHE_MISS");
        let data = self
            .with_retry("get", block, || self.store.get(block))
            .await?;
        if cacheable {
            self.cache.insert(block, data.clone());
        }
        Ok(data)
    }

    /// Read-and-set on `block`; never cached.
    ///
    /// Sent once. A lost reply may hide a set that already happened, and a
    /// resend would then read back this client's own lock and spin on it,
    /// so transport failures surface as `Timeout` after a single attempt.
    pub async fn rsm(&self, block: u32) -> Result<Bytes, BlockError> {
        debug!(block, "RSM");
        self.check_range("rsm", block)?;
        match self.store.rsm(block).await {
            Err(e) if e.is_retryable() => {
                error!(block, "SERVER_TIMED_OUT: rsm not resent: {e}");
                Err(BlockError::Timeout {
                    op: "rsm",
                    block,
                    attempts: 1,
                })
            }
            res => res,
        }
    }

    /// Spins on the lock block until this client sets it, then repairs the
    /// cache if another client wrote in the meantime.
    ///
    /// Without a configured deadline this waits forever; there is no
    /// queueing, the first poller to see the lock free wins. A failed poll
    /// leaves the lock state unknown and ends the session with `Timeout`.
    pub async fn acquire(&self) -> Result<(), BlockError> {
        debug!(cid = self.cfg.cid, "Acquire");
        let lock_block = self.cfg.lock_block();
        let started = Instant::now();
        while self.rsm(lock_block).await?[0] == LOCKED {
            if let Some(deadline) = self.cfg.lock_deadline() {
                if started.elapsed() >= deadline {
                    warn!(cid = self.cfg.cid, ?deadline, "lock acquisition timed out");
                    return Err(BlockError::LockTimeout(deadline));
                }
            }
            sleep(self.cfg.lock_retry_interval()).await;
        }
        self.check_cid().await
    }

    pub async fn release(&self) -> Result<(), BlockError> {
        debug!(cid = self.cfg.cid, "Release");
        self.put(self.cfg.lock_block(), &[0]).await
    }

    /// Drops the whole cache when the marker names another client, then
    /// claims the marker.
    pub async fn check_cid(&self) -> Result<(), BlockError> {
        let marker = self.get(self.cfg.cid_block()).await?;
        if marker[0] != self.cfg.cid {
            self.cache.invalidate_all();
            info!(cid = self.cfg.cid, last_writer = marker[0], "CACHE_INVALIDATED");
            self.put_cid().await?;
            debug!(block = self.cfg.cid_block(), "CACHE_WRITE_THROUGH");
        }
        Ok(())
    }

    /// Hex listing of blocks `[min, max)`.
    pub async fn format_blocks(&self, tag: &str, min: u32, max: u32) -> Result<String, BlockError> {
        let mut out = format!("#### Raw disk blocks: {tag}\n");
        for block in min..max {
            let data = self.get(block).await?;
            out.push_str(&format!("Block [{block}] : {}\n", hex::encode(&data)));
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cadapter::mem::MemStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    pub(crate) fn test_config(cid: u8) -> FsConfig {
        FsConfig {
            cid,
            lock_retry_interval_ms: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            max_retries: 3,
            ..FsConfig::default()
        }
    }

    fn session(cid: u8, store: &MemStore) -> BlockLayer<MemStore> {
        BlockLayer::new(test_config(cid), store.clone()).unwrap()
    }

    fn shared_store() -> MemStore {
        let cfg = FsConfig::default();
        MemStore::new(cfg.total_num_blocks, cfg.block_size)
    }

    #[tokio::test]
    async fn test_put_then_get_returns_padded_data() {
        let store = shared_store();
        let blocks = session(0, &store);

        blocks.put(10, b"hello").await.unwrap();
        let out = blocks.get(10).await.unwrap();
        assert_eq!(out.len(), 128);
        assert_eq!(&out[..5], b"hello");
        assert!(out[5..].iter().all(|b| *b == 0));

        // full-size payloads are accepted as is
        blocks.put(11, &[0xab; 128]).await.unwrap();
        assert_eq!(blocks.get(11).await.unwrap().as_ref(), &[0xab; 128]);
    }

    #[tokio::test]
    async fn test_get_hits_cache_without_round_trip() {
        let store = shared_store();
        let blocks = session(0, &store);
        blocks.put(10, b"cached").await.unwrap();

        // change the block behind the session's back
        store.put(10, b"remote").await.unwrap();
        assert_eq!(&blocks.get(10).await.unwrap()[..6], b"cached");

        // a miss fills the cache
        store.put(20, b"fresh").await.unwrap();
        assert!(!blocks.cache().contains(20));
        assert_eq!(&blocks.get(20).await.unwrap()[..5], b"fresh");
        assert!(blocks.cache().contains(20));
    }

    #[tokio::test]
    async fn test_invalid_requests_are_fatal_and_send_nothing() {
        let store = shared_store();
        let blocks = session(0, &store);

        assert!(matches!(
            blocks.put(10, &[1u8; 129]).await,
            Err(BlockError::Oversized { len: 129, block_size: 128 })
        ));
        assert!(matches!(
            blocks.put(256, b"x").await,
            Err(BlockError::OutOfRange { block: 256, total: 256 })
        ));
        assert!(matches!(
            blocks.get(300).await,
            Err(BlockError::OutOfRange { block: 300, .. })
        ));
        assert!(matches!(
            blocks.rsm(256).await,
            Err(BlockError::OutOfRange { .. })
        ));
        assert!(store.get(10).await.unwrap().iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_put_stamps_identity_and_skips_reserved_in_cache() {
        let store = shared_store();
        let blocks = session(3, &store);
        let cfg = blocks.config().clone();

        blocks.put(10, b"data").await.unwrap();
        assert_eq!(store.get(cfg.cid_block()).await.unwrap()[0], 3);

        blocks.acquire().await.unwrap();
        blocks.release().await.unwrap();
        blocks.get(cfg.cid_block()).await.unwrap();
        assert!(!blocks.cache().contains(cfg.lock_block()));
        assert!(!blocks.cache().contains(cfg.cid_block()));
        assert_eq!(store.get(cfg.lock_block()).await.unwrap()[0], 0);
    }

    #[tokio::test]
    async fn test_acquire_invalidates_cache_after_foreign_write() {
        let store = shared_store();
        let c0 = session(0, &store);
        let c1 = session(1, &store);
        let marker = c0.config().cid_block();

        c0.acquire().await.unwrap();
        c0.put(10, b"v1").await.unwrap();
        c0.put(11, b"other").await.unwrap();
        c0.release().await.unwrap();

        c1.acquire().await.unwrap();
        assert_eq!(&c1.get(10).await.unwrap()[..2], b"v1");
        c1.put(10, b"v2").await.unwrap();
        c1.release().await.unwrap();
        assert_eq!(store.get(marker).await.unwrap()[0], 1);

        // staleness is only repaired at acquire
        assert_eq!(&c0.get(10).await.unwrap()[..2], b"v1");

        c0.acquire().await.unwrap();
        assert!(!c0.cache().contains(10));
        assert!(!c0.cache().contains(11));
        assert_eq!(store.get(marker).await.unwrap()[0], 0);
        assert_eq!(&c0.get(10).await.unwrap()[..2], b"v2");
        c0.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_keeps_cache_when_marker_is_own() {
        let store = shared_store();
        let c0 = session(0, &store);

        c0.acquire().await.unwrap();
        c0.put(10, b"mine").await.unwrap();
        c0.release().await.unwrap();

        c0.acquire().await.unwrap();
        assert!(c0.cache().contains(10));
        c0.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_is_mutually_exclusive() {
        let store = shared_store();
        let c0 = session(0, &store);
        let c1 = BlockLayer::new(
            FsConfig {
                lock_deadline_ms: Some(20),
                ..test_config(1)
            },
            store.clone(),
        )
        .unwrap();

        c0.acquire().await.unwrap();
        assert!(matches!(
            c1.acquire().await,
            Err(BlockError::LockTimeout(d)) if d == Duration::from_millis(20)
        ));
        c0.release().await.unwrap();
        c1.acquire().await.unwrap();
        c1.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_increments_under_lock() {
        let store = shared_store();
        let c0 = session(0, &store);
        let c1 = session(1, &store);
        const ROUNDS: u8 = 20;

        async fn bump(blocks: &BlockLayer<MemStore>) {
            for _ in 0..ROUNDS {
                blocks.acquire().await.unwrap();
                let n = blocks.get(50).await.unwrap()[0];
                tokio::task::yield_now().await;
                blocks.put(50, &[n + 1]).await.unwrap();
                blocks.release().await.unwrap();
                tokio::task::yield_now().await;
            }
        }

        tokio::join!(bump(&c0), bump(&c1));
        assert_eq!(store.get(50).await.unwrap()[0], 2 * ROUNDS);
    }

    /// Fails the first `failures` calls with the given error kind.
    struct FlakyStore {
        inner: MemStore,
        failures: AtomicU32,
        calls: AtomicU32,
        hard: bool,
    }

    impl FlakyStore {
        fn new(failures: u32, hard: bool) -> Self {
            Self {
                inner: shared_store(),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                hard,
            }
        }

        fn trip(&self, block: u32) -> Result<(), BlockError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures.store(left - 1, Ordering::SeqCst);
            if self.hard {
                Err(BlockError::Server {
                    op: "get",
                    block,
                    msg: "disk on fire".into(),
                })
            } else {
                Err(BlockError::Transport("timed out".into()))
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn get(&self, block: u32) -> Result<Bytes, BlockError> {
            self.trip(block)?;
            self.inner.get(block).await
        }

        async fn put(&self, block: u32, data: &[u8]) -> Result<(), BlockError> {
            self.trip(block)?;
            self.inner.put(block, data).await
        }

        async fn rsm(&self, block: u32) -> Result<Bytes, BlockError> {
            self.trip(block)?;
            self.inner.rsm(block).await
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let blocks = BlockLayer::new(test_config(0), FlakyStore::new(2, false)).unwrap();
        blocks.get(12).await.unwrap();
        assert_eq!(blocks.store().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let blocks = BlockLayer::new(test_config(0), FlakyStore::new(100, false)).unwrap();
        let err = blocks.get(12).await.unwrap_err();
        assert!(matches!(
            err,
            BlockError::Timeout { op: "get", block: 12, attempts: 4 }
        ));
    }

    /// Applies every read-and-set, then loses the reply.
    struct LostReplyStore {
        inner: MemStore,
        rsm_calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteStore for LostReplyStore {
        async fn get(&self, block: u32) -> Result<Bytes, BlockError> {
            self.inner.get(block).await
        }

        async fn put(&self, block: u32, data: &[u8]) -> Result<(), BlockError> {
            self.inner.put(block, data).await
        }

        async fn rsm(&self, block: u32) -> Result<Bytes, BlockError> {
            self.rsm_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.rsm(block).await?;
            Err(BlockError::Transport("reply lost".into()))
        }
    }

    #[tokio::test]
    async fn test_acquire_does_not_resend_lost_rsm() {
        let store = LostReplyStore {
            inner: shared_store(),
            rsm_calls: AtomicU32::new(0),
        };
        let blocks = BlockLayer::new(test_config(0), store).unwrap();
        assert_eq!(blocks.config().lock_deadline(), None);

        let err = blocks.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            BlockError::Timeout { op: "rsm", attempts: 1, .. }
        ));
        assert_eq!(blocks.store().rsm_calls.load(Ordering::SeqCst), 1);
        let lock = blocks.config().lock_block();
        assert_eq!(blocks.store().inner.get(lock).await.unwrap()[0], LOCKED);
    }

    #[tokio::test]
    async fn test_server_errors_are_not_retried() {
        let blocks = BlockLayer::new(test_config(0), FlakyStore::new(1, true)).unwrap();
        assert!(matches!(
            blocks.get(12).await,
            Err(BlockError::Server { .. })
        ));
        assert_eq!(blocks.store().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_format_blocks_lists_range() {
        let store = shared_store();
        let blocks = session(0, &store);
        blocks.put(7, &[0xff]).await.unwrap();
        let out = blocks.format_blocks("after write", 6, 8).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "#### Raw disk blocks: after write");
        assert!(lines[1].starts_with("Block [6] : 0000"));
        assert!(lines[2].starts_with("Block [7] : ff00"));
    }
}
