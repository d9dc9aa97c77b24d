use netfs::block::BlockLayer;
use netfs::cadapter::{MemStore, RpcStore};
use netfs::config::FsConfig;
use netfs::daemon::BlockServer;
use netfs::meta::FileSystem;
use std::net::SocketAddr;

pub fn client_config(addr: SocketAddr, cid: u8) -> FsConfig {
    FsConfig {
        cid,
        server_address: addr.ip().to_string(),
        port: addr.port(),
        socket_timeout_ms: 2000,
        lock_retry_interval_ms: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 8,
        ..FsConfig::default()
    }
}

/// Block server on an ephemeral port, running until the test runtime stops.
pub async fn spawn_server() -> SocketAddr {
    let cfg = FsConfig::default();
    let server = BlockServer::bind(
        "127.0.0.1:0",
        MemStore::new(cfg.total_num_blocks, cfg.block_size),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

pub fn connect(addr: SocketAddr, cid: u8) -> FileSystem<RpcStore> {
    FileSystem::new(BlockLayer::connect(client_config(addr, cid)).unwrap())
}
