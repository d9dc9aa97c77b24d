//! Development block server
//!
//! Serves a [`MemStore`] over the RPC protocol of [`crate::cadapter::rpc`].
//! Storage is volatile; a snapshot taken with `netfs dump` is the only way to
//! keep the blocks across restarts.

use crate::cadapter::client::RemoteStore;
use crate::cadapter::mem::MemStore;
use crate::cadapter::rpc::{Request, Response};
use crate::error::BlockError;
use anyhow::Result;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

pub struct BlockServer {
    listener: TcpListener,
    store: MemStore,
}

impl BlockServer {
    pub async fn bind(addr: impl ToSocketAddrs, store: MemStore) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, store })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients until the listener fails, one task per connection.
    pub async fn run(self) -> Result<()> {
        info!(
            addr = %self.listener.local_addr()?,
            blocks = self.store.num_blocks(),
            block_size = self.store.block_size(),
            "block server listening"
        );
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let store = self.store.clone();
            debug!(%peer, "connection accepted");
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, store).await {
                    warn!(%peer, "connection closed with error: {e:?}");
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, store: MemStore) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let req: Request = bincode::deserialize(&frame?)?;
        let resp = dispatch(&store, req).await;
        framed.send(Bytes::from(bincode::serialize(&resp)?)).await?;
    }
    Ok(())
}

async fn dispatch(store: &MemStore, req: Request) -> Response {
    match req {
        Request::Get(block) => block_response(store.get(block).await),
        Request::Put(block, data) => match store.put(block, &data).await {
            Ok(()) => Response::Status(0),
            Err(e) => {
                warn!(block, "put refused: {e}");
                Response::Status(-1)
            }
        },
        Request::Rsm(block) => block_response(store.rsm(block).await),
    }
}

fn block_response(result: Result<Bytes, BlockError>) -> Response {
    match result {
        Ok(data) => Response::Block(data.to_vec()),
        Err(e) => Response::Error(e.to_string()),
    }
}
