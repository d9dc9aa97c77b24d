//! RPC client for a remote block server.
//!
//! Requests and responses are `bincode` messages carried in length-delimited
//! frames over one TCP connection per client. A call that times out or hits
//! a transport error drops the connection; the next call reconnects, so a
//! late reply to an abandoned request is never mistaken for a fresh one.

use crate::cadapter::client::RemoteStore;
use crate::error::BlockError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Request {
    Get(u32),
    Put(u32, Vec<u8>),
    Rsm(u32),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Response {
    Block(Vec<u8>),
    // 0 on success, -1 when the server refused the write
    Status(i32),
    Error(String),
}

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

pub struct RpcStore {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl RpcStore {
    /// Creates a client for `addr` (`host:port`). The connection is opened
    /// on the first call.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    async fn call(&self, req: Request) -> Result<Response, BlockError> {
        let mut slot = self.conn.lock().await;
        let result =
            tokio::time::timeout(self.timeout, Self::round_trip(&mut slot, &self.addr, &req)).await;
        match result {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => {
                *slot = None;
                Err(e)
            }
            Err(_) => {
                *slot = None;
                Err(BlockError::Transport(format!(
                    "no reply from {} within {:?}",
                    self.addr, self.timeout
                )))
            }
        }
    }

    async fn round_trip(
        slot: &mut Option<Connection>,
        addr: &str,
        req: &Request,
    ) -> Result<Response, BlockError> {
        if slot.is_none() {
            debug!(addr, "connecting to block server");
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            *slot = Some(Framed::new(stream, LengthDelimitedCodec::new()));
        }
        let Some(conn) = slot.as_mut() else {
            return Err(BlockError::Transport(format!("not connected to {addr}")));
        };

        conn.send(Bytes::from(bincode::serialize(req)?)).await?;
        let frame = conn
            .next()
            .await
            .ok_or_else(|| BlockError::Transport(format!("{addr} closed the connection")))??;
        Ok(bincode::deserialize(&frame)?)
    }

    fn unexpected(op: &'static str, block: u32, resp: Response) -> BlockError {
        let msg = match resp {
            Response::Error(msg) => msg,
            other => format!("unexpected response {other:?}"),
        };
        BlockError::Server { op, block, msg }
    }
}

#[async_trait]
impl RemoteStore for RpcStore {
    async fn get(&self, block: u32) -> Result<Bytes, BlockError> {
        match self.call(Request::Get(block)).await? {
            Response::Block(data) => Ok(Bytes::from(data)),
            other => Err(Self::unexpected("get", block, other)),
        }
    }

    async fn put(&self, block: u32, data: &[u8]) -> Result<(), BlockError> {
        match self.call(Request::Put(block, data.to_vec())).await? {
            Response::Status(0) => Ok(()),
            Response::Status(code) => Err(BlockError::Server {
                op: "put",
                block,
                msg: format!("server returned status {code}"),
            }),
            other => Err(Self::unexpected("put", block, other)),
        }
    }

    async fn rsm(&self, block: u32) -> Result<Bytes, BlockError> {
        match self.call(Request::Rsm(block)).await? {
            Response::Block(data) => Ok(Bytes::from(data)),
            other => Err(Self::unexpected("rsm", block, other)),
        }
    }
}
