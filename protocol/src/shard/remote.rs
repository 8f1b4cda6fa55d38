//! Client side of the shard wire protocol.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::descriptor::ShardRange;
use super::store::{CommitId, ExportPage, ShardError, ShardStore};
use super::wire::{decode_entries, encode_entries, read_frame, write_frame, ShardRequest, ShardResponse};
use crate::address::Address;
use crate::value::{self, Value};

/// Idle connections kept per remote shard.
const MAX_IDLE_CONNECTIONS: usize = 8;

/// A shard served by another process. Connections are pooled; a connection
/// that fails mid-call is dropped rather than returned to the pool.
///
/// Calls carry no timeout of their own. The router wraps every call in one.
pub struct RemoteShardStore {
    host: String,
    port: u16,
    idle: Mutex<Vec<TcpStream>>,
}

impl RemoteShardStore {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<TcpStream, ShardError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ShardError::Unreachable(format!("{}: {}", self.endpoint(), e)))?;
        stream.set_nodelay(true)?;
        debug!(endpoint = %self.endpoint(), "connected to remote shard");
        Ok(stream)
    }

    async fn call(&self, request: ShardRequest) -> Result<ShardResponse, ShardError> {
        let pooled = self.idle.lock().pop();
        let mut stream = match pooled {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        trace!(endpoint = %self.endpoint(), kind = request.kind(), "shard request");
        write_frame(&mut stream, &request).await?;
        let response: ShardResponse = read_frame(&mut stream)
            .await?
            .ok_or_else(|| ShardError::Unreachable(format!("{} closed the connection", self.endpoint())))?;

        {
            let mut idle = self.idle.lock();
            if idle.len() < MAX_IDLE_CONNECTIONS {
                idle.push(stream);
            }
        }

        match response {
            ShardResponse::Error { message } => Err(ShardError::Remote(message)),
            other => Ok(other),
        }
    }

    async fn expect_ack(&self, request: ShardRequest) -> Result<(), ShardError> {
        match self.call(request).await? {
            ShardResponse::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }

    /// Round-trip a ping and return the server's wire version.
    pub async fn ping(&self) -> Result<u16, ShardError> {
        match self.call(ShardRequest::Ping).await? {
            ShardResponse::Pong { version } => Ok(version),
            other => Err(unexpected("pong", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &ShardResponse) -> ShardError {
    ShardError::Protocol(format!("expected {}, got {:?}", wanted, got))
}

#[async_trait]
impl ShardStore for RemoteShardStore {
    async fn get(&self, address: &Address) -> Result<Option<Value>, ShardError> {
        match self.call(ShardRequest::Get { address: *address }).await? {
            ShardResponse::Value(Some(raw)) => Ok(Some(value::decode(&raw)?)),
            ShardResponse::Value(None) => Ok(None),
            other => Err(unexpected("value", &other)),
        }
    }

    async fn export_page(
        &self,
        range: ShardRange,
        prefix_bytes: usize,
        after: Option<Address>,
        limit: usize,
    ) -> Result<ExportPage, ShardError> {
        let request = ShardRequest::ExportPage {
            range,
            prefix_bytes: prefix_bytes as u8,
            after,
            limit: limit.min(u32::MAX as usize) as u32,
        };
        match self.call(request).await? {
            ShardResponse::Page { entries, next } => Ok(ExportPage {
                entries: decode_entries(entries)?,
                next,
            }),
            other => Err(unexpected("page", &other)),
        }
    }

    async fn import(&self, _entries: Vec<(Address, Value)>) -> Result<(), ShardError> {
        Err(ShardError::Remote(
            "remote shards are written only through commits".into(),
        ))
    }

    async fn prepare(
        &self,
        commit_id: CommitId,
        writes: Vec<(Address, Value)>,
    ) -> Result<(), ShardError> {
        self.expect_ack(ShardRequest::Prepare {
            commit_id,
            writes: encode_entries(writes),
        })
        .await
    }

    async fn commit(&self, commit_id: CommitId) -> Result<(), ShardError> {
        self.expect_ack(ShardRequest::Commit { commit_id }).await
    }

    async fn abort(&self, commit_id: CommitId) -> Result<(), ShardError> {
        self.expect_ack(ShardRequest::Abort { commit_id }).await
    }

    async fn is_empty(&self) -> Result<bool, ShardError> {
        let page = self
            .export_page(ShardRange::new(0, u64::MAX), 8, None, 1)
            .await?;
        Ok(page.entries.is_empty())
    }
}
