//! # Shard Server
//!
//! Serves one shard store over the wire protocol so other nodes can mount
//! it as a remote shard. One task per connection; requests on a connection
//! are answered in order.

use std::future::Future;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::descriptor::ShardRange;
use super::store::{ShardError, ShardStore};
use super::wire::{decode_entries, page_to_wire, read_frame, write_frame, ShardRequest, ShardResponse};
use crate::config::{EXPORT_PAGE_SIZE, SHARD_WIRE_VERSION};

pub struct ShardServer {
    store: Arc<dyn ShardStore>,
    range: ShardRange,
    prefix_bytes: usize,
}

impl ShardServer {
    /// Serve `store`, which owns `range` of the keyspace.
    pub fn new(store: Arc<dyn ShardStore>, range: ShardRange, prefix_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            range,
            prefix_bytes,
        })
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ShardError> {
        info!(
            addr = ?listener.local_addr().ok(),
            range = %self.range,
            "shard server listening"
        );
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            warn!(%peer, error = %e, "shard connection closed with error");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("shard server shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), ShardError> {
        stream.set_nodelay(true)?;
        while let Some(request) = read_frame::<_, ShardRequest>(&mut stream).await? {
            debug!(kind = request.kind(), "shard request received");
            let response = self.handle(request).await;
            write_frame(&mut stream, &response).await?;
        }
        Ok(())
    }

    /// Answer one request. Store failures become `ShardResponse::Error`.
    pub async fn handle(&self, request: ShardRequest) -> ShardResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => ShardResponse::Error {
                message: e.to_string(),
            },
        }
    }

    async fn dispatch(&self, request: ShardRequest) -> Result<ShardResponse, ShardError> {
        match request {
            ShardRequest::Ping => Ok(ShardResponse::Pong {
                version: SHARD_WIRE_VERSION,
            }),
            ShardRequest::Get { address } => {
                if !self.range.contains_address(&address, self.prefix_bytes) {
                    return Err(ShardError::Remote(format!(
                        "{} is outside served range {}",
                        address, self.range
                    )));
                }
                let value = self.store.get(&address).await?;
                Ok(ShardResponse::Value(value.map(|v| crate::value::encode(&v))))
            }
            ShardRequest::ExportPage {
                range,
                prefix_bytes,
                after,
                limit,
            } => {
                let prefix_bytes = usize::from(prefix_bytes).clamp(1, 8);
                let limit = (limit as usize).clamp(1, EXPORT_PAGE_SIZE);
                let page = self
                    .store
                    .export_page(range, prefix_bytes, after, limit)
                    .await?;
                Ok(page_to_wire(page))
            }
            ShardRequest::Prepare { commit_id, writes } => {
                let writes = decode_entries(writes)?;
                if let Some((address, _)) = writes
                    .iter()
                    .find(|(a, _)| !self.range.contains_address(a, self.prefix_bytes))
                {
                    return Err(ShardError::Remote(format!(
                        "write to {} is outside served range {}",
                        address, self.range
                    )));
                }
                self.store.prepare(commit_id, writes).await?;
                Ok(ShardResponse::Ack)
            }
            ShardRequest::Commit { commit_id } => {
                self.store.commit(commit_id).await?;
                Ok(ShardResponse::Ack)
            }
            ShardRequest::Abort { commit_id } => {
                self.store.abort(commit_id).await?;
                Ok(ShardResponse::Ack)
            }
        }
    }
}
