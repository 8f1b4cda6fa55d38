//! Shard wire format.
//!
//! Each message is a `u32` big-endian length followed by that many bytes of
//! `bincode`. Values inside messages travel as canonical value bytes, never
//! as bincode structures, so both ends agree on them bit for bit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::descriptor::ShardRange;
use super::store::{CommitId, ExportPage, ShardError};
use crate::address::Address;
use crate::config::MAX_FRAME_BYTES;
use crate::value::{self, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardRequest {
    Ping,
    Get {
        address: Address,
    },
    ExportPage {
        range: ShardRange,
        prefix_bytes: u8,
        after: Option<Address>,
        limit: u32,
    },
    Prepare {
        commit_id: CommitId,
        writes: Vec<(Address, Vec<u8>)>,
    },
    Commit {
        commit_id: CommitId,
    },
    Abort {
        commit_id: CommitId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardResponse {
    Pong { version: u16 },
    Value(Option<Vec<u8>>),
    Page {
        entries: Vec<(Address, Vec<u8>)>,
        next: Option<Address>,
    },
    Ack,
    Error { message: String },
}

impl ShardRequest {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ShardRequest::Ping => "ping",
            ShardRequest::Get { .. } => "get",
            ShardRequest::ExportPage { .. } => "export_page",
            ShardRequest::Prepare { .. } => "prepare",
            ShardRequest::Commit { .. } => "commit",
            ShardRequest::Abort { .. } => "abort",
        }
    }
}

pub(crate) fn encode_entries(entries: Vec<(Address, Value)>) -> Vec<(Address, Vec<u8>)> {
    entries
        .into_iter()
        .map(|(address, v)| (address, value::encode(&v)))
        .collect()
}

pub(crate) fn decode_entries(
    entries: Vec<(Address, Vec<u8>)>,
) -> Result<Vec<(Address, Value)>, ShardError> {
    entries
        .into_iter()
        .map(|(address, raw)| Ok::<_, ShardError>((address, value::decode(&raw)?)))
        .collect()
}

pub(crate) fn page_to_wire(page: ExportPage) -> ShardResponse {
    ShardResponse::Page {
        entries: encode_entries(page.entries),
        next: page.next,
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ShardError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(message).map_err(|e| ShardError::Protocol(e.to_string()))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(ShardError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF before
/// the length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ShardError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_BYTES {
        return Err(ShardError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let message = bincode::deserialize(&body).map_err(|e| ShardError::Protocol(e.to_string()))?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let request = ShardRequest::Prepare {
            commit_id: CommitId([4; 32]),
            writes: encode_entries(vec![(Address::new([1; 20]), Value::from(3u64))]),
        };
        write_frame(&mut a, &request).await.unwrap();
        let received: ShardRequest = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_FRAME_BYTES + 1) as u32).await.unwrap();
        let result: Result<Option<ShardRequest>, _> = read_frame(&mut b).await;
        assert!(matches!(result, Err(ShardError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn clean_eof_reads_as_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let result: Option<ShardResponse> = read_frame(&mut b).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn corrupt_entry_bytes_surface_as_codec_errors() {
        let err = decode_entries(vec![(Address::ZERO, b"i01e".to_vec())]).unwrap_err();
        assert!(matches!(err, ShardError::Corrupt(_)));
    }
}
