//! Thin client for the cache protocol.
//!
//! Puts are fire-and-forget: the server never acknowledges them, so a caller
//! that needs confirmation has to follow up with a get.

use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::wire::{
    self, CLIENT_VERSION_TAG, RESP_HIT, RESP_MISS, encode_get_request, encode_put_header,
};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetResult {
    Hit { key: CacheKey, data: Bytes },
    Miss { key: CacheKey },
}

impl GetResult {
    pub fn is_hit(&self) -> bool {
        matches!(self, GetResult::Hit { .. })
    }

    /// The key as echoed back by the server.
    pub fn key(&self) -> &CacheKey {
        match self {
            GetResult::Hit { key, .. } | GetResult::Miss { key } => key,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            GetResult::Hit { data, .. } => Some(data),
            GetResult::Miss { .. } => None,
        }
    }
}

pub struct CacheClient {
    stream: TcpStream,
    server_version: String,
}

impl CacheClient {
    /// Connects and performs the version handshake.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(CacheError::Transport)?;
        stream.set_nodelay(true).map_err(CacheError::Transport)?;

        stream
            .write_all(CLIENT_VERSION_TAG)
            .await
            .map_err(CacheError::Transport)?;
        let server_version = wire::read_server_version(&mut stream).await?;
        tracing::debug!("Server version {}", server_version);

        Ok(Self {
            stream,
            server_version,
        })
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub async fn put(&mut self, key: &CacheKey, data: &[u8]) -> Result<()> {
        let header = encode_put_header(data.len() as u64, key)?;
        self.send(&header).await?;
        self.send(data).await
    }

    pub async fn get(&mut self, key: &CacheKey) -> Result<GetResult> {
        let request = encode_get_request(key)?;
        self.send(&request).await?;

        let code = wire::read_byte(&mut self.stream)
            .await?
            .ok_or_else(|| CacheError::Protocol("server closed the connection".to_string()))?;

        match code {
            RESP_MISS => {
                let key = wire::read_key(&mut self.stream).await?;
                Ok(GetResult::Miss { key })
            }
            RESP_HIT => {
                let length = wire::read_length(&mut self.stream).await?;
                let key = wire::read_key(&mut self.stream).await?;
                let length = usize::try_from(length).map_err(|_| {
                    CacheError::Protocol(format!("artifact of {} bytes is too large", length))
                })?;
                let mut data = vec![0u8; length];
                self.stream
                    .read_exact(&mut data)
                    .await
                    .map_err(CacheError::Transport)?;
                Ok(GetResult::Hit {
                    key,
                    data: Bytes::from(data),
                })
            }
            other => Err(CacheError::Protocol(format!(
                "unexpected response code 0x{:02x}",
                other
            ))),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(CacheError::Transport)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(CacheError::Transport)
    }
}
