use crate::observer::CacheObserver;
use assetcache_core::wire::{
    self, CMD_GET, CMD_PUT, PROTOCOL_VERSION, encode_hit_header, encode_miss_response,
    encode_server_version, parse_client_version,
};
use assetcache_core::{
    CacheError, GetArtifactOperation, GetArtifactOperationOutcome, GetArtifactOperationRequest,
    PutArtifactOperation, PutArtifactOperationRequest, Result,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Everything a session needs from the server, shared by all connections.
#[derive(Clone)]
pub struct SessionContext {
    pub put: PutArtifactOperation,
    pub get: GetArtifactOperation,
    pub observer: Arc<dyn CacheObserver>,
    pub block_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Put,
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Ready,
    Dispatching(Command),
    Closed,
}

/// One client connection: the version handshake followed by a loop of
/// put/get commands until the client hangs up.
pub struct Session<S> {
    peer: String,
    stream: BufReader<S>,
    state: SessionState,
    ctx: SessionContext,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, ctx: SessionContext) -> Self {
        Self {
            peer: peer.into(),
            stream: BufReader::new(stream),
            state: SessionState::AwaitingHandshake,
            ctx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session until end of stream. Any fault closes the session
    /// and is returned to the caller; it never reaches other sessions.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let next = match self.step().await {
                Ok(next) => next,
                Err(e) => {
                    self.state = SessionState::Closed;
                    return Err(e);
                }
            };
            self.state = next;
            if next == SessionState::Closed {
                return Ok(());
            }
        }
    }

    async fn step(&mut self) -> Result<SessionState> {
        match self.state {
            SessionState::AwaitingHandshake => {
                self.handshake().await?;
                Ok(SessionState::Ready)
            }
            SessionState::Ready => match wire::read_byte(&mut self.stream).await? {
                None => Ok(SessionState::Closed),
                Some(CMD_PUT) => Ok(SessionState::Dispatching(Command::Put)),
                Some(CMD_GET) => Ok(SessionState::Dispatching(Command::Get)),
                Some(other) => {
                    tracing::trace!("Ignoring byte 0x{:02x} from {}", other, self.peer);
                    Ok(SessionState::Ready)
                }
            },
            SessionState::Dispatching(Command::Put) => {
                self.process_put().await?;
                Ok(SessionState::Ready)
            }
            SessionState::Dispatching(Command::Get) => {
                self.process_get().await?;
                Ok(SessionState::Ready)
            }
            SessionState::Closed => Ok(SessionState::Closed),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let tag = wire::read_client_version(&mut self.stream).await?;
        match parse_client_version(&tag) {
            Some(version) => {
                tracing::info!("Client {} version {}", self.peer, version)
            }
            None => tracing::info!(
                "Client {} sent unparsable version tag {:?}",
                self.peer,
                String::from_utf8_lossy(&tag)
            ),
        }

        self.send(&encode_server_version(PROTOCOL_VERSION)).await?;
        self.flush().await
    }

    async fn process_put(&mut self) -> Result<()> {
        let length = wire::read_length(&mut self.stream).await?;
        let key = wire::read_key(&mut self.stream).await?;
        tracing::info!("PUT: {} ({} bytes) from {}", key, length, self.peer);

        let result = self
            .ctx
            .put
            .run(PutArtifactOperationRequest {
                key,
                length,
                body: &mut self.stream,
            })
            .await?;

        tracing::info!(
            "PUT processed: {} ({} bytes, replaced: {}), cache size {} bytes",
            result.key,
            result.length,
            result.replaced,
            result.total_size
        );
        self.ctx.observer.put_processed(&result.key, result.length);
        Ok(())
    }

    async fn process_get(&mut self) -> Result<()> {
        let key = wire::read_key(&mut self.stream).await?;

        let outcome = self
            .ctx
            .get
            .run(GetArtifactOperationRequest { key: key.clone() })
            .await?;

        let hit = match outcome {
            GetArtifactOperationOutcome::NotFound => {
                tracing::info!("GET: Cache miss. {}", key);
                self.send(&encode_miss_response(&key)?).await?;
                false
            }
            GetArtifactOperationOutcome::Found(mut reader) => {
                tracing::info!("GET: Cache hit. {} ({} bytes)", key, reader.length);

                // Header goes out in one write; some clients cannot cope with
                // it arriving in pieces.
                self.send(&encode_hit_header(reader.length, &key)?).await?;

                let mut buffer = vec![0u8; self.ctx.block_size.max(1)];
                let mut remaining = reader.length;
                while remaining > 0 {
                    let n = remaining.min(buffer.len() as u64) as usize;
                    reader.file.read_exact(&mut buffer[..n]).await?;
                    self.send(&buffer[..n]).await?;
                    remaining -= n as u64;
                }
                true
            }
        };

        self.flush().await?;
        self.ctx.observer.get_processed(&key, hit);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .get_mut()
            .write_all(bytes)
            .await
            .map_err(CacheError::Transport)
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(CacheError::Transport)
    }
}
