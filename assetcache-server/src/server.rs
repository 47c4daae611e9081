use crate::observer::{CacheObserver, NoopObserver};
use crate::session::{Session, SessionContext};
use assetcache_core::{
    BlobStore, CacheConfig, CacheError, GetArtifactOperation, PutArtifactOperation, Result,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Running,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    acceptor: JoinHandle<()>,
}

/// Accepts cache connections and runs one session task per client.
pub struct CacheServer {
    config: CacheConfig,
    store: BlobStore,
    ctx: SessionContext,
    status: watch::Sender<ServerStatus>,
    running: Mutex<Option<Running>>,
}

impl CacheServer {
    pub async fn new(config: CacheConfig) -> Result<Self> {
        Self::with_observer(config, Arc::new(NoopObserver)).await
    }

    /// Validates the configuration and opens the blob store. Configuration
    /// faults surface here, before the server can be started.
    pub async fn with_observer(
        config: CacheConfig,
        observer: Arc<dyn CacheObserver>,
    ) -> Result<Self> {
        config.validate()?;

        let store = BlobStore::open(config.store_options()).await?;
        let ctx = SessionContext {
            put: PutArtifactOperation::new(store.clone(), config.stream_block_size),
            get: GetArtifactOperation::new(store.clone()),
            observer,
            block_size: config.stream_block_size,
        };
        let (status, _) = watch::channel(ServerStatus::Stopped);

        Ok(Self {
            config,
            store,
            ctx,
            status,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.borrow()
    }

    /// Receives every status transition.
    pub fn subscribe_status(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Binds the configured port on all interfaces and starts accepting.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CacheError::InvalidState(
                "server is already running".to_string(),
            ));
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.port)).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let acceptor = tokio::spawn(accept_loop(listener, shutdown_rx, self.ctx.clone()));

        *running = Some(Running {
            local_addr,
            shutdown,
            acceptor,
        });
        self.status.send_replace(ServerStatus::Running);

        tracing::info!("Server listening for connections on {}", local_addr);
        Ok(local_addr)
    }

    /// Closes the listening socket. Sessions already in progress are left to
    /// finish on their own.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            tracing::debug!("Stop requested while server is not running");
            return Ok(());
        };

        self.status.send_replace(ServerStatus::Stopped);
        // The acceptor may already be gone; the listener is dropped either way.
        let _ = running.shutdown.send(());
        if let Err(e) = running.acceptor.await {
            tracing::warn!("Acceptor task ended abnormally: {}", e);
        }

        tracing::info!("Server on {} stopped", running.local_addr);
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
    ctx: SessionContext,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!("Accepting connection from {}", peer);
                    tokio::spawn(handle_connection(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            },
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: SessionContext) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not disable Nagle for {}: {}", peer, e);
    }

    let mut session = Session::new(stream, peer.to_string(), ctx);
    match session.run().await {
        Ok(()) => tracing::info!("Connection from {} closed", peer),
        Err(e) if e.is_transport() => {
            tracing::info!("Connection from {} was closed by the client: {}", peer, e)
        }
        Err(e) => tracing::error!("Session with {} aborted: {}", peer, e),
    }
}
