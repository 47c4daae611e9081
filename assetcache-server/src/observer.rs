use assetcache_core::CacheKey;
use tokio::sync::mpsc;

/// Completion signal raised after every command a session finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    PutProcessed { key: CacheKey, length: u64 },
    GetProcessed { key: CacheKey, hit: bool },
}

/// Receives completion events in-process. Puts are never acknowledged on the
/// wire, so this is the only way to learn a put has been promoted.
///
/// Callbacks run on the session task right after the command completes and
/// must not block.
pub trait CacheObserver: Send + Sync + 'static {
    fn put_processed(&self, _key: &CacheKey, _length: u64) {}

    fn get_processed(&self, _key: &CacheKey, _hit: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {}

/// Forwards every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<CacheEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: CacheEvent) {
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }
}

impl CacheObserver for ChannelObserver {
    fn put_processed(&self, key: &CacheKey, length: u64) {
        self.emit(CacheEvent::PutProcessed {
            key: key.clone(),
            length,
        });
    }

    fn get_processed(&self, key: &CacheKey, hit: bool) {
        self.emit(CacheEvent::GetProcessed {
            key: key.clone(),
            hit,
        });
    }
}
