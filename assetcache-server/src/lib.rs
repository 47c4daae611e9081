//! Assetcache Server - network front end for the artifact cache
//!
//! Speaks the binary put/get protocol over TCP, one task per connection.

pub mod config;
pub mod observer;
pub mod server;
pub mod session;

pub use observer::{CacheEvent, CacheObserver, ChannelObserver, NoopObserver};
pub use server::{CacheServer, ServerStatus};
pub use session::{Session, SessionContext, SessionState};
