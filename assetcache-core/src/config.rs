use crate::error::{CacheError, Result};
use crate::wire::DEFAULT_STREAM_BLOCK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8125;
pub const DEFAULT_MAX_CACHE_SIZE_MB: u64 = 1024;
pub const DEFAULT_CACHE_FREE_FRACTION: f64 = 0.75;

/// Settings for one cache server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,
    #[serde(default = "default_max_cache_size_mb")]
    pub max_cache_size_mb: u64,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fraction of the cap eviction drains down to.
    #[serde(default = "default_cache_free_fraction")]
    pub cache_free_fraction: f64,
    #[serde(default = "default_stream_block_size")]
    pub stream_block_size: usize,
}

fn default_root_path() -> PathBuf {
    PathBuf::from("cache")
}

fn default_max_cache_size_mb() -> u64 {
    DEFAULT_MAX_CACHE_SIZE_MB
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cache_free_fraction() -> f64 {
    DEFAULT_CACHE_FREE_FRACTION
}

fn default_stream_block_size() -> usize {
    DEFAULT_STREAM_BLOCK_SIZE
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            max_cache_size_mb: default_max_cache_size_mb(),
            port: default_port(),
            cache_free_fraction: default_cache_free_fraction(),
            stream_block_size: default_stream_block_size(),
        }
    }
}

impl CacheConfig {
    pub fn max_cache_size_bytes(&self) -> u64 {
        self.max_cache_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            root: self.root_path.clone(),
            max_size_bytes: self.max_cache_size_bytes(),
            free_fraction: self.cache_free_fraction,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_block_size == 0 {
            return Err(CacheError::Config(
                "stream_block_size must be greater than zero".to_string(),
            ));
        }
        self.store_options().validate()
    }
}

/// The subset of [`CacheConfig`] the blob store needs, with the cap in bytes.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub root: PathBuf,
    pub max_size_bytes: u64,
    pub free_fraction: f64,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>, max_size_bytes: u64, free_fraction: f64) -> Self {
        Self {
            root: root.into(),
            max_size_bytes,
            free_fraction,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.free_fraction > 0.0 && self.free_fraction < 1.0) {
            return Err(CacheError::Config(format!(
                "cache_free_fraction must be within (0, 1), got {}",
                self.free_fraction
            )));
        }

        if self.max_size_bytes == 0 {
            return Err(CacheError::Config(
                "max cache size must be greater than zero".to_string(),
            ));
        }

        if self.root.as_os_str().is_empty() {
            return Err(CacheError::Config("root_path cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Size eviction drains the store down to.
    pub fn eviction_target_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.free_fraction) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8125);
        assert_eq!(config.max_cache_size_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_free_fraction_bounds() {
        for fraction in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            let config = CacheConfig {
                cache_free_fraction: fraction,
                ..CacheConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(CacheError::Config(_))),
                "fraction {} should be rejected",
                fraction
            );
        }
    }

    #[test]
    fn test_eviction_target() {
        let options = StoreOptions::new("/tmp/cache", 1000, 0.5);
        assert_eq!(options.eviction_target_bytes(), 500);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let config = CacheConfig {
            stream_block_size: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
