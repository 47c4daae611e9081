use assetcache_core::{CacheConfig, CacheError, Result};
use std::path::PathBuf;

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub max_cache_size_mb: Option<u64>,
    pub cache_free_fraction: Option<f64>,
}

/// Loads the server configuration from an optional file layered under
/// `ASSETCACHE_*` environment variables, then applies CLI overrides.
pub fn load(path: Option<&str>, overrides: &ConfigOverrides) -> Result<CacheConfig> {
    let mut builder = ::config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(::config::File::with_name(path));
    }

    let settings = builder
        .add_source(::config::Environment::with_prefix("ASSETCACHE").try_parsing(true))
        .build()
        .map_err(|e| CacheError::Config(e.to_string()))?;

    let mut config: CacheConfig = settings
        .try_deserialize()
        .map_err(|e| CacheError::Config(e.to_string()))?;

    if let Some(root_path) = &overrides.root_path {
        config.root_path = root_path.clone();
    }
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(max) = overrides.max_cache_size_mb {
        config.max_cache_size_mb = max;
    }
    if let Some(fraction) = overrides.cache_free_fraction {
        config.cache_free_fraction = fraction;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file_with_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("assetcache.toml");
        std::fs::write(
            &path,
            r#"
root_path = "/var/cache/assetcache"
max_cache_size_mb = 2048
cache_free_fraction = 0.5
"#,
        )
        .unwrap();

        let overrides = ConfigOverrides {
            port: Some(9000),
            ..ConfigOverrides::default()
        };
        let config = load(path.to_str(), &overrides).unwrap();

        assert_eq!(config.root_path, PathBuf::from("/var/cache/assetcache"));
        assert_eq!(config.max_cache_size_mb, 2048);
        assert_eq!(config.cache_free_fraction, 0.5);
        assert_eq!(config.port, 9000);
        assert_eq!(config.stream_block_size, 1024);
    }

    #[test]
    fn test_invalid_free_fraction_is_fatal() {
        let overrides = ConfigOverrides {
            cache_free_fraction: Some(1.25),
            ..ConfigOverrides::default()
        };
        assert!(matches!(load(None, &overrides), Err(CacheError::Config(_))));
    }
}
