use crate::error::{CacheError, Result};
use std::fmt;
use uuid::Uuid;

const DATA_EXTENSION: &str = ".data";

/// Names one artifact version: the asset id plus a caller-supplied hash.
///
/// The hash is an opaque key. It is stored lowercase so that paths derived
/// from it are stable regardless of how the caller spelled it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    id: Uuid,
    hash: String,
}

impl CacheKey {
    pub fn new(id: Uuid, hash: impl AsRef<str>) -> Result<Self> {
        let hash = hash.as_ref();
        validate_hash(hash)?;
        Ok(Self {
            id,
            hash: hash.to_ascii_lowercase(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Two-character directory the entry is sharded into.
    pub fn shard(&self) -> &str {
        &self.hash[..2]
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}{}", self.id, self.hash, DATA_EXTENSION)
    }

    /// Parses `{uuid}_{hash}.data`. Returns `None` for anything else.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(DATA_EXTENSION)?;
        let (id, hash) = stem.split_once('_')?;
        let id = Uuid::parse_str(id).ok()?;
        Self::new(id, hash).ok()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.hash)
    }
}

fn validate_hash(hash: &str) -> Result<()> {
    if hash.len() < 2 || hash.len() % 2 != 0 {
        return Err(CacheError::InvalidKey(format!(
            "hash must be a non-empty even-length hex string, got {:?}",
            hash
        )));
    }

    if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CacheError::InvalidKey(format!(
            "hash contains non-hex characters: {:?}",
            hash
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_normalized() {
        let id = Uuid::new_v4();
        let key = CacheKey::new(id, "ABcd01").unwrap();
        assert_eq!(key.hash(), "abcd01");
        assert_eq!(key.shard(), "ab");
        assert_eq!(key, CacheKey::new(id, "abCD01").unwrap());
    }

    #[test]
    fn test_malformed_hashes_rejected() {
        let id = Uuid::new_v4();
        for hash in ["", "a", "abc", "zz", "0g"] {
            assert!(
                matches!(CacheKey::new(id, hash), Err(CacheError::InvalidKey(_))),
                "hash {:?} should be rejected",
                hash
            );
        }
    }

    #[test]
    fn test_file_name_roundtrip() {
        let key = CacheKey::new(Uuid::new_v4(), "0123456789abcdef0123456789abcdef").unwrap();
        let name = key.file_name();
        assert!(name.ends_with(".data"));
        assert_eq!(CacheKey::parse_file_name(&name), Some(key));
    }

    #[test]
    fn test_parse_file_name_rejects_strangers() {
        for name in [
            "notes.txt",
            "README",
            "not-a-uuid_abcd.data",
            "3f2504e0-4f89-11d3-9a0c-0305e82c3301.data",
            "3f2504e0-4f89-11d3-9a0c-0305e82c3301_abc.data",
            "3f2504e0-4f89-11d3-9a0c-0305e82c3301_abcd.tmp",
        ] {
            assert!(CacheKey::parse_file_name(name).is_none(), "{}", name);
        }
    }
}
