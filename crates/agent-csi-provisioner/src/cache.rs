//! On-disk cache of the last process-module config revision.
//!
//! The cache lets a reconcile ask the backend only for changes, and lets a
//! freshly installed version receive the current config even when the
//! backend reports nothing new.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::procconf::{ProcessModuleConfig, ProcessModuleProperty};

/// Contents of `ruxitagentproc.conf.cache`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModuleCache {
    /// Revision the properties belong to; 0 when nothing is cached.
    pub revision: u64,
    /// Hex BLAKE3 digest of the canonical JSON of `properties`.
    pub hash: String,
    /// The cached properties.
    #[serde(default)]
    pub properties: Vec<ProcessModuleProperty>,
}

impl ProcessModuleCache {
    /// Build the cache entry for a config.
    #[must_use]
    pub fn from_config(config: &ProcessModuleConfig) -> Self {
        Self {
            revision: config.revision,
            hash: hash_properties(&config.properties),
            properties: config.properties.clone(),
        }
    }

    /// The cached config.
    #[must_use]
    pub fn to_config(&self) -> ProcessModuleConfig {
        ProcessModuleConfig {
            revision: self.revision,
            properties: self.properties.clone(),
        }
    }

    /// Whether the stored hash matches the stored properties.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.hash == hash_properties(&self.properties)
    }

    /// Read the cache file.
    ///
    /// A missing, unreadable or inconsistent cache yields the empty cache, so
    /// the next request asks the backend for revision 0.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config cache");
                return Self::default();
            }
        };
        match serde_json::from_slice::<Self>(&bytes) {
            Ok(cache) if cache.is_consistent() => cache,
            Ok(_) => {
                warn!(path = %path.display(), "Config cache hash mismatch, discarding");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse config cache");
                Self::default()
            }
        }
    }

    /// Write the cache file, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).map_err(io::Error::other)?;
        let tmp = path.with_extension("cache.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Hex BLAKE3 digest of the JSON encoding of `properties`.
#[must_use]
pub fn hash_properties(properties: &[ProcessModuleProperty]) -> String {
    // Serializing a Vec of plain string structs cannot fail.
    let json = serde_json::to_vec(properties).unwrap_or_default();
    hex::encode(blake3::hash(&json).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ProcessModuleConfig {
        ProcessModuleConfig {
            revision: 7,
            properties: vec![ProcessModuleProperty::new("general", "hostGroup", "prod")],
        }
    }

    #[test]
    fn store_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ruxitagentproc.conf.cache");

        let cache = ProcessModuleCache::from_config(&sample());
        cache.store(&path).unwrap();

        let loaded = ProcessModuleCache::load(&path);
        assert_eq!(loaded, cache);
        assert_eq!(loaded.to_config(), sample());
        assert_eq!(loaded.hash.len(), 64);
    }

    #[test]
    fn missing_or_garbage_is_revision_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        assert_eq!(ProcessModuleCache::load(&path).revision, 0);

        fs::write(&path, b"").unwrap();
        assert_eq!(ProcessModuleCache::load(&path).revision, 0);

        fs::write(&path, br#"{"revision":3,"hash":"bogus","properties":[]}"#).unwrap();
        assert_eq!(ProcessModuleCache::load(&path).revision, 0);
    }

    #[test]
    fn hash_tracks_properties() {
        let a = hash_properties(&sample().properties);
        let b = hash_properties(&[ProcessModuleProperty::new("general", "hostGroup", "dev")]);
        assert_ne!(a, b);
        assert_eq!(a, hash_properties(&sample().properties));
    }
}
