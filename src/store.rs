//! Content-addressed artifact store.
//!
//! Artifacts are persisted as JSON under a two-level directory structure
//! keyed by hash prefix: `{root}/{hash[0..2]}/{hash}.json`. A metadata
//! index (stored time, last access, size, original flag) is persisted
//! alongside so retention decisions survive process restart.
//!
//! Writes are idempotent by hash, so concurrent duplicate stores are safe.
//! Original input artifacts are never evicted, by TTL or by size pressure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{PipelineError, Result};
use crate::models::Artifact;

/// Per-artifact metadata tracked by the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub hash: String,
    pub stored_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
    pub is_original: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    entries: HashMap<String, IndexEntry>,
}

/// Summary counters for operators.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub artifact_count: usize,
    pub total_bytes: u64,
    pub original_count: usize,
}

pub struct ArtifactStore {
    root: PathBuf,
    config: StoreConfig,
    index: Mutex<StoreIndex>,
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating it if needed and reloading
    /// any existing index.
    pub fn open(root: &Path, config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let index_path = root.join("index.json");
        let index = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreIndex::default()
        };
        Ok(Self {
            root: root.to_path_buf(),
            config,
            index: Mutex::new(index),
        })
    }

    /// Index writes are all-or-nothing, so a poisoned lock still holds a
    /// consistent index and can be recovered.
    fn index(&self) -> std::sync::MutexGuard<'_, StoreIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn artifact_path(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[..2]).join(format!("{}.json", hash))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn persist_index(&self, index: &StoreIndex) -> Result<()> {
        let raw = serde_json::to_vec_pretty(index)?;
        std::fs::write(self.index_path(), raw)?;
        Ok(())
    }

    /// Store an artifact, returning its content hash.
    ///
    /// Idempotent: storing an identical artifact again returns the same
    /// hash without duplicating anything. Non-input artifacts must
    /// reference a parent that is already stored.
    pub fn store(&self, artifact: &Artifact) -> Result<String> {
        let hash = artifact.id.clone();
        let mut index = self.index();

        if index.entries.contains_key(&hash) {
            return Ok(hash);
        }

        if let Some(parent_id) = &artifact.parent_id {
            if !index.entries.contains_key(parent_id) {
                return Err(PipelineError::InvalidInput(format!(
                    "parent artifact {} not stored before child {}",
                    parent_id, hash
                )));
            }
        }

        let path = self.artifact_path(&hash);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec_pretty(artifact)?;
        let size = raw.len() as u64;
        std::fs::write(&path, raw)?;

        let now = Utc::now();
        index.entries.insert(
            hash.clone(),
            IndexEntry {
                hash: hash.clone(),
                stored_at: now,
                last_accessed: now,
                size_bytes: size,
                is_original: artifact.is_input(),
            },
        );
        self.enforce_size_cap(&mut index)?;
        self.persist_index(&index)?;

        tracing::debug!(hash = %hash, kind = artifact.type_name(), "stored artifact");
        Ok(hash)
    }

    /// Retrieve an artifact by hash, updating its last-accessed time.
    pub fn retrieve(&self, hash: &str) -> Result<Artifact> {
        let mut index = self.index();
        let entry = index
            .entries
            .get_mut(hash)
            .ok_or_else(|| PipelineError::NotFound(format!("artifact {}", hash)))?;
        entry.last_accessed = Utc::now();

        let path = self.artifact_path(hash);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| PipelineError::NotFound(format!("artifact file {}", hash)))?;
        let artifact = serde_json::from_str(&raw)?;
        self.persist_index(&index)?;
        Ok(artifact)
    }

    pub fn contains(&self, hash: &str) -> bool {
        let index = self.index();
        index.entries.contains_key(hash)
    }

    /// Evict artifacts older than the configured TTL.
    ///
    /// Original inputs are always skipped regardless of age. Returns the
    /// number of artifacts removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(self.config.ttl_hours as i64);
        let mut index = self.index();

        let expired: Vec<String> = index
            .entries
            .values()
            .filter(|e| !e.is_original && e.stored_at < cutoff)
            .map(|e| e.hash.clone())
            .collect();

        for hash in &expired {
            let _ = std::fs::remove_file(self.artifact_path(hash));
            index.entries.remove(hash);
        }

        if !expired.is_empty() {
            self.persist_index(&index)?;
            tracing::info!(removed = expired.len(), "cleaned up expired artifacts");
        }
        Ok(expired.len())
    }

    /// Evict least-recently-used artifacts until under the size cap.
    /// Originals are never candidates.
    fn enforce_size_cap(&self, index: &mut StoreIndex) -> Result<()> {
        let Some(max_bytes) = self.config.max_bytes else {
            return Ok(());
        };
        let mut total: u64 = index.entries.values().map(|e| e.size_bytes).sum();
        if total <= max_bytes {
            return Ok(());
        }

        let mut candidates: Vec<IndexEntry> = index
            .entries
            .values()
            .filter(|e| !e.is_original)
            .cloned()
            .collect();
        candidates.sort_by_key(|e| e.last_accessed);

        for entry in candidates {
            if total <= max_bytes {
                break;
            }
            let _ = std::fs::remove_file(self.artifact_path(&entry.hash));
            index.entries.remove(&entry.hash);
            total -= entry.size_bytes;
            tracing::debug!(hash = %entry.hash, "evicted artifact under size pressure");
        }
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let index = self.index();
        StoreStats {
            artifact_count: index.entries.len(),
            total_bytes: index.entries.values().map(|e| e.size_bytes).sum(),
            original_count: index.entries.values().filter(|e| e.is_original).count(),
        }
    }

    /// Directory for page/variant/zone image files belonging to an input.
    pub fn image_dir(&self, input_hash: &str) -> Result<PathBuf> {
        let dir = self
            .root
            .join("images")
            .join(&input_hash[..2])
            .join(input_hash);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtifactKind;
    use tempfile::tempdir;

    fn input_artifact(name: &str) -> Artifact {
        Artifact::new_input(ArtifactKind::Input {
            file_path: PathBuf::from(format!("/tmp/{}.png", name)),
            content_hash: name.to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 100,
        })
    }

    fn page_artifact(parent: &Artifact, page: u32) -> Artifact {
        Artifact::new_child(
            &parent.id,
            ArtifactKind::Page {
                page_number: page,
                image_path: PathBuf::from("/tmp/p.png"),
                width: 800,
                height: 1000,
                dpi: 300,
                rotation_applied: 0,
                skew_applied: 0.0,
            },
        )
    }

    #[test]
    fn test_store_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), StoreConfig::default()).unwrap();
        let artifact = input_artifact("a");
        let h1 = store.store(&artifact).unwrap();
        let h2 = store.store(&artifact).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.stats().artifact_count, 1);
    }

    #[test]
    fn test_retrieve_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), StoreConfig::default()).unwrap();
        let artifact = input_artifact("a");
        let hash = store.store(&artifact).unwrap();
        let back = store.retrieve(&hash).unwrap();
        assert_eq!(back.id, artifact.id);
        assert_eq!(back.kind, artifact.kind);
    }

    #[test]
    fn test_retrieve_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), StoreConfig::default()).unwrap();
        let err = store.retrieve("deadbeef").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn test_child_requires_stored_parent() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), StoreConfig::default()).unwrap();
        let input = input_artifact("a");
        let page = page_artifact(&input, 1);
        assert!(store.store(&page).is_err());
        store.store(&input).unwrap();
        store.store(&page).unwrap();
    }

    #[test]
    fn test_cleanup_never_removes_originals() {
        let dir = tempdir().unwrap();
        let config = StoreConfig {
            ttl_hours: 0,
            max_bytes: None,
        };
        let store = ArtifactStore::open(dir.path(), config).unwrap();
        let input = input_artifact("a");
        let page = page_artifact(&input, 1);
        store.store(&input).unwrap();
        store.store(&page).unwrap();

        // TTL of zero expires everything except protected originals.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let removed = store.cleanup_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(store.contains(&input.id));
        assert!(!store.contains(&page.id));
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempdir().unwrap();
        let artifact = input_artifact("a");
        {
            let store = ArtifactStore::open(dir.path(), StoreConfig::default()).unwrap();
            store.store(&artifact).unwrap();
        }
        let store = ArtifactStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert!(store.contains(&artifact.id));
        let back = store.retrieve(&artifact.id).unwrap();
        assert!(back.is_input());
    }

    #[test]
    fn test_lru_eviction_skips_originals() {
        let dir = tempdir().unwrap();
        let config = StoreConfig {
            ttl_hours: 24,
            // Small enough that storing pages forces eviction.
            max_bytes: Some(600),
        };
        let store = ArtifactStore::open(dir.path(), config).unwrap();
        let input = input_artifact("a");
        store.store(&input).unwrap();
        for page_number in 1..=4 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            let page = page_artifact(&input, page_number);
            store.store(&page).unwrap();
        }
        // Whatever was evicted, the original must still be present.
        assert!(store.contains(&input.id));
        let stats = store.stats();
        assert_eq!(stats.original_count, 1);
        assert!(stats.artifact_count < 5);
    }
}
