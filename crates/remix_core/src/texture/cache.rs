//! On-disk conversion cache.
//!
//! Entries are keyed by (source content hash, target format) and stored as
//! files in the cache directory next to an `index.json`. Each key has its own
//! lock, so concurrent requests for one key produce it exactly once while
//! different keys convert in parallel.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::{TextureError, TextureResult};

const INDEX_FILE: &str = "index.json";

/// One cached conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub format: String,
    /// File name inside the cache directory
    pub file: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: Vec<CacheEntry>,
    /// Last seen content hash per source path
    sources: BTreeMap<String, String>,
}

type Key = (String, String);

/// Persistent cache of converted payloads.
#[derive(Debug)]
pub struct ConversionCache {
    dir: PathBuf,
    index: Mutex<CacheIndex>,
    slots: Mutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl ConversionCache {
    /// Open (or create) a cache directory. An unreadable index starts empty.
    pub fn open(dir: impl Into<PathBuf>) -> TextureResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index_path = dir.join(INDEX_FILE);
        let index = match std::fs::read(&index_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt cache index {}: {}", index_path.display(), e);
                CacheIndex::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheIndex::default(),
            Err(e) => return Err(e.into()),
        };
        log::debug!(
            "Opened conversion cache {} ({} entries)",
            dir.display(),
            index.entries.len()
        );
        Ok(Self {
            dir,
            index: Mutex::new(index),
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scratch directory for tool runs, unique per key.
    pub(crate) fn work_dir(&self, hash: &str, format: &str) -> PathBuf {
        self.dir
            .join("work")
            .join(format!("{}-{}", hash, sanitize(format)))
    }

    pub fn len(&self) -> usize {
        self.lock_index().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached payload for a key, if present and still on disk.
    pub fn lookup(&self, hash: &str, format: &str) -> Option<PathBuf> {
        let index = self.lock_index().ok()?;
        let entry = index
            .entries
            .iter()
            .find(|e| e.hash == hash && e.format == format)?;
        let path = self.dir.join(&entry.file);
        path.is_file().then_some(path)
    }

    /// Return the cached payload for a key, producing it with `produce` when
    /// absent. `produce` writes the payload to the path it is given. The
    /// flag is true on a cache hit.
    pub fn get_or_insert_with(
        &self,
        hash: &str,
        format: &str,
        extension: &str,
        produce: impl FnOnce(&Path) -> TextureResult<()>,
    ) -> TextureResult<(PathBuf, bool)> {
        let lease = self.slot(hash, format)?;
        let _guard = lease
            .slot
            .lock()
            .map_err(|_| TextureError::Cache("cache slot poisoned".into()))?;

        if let Some(path) = self.lookup(hash, format) {
            log::debug!("Cache hit {} {}", &hash[..hash.len().min(12)], format);
            return Ok((path, true));
        }

        let file = format!("{}_{}.{}", hash, sanitize(format), extension);
        let dest = self.dir.join(&file);
        produce(&dest)?;
        if !dest.is_file() {
            return Err(TextureError::Cache(format!(
                "producer did not write {}",
                dest.display()
            )));
        }

        let mut index = self.lock_index()?;
        index.entries.retain(|e| !(e.hash == hash && e.format == format));
        index.entries.push(CacheEntry {
            hash: hash.to_string(),
            format: format.to_string(),
            file,
        });
        self.persist(&index)?;
        Ok((dest, false))
    }

    /// Record the current hash of a source file. When the path was last seen
    /// with a different hash, that hash's entries are dropped. Returns the
    /// number of entries removed.
    pub fn note_source(&self, source: &Path, hash: &str) -> TextureResult<usize> {
        let key = source.to_string_lossy().into_owned();
        let mut index = self.lock_index()?;
        let previous = index.sources.insert(key, hash.to_string());
        let stale = match previous {
            Some(old) if old != hash => old,
            _ => return Ok(0),
        };
        // Another source may still share the old content
        if index.sources.values().any(|h| *h == stale) {
            self.persist(&index)?;
            return Ok(0);
        }
        let (removed, kept): (Vec<_>, Vec<_>) = index
            .entries
            .drain(..)
            .partition(|e| e.hash == stale);
        index.entries = kept;
        for entry in &removed {
            let _ = std::fs::remove_file(self.dir.join(&entry.file));
        }
        log::info!(
            "Source {} changed, invalidated {} cache entries",
            source.display(),
            removed.len()
        );
        self.persist(&index)?;
        Ok(removed.len())
    }

    /// Remove every entry and payload file. Returns the number of entries.
    pub fn clear(&self) -> TextureResult<usize> {
        let mut index = self.lock_index()?;
        let count = index.entries.len();
        for entry in &index.entries {
            let _ = std::fs::remove_file(self.dir.join(&entry.file));
        }
        let work = self.dir.join("work");
        if work.is_dir() {
            std::fs::remove_dir_all(&work)?;
        }
        *index = CacheIndex::default();
        self.persist(&index)?;
        log::info!("Cleared {} cache entries in {}", count, self.dir.display());
        Ok(count)
    }

    fn slot(&self, hash: &str, format: &str) -> TextureResult<SlotLease<'_>> {
        let key = (hash.to_string(), format.to_string());
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| TextureError::Cache("cache slots poisoned".into()))?;
        let slot = slots.entry(key.clone()).or_default().clone();
        Ok(SlotLease {
            cache: self,
            key,
            slot,
        })
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn lock_index(&self) -> TextureResult<MutexGuard<'_, CacheIndex>> {
        self.index
            .lock()
            .map_err(|_| TextureError::Cache("cache index poisoned".into()))
    }

    fn persist(&self, index: &CacheIndex) -> TextureResult<()> {
        let json = serde_json::to_vec_pretty(index)
            .map_err(|e| TextureError::Cache(e.to_string()))?;
        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.dir.join(INDEX_FILE))?;
        Ok(())
    }
}

/// A held per-key lock. The last holder removes the key's slot on drop.
struct SlotLease<'a> {
    cache: &'a ConversionCache,
    key: Key,
    slot: Arc<Mutex<()>>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .cache
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here
        if Arc::strong_count(&self.slot) <= 2 {
            slots.remove(&self.key);
        }
    }
}

fn sanitize(format: &str) -> String {
    format
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
