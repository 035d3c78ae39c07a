//! Content-addressed cache of rendered audio.
//!
//! Files live at `<dir>/<key>.wav`. The in-memory index maps each
//! [`CacheKey`] to its artifact and is mirrored to `<dir>/index.bin` so
//! recency survives restarts; on open the index is reconciled against the
//! directory contents.
//!
//! At most one render runs per key: callers claim a per-key lock before
//! rendering, and anyone queued behind the claim re-checks the index once
//! it is released. Artifacts are written to a temp file and renamed into
//! place, so a path handed out always points at a complete file.

use super::request::{CacheKey, RenderRequest};
use crate::error::{AudioError, AudioResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Name of the persisted index inside the cache directory.
const INDEX_FILE: &str = "index.bin";

/// Suffix of in-progress writes.
const TEMP_SUFFIX: &str = ".tmp";

/// Extension of cached artifacts.
const ARTIFACT_EXTENSION: &str = "wav";

/// Hits between index writes; the rest are flushed on drop.
const HITS_PER_INDEX_WRITE: u64 = 32;

/// A rendered file registered in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
    pub key: CacheKey,
    pub file_path: PathBuf,
    pub created_at: SystemTime,
    pub size_bytes: u64,
    /// Logical clock value of the last hit or insert.
    last_access: u64,
}

/// Storage bounds; None means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheLimits {
    pub max_count: Option<usize>,
    pub max_bytes: Option<u64>,
    pub max_age: Option<Duration>,
}

/// Counters describing cache activity since open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Outcome of [`AudioCache::get_or_render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    pub path: PathBuf,
    /// True if no render was needed.
    pub hit: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: HashMap<CacheKey, CachedArtifact>,
    clock: u64,
}

impl CacheIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|a| a.size_bytes).sum()
    }
}

fn is_expired(artifact: &CachedArtifact, max_age: Option<Duration>, now: SystemTime) -> bool {
    match max_age {
        Some(max_age) => now
            .duration_since(artifact.created_at)
            .map(|age| age > max_age)
            .unwrap_or(false),
        None => false,
    }
}

/// Removes a cached file, tolerating files that are already gone.
fn remove_artifact_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cached file"),
    }
}

/// Disk-backed cache of rendered audio keyed by request fingerprint.
pub struct AudioCache {
    dir: PathBuf,
    limits: CacheLimits,
    index: Mutex<CacheIndex>,
    /// Per-key render claims.
    claims: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    /// Hits whose recency is not yet in `index.bin`.
    unsaved_hits: AtomicU64,
}

impl AudioCache {
    /// Opens (creating if needed) a cache directory.
    ///
    /// Leftover temp files are deleted, the persisted index is loaded and
    /// reconciled with the files actually present, and the limits are
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns `CacheWrite` if the directory cannot be created, or `Io`
    /// if it cannot be listed.
    pub fn open(dir: impl Into<PathBuf>, limits: CacheLimits) -> AudioResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| AudioError::cache_write(&dir, e))?;

        let mut index = Self::load_index(&dir);
        let known = index.entries.len();
        Self::reconcile(&dir, &mut index)?;

        let cache = Self {
            dir,
            limits,
            index: Mutex::new(index),
            claims: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            unsaved_hits: AtomicU64::new(0),
        };

        {
            let mut index = cache.index.lock();
            cache.evict_locked(&mut index, None);
            info!(
                dir = %cache.dir.display(),
                indexed = known,
                entries = index.entries.len(),
                bytes = index.total_bytes(),
                "Opened audio cache"
            );
            cache.persist_locked(&index);
        }

        Ok(cache)
    }

    /// Returns the cached file for `request`, rendering it on a miss.
    ///
    /// `render_fn` runs at most once per key across concurrent callers;
    /// callers racing on the same key wait and then observe the hit.
    ///
    /// # Errors
    ///
    /// Errors from `render_fn` propagate unchanged; a failed write returns
    /// `CacheWrite`. Neither leaves a record or a partial file behind.
    pub fn get_or_render<F>(&self, request: &RenderRequest, render_fn: F) -> AudioResult<CacheLookup>
    where
        F: FnOnce(&RenderRequest) -> AudioResult<Vec<u8>>,
    {
        let key = request.cache_key();
        if let Some(path) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Audio cache hit");
            return Ok(CacheLookup { path, hit: true });
        }

        let claim = self.claim(&key);
        let result = {
            let _guard = claim.lock();
            self.render_claimed(&key, request, render_fn)
        };
        self.release(&key, &claim);
        result
    }

    fn render_claimed<F>(&self, key: &CacheKey, request: &RenderRequest, render_fn: F) -> AudioResult<CacheLookup>
    where
        F: FnOnce(&RenderRequest) -> AudioResult<Vec<u8>>,
    {
        // Another caller may have finished this key while we waited.
        if let Some(path) = self.lookup(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Audio cache hit after wait");
            return Ok(CacheLookup { path, hit: true });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Audio cache miss");
        let bytes = render_fn(request)?;
        let path = self.write_artifact(key, &bytes)?;

        let mut index = self.index.lock();
        let now = index.tick();
        index.entries.insert(
            key.clone(),
            CachedArtifact {
                key: key.clone(),
                file_path: path.clone(),
                created_at: SystemTime::now(),
                size_bytes: bytes.len() as u64,
                last_access: now,
            },
        );
        self.evict_locked(&mut index, Some(key));
        self.persist_locked(&index);

        Ok(CacheLookup { path, hit: false })
    }

    /// Returns the path of a live artifact and marks it recently used.
    pub fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        self.lookup(key)
    }

    /// Whether a record exists for `key` (without touching recency).
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().entries.contains_key(key)
    }

    /// Removes one artifact. Returns false if it was not cached.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut index = self.index.lock();
        match index.entries.remove(key) {
            Some(artifact) => {
                remove_artifact_file(&artifact.file_path);
                self.persist_locked(&index);
                true
            }
            None => false,
        }
    }

    /// Deletes every artifact and record. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut index = self.index.lock();
        let removed = index.entries.len();
        for (_, artifact) in index.entries.drain() {
            remove_artifact_file(&artifact.file_path);
        }
        self.persist_locked(&index);
        info!(removed, "Cleared audio cache");
        removed
    }

    /// Number of cached artifacts.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of cached artifacts in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes()
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configured limits.
    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Snapshot of counters.
    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            entries: index.entries.len(),
            bytes: index.total_bytes(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Writes the index file now.
    ///
    /// # Errors
    ///
    /// Returns `CacheWrite` if the index cannot be written.
    pub fn persist_index(&self) -> AudioResult<()> {
        let index = self.index.lock();
        self.unsaved_hits.store(0, Ordering::Relaxed);
        self.write_index(&index)
    }

    fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ARTIFACT_EXTENSION))
    }

    fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let mut index = self.index.lock();
        let artifact = index.entries.get(key)?;

        let stale = is_expired(artifact, self.limits.max_age, SystemTime::now());
        if stale || !artifact.file_path.is_file() {
            if let Some(artifact) = index.entries.remove(key) {
                if stale {
                    remove_artifact_file(&artifact.file_path);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Evicted expired audio");
                } else {
                    warn!(key = %key, "Cached audio file vanished; re-rendering");
                }
            }
            self.persist_locked(&index);
            return None;
        }

        let now = index.tick();
        let artifact = index.entries.get_mut(key)?;
        artifact.last_access = now;
        let path = artifact.file_path.clone();

        if self.unsaved_hits.fetch_add(1, Ordering::Relaxed) + 1 >= HITS_PER_INDEX_WRITE {
            self.persist_locked(&index);
        }
        Some(path)
    }

    fn claim(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut claims = self.claims.lock();
        Arc::clone(claims.entry(key.clone()).or_default())
    }

    fn release(&self, key: &CacheKey, claim: &Arc<Mutex<()>>) {
        let mut claims = self.claims.lock();
        if claims.get(key).is_some_and(|c| Arc::ptr_eq(c, claim)) {
            claims.remove(key);
        }
    }

    /// Writes bytes to a temp file and renames it into place.
    fn write_artifact(&self, key: &CacheKey, bytes: &[u8]) -> AudioResult<PathBuf> {
        let final_path = self.artifact_path(key);
        let temp_path = self
            .dir
            .join(format!(".{}.{}{}", key, uuid::Uuid::new_v4().simple(), TEMP_SUFFIX));

        let written = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        })();

        match written {
            Ok(()) => {
                debug!(path = %final_path.display(), bytes = bytes.len(), "Stored audio");
                Ok(final_path)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(AudioError::cache_write(final_path, e))
            }
        }
    }

    /// Applies age, count and size limits, least recently used first.
    /// `protect` is never evicted.
    fn evict_locked(&self, index: &mut CacheIndex, protect: Option<&CacheKey>) {
        let now = SystemTime::now();
        let mut victims: Vec<CacheKey> = index
            .entries
            .values()
            .filter(|a| Some(&a.key) != protect && is_expired(a, self.limits.max_age, now))
            .map(|a| a.key.clone())
            .collect();

        let mut by_recency: Vec<(u64, CacheKey, u64)> = index
            .entries
            .values()
            .filter(|a| Some(&a.key) != protect && !victims.contains(&a.key))
            .map(|a| (a.last_access, a.key.clone(), a.size_bytes))
            .collect();
        by_recency.sort();

        let mut count = index.entries.len() - victims.len();
        let mut bytes = index.total_bytes()
            - victims
                .iter()
                .filter_map(|k| index.entries.get(k))
                .map(|a| a.size_bytes)
                .sum::<u64>();
        let over = |count: usize, bytes: u64| {
            self.limits.max_count.is_some_and(|max| count > max)
                || self.limits.max_bytes.is_some_and(|max| bytes > max)
        };

        for (_, key, size) in by_recency {
            if !over(count, bytes) {
                break;
            }
            count -= 1;
            bytes -= size;
            victims.push(key);
        }

        for key in victims {
            if let Some(artifact) = index.entries.remove(&key) {
                remove_artifact_file(&artifact.file_path);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, bytes = artifact.size_bytes, "Evicted cached audio");
            }
        }
    }

    fn persist_locked(&self, index: &CacheIndex) {
        self.unsaved_hits.store(0, Ordering::Relaxed);
        if let Err(e) = self.write_index(index) {
            warn!(error = %e, "Failed to persist audio cache index");
        }
    }

    fn write_index(&self, index: &CacheIndex) -> AudioResult<()> {
        let path = self.dir.join(INDEX_FILE);
        let data = bincode::serialize(index).map_err(|e| {
            AudioError::cache_write(&path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        let temp_path = self.dir.join(format!(".{}{}", INDEX_FILE, TEMP_SUFFIX));
        fs::write(&temp_path, data)
            .and_then(|()| fs::rename(&temp_path, &path))
            .map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                AudioError::cache_write(&path, e)
            })
    }

    fn load_index(dir: &Path) -> CacheIndex {
        let path = dir.join(INDEX_FILE);
        match fs::read(&path) {
            Ok(data) => bincode::deserialize(&data).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache index");
                CacheIndex::default()
            }),
            Err(_) => CacheIndex::default(),
        }
    }

    /// Drops records without files, adopts unindexed files, and deletes
    /// temp files left by an interrupted process.
    fn reconcile(dir: &Path, index: &mut CacheIndex) -> AudioResult<()> {
        let mut on_disk: HashMap<CacheKey, (PathBuf, fs::Metadata)> = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                debug!(path = %path.display(), "Removing stale temp file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
                }
                continue;
            }

            let is_artifact = path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION);
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::parse);
            let metadata = entry.metadata()?;
            if let (true, Some(key), true) = (is_artifact, key, metadata.is_file()) {
                on_disk.insert(key, (path, metadata));
            }
        }

        index.entries.retain(|key, artifact| match on_disk.get(key) {
            Some((path, metadata)) => {
                artifact.file_path = path.clone();
                artifact.size_bytes = metadata.len();
                true
            }
            None => false,
        });

        let mut adopted: Vec<(SystemTime, CacheKey, PathBuf, u64)> = on_disk
            .into_iter()
            .filter(|(key, _)| !index.entries.contains_key(key))
            .map(|(key, (path, metadata))| {
                let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
                (modified, key, path, metadata.len())
            })
            .collect();
        adopted.sort();

        for (modified, key, file_path, size_bytes) in adopted {
            let last_access = index.tick();
            index.entries.insert(
                key.clone(),
                CachedArtifact {
                    key,
                    file_path,
                    created_at: modified,
                    size_bytes,
                    last_access,
                },
            );
        }
        Ok(())
    }
}

impl Drop for AudioCache {
    fn drop(&mut self) {
        if *self.unsaved_hits.get_mut() > 0 {
            let index = self.index.lock();
            if let Err(e) = self.write_index(&index) {
                warn!(error = %e, "Failed to persist audio cache index");
            }
        }
    }
}
