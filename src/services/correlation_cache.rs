use crate::error::{AppError, Result};
use crate::models::{CacheEntry, CacheKey, CorrelationResult};
use crate::utils::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "json";

/// How a lookup was served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    /// Stored entry with a matching fingerprint
    Hit,
    /// Nothing stored, computed now
    Miss,
    /// Stored entry was computed from older data, recomputed now
    Stale,
    /// Caller asked to bypass the stored entry, recomputed now
    Reloaded,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Reloaded => "reloaded",
        }
    }

    pub fn computed(&self) -> bool {
        !matches!(self, CacheOutcome::Hit)
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: Arc<CacheEntry>,
    pub outcome: CacheOutcome,
}

/// Counters since the cache was opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub recomputes: u64,
    pub corrupt: u64,
    pub memory_entries: usize,
}

/// Durable cache of correlation rankings
///
/// One JSON file per key under `dir`, fronted by an in-memory map. At most
/// one computation per key runs at a time; a second caller for the same
/// key waits and then reuses the stored result. Unrelated keys never wait
/// on each other.
pub struct CorrelationCache {
    dir: PathBuf,
    memory: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    key_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    recomputes: AtomicU64,
    corrupt: AtomicU64,
}

pub type SharedCorrelationCache = Arc<CorrelationCache>;

impl CorrelationCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            memory: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            recomputes: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.encode(), ENTRY_EXTENSION))
    }

    /// Return the stored ranking for `key`, or compute and store it
    ///
    /// The stored entry is used only when `reload` is false and its
    /// fingerprint equals `fingerprint`. Otherwise `compute` runs and its
    /// result replaces whatever was stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        fingerprint: &str,
        reload: bool,
        compute: F,
    ) -> Result<CacheLookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CorrelationResult>>,
    {
        let key_lock = self.key_lock(key).await;
        let guard = key_lock.lock().await;

        let outcome = if reload {
            CacheOutcome::Reloaded
        } else {
            match self.read_entry(key).await {
                Some(entry) if entry.is_fresh_for(fingerprint) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit for {}", key);
                    drop(guard);
                    self.release_key_lock(key, &key_lock).await;
                    return Ok(CacheLookup {
                        entry,
                        outcome: CacheOutcome::Hit,
                    });
                }
                Some(entry) => {
                    info!(
                        "Cache entry for {} is stale (fingerprint {} -> {})",
                        key, entry.fingerprint, fingerprint
                    );
                    CacheOutcome::Stale
                }
                None => CacheOutcome::Miss,
            }
        };

        if outcome != CacheOutcome::Reloaded {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let computed = compute().await;
        let result = match computed {
            Ok(result) => result,
            Err(e) => {
                drop(guard);
                self.release_key_lock(key, &key_lock).await;
                return Err(e);
            }
        };
        self.recomputes.fetch_add(1, Ordering::Relaxed);

        let entry = Arc::new(CacheEntry::new(key.clone(), result, fingerprint));
        if let Err(e) = self.persist(&entry).await {
            // The result is still valid for this request and stays in memory
            warn!("Failed to persist cache entry for {}: {}", key, e);
        }
        self.memory.write().await.insert(key.clone(), entry.clone());

        drop(guard);
        self.release_key_lock(key, &key_lock).await;

        info!("Cache {} for {}: stored {} candidates", outcome, key, entry.result.len());
        Ok(CacheLookup { entry, outcome })
    }

    /// Any stored entry for `key`, regardless of fingerprint
    pub async fn peek(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.read_entry(key).await
    }

    /// Drop the entry for `key` from memory and disk
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let in_memory = self.memory.write().await.remove(key).is_some();
        let on_disk = remove_if_exists(&self.entry_path(key)).await?;
        if in_memory || on_disk {
            info!("Invalidated cache entry for {}", key);
        }
        Ok(in_memory || on_disk)
    }

    /// Drop every entry whose target is `identifier`; returns the number of keys removed
    pub async fn invalidate_all_for_identifier(&self, identifier: &str) -> Result<usize> {
        let mut removed: BTreeSet<CacheKey> = BTreeSet::new();
        {
            let mut memory = self.memory.write().await;
            memory.retain(|key, _| {
                if key.target == identifier {
                    removed.insert(key.clone());
                    false
                } else {
                    true
                }
            });
        }

        for (key, path) in self.stored_keys().await? {
            if key.target == identifier {
                remove_if_exists(&path).await?;
                removed.insert(key);
            }
        }

        info!("Invalidated {} cache entries for {}", removed.len(), identifier);
        Ok(removed.len())
    }

    /// Every readable stored entry, ordered by key
    pub async fn list_entries(&self) -> Result<Vec<Arc<CacheEntry>>> {
        let mut entries = Vec::new();
        for (key, _) in self.stored_keys().await? {
            if let Some(entry) = self.read_entry(&key).await {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            recomputes: self.recomputes.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            memory_entries: self.memory.read().await.len(),
        }
    }

    /// Number of entry files on disk and their total size in bytes
    pub async fn disk_usage(&self) -> Result<(usize, u64)> {
        let mut bytes = 0;
        let keys = self.stored_keys().await?;
        for (_, path) in &keys {
            bytes += tokio::fs::metadata(path).await?.len();
        }
        Ok((keys.len(), bytes))
    }

    async fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_key_lock(&self, key: &CacheKey, key_lock: &Arc<Mutex<()>>) {
        let mut locks = self.key_locks.lock().await;
        // Map + this caller hold the only references: nobody else is waiting
        if Arc::strong_count(key_lock) <= 2 {
            locks.remove(key);
        }
    }

    /// Memory first, then disk; corrupt files are removed and read as absent
    async fn read_entry(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        if let Some(entry) = self.memory.read().await.get(key) {
            return Some(entry.clone());
        }

        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read cache entry {}: {}", path.display(), e);
                return None;
            }
        };

        match decode_entry(&bytes, key) {
            Ok(entry) => {
                let entry = Arc::new(entry);
                self.memory.write().await.insert(key.clone(), entry.clone());
                Some(entry)
            }
            Err(e) => {
                self.corrupt.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding cache entry {}: {}", path.display(), e);
                if let Err(e) = remove_if_exists(&path).await {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    async fn persist(&self, entry: &CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec(entry)?;
        write_atomic(&self.entry_path(&entry.key), &bytes).await
    }

    /// Decodable entry files on disk
    async fn stored_keys(&self) -> Result<Vec<(CacheKey, PathBuf)>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match file_stem(&path).and_then(CacheKey::decode) {
                Some(key) => keys.push((key, path)),
                None => debug!("Ignoring unrecognised cache file {}", path.display()),
            }
        }
        Ok(keys)
    }
}

fn decode_entry(bytes: &[u8], key: &CacheKey) -> Result<CacheEntry> {
    let entry: CacheEntry =
        serde_json::from_slice(bytes).map_err(|e| AppError::CacheCorruption(e.to_string()))?;
    if entry.key != *key {
        return Err(AppError::CacheCorruption(format!(
            "entry holds key {} instead of {}",
            entry.key, key
        )));
    }
    Ok(entry)
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
