use crate::error::CoreError;
use crate::section::Section;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;

/// Trait for a section cache keyed by page path.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the cached section only while its entry is fresh.
    async fn get(&self, path: &str) -> Option<Section>;
    /// Inserts or overwrites, evicting the least recently accessed entry when full.
    /// Returns the evicted path, if any.
    async fn set(&self, path: &str, section: Section, ttl: Duration) -> Result<Option<String>, CoreError>;
    /// Serializes fetch attempts for one path until the returned guard is dropped.
    async fn lock(&self, path: &str) -> PathLock;
    async fn contains_key(&self, path: &str) -> bool;
    async fn remove(&self, path: &str) -> bool;
    async fn clear(&self);
    async fn len(&self) -> usize;
    /// Snapshot of every fresh section, ordered by path.
    async fn sections(&self) -> Vec<Section>;
    async fn metadata(&self, path: &str) -> Option<EntryMetadata>;
    /// Marks an entry stale without removing it.
    async fn force_expire(&self, path: &str);
    /// Save cache state to its configured directory.
    async fn save(&self) -> Result<(), io::Error>;
    /// Load cache state from its configured directory.
    async fn load(&self) -> Result<(), io::Error>;
}

/// Bookkeeping exposed for a single cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheEntry {
    section: Section,
    stored_at: Instant,
    created_at: DateTime<Utc>,
    ttl: Duration,
    last_accessed: DateTime<Utc>,
    access_seq: u64,
    access_count: u64,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheData {
    entries: HashMap<String, CacheEntry>,
    // Monotonic access counter; wall-clock instants can tie.
    clock: u64,
}

impl CacheData {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, path: String, entry: CacheEntry, capacity: usize) -> Option<String> {
        let mut evicted = None;
        if !self.entries.contains_key(&path) && self.entries.len() >= capacity {
            evicted = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.access_seq)
                .map(|(k, _)| k.clone());
            if let Some(victim) = &evicted {
                self.entries.remove(victim);
                tracing::debug!("Evicted least recently used entry {}", victim);
            }
        }
        self.entries.insert(path, entry);
        evicted
    }
}

/// On-disk form of an entry. Key is the page path.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    section: Section,
    stored_at: DateTime<Utc>,
    ttl_secs: u64,
}

type SegmentCacheData = HashMap<String, PersistedEntry>;

type LockMap = HashMap<String, Arc<Mutex<()>>>;

// Helper to pick the file an entry is persisted to: its first path segment.
fn segment_of(path: &str) -> String {
    let segment = path
        .trim_start_matches('/')
        .split(['/', '#', '?'])
        .next()
        .unwrap_or_default();
    if segment.is_empty() {
        return "index".to_string();
    }
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Held while a fetch for one path is in flight. Dropping it releases the path.
pub struct PathLock {
    path: String,
    slot: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<StdMutex<LockMap>>,
}

impl PathLock {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this guard still reference the slot: nobody is waiting.
        if Arc::strong_count(&self.slot) == 2
            && locks.get(&self.path).is_some_and(|s| Arc::ptr_eq(s, &self.slot))
        {
            locks.remove(&self.path);
        }
    }
}

#[derive(Clone)]
pub struct InMemoryCache {
    cache: Arc<RwLock<CacheData>>,
    locks: Arc<StdMutex<LockMap>>,
    capacity: usize,
    cache_dir: Option<PathBuf>,
}

impl InMemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(CacheData::default())),
            locks: Arc::new(StdMutex::new(HashMap::new())),
            capacity: capacity.max(1),
            cache_dir: None,
        }
    }

    /// Persist entries to `cache_dir` on [`Cache::save`] and restore them on [`Cache::load`].
    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = Some(cache_dir);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn entry(section: Section, stored_at: Instant, created_at: DateTime<Utc>, ttl: Duration, seq: u64) -> CacheEntry {
        CacheEntry {
            section,
            stored_at,
            created_at,
            ttl,
            last_accessed: created_at,
            access_seq: seq,
            access_count: 0,
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, path: &str) -> Option<Section> {
        let mut guard = self.cache.write().await;
        let seq = guard.tick();
        let entry = guard.entries.get_mut(path)?;
        if !entry.is_fresh() {
            return None;
        }
        entry.access_seq = seq;
        entry.access_count += 1;
        entry.last_accessed = Utc::now();
        Some(entry.section.clone())
    }

    async fn set(&self, path: &str, section: Section, ttl: Duration) -> Result<Option<String>, CoreError> {
        if section.path != path {
            return Err(CoreError::CorruptEntry(path.to_string()));
        }
        let mut guard = self.cache.write().await;
        let seq = guard.tick();
        let entry = Self::entry(section, Instant::now(), Utc::now(), ttl, seq);
        Ok(guard.insert(path.to_string(), entry, self.capacity))
    }

    async fn lock(&self, path: &str) -> PathLock {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_string()).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;
        PathLock {
            path: path.to_string(),
            slot,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    async fn contains_key(&self, path: &str) -> bool {
        self.cache
            .read()
            .await
            .entries
            .get(path)
            .is_some_and(CacheEntry::is_fresh)
    }

    async fn remove(&self, path: &str) -> bool {
        self.cache.write().await.entries.remove(path).is_some()
    }

    async fn clear(&self) {
        self.cache.write().await.entries.clear();
    }

    async fn len(&self) -> usize {
        self.cache.read().await.entries.len()
    }

    async fn sections(&self) -> Vec<Section> {
        self.cache
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.section.clone())
            .sorted_by(|a, b| a.path.cmp(&b.path))
            .collect()
    }

    async fn metadata(&self, path: &str) -> Option<EntryMetadata> {
        let guard = self.cache.read().await;
        let entry = guard.entries.get(path)?;
        let ttl = chrono::Duration::from_std(entry.ttl).unwrap_or(chrono::Duration::MAX);
        Some(EntryMetadata {
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
            expires_at: entry
                .created_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }

    async fn force_expire(&self, path: &str) {
        if let Some(entry) = self.cache.write().await.entries.get_mut(path) {
            entry.ttl = Duration::ZERO;
        }
    }

    /// Saves fresh entries to one JSON file per top-level path segment.
    async fn save(&self) -> Result<(), io::Error> {
        let Some(dir_path) = &self.cache_dir else {
            return Ok(());
        };
        // Snapshot under the lock, write after releasing it.
        let data_to_save: HashMap<String, SegmentCacheData> = {
            let cache_guard = self.cache.read().await;
            cache_guard
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_fresh())
                .map(|(path, entry)| (segment_of(path), path, entry))
                .sorted_by(|a, b| a.0.cmp(&b.0))
                .chunk_by(|(segment, _, _)| segment.clone())
                .into_iter()
                .map(|(segment, group)| {
                    let segment_data: SegmentCacheData = group
                        .map(|(_, path, entry)| {
                            (
                                path.clone(),
                                PersistedEntry {
                                    section: entry.section.clone(),
                                    stored_at: entry.created_at,
                                    ttl_secs: entry.ttl.as_secs(),
                                },
                            )
                        })
                        .collect();
                    (segment, segment_data)
                })
                .collect()
        };

        fs::create_dir_all(dir_path).await?;

        let mut saved_files = HashSet::new();
        for (segment, segment_data) in &data_to_save {
            let file_path = dir_path.join(format!("{}.json", segment));
            let serialized = serde_json::to_string_pretty(segment_data).map_err(io::Error::other)?;
            fs::write(&file_path, serialized).await?;
            saved_files.insert(file_path);
            tracing::debug!("Saved {} cache entries for segment '{}'", segment_data.len(), segment);
        }

        let mut entries = fs::read_dir(dir_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file()
                && path.extension().is_some_and(|ext| ext == "json")
                && !saved_files.contains(&path)
            {
                match fs::remove_file(&path).await {
                    Ok(_) => tracing::info!("Removed stale cache file: {:?}", path),
                    Err(e) => tracing::warn!("Failed to remove stale cache file {:?}: {}", path, e),
                }
            }
        }

        Ok(())
    }

    /// Loads entries that are still fresh from the configured directory.
    async fn load(&self) -> Result<(), io::Error> {
        let Some(dir_path) = &self.cache_dir else {
            return Ok(());
        };
        if !dir_path.is_dir() {
            tracing::info!("Cache directory {:?} not found, starting with empty cache.", dir_path);
            self.clear().await;
            return Ok(());
        }

        let mut loaded = Vec::new();
        let mut entries = fs::read_dir(dir_path).await?;
        let mut file_count = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::error!("Failed to read cache file {:?}: {}. Skipping file.", path, e);
                    continue;
                }
            };
            if content.trim().is_empty() {
                tracing::warn!("Cache file {:?} is empty, skipping.", path);
                continue;
            }
            match serde_json::from_str::<SegmentCacheData>(&content) {
                Ok(segment_data) => {
                    file_count += 1;
                    loaded.extend(segment_data);
                }
                Err(e) => {
                    tracing::error!("Failed to deserialize cache file {:?}: {}. Skipping file.", path, e);
                }
            }
        }

        let now_wall = Utc::now();
        let now = Instant::now();
        let mut cache_guard = self.cache.write().await;
        cache_guard.entries.clear();
        let mut item_count = 0;
        // Oldest first so that the most recent entries survive any eviction.
        loaded.sort_by_key(|(_, persisted)| persisted.stored_at);
        for (path, persisted) in loaded {
            if persisted.section.path != path {
                tracing::error!("{}. Skipping entry.", CoreError::CorruptEntry(path));
                continue;
            }
            let ttl = Duration::from_secs(persisted.ttl_secs);
            let age = (now_wall - persisted.stored_at).to_std().unwrap_or_default();
            if age >= ttl {
                continue;
            }
            let stored_at = now.checked_sub(age).unwrap_or(now);
            let seq = cache_guard.tick();
            let entry = Self::entry(persisted.section, stored_at, persisted.stored_at, ttl, seq);
            cache_guard.insert(path, entry, self.capacity);
            item_count += 1;
        }

        tracing::info!(
            "Cache loaded from directory {:?} - {} files, {} items.",
            dir_path,
            file_count,
            item_count
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TTL: Duration = Duration::from_secs(60);

    fn create_section(path: &str) -> Section {
        Section {
            path: path.to_string(),
            title: format!("Title of {path}"),
            content: format!("content of {path}"),
            subsections: vec![],
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_set_get_contains() {
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new(10));
        let section = create_section("/test1");

        assert!(!cache.contains_key("/test1").await);
        assert!(cache.get("/test1").await.is_none());

        cache.set("/test1", section.clone(), TTL).await.unwrap();

        assert!(cache.contains_key("/test1").await);
        assert_eq!(cache.get("/test1").await, Some(section));
        assert!(!cache.contains_key("/test2").await);
    }

    #[tokio::test]
    async fn test_set_rejects_mismatched_path() {
        let cache = InMemoryCache::new(10);
        let result = cache.set("/a", create_section("/b"), TTL).await;
        assert!(matches!(result, Err(CoreError::CorruptEntry(_))));
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let cache = InMemoryCache::new(10);
        cache.set("/doc", create_section("/doc"), TTL).await.unwrap();
        let mut updated = create_section("/doc");
        updated.title = "Updated Title".into();
        cache.set("/doc", updated, TTL).await.unwrap();

        assert_eq!(cache.get("/doc").await.unwrap().title, "Updated Title");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_keeps_entry_physically() {
        let cache = InMemoryCache::new(10);
        cache.set("/doc", create_section("/doc"), Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get("/doc").await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("/doc").await.is_none());
        assert!(!cache.contains_key("/doc").await);
        assert_eq!(cache.len().await, 1);
        assert!(cache.metadata("/doc").await.is_some());
    }

    #[tokio::test]
    async fn test_force_expire() {
        let cache = InMemoryCache::new(10);
        cache.set("/doc", create_section("/doc"), TTL).await.unwrap();
        cache.force_expire("/doc").await;
        assert!(cache.get("/doc").await.is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction_uses_access_order() {
        let cache = InMemoryCache::new(2);
        cache.set("/a", create_section("/a"), TTL).await.unwrap();
        assert_eq!(cache.set("/b", create_section("/b"), TTL).await.unwrap(), None);
        assert!(cache.get("/a").await.is_some());
        let evicted = cache.set("/c", create_section("/c"), TTL).await.unwrap();
        assert_eq!(evicted.as_deref(), Some("/b"));

        assert!(cache.get("/a").await.is_some());
        assert!(cache.get("/b").await.is_none());
        assert!(cache.get("/c").await.is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_eviction_without_access_drops_oldest() {
        let cache = InMemoryCache::new(2);
        for path in ["/test0", "/test1", "/test2"] {
            cache.set(path, create_section(path), TTL).await.unwrap();
        }
        assert!(cache.get("/test0").await.is_none());
        assert!(cache.get("/test1").await.is_some());
        assert!(cache.get("/test2").await.is_some());
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_evicts_nothing() {
        let cache = InMemoryCache::new(1);
        cache.set("/a", create_section("/a"), TTL).await.unwrap();
        assert_eq!(cache.set("/a", create_section("/a"), TTL).await.unwrap(), None);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_sections_lists_fresh_entries() {
        let cache = InMemoryCache::new(10);
        for path in ["/b", "/a", "/c"] {
            cache.set(path, create_section(path), TTL).await.unwrap();
        }
        cache.force_expire("/c").await;

        let paths: Vec<_> = cache.sections().await.into_iter().map(|s| s.path).collect();
        assert_eq!(paths, ["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_metadata_tracks_access() {
        let cache = InMemoryCache::new(10);
        cache.set("/doc", create_section("/doc"), TTL).await.unwrap();

        let meta = cache.metadata("/doc").await.unwrap();
        assert_eq!(meta.access_count, 0);
        assert_eq!(meta.created_at, meta.last_accessed);
        assert!(meta.expires_at > meta.created_at);

        cache.get("/doc").await;
        assert_eq!(cache.metadata("/doc").await.unwrap().access_count, 1);
        assert!(cache.metadata("/missing").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = InMemoryCache::new(10);
        cache.set("/a", create_section("/a"), TTL).await.unwrap();
        cache.set("/b", create_section("/b"), TTL).await.unwrap();

        assert!(cache.remove("/a").await);
        assert!(!cache.remove("/a").await);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_path() {
        let cache = Arc::new(InMemoryCache::new(10));
        let held = cache.lock("/doc").await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _guard = cache.lock("/doc").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // A different path is not blocked.
        let other = cache.lock("/other").await;
        assert_eq!(other.path(), "/other");
        drop(other);

        drop(held);
        waiter.await.unwrap();
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_released_on_cancel() {
        let cache = Arc::new(InMemoryCache::new(10));
        let task = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _guard = cache.lock("/doc").await;
                std::future::pending::<()>().await;
            })
        };
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        let guard = tokio::time::timeout(Duration::from_secs(1), cache.lock("/doc")).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().to_path_buf();

        let cache1 = InMemoryCache::new(10).with_cache_dir(cache_dir.clone());
        cache1.set("/api/auth", create_section("/api/auth"), TTL).await.unwrap();
        cache1.set("/api/users", create_section("/api/users"), TTL).await.unwrap();
        cache1.set("/installation", create_section("/installation"), TTL).await.unwrap();
        cache1.set("/", create_section("/"), TTL).await.unwrap();
        cache1.save().await.expect("Failed to save cache");

        assert!(cache_dir.join("api.json").exists());
        assert!(cache_dir.join("installation.json").exists());
        assert!(cache_dir.join("index.json").exists());
        let file_content = std::fs::read_to_string(cache_dir.join("api.json")).unwrap();
        assert!(file_content.contains("/api/auth"));
        assert!(file_content.contains("/api/users"));

        let cache2 = InMemoryCache::new(10).with_cache_dir(cache_dir);
        cache2.load().await.expect("Failed to load cache");
        assert_eq!(cache2.len().await, 4);
        assert_eq!(cache2.get("/api/auth").await, cache1.get("/api/auth").await);
    }

    #[tokio::test]
    async fn test_save_skips_stale_and_removes_old_files() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().to_path_buf();
        std::fs::write(cache_dir.join("stale.json"), "{}").unwrap();
        std::fs::write(cache_dir.join("not_json.txt"), "abc").unwrap();

        let cache = InMemoryCache::new(10).with_cache_dir(cache_dir.clone());
        cache.set("/api", create_section("/api"), TTL).await.unwrap();
        cache.set("/old", create_section("/old"), TTL).await.unwrap();
        cache.force_expire("/old").await;
        cache.save().await.unwrap();

        assert!(cache_dir.join("api.json").exists());
        assert!(!cache_dir.join("old.json").exists());
        assert!(!cache_dir.join("stale.json").exists());
        assert!(cache_dir.join("not_json.txt").exists());
    }

    #[tokio::test]
    async fn test_load_skips_invalid_and_expired() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().to_path_buf();
        std::fs::write(cache_dir.join("invalid.json"), "{invalid json}").unwrap();
        std::fs::write(cache_dir.join("empty.json"), "").unwrap();

        let fresh = PersistedEntry {
            section: create_section("/valid"),
            stored_at: Utc::now(),
            ttl_secs: 3600,
        };
        let expired = PersistedEntry {
            section: create_section("/valid/old"),
            stored_at: Utc::now() - chrono::Duration::hours(2),
            ttl_secs: 3600,
        };
        let corrupt = PersistedEntry {
            section: create_section("/elsewhere"),
            stored_at: Utc::now(),
            ttl_secs: 3600,
        };
        let data: SegmentCacheData = [
            ("/valid".to_string(), fresh),
            ("/valid/old".to_string(), expired),
            ("/valid/corrupt".to_string(), corrupt),
        ]
        .into_iter()
        .collect();
        std::fs::write(cache_dir.join("valid.json"), serde_json::to_string(&data).unwrap()).unwrap();

        let cache = InMemoryCache::new(10).with_cache_dir(cache_dir);
        cache.load().await.expect("Loading dir with invalid file failed");

        assert_eq!(cache.len().await, 1);
        assert!(cache.get("/valid").await.is_some());
    }

    #[tokio::test]
    async fn test_load_nonexistent_directory() {
        let dir = tempdir().unwrap();
        let cache = InMemoryCache::new(10).with_cache_dir(dir.path().join("nonexistent_cache_dir"));
        cache.load().await.expect("Loading non-existent dir failed");
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_save_without_dir_is_noop() {
        let cache = InMemoryCache::new(10);
        cache.set("/a", create_section("/a"), TTL).await.unwrap();
        cache.save().await.unwrap();
        cache.load().await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn test_segment_of() {
        assert_eq!(segment_of("/api/auth"), "api");
        assert_eq!(segment_of("/installation#setup"), "installation");
        assert_eq!(segment_of("/"), "index");
        assert_eq!(segment_of("/a b/c"), "a_b");
    }
}
