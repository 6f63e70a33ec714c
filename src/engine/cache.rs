// mdsaad Engine — Cache Store
// Namespaced key/value store with TTL, content-addressed keys, a global
// byte cap, and an optional disk mirror under ~/.mdsaad/cache/.
//
// Keys are the first 16 hex chars of SHA-256 over the namespace and key
// parts. Components are length-prefixed before hashing, so no separator
// byte can be forged by a component and identical inputs always collide.
//
// Cache failures never surface to callers: a read problem degrades to a
// miss, a write problem to a silent drop, both with an internal log line.

use crate::atoms::constants::{CACHE_KEY_HEX_LEN, CACHE_SWEEP_INTERVAL};
use crate::atoms::error::FabricResult;
use crate::engine::clock::Clock;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── Key derivation ─────────────────────────────────────────────────────────

/// Deterministic content-addressed key for `(namespace, parts…)`.
pub fn cache_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((namespace.len() as u64).to_le_bytes());
    hasher.update(namespace.as_bytes());
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(CACHE_KEY_HEX_LEN);
    for byte in digest.iter().take(CACHE_KEY_HEX_LEN / 2) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

// ── Entries ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    payload: Arc<serde_json::Value>,
    /// Monotonic creation time, used for TTL checks and eviction order.
    created_mono_ms: u64,
    /// Wall-clock creation time, persisted to the disk mirror.
    created_wall_ms: i64,
    ttl_ms: u64,
    size_bytes: u64,
}

impl Entry {
    fn is_live(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_mono_ms) < self.ttl_ms
    }
}

/// On-disk form of one entry.
#[derive(Serialize, Deserialize)]
struct DiskEntry {
    payload: serde_json::Value,
    created_at: i64,
    ttl_ms: u64,
}

/// What `get` hands back: a cheap payload handle plus its age.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: Arc<serde_json::Value>,
    pub age_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    pub namespace: String,
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: u64,
    pub per_namespace: Vec<NamespaceStats>,
}

// ── Store ──────────────────────────────────────────────────────────────────

type NamespaceMap = HashMap<String, Entry>;

pub struct CacheStore {
    clock: Clock,
    max_bytes: u64,
    /// Mirror directory; None keeps the cache memory-only.
    disk_root: Option<PathBuf>,
    namespaces: RwLock<HashMap<String, Arc<Mutex<NamespaceMap>>>>,
}

impl CacheStore {
    pub fn new(clock: Clock, max_bytes: u64) -> Self {
        CacheStore {
            clock,
            max_bytes,
            disk_root: None,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Enable the disk mirror rooted at `dir` and load whatever survives a
    /// TTL and parse check. Corrupt or expired files are removed.
    pub fn with_disk(mut self, dir: PathBuf) -> Self {
        self.disk_root = Some(dir);
        self.load_mirror();
        self
    }

    fn namespace(&self, name: &str) -> Arc<Mutex<NamespaceMap>> {
        if let Some(ns) = self.namespaces.read().get(name) {
            return Arc::clone(ns);
        }
        let mut map = self.namespaces.write();
        Arc::clone(map.entry(name.to_string()).or_default())
    }

    // ── Read path ──────────────────────────────────────────────────────────

    /// Fresh entry or nothing. TTL is re-checked on every read; the sweep
    /// task is only advisory.
    pub fn get(&self, namespace: &str, parts: &[&str]) -> Option<CacheHit> {
        self.get_inner(namespace, parts, false)
    }

    /// Like `get`, but an expired entry is still returned. For callers that
    /// explicitly want a stale fallback after an upstream failure.
    pub fn get_stale(&self, namespace: &str, parts: &[&str]) -> Option<CacheHit> {
        self.get_inner(namespace, parts, true)
    }

    fn get_inner(&self, namespace: &str, parts: &[&str], allow_stale: bool) -> Option<CacheHit> {
        let key = cache_key(namespace, parts);
        let now = self.clock.now_ms();
        let ns = self.namespace(namespace);
        let guard = ns.lock();
        let entry = guard.get(&key)?;
        if !allow_stale && !entry.is_live(now) {
            return None;
        }
        Some(CacheHit {
            payload: Arc::clone(&entry.payload),
            age_ms: now.saturating_sub(entry.created_mono_ms),
        })
    }

    // ── Write path ─────────────────────────────────────────────────────────

    /// Insert or replace (last writer wins). Evicts oldest-created entries
    /// across all namespaces when the byte cap would be exceeded.
    pub fn set(
        &self,
        namespace: &str,
        parts: &[&str],
        payload: serde_json::Value,
        ttl_ms: u64,
    ) -> FabricResult<()> {
        let key = cache_key(namespace, parts);
        let size_bytes = serde_json::to_vec(&payload).map(|v| v.len() as u64).unwrap_or(0);
        if size_bytes > self.max_bytes {
            debug!("[cache] {}:{} larger than the whole cache, dropping", namespace, key);
            return Ok(());
        }

        let entry = Entry {
            payload: Arc::new(payload),
            created_mono_ms: self.clock.now_ms(),
            created_wall_ms: self.clock.wall_now().timestamp_millis(),
            ttl_ms,
            size_bytes,
        };

        self.evict_for(namespace, &key, size_bytes);

        if let Some(dir) = self.mirror_path(namespace) {
            self.write_mirror(&dir, &key, &entry);
        }

        let ns = self.namespace(namespace);
        ns.lock().insert(key, entry);
        Ok(())
    }

    /// Make room for `incoming_bytes`, oldest created first. The entry being
    /// replaced does not count against the cap.
    fn evict_for(&self, target_ns: &str, target_key: &str, incoming_bytes: u64) {
        let names: Vec<String> = self.namespaces.read().keys().cloned().collect();

        let mut total: u64 = 0;
        let mut candidates: Vec<(u64, String, String, u64)> = Vec::new();
        for name in &names {
            let ns = self.namespace(name);
            let guard = ns.lock();
            for (key, entry) in guard.iter() {
                if name == target_ns && key == target_key {
                    continue;
                }
                total += entry.size_bytes;
                candidates.push((entry.created_mono_ms, name.clone(), key.clone(), entry.size_bytes));
            }
        }

        if total + incoming_bytes <= self.max_bytes {
            return;
        }

        candidates.sort();
        let mut freed = 0u64;
        let need = (total + incoming_bytes) - self.max_bytes;
        for (_, name, key, size) in candidates {
            if freed >= need {
                break;
            }
            let ns = self.namespace(&name);
            ns.lock().remove(&key);
            self.remove_mirror(&name, &key);
            freed += size;
            debug!("[cache] evicted {}:{} ({} bytes)", name, key, size);
        }
    }

    pub fn invalidate(&self, namespace: &str, parts: &[&str]) {
        let key = cache_key(namespace, parts);
        let ns = self.namespace(namespace);
        ns.lock().remove(&key);
        self.remove_mirror(namespace, &key);
    }

    pub fn clear_namespace(&self, namespace: &str) {
        let ns = self.namespace(namespace);
        ns.lock().clear();
        if let Some(dir) = self.mirror_path(namespace) {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("[cache] mirror clear failed for {}: {}", namespace, e);
                }
            }
        }
        info!("[cache] cleared namespace {}", namespace);
    }

    pub fn clear_all(&self) {
        let names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        for name in names {
            self.clear_namespace(&name);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let names: Vec<String> = {
            let mut n: Vec<String> = self.namespaces.read().keys().cloned().collect();
            n.sort();
            n
        };
        let mut stats = CacheStats::default();
        for name in names {
            let ns = self.namespace(&name);
            let guard = ns.lock();
            let bytes: u64 = guard.values().map(|e| e.size_bytes).sum();
            stats.total_entries += guard.len();
            stats.total_bytes += bytes;
            stats.per_namespace.push(NamespaceStats {
                namespace: name,
                entries: guard.len(),
                bytes,
            });
        }
        stats
    }

    // ── Middleware ─────────────────────────────────────────────────────────

    /// Read-through: a fresh hit short-circuits, otherwise `fetch` runs and
    /// its result is stored. A fetch error is returned as-is and never
    /// poisons the cache. The bool is true when served from cache.
    pub async fn through<F, Fut>(
        &self,
        namespace: &str,
        parts: &[&str],
        ttl_ms: u64,
        fetch: F,
    ) -> FabricResult<(Arc<serde_json::Value>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = FabricResult<serde_json::Value>>,
    {
        if let Some(hit) = self.get(namespace, parts) {
            debug!("[cache] hit {}:{} age={}ms", namespace, cache_key(namespace, parts), hit.age_ms);
            return Ok((hit.payload, true));
        }
        let value = fetch().await?;
        let payload = Arc::new(value);
        if let Err(e) = self.set(namespace, parts, (*payload).clone(), ttl_ms) {
            debug!("[cache] set after fetch failed: {}", e);
        }
        Ok((payload, false))
    }

    // ── Sweep ──────────────────────────────────────────────────────────────

    /// Drop every expired entry. Runs namespace by namespace with short
    /// critical sections so user operations never wait on the sweeper.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        let mut removed = 0usize;
        for name in names {
            let expired: Vec<String> = {
                let ns = self.namespace(&name);
                let guard = ns.lock();
                guard
                    .iter()
                    .filter(|(_, e)| !e.is_live(now))
                    .map(|(k, _)| k.clone())
                    .collect()
            };
            for key in expired {
                let ns = self.namespace(&name);
                ns.lock().remove(&key);
                self.remove_mirror(&name, &key);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("[cache] sweep removed {} expired entries", removed);
        }
        removed
    }

    /// Background sweeper on a fixed cadence.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }

    // ── Disk mirror ────────────────────────────────────────────────────────

    fn mirror_path(&self, namespace: &str) -> Option<PathBuf> {
        self.disk_root.as_ref().map(|root| root.join(namespace))
    }

    fn write_mirror(&self, dir: &Path, key: &str, entry: &Entry) {
        let disk = DiskEntry {
            payload: (*entry.payload).clone(),
            created_at: entry.created_wall_ms,
            ttl_ms: entry.ttl_ms,
        };
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(dir)?;
            let body = serde_json::to_vec(&disk)?;
            std::fs::write(dir.join(format!("{}.json", key)), body)
        };
        if let Err(e) = write() {
            debug!("[cache] mirror write failed for {}: {}", key, e);
        }
    }

    fn remove_mirror(&self, namespace: &str, key: &str) {
        if let Some(dir) = self.mirror_path(namespace) {
            let path = dir.join(format!("{}.json", key));
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("[cache] mirror remove failed for {}: {}", key, e);
                }
            }
        }
    }

    fn load_mirror(&mut self) {
        let Some(root) = self.disk_root.clone() else { return };
        let Ok(dirs) = std::fs::read_dir(&root) else { return };

        let now_wall = self.clock.wall_now().timestamp_millis();
        let now_mono = self.clock.now_ms();
        let mut loaded = 0usize;
        let mut dropped = 0usize;

        for dir in dirs.flatten() {
            if !dir.path().is_dir() {
                continue;
            }
            let namespace = dir.file_name().to_string_lossy().to_string();
            let Ok(files) = std::fs::read_dir(dir.path()) else { continue };
            for file in files.flatten() {
                let path = file.path();
                let parsed: Option<DiskEntry> = std::fs::read(&path)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok());
                let Some(disk) = parsed else {
                    // Corrupt or unparseable: remove, do not ignore.
                    warn!("[cache] removing corrupt mirror file {:?}", path);
                    let _ = std::fs::remove_file(&path);
                    dropped += 1;
                    continue;
                };
                let age_ms = now_wall.saturating_sub(disk.created_at).max(0) as u64;
                if age_ms >= disk.ttl_ms {
                    let _ = std::fs::remove_file(&path);
                    dropped += 1;
                    continue;
                }
                let key = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let size_bytes =
                    serde_json::to_vec(&disk.payload).map(|v| v.len() as u64).unwrap_or(0);
                let entry = Entry {
                    payload: Arc::new(disk.payload),
                    created_mono_ms: now_mono.saturating_sub(age_ms),
                    created_wall_ms: disk.created_at,
                    ttl_ms: disk.ttl_ms,
                    size_bytes,
                };
                let ns = self.namespace(&namespace);
                ns.lock().insert(key, entry);
                loaded += 1;
            }
        }
        if loaded > 0 || dropped > 0 {
            info!("[cache] mirror restore: {} loaded, {} dropped", loaded, dropped);
        }
    }
}
