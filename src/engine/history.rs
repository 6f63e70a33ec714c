// mdsaad Engine — Conversation History Buffer
// Bounded in-memory FIFO of completed operations, capped at 50 per session.
// Each append mirrors the buffer into the conversation_history cache
// namespace (24 h TTL) off the hot path; startup restores from the mirror
// when one exists.

use crate::atoms::constants::{CONVERSATION_TTL_MS, HISTORY_CAP, HISTORY_SUMMARY_BYTES, NS_CONVERSATION};
use crate::atoms::types::{truncate_utf8, HistoryEntry};
use crate::engine::cache::CacheStore;
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

const MIRROR_KEY: &str = "session";

pub struct HistoryBuffer {
    cap: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
    mirror: Option<Arc<CacheStore>>,
}

impl HistoryBuffer {
    pub fn new(cap: usize) -> Self {
        HistoryBuffer { cap, entries: Mutex::new(VecDeque::new()), mirror: None }
    }

    /// Attach the cache mirror and restore any persisted session.
    pub fn with_mirror(mut self, cache: Arc<CacheStore>) -> Self {
        if let Some(hit) = cache.get(NS_CONVERSATION, &[MIRROR_KEY]) {
            if let Ok(restored) =
                serde_json::from_value::<Vec<HistoryEntry>>((*hit.payload).clone())
            {
                let mut entries = self.entries.lock();
                *entries = restored.into_iter().collect();
                while entries.len() > self.cap {
                    entries.pop_front();
                }
                debug!("[history] restored {} entries from mirror", entries.len());
            }
        }
        self.mirror = Some(cache);
        self
    }

    /// Build the summary column and append; drops from the front past cap.
    pub fn append(&self, mut entry: HistoryEntry) {
        if entry.truncated_summary.is_empty() {
            entry.truncated_summary =
                truncate_utf8(&entry.reply_or_result, HISTORY_SUMMARY_BYTES).to_string();
        }
        let snapshot: Vec<HistoryEntry> = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            while entries.len() > self.cap {
                entries.pop_front();
            }
            entries.iter().cloned().collect()
        };
        self.mirror_snapshot(snapshot);
    }

    fn mirror_snapshot(&self, snapshot: Vec<HistoryEntry>) {
        let Some(cache) = self.mirror.clone() else { return };
        let write = move || {
            if let Ok(json) = serde_json::to_value(&snapshot) {
                if let Err(e) = cache.set(NS_CONVERSATION, &[MIRROR_KEY], json, CONVERSATION_TTL_MS)
                {
                    debug!("[history] mirror write failed: {}", e);
                }
            }
        };
        // Mirror off the hot path when a runtime is available.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { write() });
            }
            Err(_) => write(),
        }
    }

    /// The most recent `k` entries, oldest of them first.
    pub fn recent(&self, k: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(k);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        if let Some(cache) = &self.mirror {
            cache.invalidate(NS_CONVERSATION, &[MIRROR_KEY]);
        }
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(HISTORY_CAP)
    }
}
