//! Memo cache for summarization calls.
//!
//! Summaries are keyed by a hash of everything that determines them: the
//! kind of content, the target size and the content itself. Only successful
//! summaries are stored; a failed call is retried next time.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::trace;

/// Default number of summaries kept before the cache is cleared.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Content-addressed summary cache shared across turns.
#[derive(Debug)]
pub struct CompressionCache {
    entries: RwLock<HashMap<u64, String>>,
    max_entries: usize,
}

impl Default for CompressionCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl CompressionCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Cache key for summarizing `content` of `kind` toward `target_fraction`.
    pub fn key(kind: &str, target_fraction: f64, content: &str) -> u64 {
        let mut hash = fnv1a(FNV_OFFSET, kind.as_bytes());
        hash = fnv1a(hash, &target_fraction.to_bits().to_le_bytes());
        fnv1a(hash, content.as_bytes())
    }

    pub fn get(&self, key: u64) -> Option<String> {
        let hit = self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&key).cloned());
        trace!(
            "[compress] cache {} for {key:016x}",
            if hit.is_some() { "hit" } else { "miss" }
        );
        hit
    }

    /// Store a summary. When full, the cache starts over rather than
    /// tracking recency.
    pub fn insert(&self, key: u64, summary: String) {
        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= self.max_entries && !entries.contains_key(&key) {
                entries.clear();
            }
            entries.insert(key, summary);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
