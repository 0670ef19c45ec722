//! Query result cache.
//!
//! Exact-text keys (case- and whitespace-sensitive) map to finished
//! `QueryResult`s. Recency is tracked with an index-linked list over a
//! node arena, so get/set/evict are O(1). No TTL: entries live until
//! capacity pressure evicts them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use super::types::QueryResult;

// ─── LruList ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Node {
    key: String,
    value: QueryResult,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena-backed LRU. `head` is most recent, `tail` least recent.
#[derive(Debug, Default)]
struct LruList {
    index: HashMap<String, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruList {
    fn node_mut(&mut self, id: usize) -> Option<&mut Node> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    fn unlink(&mut self, id: usize) {
        let (prev, next) = match self.node_mut(id) {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, id: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(id) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.node_mut(h) {
                node.prev = Some(id);
            }
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    fn promote(&mut self, id: usize) {
        if self.head != Some(id) {
            self.unlink(id);
            self.push_front(id);
        }
    }

    fn get(&mut self, key: &str) -> Option<QueryResult> {
        let id = *self.index.get(key)?;
        self.promote(id);
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .map(|n| n.value.clone())
    }

    /// Insert or replace. Returns the evicted key, if any.
    fn set(&mut self, key: String, value: QueryResult, capacity: usize) -> Option<String> {
        if let Some(&id) = self.index.get(&key) {
            if let Some(node) = self.node_mut(id) {
                node.value = value;
            }
            self.promote(id);
            return None;
        }

        let evicted = if self.index.len() >= capacity {
            self.evict_tail()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, id);
        self.push_front(id);
        evicted
    }

    fn evict_tail(&mut self) -> Option<String> {
        let id = self.tail?;
        self.unlink(id);
        let node = self.nodes.get_mut(id)?.take()?;
        self.index.remove(&node.key);
        self.free.push(id);
        Some(node.key)
    }

    /// Keys from most to least recently used.
    fn keys(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            match self.nodes.get(id).and_then(Option::as_ref) {
                Some(node) => {
                    out.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        out
    }
}

// ─── QueryCache ─────────────────────────────────────────────────────────────

/// Hit/miss counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Thread-safe LRU cache of query results.
///
/// A lookup promotes the entry, so both reads and writes take the lock.
pub struct QueryCache {
    inner: Mutex<LruList>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    /// `capacity` of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruList::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a query and mark it most recently used.
    pub fn get(&self, query: &str) -> Option<QueryResult> {
        let found = self.inner.lock().get(query);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert a result, evicting the least recently used entry when full.
    pub fn set(&self, query: &str, result: QueryResult) {
        let evicted = self.inner.lock().set(query.to_string(), result, self.capacity);
        if let Some(key) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(evicted = %key, "query cache eviction");
        }
    }

    pub fn contains(&self, query: &str) -> bool {
        self.inner.lock().index.contains_key(query)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys ordered from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().keys()
    }

    pub fn clear(&self) {
        *self.inner.lock() = LruList::default();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(tag: &str) -> QueryResult {
        QueryResult::success(json!(tag), tag, vec![], "general_query")
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = QueryCache::new(2);
        assert!(cache.get("q").is_none());
        cache.set("q", result("a"));
        assert_eq!(cache.get("q").unwrap().data, json!("a"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_keys_are_exact_text() {
        let cache = QueryCache::new(4);
        cache.set("get user:1", result("a"));
        assert!(cache.get("GET user:1").is_none());
        assert!(cache.get("get user:1 ").is_none());
        assert!(cache.get("get user:1").is_some());
    }

    #[test]
    fn test_overflow_evicts_least_recently_used() {
        let cache = QueryCache::new(3);
        cache.set("a", result("a"));
        cache.set("b", result("b"));
        cache.set("c", result("c"));
        // Touch "a" so "b" becomes the oldest.
        cache.get("a");
        cache.set("d", result("d"));

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("b"));
        assert!(cache.contains("a"));
        assert_eq!(cache.keys(), vec!["d", "a", "c"]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_max_plus_one_evicts_exactly_one() {
        let cache = QueryCache::new(5);
        for i in 0..6 {
            cache.set(&format!("q{i}"), result("x"));
        }
        assert_eq!(cache.len(), 5);
        assert!(!cache.contains("q0"));
        for i in 1..6 {
            assert!(cache.contains(&format!("q{i}")));
        }
    }

    #[test]
    fn test_replace_existing_key_does_not_evict() {
        let cache = QueryCache::new(2);
        cache.set("a", result("1"));
        cache.set("b", result("2"));
        cache.set("a", result("3"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().data, json!("3"));
        assert_eq!(cache.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_slot_reuse_after_eviction() {
        let cache = QueryCache::new(1);
        for i in 0..10 {
            cache.set(&format!("k{i}"), result("x"));
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.keys(), vec!["k9"]);
        assert_eq!(cache.inner.lock().nodes.len(), 1);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = QueryCache::new(0);
        cache.set("a", result("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        let cache = Arc::new(QueryCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{t}-{}", i % 4);
                        cache.set(&key, result("v"));
                        cache.get(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 16);
        assert_eq!(cache.keys().len(), cache.len());
    }
}
