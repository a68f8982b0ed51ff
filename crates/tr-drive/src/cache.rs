//! Recency-ordered snapshot cache keyed by canonical location.

use crate::snapshot::Snapshot;
use std::collections::HashMap;
use std::collections::VecDeque;
use tr_net::Location;

/// Strict LRU over [`Snapshot`]s. Both reads and writes count as a touch.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    capacity: usize,
    /// Least recent first.
    keys: VecDeque<String>,
    snapshots: HashMap<String, Snapshot>,
}

impl SnapshotCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            keys: VecDeque::new(),
            snapshots: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn has(&self, location: &Location) -> bool {
        self.snapshots.contains_key(&location.cache_key())
    }

    pub fn get(&mut self, location: &Location) -> Option<&Snapshot> {
        let key = location.cache_key();
        if !self.snapshots.contains_key(&key) {
            return None;
        }
        self.touch(&key);
        self.snapshots.get(&key)
    }

    pub fn put(&mut self, location: &Location, snapshot: Snapshot) {
        let key = location.cache_key();
        self.touch(&key);
        self.snapshots.insert(key, snapshot);
        self.trim();
    }

    /// Drops every key past capacity, least recent first.
    pub fn trim(&mut self) {
        while self.keys.len() > self.capacity {
            if let Some(evicted) = self.keys.pop_front() {
                log::trace!(target: "trellis::visit", "evicting cached snapshot {evicted}");
                self.snapshots.remove(&evicted);
            }
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.snapshots.clear();
    }

    /// Cache keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    fn touch(&mut self, key: &str) {
        if let Some(position) = self.keys.iter().position(|candidate| candidate == key) {
            self.keys.remove(position);
        }
        self.keys.push_back(key.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::SnapshotCache;
    use crate::snapshot::Snapshot;
    use tr_net::Location;

    fn location(path: &str) -> Location {
        match Location::parse(&format!("https://example.com{path}")) {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        }
    }

    fn page(title: &str) -> Snapshot {
        match Snapshot::from_html(&format!("<title>{title}</title><body></body>")) {
            Ok(snapshot) => snapshot,
            Err(error) => panic!("{error}"),
        }
    }

    fn cached_title(cache: &mut SnapshotCache, path: &str) -> Option<String> {
        cache
            .get(&location(path))
            .and_then(|snapshot| snapshot.title())
    }

    #[test]
    fn capacity_two_evicts_the_oldest_entry() {
        let mut cache = SnapshotCache::new(2);
        cache.put(&location("/a"), page("a"));
        cache.put(&location("/b"), page("b"));
        cache.put(&location("/c"), page("c"));

        assert!(cached_title(&mut cache, "/a").is_none());
        assert_eq!(cached_title(&mut cache, "/b").as_deref(), Some("b"));
        assert_eq!(cached_title(&mut cache, "/c").as_deref(), Some("c"));
    }

    #[test]
    fn reads_touch_entries() {
        let mut cache = SnapshotCache::new(2);
        cache.put(&location("/a"), page("a"));
        cache.put(&location("/b"), page("b"));
        assert_eq!(cached_title(&mut cache, "/a").as_deref(), Some("a"));
        cache.put(&location("/c"), page("c"));

        assert!(cache.has(&location("/a")));
        assert!(!cache.has(&location("/b")));
        let order: Vec<&str> = cache.keys().collect();
        assert_eq!(order, vec!["https://example.com/a", "https://example.com/c"]);
    }

    #[test]
    fn keys_are_canonical_and_clear_empties() {
        let mut cache = SnapshotCache::new(4);
        cache.put(&location("/a/"), page("slash"));
        assert_eq!(cached_title(&mut cache, "/a#top").as_deref(), Some("slash"));
        cache.put(&location("/a"), page("plain"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.has(&location("/a")));
    }
}
