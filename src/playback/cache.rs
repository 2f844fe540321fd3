//! Resolved stream URL cache
//!
//! Link -> stream URL map filled by finished resolver jobs. Stream URLs are
//! short-lived (expiring CDN tokens), so consumers take entries out rather
//! than reading them in place, and the cache is dropped wholesale when the
//! queue is cleared.

use std::collections::HashMap;

/// Cache of resolved stream URLs, keyed by original track link.
#[derive(Debug, Default)]
pub struct UrlCache {
    entries: HashMap<String, String>,
}

impl UrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, link: String, url: String) {
        self.entries.insert(link, url);
    }

    pub fn contains(&self, link: &str) -> bool {
        self.entries.contains_key(link)
    }

    /// Remove and return the cached URL for `link`. Entries are consumed on
    /// use; a URL handed to a player launch is not reusable later.
    pub fn take(&mut self, link: &str) -> Option<String> {
        self.entries.remove(link)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_entry() {
        let mut cache = UrlCache::new();
        cache.put("link-a".to_string(), "https://cdn/a".to_string());

        assert!(cache.contains("link-a"));
        assert_eq!(cache.take("link-a").unwrap(), "https://cdn/a");
        assert!(!cache.contains("link-a"));
        assert!(cache.take("link-a").is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let mut cache = UrlCache::new();
        cache.put("link-a".to_string(), "https://cdn/old".to_string());
        cache.put("link-a".to_string(), "https://cdn/new".to_string());
        assert_eq!(cache.take("link-a").unwrap(), "https://cdn/new");
    }
}
