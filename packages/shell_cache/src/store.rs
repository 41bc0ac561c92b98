//! Named response stores.
//!
//! A [`CacheSet`] is the registry of named caches; each [`Store`] maps
//! request paths to stored responses. Retention works on names: activation
//! keeps the current shell and icon cache names and deletes everything else.

use std::collections::HashMap;

/// Status every offline/error interception path responds with.
pub const OFFLINE_STATUS: u16 = 503;
/// Body of the offline placeholder; callers rely on this exact text.
pub const OFFLINE_BODY: &str = "Offline";

/// A stored (or synthesized) HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body,
        }
    }

    /// The synthetic `503 "Offline"` response.
    pub fn offline_placeholder() -> Self {
        Self::new(OFFLINE_STATUS, "text/plain", OFFLINE_BODY.as_bytes().to_vec())
    }

    /// HTTP-ok in the cacheable sense.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One named cache: response copies keyed by request path.
#[derive(Debug, Default)]
pub struct Store {
    entries: HashMap<String, CachedResponse>,
}

impl Store {
    pub fn get(&self, key: &str) -> Option<&CachedResponse> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, response: CachedResponse) {
        self.entries.insert(key.into(), response);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The registry of named caches.
#[derive(Debug, Default)]
pub struct CacheSet {
    stores: HashMap<String, Store>,
}

impl CacheSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a named cache, creating it empty if it does not exist yet.
    pub fn open(&mut self, name: &str) -> &mut Store {
        self.stores.entry(name.to_string()).or_default()
    }

    pub fn get(&self, name: &str) -> Option<&Store> {
        self.stores.get(name)
    }

    /// Every cache name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete every cache whose name is not in `keep`. Returns the deleted
    /// names, sorted.
    pub fn delete_others(&mut self, keep: &[&str]) -> Vec<String> {
        let mut doomed: Vec<String> = self
            .stores
            .keys()
            .filter(|name| !keep.contains(&name.as_str()))
            .cloned()
            .collect();
        doomed.sort();
        for name in &doomed {
            self.stores.remove(name);
        }
        doomed
    }
}
