//! Short-TTL read-through cache over the queue listings.
//!
//! Purely a performance layer: the datastore stays the source of truth,
//! every mutation invalidates the touched keys, and any cache failure
//! degrades to a direct read. The system must remain correct with this
//! cache disabled entirely.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::storage::models::Token;

#[derive(Clone)]
enum CachedValue {
    Listing(Vec<Token>),
    Token(Token),
}

struct CacheEntry {
    expires_at: Instant,
    value: CachedValue,
}

impl CacheEntry {
    fn new(value: CachedValue, ttl: Duration) -> Self {
        Self {
            expires_at: Instant::now() + ttl,
            value,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct QueueCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    listing_ttl: Duration,
    token_ttl: Duration,
}

impl QueueCache {
    pub fn new(listing_ttl: Duration, token_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            listing_ttl,
            token_ttl,
        }
    }

    /// Cached per-service listing, if present and fresh.
    pub fn get_listing(&self, service_id: &str, group: &str) -> Option<Vec<Token>> {
        let key = listing_key(service_id, group);
        match self.get(&key) {
            Some(CachedValue::Listing(tokens)) => Some(tokens),
            _ => None,
        }
    }

    pub fn put_listing(&self, service_id: &str, group: &str, tokens: Vec<Token>) {
        let key = listing_key(service_id, group);
        self.put(key, CachedValue::Listing(tokens), self.listing_ttl);
    }

    /// Cached single-token snapshot, if present and fresh.
    pub fn get_token(&self, token_id: &str) -> Option<Token> {
        match self.get(&token_key(token_id)) {
            Some(CachedValue::Token(token)) => Some(token),
            _ => None,
        }
    }

    pub fn put_token(&self, token: &Token) {
        self.put(
            token_key(&token.id),
            CachedValue::Token(token.clone()),
            self.token_ttl,
        );
    }

    /// Drop every cached listing for a service (bulk delete on mutation).
    pub fn invalidate_service(&self, service_id: &str) {
        let prefix = format!("listing:{service_id}:");
        if let Some(mut entries) = self.write() {
            entries.retain(|key, _| !key.starts_with(&prefix));
        }
    }

    pub fn invalidate_token(&self, token_id: &str) {
        if let Some(mut entries) = self.write() {
            entries.remove(&token_key(token_id));
        }
    }

    fn get(&self, key: &str) -> Option<CachedValue> {
        let entries = self.read()?;
        let entry = entries.get(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.value.clone())
    }

    fn put(&self, key: String, value: CachedValue, ttl: Duration) {
        if let Some(mut entries) = self.write() {
            entries.insert(key, CacheEntry::new(value, ttl));
        }
    }

    // A poisoned lock degrades to a miss rather than an error; reads must
    // never block on cache availability.
    fn read(&self) -> Option<std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        match self.entries.read() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Queue cache lock poisoned; falling through to direct reads");
                None
            }
        }
    }

    fn write(&self) -> Option<std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        match self.entries.write() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Queue cache lock poisoned; skipping cache write");
                None
            }
        }
    }
}

fn listing_key(service_id: &str, group: &str) -> String {
    format!("listing:{service_id}:{group}")
}

fn token_key(token_id: &str) -> String {
    format!("token:{token_id}")
}
