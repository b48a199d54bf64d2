// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Fast-path relay cache
//!
//! Avoids the durable-store round trip on repeated per-user relay
//! lookups within a session. Entries expire after two hours.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use loran_outbox::error::OutboxError;
use loran_outbox::{OutboxStore, RoutingEntry};
use lru::LruCache;
use nostr::{PublicKey, Timestamp};

use crate::constants::{RELAY_CACHE_CAPACITY, RELAY_CACHE_TTL};

#[derive(Debug, Clone)]
struct CachedRelays {
    entries: Vec<RoutingEntry>,
    cached_at: Timestamp,
}

/// Outbox store with a short-lived per-user relay cache in front.
#[derive(Debug)]
pub struct OutboxView {
    store: Arc<dyn OutboxStore>,
    cache: Mutex<LruCache<PublicKey, CachedRelays>>,
    ttl: Duration,
}

impl OutboxView {
    /// Wrap a store with the default cache.
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self::with_ttl(store, RELAY_CACHE_TTL)
    }

    /// Wrap a store with a custom cache TTL.
    pub fn with_ttl(store: Arc<dyn OutboxStore>, ttl: Duration) -> Self {
        let capacity: NonZeroUsize =
            NonZeroUsize::new(RELAY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// The wrapped store.
    #[inline]
    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    /// Cached relays of a user, if present and fresh.
    pub fn cached(&self, public_key: &PublicKey) -> Option<Vec<RoutingEntry>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        match cache.get(public_key) {
            Some(cached) if cached.cached_at + self.ttl > Timestamp::now() => {
                Some(cached.entries.clone())
            }
            Some(..) => {
                cache.pop(public_key);
                None
            }
            None => None,
        }
    }

    /// Populate the cache for a user.
    pub fn cache_relays(&self, public_key: PublicKey, entries: Vec<RoutingEntry>) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.put(
            public_key,
            CachedRelays {
                entries,
                cached_at: Timestamp::now(),
            },
        );
    }

    /// Drop the cached relays of a user (e.g. after a newer relay list
    /// arrived).
    pub fn invalidate(&self, public_key: &PublicKey) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.pop(public_key);
    }

    /// Routing entries of a user: cache, then store, then cache populate.
    pub async fn user_relays(
        &self,
        public_key: &PublicKey,
    ) -> Result<Vec<RoutingEntry>, OutboxError> {
        if let Some(entries) = self.cached(public_key) {
            return Ok(entries);
        }

        let entries: Vec<RoutingEntry> = self.store.user_relays(public_key).await?;
        self.cache_relays(*public_key, entries.clone());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use loran_outbox_memory::OutboxMemory;
    use nostr::{EventBuilder, Keys, Kind, RelayUrl, Tag};

    use super::*;

    fn relay_list(keys: &Keys, url: &str) -> nostr::Event {
        EventBuilder::new(Kind::RelayList, "")
            .tags([Tag::relay_metadata(RelayUrl::parse(url).unwrap(), None)])
            .sign_with_keys(keys)
            .unwrap()
    }

    #[tokio::test]
    async fn test_cache_populates_on_miss() {
        let store = Arc::new(OutboxMemory::unbounded());
        let view = OutboxView::new(store.clone());

        let keys = Keys::generate();
        store
            .ingest(&relay_list(&keys, "wss://one.relay.io"))
            .await
            .unwrap();

        assert!(view.cached(&keys.public_key).is_none());

        let entries = view.user_relays(&keys.public_key).await.unwrap();
        assert_eq!(entries.len(), 1);

        assert_eq!(view.cached(&keys.public_key).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let store = Arc::new(OutboxMemory::unbounded());
        let view = OutboxView::with_ttl(store.clone(), Duration::ZERO);

        let keys = Keys::generate();
        store
            .ingest(&relay_list(&keys, "wss://one.relay.io"))
            .await
            .unwrap();

        let entries = view.user_relays(&keys.public_key).await.unwrap();
        assert_eq!(entries.len(), 1);

        // TTL of zero: the populated entry is already expired
        assert!(view.cached(&keys.public_key).is_none());

        let entries = view.user_relays(&keys.public_key).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let store = Arc::new(OutboxMemory::unbounded());
        let view = OutboxView::new(store.clone());

        let keys = Keys::generate();
        store
            .ingest(&relay_list(&keys, "wss://one.relay.io"))
            .await
            .unwrap();

        view.user_relays(&keys.public_key).await.unwrap();
        assert!(view.cached(&keys.public_key).is_some());

        view.invalidate(&keys.public_key);
        assert!(view.cached(&keys.public_key).is_none());
    }
}
