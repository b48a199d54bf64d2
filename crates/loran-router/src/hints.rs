// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Relay hint queue
//!
//! Relay URLs extracted from references (e.g. `nevent` bech32 entities)
//! are queued here and consumed by the request router's fallback path.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use nostr::RelayUrl;

/// Queue of externally supplied relay hints.
#[derive(Debug, Default)]
pub struct RelayHintQueue {
    inner: Mutex<VecDeque<RelayUrl>>,
}

impl RelayHintQueue {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a hint. Invalid URLs are dropped, not retried.
    pub fn push(&self, url: &str) -> bool {
        match RelayUrl::parse(url) {
            Ok(url) => {
                self.push_url(url);
                true
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Dropping invalid relay hint.");
                false
            }
        }
    }

    /// Queue an already parsed hint.
    pub fn push_url(&self, url: RelayUrl) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.push_back(url);
    }

    /// Drain the queue, returning the hints present in `pool`.
    ///
    /// Hints outside the pool are discarded along the way; duplicates
    /// collapse while the queue order is kept.
    pub fn drain_matching(&self, pool: &[RelayUrl]) -> Vec<RelayUrl> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let mut matching: Vec<RelayUrl> = Vec::new();
        for url in inner.drain(..) {
            if pool.contains(&url) && !matching.contains(&url) {
                matching.push(url);
            }
        }
        matching
    }

    /// Number of queued hints.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[test]
    fn test_invalid_hints_are_dropped() {
        let queue = RelayHintQueue::new();

        assert!(!queue.push("https://not-a-relay.example.com"));
        assert!(!queue.push("not a url at all"));
        assert!(queue.is_empty());

        assert!(queue.push("wss://relay.example.com"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_matching_filters_and_dedupes() {
        let queue = RelayHintQueue::new();
        let pool = vec![url("wss://a.relay.io"), url("wss://b.relay.io")];

        queue.push_url(url("wss://b.relay.io"));
        queue.push_url(url("wss://outside.relay.io"));
        queue.push_url(url("wss://a.relay.io"));
        queue.push_url(url("wss://b.relay.io"));

        let matching = queue.drain_matching(&pool);
        assert_eq!(matching, vec![url("wss://b.relay.io"), url("wss://a.relay.io")]);

        // Queue is consumed
        assert!(queue.is_empty());
        assert!(queue.drain_matching(&pool).is_empty());
    }
}
