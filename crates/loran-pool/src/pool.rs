// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Connection pool

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future;
use loran_router::health::{OperationKind, RelayMonitor};
use loran_router::req::RoutingPlan;
use nostr::{Event, EventId, Filter, Kind, PublicKey, RelayUrl};
use tokio::sync::Semaphore;

use crate::error::PoolError;
use crate::output::Output;
use crate::transport::{RelayTransport, TransportError};

/// Default number of concurrent in-flight relay operations.
const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 6;

/// Pool options
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolOptions {
    /// Concurrent in-flight relay operations, pool wide (default: 6)
    pub max_concurrent_queries: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
        }
    }
}

impl PoolOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the max number of concurrent in-flight relay operations
    #[inline]
    pub fn max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = max.max(1);
        self
    }
}

/// Connection pool.
///
/// Owns one transport channel per relay URL. Every relay operation
/// passes through a pool-wide FIFO semaphore, bounding simultaneous
/// outbound work regardless of how many callers request data
/// concurrently.
#[derive(Debug)]
pub struct ConnectionPool {
    transport: Arc<dyn RelayTransport>,
    monitor: Arc<RelayMonitor>,
    semaphore: Semaphore,
    opened: Mutex<HashSet<RelayUrl>>,
}

impl ConnectionPool {
    /// Construct a pool.
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        monitor: Arc<RelayMonitor>,
        opts: PoolOptions,
    ) -> Self {
        Self {
            transport,
            monitor,
            semaphore: Semaphore::new(opts.max_concurrent_queries.max(1)),
            opened: Mutex::new(HashSet::new()),
        }
    }

    /// Dispatch a routing plan and merge the results.
    ///
    /// Per-relay failures feed the health monitor and are otherwise
    /// swallowed; only the terminal all-relays-failed case is an error.
    pub async fn fetch(&self, plan: &RoutingPlan) -> Result<Vec<Event>, PoolError> {
        if plan.targets.is_empty() {
            return Ok(Vec::new());
        }

        let futures = plan
            .targets
            .iter()
            .map(|(url, filters)| self.query_relay(url, filters, plan.operation));

        let results: Vec<Option<Vec<Event>>> = future::join_all(futures).await;

        if results.iter().all(|res| res.is_none()) {
            return Err(PoolError::AllRelaysFailed);
        }

        Ok(merge_events(results.into_iter().flatten().collect()))
    }

    /// Publish an event to a list of relays.
    pub async fn publish(&self, urls: &[RelayUrl], event: &Event) -> Output {
        let futures = urls.iter().map(|url| self.publish_relay(url, event));
        let results = future::join_all(futures).await;

        let mut output = Output::default();
        for (url, result) in results.into_iter() {
            match result {
                Ok(()) => {
                    output.success.insert(url);
                }
                Err(e) => {
                    output.failed.insert(url, e);
                }
            }
        }
        output
    }

    /// Close channels to relays that left the configuration.
    pub async fn reconcile(&self, keep: &[RelayUrl]) {
        let stale: Vec<RelayUrl> = {
            let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            opened
                .iter()
                .filter(|url| !keep.contains(url))
                .cloned()
                .collect()
        };

        for url in stale.into_iter() {
            self.close_relay(&url).await;
        }
    }

    /// Close every open channel.
    pub async fn shutdown(&self) {
        let stale: Vec<RelayUrl> = {
            let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            opened.iter().cloned().collect()
        };

        for url in stale.into_iter() {
            self.close_relay(&url).await;
        }
    }

    async fn query_relay(
        &self,
        url: &RelayUrl,
        filters: &[Filter],
        operation: OperationKind,
    ) -> Option<Vec<Event>> {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(..) => return None,
        };

        if let Err(e) = self.ensure_open(url).await {
            tracing::debug!(relay = %url, error = %e, "Failed to open relay channel.");
            self.monitor.record_failure(url, operation);
            return None;
        }

        let start: Instant = Instant::now();

        match self.transport.query(url, filters.to_vec()).await {
            Ok(events) => {
                self.monitor.record_success(url, start.elapsed());
                Some(events)
            }
            Err(e) => {
                tracing::debug!(relay = %url, error = %e, "Relay query failed.");
                self.monitor.record_failure(url, operation);
                None
            }
        }
    }

    async fn publish_relay(&self, url: &RelayUrl, event: &Event) -> (RelayUrl, Result<(), String>) {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => return (url.clone(), Err(e.to_string())),
        };

        if let Err(e) = self.ensure_open(url).await {
            self.monitor.record_failure(url, OperationKind::Feed);
            return (url.clone(), Err(e.to_string()));
        }

        let start: Instant = Instant::now();

        match self.transport.publish(url, event).await {
            Ok(()) => {
                self.monitor.record_success(url, start.elapsed());
                (url.clone(), Ok(()))
            }
            Err(e) => {
                tracing::debug!(relay = %url, error = %e, "Relay publish failed.");
                self.monitor.record_failure(url, OperationKind::Feed);
                (url.clone(), Err(e.to_string()))
            }
        }
    }

    async fn ensure_open(&self, url: &RelayUrl) -> Result<(), TransportError> {
        {
            let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            if opened.contains(url) {
                return Ok(());
            }
        }

        self.transport.open(url).await?;

        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        opened.insert(url.clone());
        Ok(())
    }

    async fn close_relay(&self, url: &RelayUrl) {
        if let Err(e) = self.transport.close(url).await {
            tracing::debug!(relay = %url, error = %e, "Failed to close relay channel.");
        }

        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        opened.remove(url);
    }
}

/// Merge per-relay batches: dedupe by event id, resolve replaceable
/// kinds to the highest `created_at` per (author, kind), newest first.
fn merge_events(batches: Vec<Vec<Event>>) -> Vec<Event> {
    let mut seen: HashSet<EventId> = HashSet::new();
    let mut replaceable: HashMap<(PublicKey, Kind), usize> = HashMap::new();
    let mut merged: Vec<Event> = Vec::new();

    for event in batches.into_iter().flatten() {
        if !seen.insert(event.id) {
            continue;
        }

        if event.kind.is_replaceable() {
            match replaceable.get(&(event.pubkey, event.kind)) {
                Some(&index) => {
                    if event.created_at > merged[index].created_at {
                        merged[index] = event;
                    }
                }
                None => {
                    replaceable.insert((event.pubkey, event.kind), merged.len());
                    merged.push(event);
                }
            }
        } else {
            merged.push(event);
        }
    }

    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    merged
}

#[cfg(test)]
mod tests {
    use nostr::util::BoxedFuture;
    use nostr::{EventBuilder, Keys, Tag, Timestamp};

    use super::*;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[derive(Debug, Default)]
    struct MockTransport {
        events: Mutex<HashMap<RelayUrl, Vec<Event>>>,
        failing: Mutex<HashSet<RelayUrl>>,
        closed: Mutex<Vec<RelayUrl>>,
        published: Mutex<Vec<(RelayUrl, EventId)>>,
    }

    impl MockTransport {
        fn serve(&self, url: RelayUrl, events: Vec<Event>) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url, events);
        }

        fn fail(&self, url: RelayUrl) {
            self.failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url);
        }

        fn closed(&self) -> Vec<RelayUrl> {
            self.closed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn published(&self) -> Vec<(RelayUrl, EventId)> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn is_failing(&self, url: &RelayUrl) -> bool {
            self.failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(url)
        }
    }

    impl RelayTransport for MockTransport {
        fn open<'a>(&'a self, url: &'a RelayUrl) -> BoxedFuture<'a, Result<(), TransportError>> {
            Box::pin(async move {
                if self.is_failing(url) {
                    return Err(TransportError::Unreachable);
                }
                Ok(())
            })
        }

        fn query<'a>(
            &'a self,
            url: &'a RelayUrl,
            _filters: Vec<Filter>,
        ) -> BoxedFuture<'a, Result<Vec<Event>, TransportError>> {
            Box::pin(async move {
                if self.is_failing(url) {
                    return Err(TransportError::Unreachable);
                }
                let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(events.get(url).cloned().unwrap_or_default())
            })
        }

        fn publish<'a>(
            &'a self,
            url: &'a RelayUrl,
            event: &'a Event,
        ) -> BoxedFuture<'a, Result<(), TransportError>> {
            Box::pin(async move {
                if self.is_failing(url) {
                    return Err(TransportError::Unreachable);
                }
                self.published
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((url.clone(), event.id));
                Ok(())
            })
        }

        fn close<'a>(&'a self, url: &'a RelayUrl) -> BoxedFuture<'a, Result<(), TransportError>> {
            Box::pin(async move {
                self.closed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(url.clone());
                Ok(())
            })
        }
    }

    fn pool(transport: Arc<MockTransport>) -> (ConnectionPool, Arc<RelayMonitor>) {
        let monitor = Arc::new(RelayMonitor::new());
        let pool = ConnectionPool::new(transport, monitor.clone(), PoolOptions::default());
        (pool, monitor)
    }

    fn plan(urls: &[RelayUrl]) -> RoutingPlan {
        let filters = vec![Filter::new().kind(Kind::TextNote)];
        RoutingPlan {
            targets: urls.iter().map(|u| (u.clone(), filters.clone())).collect(),
            operation: OperationKind::Feed,
        }
    }

    fn note(keys: &Keys, content: &str) -> Event {
        EventBuilder::text_note(content).sign_with_keys(keys).unwrap()
    }

    fn relay_list(keys: &Keys, relay: &str, created_at: u64) -> Event {
        EventBuilder::new(Kind::RelayList, "")
            .tags([Tag::relay_metadata(url(relay), None)])
            .custom_created_at(Timestamp::from_secs(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_plan_yields_no_events() {
        let transport = Arc::new(MockTransport::default());
        let (pool, _) = pool(transport);

        let events = pool.fetch(&plan(&[])).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_merges_and_dedupes_by_id() {
        let transport = Arc::new(MockTransport::default());
        let keys = Keys::generate();
        let shared = note(&keys, "shared");
        let only_a = note(&keys, "only on a");

        let a = url("wss://a.relay.io");
        let b = url("wss://b.relay.io");
        transport.serve(a.clone(), vec![shared.clone(), only_a.clone()]);
        transport.serve(b.clone(), vec![shared.clone()]);

        let (pool, _) = pool(transport);
        let events = pool.fetch(&plan(&[a, b])).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events.iter().filter(|e| e.id == shared.id).count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_resolves_replaceable_kinds_to_latest() {
        let transport = Arc::new(MockTransport::default());
        let keys = Keys::generate();
        let older = relay_list(&keys, "wss://old.relay.io", 100);
        let newer = relay_list(&keys, "wss://new.relay.io", 200);

        let a = url("wss://a.relay.io");
        let b = url("wss://b.relay.io");
        transport.serve(a.clone(), vec![older.clone()]);
        transport.serve(b.clone(), vec![newer.clone()]);

        let (pool, _) = pool(transport);
        let events = pool.fetch(&plan(&[a, b])).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, newer.id);
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_an_error() {
        let transport = Arc::new(MockTransport::default());
        let keys = Keys::generate();
        let event = note(&keys, "hello");

        let good = url("wss://good.relay.io");
        let bad = url("wss://bad.relay.io");
        transport.serve(good.clone(), vec![event.clone()]);
        transport.fail(bad.clone());

        let (pool, monitor) = pool(transport);
        let events = pool.fetch(&plan(&[good.clone(), bad.clone()])).await.unwrap();

        assert_eq!(events.len(), 1);

        // Health accounting happened on both sides
        let snapshot = monitor.snapshot();
        let health_of = |u: &RelayUrl| {
            snapshot
                .iter()
                .find(|s| &s.relay_url == u)
                .map(|s| s.health.clone())
                .unwrap()
        };
        assert_eq!(health_of(&good).success_count, 1);
        assert_eq!(health_of(&bad).failure_count, 1);
    }

    #[tokio::test]
    async fn test_all_relays_failed_is_terminal() {
        let transport = Arc::new(MockTransport::default());
        let a = url("wss://a.relay.io");
        let b = url("wss://b.relay.io");
        transport.fail(a.clone());
        transport.fail(b.clone());

        let (pool, _) = pool(transport);
        let res = pool.fetch(&plan(&[a, b])).await;
        assert_eq!(res.unwrap_err(), PoolError::AllRelaysFailed);
    }

    #[tokio::test]
    async fn test_publish_aggregates_per_relay_outcomes() {
        let transport = Arc::new(MockTransport::default());
        let good = url("wss://good.relay.io");
        let bad = url("wss://bad.relay.io");
        transport.fail(bad.clone());

        let keys = Keys::generate();
        let event = note(&keys, "outgoing");

        let (pool, _) = pool(transport.clone());
        let output = pool.publish(&[good.clone(), bad.clone()], &event).await;

        assert!(output.is_success());
        assert!(output.success.contains(&good));
        assert!(output.failed.contains_key(&bad));
        assert_eq!(transport.published(), vec![(good, event.id)]);
    }

    #[tokio::test]
    async fn test_reconcile_closes_stale_channels() {
        let transport = Arc::new(MockTransport::default());
        let a = url("wss://a.relay.io");
        let b = url("wss://b.relay.io");

        let (pool, _) = pool(transport.clone());
        pool.fetch(&plan(&[a.clone(), b.clone()])).await.unwrap();

        pool.reconcile(std::slice::from_ref(&a)).await;
        assert_eq!(transport.closed(), vec![b]);

        pool.shutdown().await;
        assert_eq!(transport.closed().len(), 2);
    }
}
