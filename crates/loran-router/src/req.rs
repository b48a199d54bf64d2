// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Request router
//!
//! Assigns a batch of query filters to a subset of the relay set.
//! Author-scoped queries route through the outbox data of the authors;
//! everything else falls back to relay hints or bounded round-robin over
//! the configured pool.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use nostr::{Filter, Kind, PublicKey, RelayUrl};

use crate::cache::OutboxView;
use crate::config::RelayConfigResolver;
use crate::health::{OperationKind, RelayMonitor};
use crate::hints::RelayHintQueue;
use crate::options::RouterOptions;

/// Relay assignment for one filter batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingPlan {
    /// Filters per target relay
    pub targets: HashMap<RelayUrl, Vec<Filter>>,
    /// Operation kind of the batch, used for health accounting
    pub operation: OperationKind,
}

impl RoutingPlan {
    fn empty(operation: OperationKind) -> Self {
        Self {
            targets: HashMap::new(),
            operation,
        }
    }

    fn assign(relays: Vec<RelayUrl>, filters: &[Filter], operation: OperationKind) -> Self {
        let mut targets: HashMap<RelayUrl, Vec<Filter>> = HashMap::with_capacity(relays.len());
        for relay in relays.into_iter() {
            targets.insert(relay, filters.to_vec());
        }
        Self { targets, operation }
    }

    /// Check if the plan targets no relay.
    ///
    /// An empty plan is a valid "no data available" outcome, not an
    /// error.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Classify a filter batch for fan-out and health accounting.
pub fn operation_kind(filters: &[Filter]) -> OperationKind {
    let is_metadata: bool = filters.iter().any(|filter| {
        matches!(&filter.kinds, Some(kinds) if kinds.contains(&Kind::Metadata))
    });

    if is_metadata {
        OperationKind::Metadata
    } else {
        OperationKind::Feed
    }
}

/// Request router.
#[derive(Debug)]
pub struct RequestRouter {
    outbox: Arc<OutboxView>,
    monitor: Arc<RelayMonitor>,
    resolver: Arc<RelayConfigResolver>,
    hints: Arc<RelayHintQueue>,
    outbox_enabled: Arc<AtomicBool>,
    // Shared across invocations: spreads fallback load over the whole
    // session instead of per call
    cursor: AtomicUsize,
    opts: RouterOptions,
}

impl RequestRouter {
    /// Construct a router.
    pub fn new(
        outbox: Arc<OutboxView>,
        monitor: Arc<RelayMonitor>,
        resolver: Arc<RelayConfigResolver>,
        hints: Arc<RelayHintQueue>,
        outbox_enabled: Arc<AtomicBool>,
        opts: RouterOptions,
    ) -> Self {
        Self {
            outbox,
            monitor,
            resolver,
            hints,
            outbox_enabled,
            cursor: AtomicUsize::new(0),
            opts,
        }
    }

    /// Compute the relay assignment for a filter batch.
    pub async fn plan(&self, filters: &[Filter]) -> RoutingPlan {
        let operation: OperationKind = operation_kind(filters);

        if filters.is_empty() {
            return RoutingPlan::empty(operation);
        }

        let config = self.resolver.resolve_current().await;
        let pool: Vec<RelayUrl> = config.readable_relays();

        if pool.is_empty() {
            tracing::debug!("No readable relays configured.");
            return RoutingPlan::empty(operation);
        }

        // Union of the `authors` fields; #p tag references do not make a
        // query author-scoped
        let authors: BTreeSet<PublicKey> = filters
            .iter()
            .filter_map(|filter| filter.authors.as_ref())
            .flatten()
            .copied()
            .collect();

        if !authors.is_empty() && self.outbox_enabled.load(Ordering::Relaxed) {
            if let Some(relays) = self.outbox_targets(&authors, &pool).await {
                tracing::debug!(
                    authors = authors.len(),
                    relays = relays.len(),
                    "Routing through outbox relays."
                );
                // Outbox routing fully replaces the fallback for this batch
                return RoutingPlan::assign(relays, filters, operation);
            }
        }

        self.fallback(filters, &pool, !authors.is_empty(), operation)
    }

    /// Outbox relay selection for an author-scoped batch.
    ///
    /// Returns `None` when no author has usable outbox data yet.
    async fn outbox_targets(
        &self,
        authors: &BTreeSet<PublicKey>,
        pool: &[RelayUrl],
    ) -> Option<Vec<RelayUrl>> {
        let mut candidates: Vec<RelayUrl> = Vec::new();

        for author in authors.iter() {
            let entries = match self.outbox.user_relays(author).await {
                Ok(entries) => entries,
                Err(e) => {
                    // Storage trouble is not fatal: the fallback path
                    // still serves the query
                    tracing::warn!(error = %e, "Outbox lookup failed.");
                    continue;
                }
            };

            for entry in entries.into_iter() {
                if entry.permission.is_readable() && !candidates.contains(&entry.relay_url) {
                    candidates.push(entry.relay_url);
                }
            }
        }

        if candidates.is_empty() {
            return None;
        }

        let healthy: Vec<RelayUrl> = self.monitor.healthy_relays(&candidates, None);
        if healthy.is_empty() {
            return None;
        }

        let target: usize = self.opts.target_relays();
        let mut selected: Vec<RelayUrl> = healthy.into_iter().take(target).collect();

        // A single-author query with too few discovered relays blends in
        // exactly one general relay, so profile pages are not starved
        if authors.len() == 1 && selected.len() < self.opts.min_outbox_relays {
            let general: Vec<RelayUrl> = self.monitor.healthy_relays(pool, None);
            if let Some(extra) = general.into_iter().find(|url| !selected.contains(url)) {
                selected.push(extra);
            }
        }

        Some(selected)
    }

    fn fallback(
        &self,
        filters: &[Filter],
        pool: &[RelayUrl],
        author_scoped: bool,
        operation: OperationKind,
    ) -> RoutingPlan {
        // Queued relay hints win over round-robin
        let hinted: Vec<RelayUrl> = self.hints.drain_matching(pool);
        if !hinted.is_empty() {
            tracing::debug!(relays = hinted.len(), "Routing to hinted relays.");
            return RoutingPlan::assign(hinted, filters, operation);
        }

        let mut width: usize = if author_scoped || operation == OperationKind::Metadata {
            self.opts.scoped_fanout
        } else {
            self.opts.global_fanout
        };

        if self.monitor.recent_failures() > self.opts.backpressure_threshold {
            width = (width / 2).max(self.opts.min_fanout);
            tracing::debug!(width, "Halving fan-out under recent failures.");
        }

        let width: usize = width.min(pool.len());
        let start: usize = self.cursor.fetch_add(width, Ordering::Relaxed) % pool.len();

        let selected: Vec<RelayUrl> = (0..width)
            .map(|offset| pool[(start + offset) % pool.len()].clone())
            .collect();

        RoutingPlan::assign(selected, filters, operation)
    }
}
