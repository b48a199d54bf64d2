// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Client

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_utility::time;
use loran_outbox::error::OutboxError;
use loran_outbox::{OutboxStats, OutboxStore};
use loran_pool::{ConnectionPool, Output, PoolError, RelayTransport};
use loran_router::cache::OutboxView;
use loran_router::config::{RelayConfig, RelayConfigResolver, SignerStatus};
use loran_router::event::EventRouter;
use loran_router::health::{RelayHealthSnapshot, RelayMonitor};
use loran_router::hints::RelayHintQueue;
use loran_router::req::RequestRouter;
use nostr::{Event, Filter, Kind, PublicKey};

pub mod builder;
pub mod options;

use self::builder::ClientBuilder;
use self::options::ClientOptions;

/// Client error
#[derive(Debug)]
pub enum Error {
    /// Every relay in the routing decision was unreachable.
    ///
    /// This is the only routing failure that surfaces to the caller; an
    /// empty result set is a valid outcome, not an error.
    NoRelaysAvailable,
    /// Outbox storage error
    Outbox(OutboxError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRelaysAvailable => f.write_str("no relays available"),
            Self::Outbox(e) => e.fmt(f),
        }
    }
}

impl From<OutboxError> for Error {
    fn from(e: OutboxError) -> Self {
        Self::Outbox(e)
    }
}

/// Aggregated operational counters, consumed by the dashboard.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// Outbox storage counters
    pub outbox: OutboxStats,
    /// Per-relay health stats
    pub relays: Vec<RelayHealthSnapshot>,
}

/// Loran client.
///
/// Owns the routing subsystem. All shared services are explicitly
/// constructed here and injected into the routers; nothing is a global.
#[derive(Debug)]
pub struct Client {
    pool: ConnectionPool,
    req_router: RequestRouter,
    event_router: EventRouter,
    resolver: Arc<RelayConfigResolver>,
    monitor: Arc<RelayMonitor>,
    outbox: Arc<OutboxView>,
    hints: Arc<RelayHintQueue>,
    outbox_enabled: Arc<AtomicBool>,
    signer: Mutex<SignerStatus>,
    opts: ClientOptions,
}

impl Client {
    /// New client builder.
    #[inline]
    pub fn builder(transport: Arc<dyn RelayTransport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub(crate) fn from_builder(builder: ClientBuilder) -> Self {
        let monitor: Arc<RelayMonitor> = Arc::new(RelayMonitor::new());
        let resolver: Arc<RelayConfigResolver> =
            Arc::new(RelayConfigResolver::new(builder.config_store));
        let outbox: Arc<OutboxView> = Arc::new(OutboxView::new(builder.outbox));
        let hints: Arc<RelayHintQueue> = Arc::new(RelayHintQueue::new());
        // Outbox routing is on by default and user-revocable
        let outbox_enabled: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));

        let req_router = RequestRouter::new(
            outbox.clone(),
            monitor.clone(),
            resolver.clone(),
            hints.clone(),
            outbox_enabled.clone(),
            builder.opts.router,
        );
        let event_router = EventRouter::new(outbox.clone(), resolver.clone(), outbox_enabled.clone());
        let pool = ConnectionPool::new(builder.transport, monitor.clone(), builder.opts.pool);

        Self {
            pool,
            req_router,
            event_router,
            resolver,
            monitor,
            outbox,
            hints,
            outbox_enabled,
            signer: Mutex::new(SignerStatus::Unavailable),
            opts: builder.opts,
        }
    }

    /// Execute a query: route, dispatch, merge.
    ///
    /// Returns the deduplicated events of all reachable target relays.
    /// An empty routing plan (no configured relays, no data) yields an
    /// empty list. Received relay list events are ingested into the
    /// outbox store along the way.
    pub async fn fetch_events(&self, filters: Vec<Filter>) -> Result<Vec<Event>, Error> {
        let plan = self.req_router.plan(&filters).await;

        if plan.is_empty() {
            tracing::debug!("Routing produced no relays for this batch.");
            return Ok(Vec::new());
        }

        let events: Vec<Event> = match self.pool.fetch(&plan).await {
            Ok(events) => events,
            Err(PoolError::AllRelaysFailed) => return Err(Error::NoRelaysAvailable),
        };

        for event in events.iter().filter(|e| e.kind == Kind::RelayList) {
            if let Err(e) = self.outbox.store().ingest(event).await {
                tracing::warn!(error = %e, "Failed to ingest relay list event.");
                continue;
            }
            self.outbox.invalidate(&event.pubkey);
        }

        Ok(events)
    }

    /// Publish an event to the relays picked by the event router.
    pub async fn send_event(&self, event: &Event) -> Result<Output, Error> {
        let targets = self.event_router.plan(event).await;

        if targets.is_empty() {
            return Err(Error::NoRelaysAvailable);
        }

        Ok(self.pool.publish(&targets, event).await)
    }

    /// Ingest a relay list event into the outbox store.
    ///
    /// Runs both write phases (raw event, derived routing entries) and
    /// drops the fast-path cache entry of the author.
    pub async fn process_relay_list_event(&self, event: &Event) -> Result<(), Error> {
        self.outbox.store().ingest(event).await?;
        self.outbox.invalidate(&event.pubkey);
        Ok(())
    }

    /// Start an authenticated or view-only session.
    ///
    /// The signing capability is negotiated exactly once and carried as
    /// a typed status. Session-scoped relay defaults are derived from
    /// the user's own stored relay list; a view-only session gets no
    /// write surface.
    pub async fn sign_in(&self, public_key: PublicKey, signer: SignerStatus) {
        {
            let mut current = self.signer.lock().unwrap_or_else(PoisonError::into_inner);
            *current = signer;
        }
        self.resolver.set_session_public_key(Some(public_key));

        match self.outbox.store().latest_relay_list(&public_key).await {
            Ok(Some(record)) => self.resolver.set_session_defaults(&record, signer),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Could not load own relay list for session defaults.");
            }
        }

        // Sockets need a head start before the first post-login query;
        // constrained devices take longer to re-establish
        let delay = self.opts.signin_settle_delay();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }

        let config: RelayConfig = self.resolver.resolve_current().await;
        self.pool.reconcile(&config.relay_urls).await;
    }

    /// End the session. Session-scoped relay defaults are dropped and
    /// never persisted.
    pub async fn sign_out(&self) {
        self.resolver.clear_session();
        {
            let mut current = self.signer.lock().unwrap_or_else(PoisonError::into_inner);
            *current = SignerStatus::Unavailable;
        }

        let config: RelayConfig = self.resolver.resolve_current().await;
        self.pool.reconcile(&config.relay_urls).await;
    }

    /// Signing capability of the session.
    pub fn signer_status(&self) -> SignerStatus {
        *self.signer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Toggle outbox routing (default: enabled).
    #[inline]
    pub fn set_outbox_routing(&self, enabled: bool) {
        self.outbox_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Check if outbox routing is enabled.
    #[inline]
    pub fn is_outbox_routing_enabled(&self) -> bool {
        self.outbox_enabled.load(Ordering::Relaxed)
    }

    /// Queue a relay hint for the next fallback routing decision.
    ///
    /// Invalid URLs are dropped.
    #[inline]
    pub fn queue_relay_hint(&self, url: &str) -> bool {
        self.hints.push(url)
    }

    /// Operational counters for the dashboard.
    pub async fn diagnostics(&self) -> Result<Diagnostics, Error> {
        Ok(Diagnostics {
            outbox: self.outbox.store().stats().await?,
            relays: self.monitor.snapshot(),
        })
    }

    /// The configuration resolver.
    #[inline]
    pub fn resolver(&self) -> &Arc<RelayConfigResolver> {
        &self.resolver
    }

    /// The health monitor.
    #[inline]
    pub fn monitor(&self) -> &Arc<RelayMonitor> {
        &self.monitor
    }

    /// The outbox store.
    #[inline]
    pub fn outbox(&self) -> &Arc<dyn OutboxStore> {
        self.outbox.store()
    }
}
