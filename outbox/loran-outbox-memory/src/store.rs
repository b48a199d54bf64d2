//! Outbox in-memory storage.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use loran_outbox::error::OutboxError;
use loran_outbox::{OutboxStats, OutboxStore, RelayListRecord, RoutingEntry, ROUTING_ENTRY_TTL};
use lru::LruCache;
use nostr::util::BoxedFuture;
use nostr::{Event, EventId, PublicKey, RelayUrl, Timestamp};
use tokio::sync::Mutex;

#[derive(Default)]
struct PkOutboxData {
    records: HashMap<EventId, RelayListRecord>,
    // Maintained pointer to the record with the highest `created_at`,
    // updated on write so reads never scan the history.
    latest: Option<EventId>,
    routing: HashMap<RelayUrl, RoutingEntry>,
}

impl PkOutboxData {
    fn insert_record(&mut self, record: RelayListRecord) {
        let replaces_latest: bool = match self.latest.and_then(|id| self.records.get(&id)) {
            Some(current) => record.created_at >= current.created_at,
            None => true,
        };

        if replaces_latest {
            self.latest = Some(record.event_id);
        }

        self.records.insert(record.event_id, record);
    }

    fn latest_record(&self) -> Option<&RelayListRecord> {
        self.latest.and_then(|id| self.records.get(&id))
    }

    fn upsert_entry(&mut self, entry: RoutingEntry) {
        match self.routing.get(&entry.relay_url) {
            Some(existing) if entry.last_seen < existing.last_seen => {}
            _ => {
                self.routing.insert(entry.relay_url.clone(), entry);
            }
        }
    }
}

/// Outbox in-memory storage.
#[derive(Debug, Clone)]
pub struct OutboxMemory {
    public_keys: Arc<Mutex<LruCache<PublicKey, PkOutboxData>>>,
}

impl Default for OutboxMemory {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl OutboxMemory {
    /// Construct an unbounded instance.
    pub fn unbounded() -> Self {
        Self {
            public_keys: Arc::new(Mutex::new(LruCache::unbounded())),
        }
    }

    /// Construct an instance that keeps data for at most `capacity` authors.
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            public_keys: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    async fn store_event(&self, event: &Event) -> Result<(), OutboxError> {
        let record: RelayListRecord = RelayListRecord::from_event(event)?;

        let mut public_keys = self.public_keys.lock().await;
        let pk_data: &mut PkOutboxData =
            public_keys.get_or_insert_mut(record.public_key, PkOutboxData::default);
        pk_data.insert_record(record);

        Ok(())
    }

    async fn latest(&self, public_key: &PublicKey) -> Option<RelayListRecord> {
        let mut public_keys = self.public_keys.lock().await;
        public_keys
            .get(public_key)
            .and_then(|pk_data| pk_data.latest_record())
            .cloned()
    }

    async fn latest_batch(&self, public_keys: &BTreeSet<PublicKey>) -> Vec<RelayListRecord> {
        let mut guard = self.public_keys.lock().await;

        let mut records: Vec<RelayListRecord> = Vec::with_capacity(public_keys.len());
        for public_key in public_keys.iter() {
            if let Some(record) = guard
                .get(public_key)
                .and_then(|pk_data| pk_data.latest_record())
            {
                records.push(record.clone());
            }
        }
        records
    }

    async fn upsert_entries(&self, record: &RelayListRecord) {
        let mut public_keys = self.public_keys.lock().await;
        let pk_data: &mut PkOutboxData =
            public_keys.get_or_insert_mut(record.public_key, PkOutboxData::default);

        for entry in RoutingEntry::derive(record) {
            pk_data.upsert_entry(entry);
        }
    }

    async fn entries_of(&self, public_key: &PublicKey) -> Vec<RoutingEntry> {
        let mut public_keys = self.public_keys.lock().await;

        let mut entries: Vec<RoutingEntry> = match public_keys.get(public_key) {
            Some(pk_data) => pk_data.routing.values().cloned().collect(),
            None => Vec::new(),
        };

        // Most recent first; relay URL keeps ties deterministic
        entries.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.relay_url.cmp(&b.relay_url))
        });

        entries
    }

    async fn contacts(&self, public_keys: &BTreeSet<PublicKey>) -> BTreeSet<PublicKey> {
        let mut guard = self.public_keys.lock().await;

        public_keys
            .iter()
            .filter(|public_key| {
                guard
                    .get(*public_key)
                    .is_some_and(|pk_data| !pk_data.routing.is_empty())
            })
            .copied()
            .collect()
    }

    async fn cleanup(&self) -> usize {
        let cutoff: Timestamp = Timestamp::now() - ROUTING_ENTRY_TTL;

        let mut public_keys = self.public_keys.lock().await;

        let mut removed: usize = 0;
        for (_, pk_data) in public_keys.iter_mut() {
            let before: usize = pk_data.routing.len();
            pk_data.routing.retain(|_, entry| entry.last_seen >= cutoff);
            removed += before - pk_data.routing.len();
        }
        removed
    }

    async fn aggregate(&self) -> OutboxStats {
        let public_keys = self.public_keys.lock().await;

        let mut stats = OutboxStats::default();
        let mut relays: HashSet<&RelayUrl> = HashSet::new();

        for (_, pk_data) in public_keys.iter() {
            stats.total_events += pk_data.records.len();
            stats.total_routing_entries += pk_data.routing.len();

            if !pk_data.routing.is_empty() {
                stats.unique_users += 1;
                relays.extend(pk_data.routing.keys());
            }
        }

        stats.unique_relays = relays.len();
        stats
    }

    async fn ingest_event(&self, event: &Event) -> Result<(), OutboxError> {
        let record: RelayListRecord = RelayListRecord::from_event(event)?;

        // Single lock: the two-phase write is atomic here.
        let mut public_keys = self.public_keys.lock().await;
        let pk_data: &mut PkOutboxData =
            public_keys.get_or_insert_mut(record.public_key, PkOutboxData::default);

        for entry in RoutingEntry::derive(&record) {
            pk_data.upsert_entry(entry);
        }
        pk_data.insert_record(record);

        Ok(())
    }
}

impl OutboxStore for OutboxMemory {
    fn store_relay_list_event<'a>(
        &'a self,
        event: &'a Event,
    ) -> BoxedFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move { self.store_event(event).await })
    }

    fn latest_relay_list<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Option<RelayListRecord>, OutboxError>> {
        Box::pin(async move { Ok(self.latest(public_key).await) })
    }

    fn relay_lists<'a>(
        &'a self,
        public_keys: &'a BTreeSet<PublicKey>,
    ) -> BoxedFuture<'a, Result<Vec<RelayListRecord>, OutboxError>> {
        Box::pin(async move { Ok(self.latest_batch(public_keys).await) })
    }

    fn store_routing_entries<'a>(
        &'a self,
        record: &'a RelayListRecord,
    ) -> BoxedFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move {
            self.upsert_entries(record).await;
            Ok(())
        })
    }

    fn user_relays<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Vec<RoutingEntry>, OutboxError>> {
        Box::pin(async move { Ok(self.entries_of(public_key).await) })
    }

    fn contacts_with_relays<'a>(
        &'a self,
        public_keys: &'a BTreeSet<PublicKey>,
    ) -> BoxedFuture<'a, Result<BTreeSet<PublicKey>, OutboxError>> {
        Box::pin(async move { Ok(self.contacts(public_keys).await) })
    }

    fn cleanup_old_entries(&self) -> BoxedFuture<Result<usize, OutboxError>> {
        Box::pin(async move { Ok(self.cleanup().await) })
    }

    fn stats(&self) -> BoxedFuture<Result<OutboxStats, OutboxError>> {
        Box::pin(async move { Ok(self.aggregate().await) })
    }

    fn ingest<'a>(&'a self, event: &'a Event) -> BoxedFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move { self.ingest_event(event).await })
    }
}
