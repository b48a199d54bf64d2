// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Loran outbox storage
//!
//! Traits and data model for the persistent pubkey-to-relay mapping
//! derived from NIP-65 relay list events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![warn(clippy::large_futures)]

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::time::Duration;

use nostr::nips::nip65::{self, RelayMetadata};
use nostr::util::BoxedFuture;
use nostr::{Event, EventId, Kind, PublicKey, RelayUrl, Timestamp};

pub mod error;
pub mod permission;
pub mod prelude;

use self::error::OutboxError;
use self::permission::RelayPermission;

/// How long a routing entry stays eligible for selection, counted from the
/// `created_at` of its source relay list event.
pub const ROUTING_ENTRY_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Raw relay list declaration of a single author.
///
/// Storage keeps the record history per author; latest-wins resolution
/// happens at read time by `created_at` (the author-declared time, not the
/// local receipt time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayListRecord {
    /// Author of the relay list
    pub public_key: PublicKey,
    /// Creation time declared by the author
    pub created_at: Timestamp,
    /// Relay declarations, in tag order
    pub relays: Vec<(RelayUrl, Option<RelayMetadata>)>,
    /// Originating event, kept for provenance and cleanup
    pub event_id: EventId,
    /// Local wall-clock time at persistence
    pub stored_at: Timestamp,
}

impl RelayListRecord {
    /// Build a record from a NIP-65 relay list event.
    pub fn from_event(event: &Event) -> Result<Self, OutboxError> {
        if event.kind != Kind::RelayList {
            return Err(OutboxError::NotRelayList { kind: event.kind });
        }

        let relays: Vec<(RelayUrl, Option<RelayMetadata>)> = nip65::extract_relay_list(event)
            .map(|(url, metadata)| (url.clone(), *metadata))
            .collect();

        Ok(Self {
            public_key: event.pubkey,
            created_at: event.created_at,
            relays,
            event_id: event.id,
            stored_at: Timestamp::now(),
        })
    }

    /// Relay URLs the author reads from (marked `read` or unmarked).
    pub fn read_relays(&self) -> impl Iterator<Item = &RelayUrl> {
        self.relays
            .iter()
            .filter(|(_, marker)| !matches!(marker, Some(RelayMetadata::Write)))
            .map(|(url, _)| url)
    }

    /// Relay URLs the author writes to (marked `write` or unmarked).
    pub fn write_relays(&self) -> impl Iterator<Item = &RelayUrl> {
        self.relays
            .iter()
            .filter(|(_, marker)| !matches!(marker, Some(RelayMetadata::Read)))
            .map(|(url, _)| url)
    }
}

/// Derived routing table entry for one (author, relay) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    /// Author
    pub public_key: PublicKey,
    /// Relay URL, normalized at parse time
    pub relay_url: RelayUrl,
    /// Permission derived from the NIP-65 marker
    pub permission: RelayPermission,
    /// `created_at` of the source relay list event
    pub last_seen: Timestamp,
    /// Source event, for audit
    pub event_id: EventId,
}

impl RoutingEntry {
    /// Derive the routing entries of a relay list record.
    ///
    /// Duplicate relay declarations collapse to one entry because the
    /// composite key is `(public_key, relay_url)`.
    pub fn derive(record: &RelayListRecord) -> impl Iterator<Item = RoutingEntry> + '_ {
        record.relays.iter().map(move |(url, marker)| RoutingEntry {
            public_key: record.public_key,
            relay_url: url.clone(),
            permission: RelayPermission::from_marker(marker.as_ref()),
            last_seen: record.created_at,
            event_id: record.event_id,
        })
    }
}

/// Aggregate storage counters, computed by full scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    /// Raw relay list events kept in storage
    pub total_events: usize,
    /// Rows in the derived routing table
    pub total_routing_entries: usize,
    /// Distinct authors in the routing table
    pub unique_users: usize,
    /// Distinct relays in the routing table
    pub unique_relays: usize,
}

/// Outbox storage.
///
/// The raw event table and the derived routing table are written in two
/// phases: [`OutboxStore::store_relay_list_event`] first, then
/// [`OutboxStore::store_routing_entries`]. Use [`OutboxStore::ingest`] to
/// run both; backends make the pair atomic where the engine allows it.
pub trait OutboxStore: Any + Debug + Send + Sync {
    /// Persist a raw relay list event.
    ///
    /// Keyed by event id: re-storing the same event is idempotent, while
    /// distinct events of one author accumulate as history.
    fn store_relay_list_event<'a>(
        &'a self,
        event: &'a Event,
    ) -> BoxedFuture<'a, Result<(), OutboxError>>;

    /// Get the most recent relay list record of a public key.
    ///
    /// The record with the highest `created_at` wins, regardless of the
    /// order in which records were stored.
    fn latest_relay_list<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Option<RelayListRecord>, OutboxError>>;

    /// Batched form of [`OutboxStore::latest_relay_list`].
    ///
    /// Authors with no record are omitted from the result.
    fn relay_lists<'a>(
        &'a self,
        public_keys: &'a BTreeSet<PublicKey>,
    ) -> BoxedFuture<'a, Result<Vec<RelayListRecord>, OutboxError>>;

    /// Upsert the derived routing entries of a record.
    ///
    /// An existing entry is only overwritten by data with a `last_seen`
    /// greater than or equal to the stored value.
    fn store_routing_entries<'a>(
        &'a self,
        record: &'a RelayListRecord,
    ) -> BoxedFuture<'a, Result<(), OutboxError>>;

    /// All routing entries of a public key, most recent first.
    fn user_relays<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Vec<RoutingEntry>, OutboxError>>;

    /// Subset of the candidates that have at least one routing entry.
    fn contacts_with_relays<'a>(
        &'a self,
        public_keys: &'a BTreeSet<PublicKey>,
    ) -> BoxedFuture<'a, Result<BTreeSet<PublicKey>, OutboxError>>;

    /// Delete routing entries older than [`ROUTING_ENTRY_TTL`].
    ///
    /// Raw relay list records are not touched. Returns the number of
    /// deleted entries.
    fn cleanup_old_entries(&self) -> BoxedFuture<Result<usize, OutboxError>>;

    /// Aggregate counters.
    fn stats(&self) -> BoxedFuture<Result<OutboxStats, OutboxError>>;

    /// Store the raw event and its derived routing entries.
    fn ingest<'a>(&'a self, event: &'a Event) -> BoxedFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move {
            self.store_relay_list_event(event).await?;
            let record: RelayListRecord = RelayListRecord::from_event(event)?;
            self.store_routing_entries(&record).await
        })
    }

    /// Relays suitable for publishing the author's events.
    fn publish_relays<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Vec<RoutingEntry>, OutboxError>> {
        Box::pin(async move {
            let mut relays: Vec<RoutingEntry> = self.user_relays(public_key).await?;
            relays.retain(|entry| entry.permission.is_writable());
            Ok(relays)
        })
    }

    /// Relays suitable for reading the author's events.
    fn read_relays<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Vec<RoutingEntry>, OutboxError>> {
        Box::pin(async move {
            let mut relays: Vec<RoutingEntry> = self.user_relays(public_key).await?;
            relays.retain(|entry| entry.permission.is_readable());
            Ok(relays)
        })
    }
}
