// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Event router
//!
//! Picks the relays an outgoing event is published to: the author's own
//! declared write relays first, the configured write surface otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loran_outbox::permission::RelayPermission;
use nostr::{Event, Kind, RelayUrl};

use crate::cache::OutboxView;
use crate::config::{RelayConfig, RelayConfigResolver};

/// Kinds that indexer relays accept.
///
/// Indexer relays are special-purpose: they receive profile metadata,
/// relay lists and contact lists, never arbitrary content.
const INDEXER_KINDS: [Kind; 3] = [Kind::Metadata, Kind::RelayList, Kind::ContactList];

/// Event router.
#[derive(Debug)]
pub struct EventRouter {
    outbox: Arc<OutboxView>,
    resolver: Arc<RelayConfigResolver>,
    outbox_enabled: Arc<AtomicBool>,
}

impl EventRouter {
    /// Construct a router.
    pub fn new(
        outbox: Arc<OutboxView>,
        resolver: Arc<RelayConfigResolver>,
        outbox_enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            outbox,
            resolver,
            outbox_enabled,
        }
    }

    /// Compute the publish targets of an event.
    ///
    /// An empty result means the event has nowhere to go: no outbox data
    /// and no configured write relay.
    pub async fn plan(&self, event: &Event) -> Vec<RelayUrl> {
        if self.outbox_enabled.load(Ordering::Relaxed) {
            // The latest record alone decides: older declarations must
            // not keep receiving publishes
            match self.outbox.store().latest_relay_list(&event.pubkey).await {
                Ok(Some(record)) => {
                    let mut relays: Vec<RelayUrl> = Vec::new();
                    for url in record.write_relays() {
                        if !relays.contains(url) {
                            relays.push(url.clone());
                        }
                    }

                    if !relays.is_empty() {
                        tracing::debug!(
                            relays = relays.len(),
                            "Publishing to declared write relays."
                        );
                        return relays;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Outbox lookup failed, publishing to configured relays.");
                }
            }
        }

        let config: RelayConfig = self.resolver.resolve_current().await;
        let indexer_kind: bool = INDEXER_KINDS.contains(&event.kind);

        config
            .relay_urls
            .iter()
            .filter(|url| match config.permissions.get(url) {
                Some(permission) => {
                    permission.is_writable()
                        || (indexer_kind && *permission == RelayPermission::Indexer)
                }
                None => false,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use loran_outbox::permission::RelayPermission;
    use loran_outbox::OutboxStore;
    use loran_outbox_memory::OutboxMemory;
    use nostr::nips::nip65::RelayMetadata;
    use nostr::{EventBuilder, Keys, Tag, Timestamp};

    use super::*;
    use crate::config::MemoryConfigStore;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    struct Harness {
        store: Arc<OutboxMemory>,
        resolver: Arc<RelayConfigResolver>,
        outbox_enabled: Arc<AtomicBool>,
        router: EventRouter,
    }

    fn harness() -> Harness {
        let store = Arc::new(OutboxMemory::unbounded());
        let resolver = Arc::new(RelayConfigResolver::new(Arc::new(MemoryConfigStore::new())));
        let outbox_enabled = Arc::new(AtomicBool::new(true));

        let router = EventRouter::new(
            Arc::new(OutboxView::new(store.clone())),
            resolver.clone(),
            outbox_enabled.clone(),
        );

        Harness {
            store,
            resolver,
            outbox_enabled,
            router,
        }
    }

    async fn configure(harness: &Harness, relays: &[(&str, RelayPermission)]) {
        let mut config = RelayConfig::default();
        for (u, permission) in relays {
            config.insert(url(u), *permission);
        }
        harness.resolver.save(None, &config).await.unwrap();
    }

    async fn publish_relay_list(
        harness: &Harness,
        keys: &Keys,
        relays: &[(&str, Option<RelayMetadata>)],
        created_at: Timestamp,
    ) {
        let tags = relays
            .iter()
            .map(|(u, marker)| Tag::relay_metadata(url(u), *marker));
        let event = EventBuilder::new(Kind::RelayList, "")
            .tags(tags)
            .custom_created_at(created_at)
            .sign_with_keys(keys)
            .unwrap();
        harness.store.ingest(&event).await.unwrap();
    }

    fn note(keys: &Keys) -> Event {
        EventBuilder::text_note("hello").sign_with_keys(keys).unwrap()
    }

    #[tokio::test]
    async fn test_latest_declaration_wins() {
        let harness = harness();
        configure(&harness, &[("wss://fallback.relay.io", RelayPermission::ReadWrite)]).await;

        let keys = Keys::generate();
        publish_relay_list(
            &harness,
            &keys,
            &[("wss://a.com", Some(RelayMetadata::Write))],
            Timestamp::from_secs(100),
        )
        .await;
        publish_relay_list(
            &harness,
            &keys,
            &[("wss://b.com", Some(RelayMetadata::Write))],
            Timestamp::from_secs(200),
        )
        .await;

        let targets = harness.router.plan(&note(&keys)).await;
        assert_eq!(targets, vec![url("wss://b.com")]);
    }

    #[tokio::test]
    async fn test_read_only_declarations_never_receive_publishes() {
        let harness = harness();
        configure(&harness, &[("wss://fallback.relay.io", RelayPermission::ReadWrite)]).await;

        let keys = Keys::generate();
        publish_relay_list(
            &harness,
            &keys,
            &[("wss://inbox.relay.io", Some(RelayMetadata::Read))],
            Timestamp::from_secs(100),
        )
        .await;

        // Write set of the record is empty: fall back to configuration
        let targets = harness.router.plan(&note(&keys)).await;
        assert_eq!(targets, vec![url("wss://fallback.relay.io")]);
    }

    #[tokio::test]
    async fn test_fallback_excludes_indexers_for_content_kinds() {
        let harness = harness();
        configure(
            &harness,
            &[
                ("wss://x.com", RelayPermission::ReadWrite),
                ("wss://y.com", RelayPermission::Indexer),
            ],
        )
        .await;

        let keys = Keys::generate();
        let targets = harness.router.plan(&note(&keys)).await;
        assert_eq!(targets, vec![url("wss://x.com")]);
    }

    #[tokio::test]
    async fn test_fallback_includes_indexers_for_indexer_kinds() {
        let harness = harness();
        configure(
            &harness,
            &[
                ("wss://x.com", RelayPermission::ReadWrite),
                ("wss://y.com", RelayPermission::Indexer),
            ],
        )
        .await;

        let keys = Keys::generate();
        for kind in [Kind::Metadata, Kind::RelayList, Kind::ContactList] {
            let event = EventBuilder::new(kind, "").sign_with_keys(&keys).unwrap();
            let targets = harness.router.plan(&event).await;
            assert!(targets.contains(&url("wss://x.com")), "kind {kind}");
            assert!(targets.contains(&url("wss://y.com")), "kind {kind}");
        }
    }

    #[tokio::test]
    async fn test_read_permission_relays_excluded_from_fallback() {
        let harness = harness();
        configure(
            &harness,
            &[
                ("wss://read.relay.io", RelayPermission::Read),
                ("wss://write.relay.io", RelayPermission::Write),
            ],
        )
        .await;

        let keys = Keys::generate();
        let targets = harness.router.plan(&note(&keys)).await;
        assert_eq!(targets, vec![url("wss://write.relay.io")]);
    }

    #[tokio::test]
    async fn test_outbox_disabled_uses_configuration() {
        let harness = harness();
        configure(&harness, &[("wss://conf.relay.io", RelayPermission::ReadWrite)]).await;

        let keys = Keys::generate();
        publish_relay_list(
            &harness,
            &keys,
            &[("wss://declared.relay.io", Some(RelayMetadata::Write))],
            Timestamp::from_secs(100),
        )
        .await;

        harness.outbox_enabled.store(false, Ordering::Relaxed);

        let targets = harness.router.plan(&note(&keys)).await;
        assert_eq!(targets, vec![url("wss://conf.relay.io")]);
    }

    #[tokio::test]
    async fn test_no_relays_at_all_yields_empty_targets() {
        let harness = harness();
        configure(&harness, &[]).await;

        let keys = Keys::generate();
        let targets = harness.router.plan(&note(&keys)).await;
        assert!(targets.is_empty());
    }

    #[tokio::test]
    async fn test_unmarked_declarations_receive_publishes() {
        let harness = harness();
        configure(&harness, &[("wss://fallback.relay.io", RelayPermission::ReadWrite)]).await;

        let keys = Keys::generate();
        publish_relay_list(
            &harness,
            &keys,
            &[
                ("wss://both.relay.io", None),
                ("wss://read.relay.io", Some(RelayMetadata::Read)),
            ],
            Timestamp::from_secs(100),
        )
        .await;

        let targets = harness.router.plan(&note(&keys)).await;
        assert_eq!(targets, vec![url("wss://both.relay.io")]);
    }
}
