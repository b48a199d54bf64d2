//! Outbox store test suite

pub extern crate tokio;

/// Macro to generate common outbox store tests.
#[macro_export]
macro_rules! outbox_unit_tests {
    ($store_type:ty, $setup_fn:expr) => {
        use std::collections::BTreeSet;
        use std::time::Duration;

        use loran_outbox::prelude::*;
        use nostr::nips::nip65::RelayMetadata;
        use nostr::prelude::*;

        use $crate::tokio;

        fn relay_list_event(
            keys: &Keys,
            relays: Vec<(&str, Option<RelayMetadata>)>,
            created_at: Timestamp,
        ) -> Event {
            let tags = relays.into_iter().map(|(url, marker)| {
                Tag::relay_metadata(RelayUrl::parse(url).unwrap(), marker)
            });

            EventBuilder::new(Kind::RelayList, "")
                .tags(tags)
                .custom_created_at(created_at)
                .sign_with_keys(keys)
                .unwrap()
        }

        #[tokio::test]
        async fn test_latest_relay_list_wins_by_created_at() {
            let store: $store_type = $setup_fn().await;

            let keys = Keys::generate();
            let older = relay_list_event(
                &keys,
                vec![("wss://old.relay.io", None)],
                Timestamp::from_secs(100),
            );
            let newer = relay_list_event(
                &keys,
                vec![("wss://new.relay.io", None)],
                Timestamp::from_secs(200),
            );

            // Newer stored first: storage order must not matter
            store.store_relay_list_event(&newer).await.unwrap();
            store.store_relay_list_event(&older).await.unwrap();

            let latest = store
                .latest_relay_list(&keys.public_key)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(latest.event_id, newer.id);
            assert_eq!(latest.created_at, Timestamp::from_secs(200));

            // And the other way around, with a different author
            let keys = Keys::generate();
            let older = relay_list_event(
                &keys,
                vec![("wss://old.relay.io", None)],
                Timestamp::from_secs(100),
            );
            let newer = relay_list_event(
                &keys,
                vec![("wss://new.relay.io", None)],
                Timestamp::from_secs(200),
            );

            store.store_relay_list_event(&older).await.unwrap();
            store.store_relay_list_event(&newer).await.unwrap();

            let latest = store
                .latest_relay_list(&keys.public_key)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(latest.event_id, newer.id);
        }

        #[tokio::test]
        async fn test_missing_author_yields_none() {
            let store: $store_type = $setup_fn().await;

            let keys = Keys::generate();
            let latest = store.latest_relay_list(&keys.public_key).await.unwrap();
            assert!(latest.is_none());

            let relays = store.user_relays(&keys.public_key).await.unwrap();
            assert!(relays.is_empty());
        }

        #[tokio::test]
        async fn test_url_normalization_idempotence() {
            let store: $store_type = $setup_fn().await;

            // Same relay declared twice, differing only by case and
            // trailing slash: a single routing entry must be stored.
            let json = r#"{"id":"7b5e1f07a8b3444b10aab7f560b1ed1908aee5f809ed0f0b25dab2e38d1d62a1","pubkey":"aa4fc8665f5696e33db7e1a572e3b0f5b3d615837b0f362dcb1c8068b098c7b4","created_at":1704644581,"kind":10002,"tags":[["r","wss://Relay.Example.COM/"],["r","wss://relay.example.com"]],"content":"","sig":"ed73a8a4e7c26cd797a7b875c634d9ecb6958c57733305fed23b978109d0411d21b3e182cb67c8ad750884e30ca383b509382ae6187b36e76ee76e6a142c4284"}"#;
            let event = Event::from_json(json).unwrap();

            store.ingest(&event).await.unwrap();

            let relays = store.user_relays(&event.pubkey).await.unwrap();
            assert_eq!(relays.len(), 1);
            assert_eq!(
                relays[0].relay_url.as_str_without_trailing_slash(),
                "wss://relay.example.com"
            );
        }

        #[tokio::test]
        async fn test_routing_entries_idempotent() {
            let store: $store_type = $setup_fn().await;

            let keys = Keys::generate();
            let event = relay_list_event(
                &keys,
                vec![
                    ("wss://read.relay.io", Some(RelayMetadata::Read)),
                    ("wss://write.relay.io", Some(RelayMetadata::Write)),
                    ("wss://both.relay.io", None),
                ],
                Timestamp::from_secs(500),
            );
            let record = RelayListRecord::from_event(&event).unwrap();

            store.store_relay_list_event(&event).await.unwrap();
            store.store_routing_entries(&record).await.unwrap();
            store.store_routing_entries(&record).await.unwrap();

            let relays = store.user_relays(&keys.public_key).await.unwrap();
            assert_eq!(relays.len(), 3);
        }

        #[tokio::test]
        async fn test_marker_permissions_and_projections() {
            let store: $store_type = $setup_fn().await;

            let keys = Keys::generate();
            let event = relay_list_event(
                &keys,
                vec![
                    ("wss://read.relay.io", Some(RelayMetadata::Read)),
                    ("wss://write.relay.io", Some(RelayMetadata::Write)),
                    ("wss://both.relay.io", None),
                ],
                Timestamp::from_secs(500),
            );

            store.ingest(&event).await.unwrap();

            let relays = store.user_relays(&keys.public_key).await.unwrap();
            let permission_of = |url: &str| {
                relays
                    .iter()
                    .find(|e| e.relay_url.as_str_without_trailing_slash() == url)
                    .map(|e| e.permission)
            };

            assert_eq!(
                permission_of("wss://read.relay.io"),
                Some(RelayPermission::Read)
            );
            assert_eq!(
                permission_of("wss://write.relay.io"),
                Some(RelayPermission::Write)
            );
            assert_eq!(
                permission_of("wss://both.relay.io"),
                Some(RelayPermission::ReadWrite)
            );

            let publish = store.publish_relays(&keys.public_key).await.unwrap();
            assert_eq!(publish.len(), 2);
            assert!(publish.iter().all(|e| e.permission.is_writable()));

            let read = store.read_relays(&keys.public_key).await.unwrap();
            assert_eq!(read.len(), 2);
            assert!(read.iter().all(|e| e.permission.is_readable()));
        }

        #[tokio::test]
        async fn test_relay_lists_batch_omits_missing() {
            let store: $store_type = $setup_fn().await;

            let with_record = Keys::generate();
            let without_record = Keys::generate();

            let event = relay_list_event(
                &with_record,
                vec![("wss://one.relay.io", None)],
                Timestamp::from_secs(500),
            );
            store.store_relay_list_event(&event).await.unwrap();

            let public_keys: BTreeSet<PublicKey> =
                [with_record.public_key, without_record.public_key]
                    .into_iter()
                    .collect();

            let records = store.relay_lists(&public_keys).await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].public_key, with_record.public_key);
        }

        #[tokio::test]
        async fn test_contacts_with_relays() {
            let store: $store_type = $setup_fn().await;

            let with_relays = Keys::generate();
            let without_relays = Keys::generate();

            let event = relay_list_event(
                &with_relays,
                vec![("wss://one.relay.io", None)],
                Timestamp::from_secs(500),
            );
            store.ingest(&event).await.unwrap();

            let candidates: BTreeSet<PublicKey> =
                [with_relays.public_key, without_relays.public_key]
                    .into_iter()
                    .collect();

            let contacts = store.contacts_with_relays(&candidates).await.unwrap();
            assert_eq!(contacts.len(), 1);
            assert!(contacts.contains(&with_relays.public_key));
        }

        #[tokio::test]
        async fn test_cleanup_old_entries() {
            let store: $store_type = $setup_fn().await;

            let now = Timestamp::now();
            let stale = Keys::generate();
            let fresh = Keys::generate();

            let stale_event = relay_list_event(
                &stale,
                vec![("wss://stale.relay.io", None)],
                now - Duration::from_secs(40 * 24 * 60 * 60),
            );
            let fresh_event = relay_list_event(
                &fresh,
                vec![("wss://fresh.relay.io", None)],
                now - Duration::from_secs(24 * 60 * 60),
            );

            store.ingest(&stale_event).await.unwrap();
            store.ingest(&fresh_event).await.unwrap();

            let removed = store.cleanup_old_entries().await.unwrap();
            assert_eq!(removed, 1);

            let stale_relays = store.user_relays(&stale.public_key).await.unwrap();
            assert!(stale_relays.is_empty());

            let fresh_relays = store.user_relays(&fresh.public_key).await.unwrap();
            assert_eq!(fresh_relays.len(), 1);

            // Raw records are never touched by cleanup
            let latest = store.latest_relay_list(&stale.public_key).await.unwrap();
            assert!(latest.is_some());
        }

        #[tokio::test]
        async fn test_stats() {
            let store: $store_type = $setup_fn().await;

            let author1 = Keys::generate();
            let author2 = Keys::generate();

            store
                .ingest(&relay_list_event(
                    &author1,
                    vec![("wss://a.relay.io", None), ("wss://b.relay.io", None)],
                    Timestamp::from_secs(100),
                ))
                .await
                .unwrap();
            store
                .ingest(&relay_list_event(
                    &author1,
                    vec![("wss://b.relay.io", None), ("wss://c.relay.io", None)],
                    Timestamp::from_secs(200),
                ))
                .await
                .unwrap();
            store
                .ingest(&relay_list_event(
                    &author2,
                    vec![("wss://a.relay.io", None)],
                    Timestamp::from_secs(300),
                ))
                .await
                .unwrap();

            let stats = store.stats().await.unwrap();
            assert_eq!(stats.total_events, 3);
            assert_eq!(stats.total_routing_entries, 4);
            assert_eq!(stats.unique_users, 2);
            assert_eq!(stats.unique_relays, 3);
        }

        #[tokio::test]
        async fn test_rejects_non_relay_list_kinds() {
            let store: $store_type = $setup_fn().await;

            let keys = Keys::generate();
            let event = EventBuilder::text_note("not a relay list")
                .sign_with_keys(&keys)
                .unwrap();

            let res = store.store_relay_list_event(&event).await;
            assert!(matches!(res, Err(OutboxError::NotRelayList { .. })));

            let res = store.ingest(&event).await;
            assert!(matches!(res, Err(OutboxError::NotRelayList { .. })));
        }

        #[tokio::test]
        async fn test_ingest_writes_both_phases() {
            let store: $store_type = $setup_fn().await;

            let keys = Keys::generate();
            let event = relay_list_event(
                &keys,
                vec![("wss://one.relay.io", None)],
                Timestamp::from_secs(500),
            );

            store.ingest(&event).await.unwrap();

            assert!(store
                .latest_relay_list(&keys.public_key)
                .await
                .unwrap()
                .is_some());
            assert_eq!(store.user_relays(&keys.public_key).await.unwrap().len(), 1);
        }
    };
}
