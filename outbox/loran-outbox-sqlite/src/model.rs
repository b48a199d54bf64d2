use std::str::FromStr;

use loran_outbox::permission::RelayPermission;
use loran_outbox::{RelayListRecord, RoutingEntry};
use nostr::nips::nip65::RelayMetadata;
use nostr::{EventId, PublicKey, RelayUrl, Timestamp};
use rusqlite::Row;

use crate::error::Error;

pub(super) struct EventRow {
    event_id: Vec<u8>,
    public_key: Vec<u8>,
    created_at: i64,
    relays: String,
    stored_at: i64,
}

impl EventRow {
    pub(super) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            event_id: row.get("event_id")?,
            public_key: row.get("public_key")?,
            created_at: row.get("created_at")?,
            relays: row.get("relays")?,
            stored_at: row.get("stored_at")?,
        })
    }

    /// Decode the row; undecodable rows yield `None` and are skipped.
    pub(super) fn into_record(self) -> Result<Option<RelayListRecord>, Error> {
        let (public_key, event_id) = match (
            PublicKey::from_slice(&self.public_key),
            EventId::from_slice(&self.event_id),
        ) {
            (Ok(public_key), Ok(event_id)) => (public_key, event_id),
            _ => return Ok(None),
        };

        let raw: Vec<(String, Option<String>)> = serde_json::from_str(&self.relays)?;

        let mut relays: Vec<(RelayUrl, Option<RelayMetadata>)> = Vec::with_capacity(raw.len());
        for (url, marker) in raw.into_iter() {
            let url: RelayUrl = match RelayUrl::parse(&url) {
                Ok(url) => url,
                Err(..) => continue,
            };
            let marker: Option<RelayMetadata> = match marker {
                Some(marker) => match RelayMetadata::from_str(&marker) {
                    Ok(marker) => Some(marker),
                    Err(..) => continue,
                },
                None => None,
            };
            relays.push((url, marker));
        }

        Ok(Some(RelayListRecord {
            public_key,
            created_at: Timestamp::from_secs(self.created_at as u64),
            relays,
            event_id,
            stored_at: Timestamp::from_secs(self.stored_at as u64),
        }))
    }
}

pub(super) struct EntryRow {
    public_key: Vec<u8>,
    relay_url: String,
    permission: u8,
    last_seen: i64,
    event_id: Vec<u8>,
}

impl EntryRow {
    pub(super) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            public_key: row.get("public_key")?,
            relay_url: row.get("relay_url")?,
            permission: row.get("permission")?,
            last_seen: row.get("last_seen")?,
            event_id: row.get("event_id")?,
        })
    }

    /// Decode the row; undecodable rows yield `None` and are skipped.
    pub(super) fn into_entry(self) -> Option<RoutingEntry> {
        let public_key: PublicKey = PublicKey::from_slice(&self.public_key).ok()?;
        let event_id: EventId = EventId::from_slice(&self.event_id).ok()?;
        let relay_url: RelayUrl = RelayUrl::parse(&self.relay_url).ok()?;
        let permission: RelayPermission = RelayPermission::from_u8(self.permission)?;

        Some(RoutingEntry {
            public_key,
            relay_url,
            permission,
            last_seen: Timestamp::from_secs(self.last_seen as u64),
            event_id,
        })
    }
}
