//! Outbox SQLite store.

use std::collections::BTreeSet;
use std::path::Path;

use loran_outbox::error::OutboxError;
use loran_outbox::{
    OutboxStats, OutboxStore, RelayListRecord, RoutingEntry, ROUTING_ENTRY_TTL,
};
use nostr::nips::nip65::RelayMetadata;
use nostr::util::BoxedFuture;
use nostr::{Event, PublicKey, RelayUrl, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::Error;
use crate::migration;
use crate::model::{EntryRow, EventRow};
use crate::pool::Pool;

const LATEST_QUERY: &str = r#"
SELECT event_id, public_key, created_at, relays, stored_at
FROM outbox_events
WHERE public_key = ?1
ORDER BY created_at DESC, event_id DESC
LIMIT 1
"#;

const UPSERT_ENTRY: &str = r#"
INSERT INTO routing_table (public_key, relay_url, permission, last_seen, event_id)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (public_key, relay_url)
DO UPDATE SET
    permission = excluded.permission,
    last_seen = excluded.last_seen,
    event_id = excluded.event_id
WHERE excluded.last_seen >= routing_table.last_seen
"#;

/// Outbox SQLite store.
#[derive(Debug, Clone)]
pub struct OutboxSqlite {
    pool: Pool,
}

/// Flattened row form of a routing entry, movable into `interact` closures.
type EntryParams = (Vec<u8>, String, u8, i64, Vec<u8>);

impl OutboxSqlite {
    /// Open a persistent database
    pub async fn open<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let pool: Pool = Pool::open_with_path(path.as_ref().to_path_buf()).await?;
        Self::from_pool(pool).await
    }

    /// Open an in-memory database
    pub async fn open_in_memory() -> Result<Self, Error> {
        let pool: Pool = Pool::open_in_memory()?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: Pool) -> Result<Self, Error> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), Error> {
        self.pool
            .interact(|conn| {
                let tx = conn.transaction()?;
                migration::run(&tx)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn store_event(&self, record: &RelayListRecord) -> Result<(), Error> {
        let event_id: Vec<u8> = record.event_id.as_bytes().to_vec();
        let public_key: Vec<u8> = record.public_key.as_bytes().to_vec();
        let created_at: i64 = record.created_at.as_secs() as i64;
        let relays: String = relays_to_json(&record.relays)?;
        let stored_at: i64 = record.stored_at.as_secs() as i64;

        self.pool
            .interact(move |conn| {
                insert_event_row(conn, &event_id, &public_key, created_at, &relays, stored_at)?;
                Ok(())
            })
            .await
    }

    async fn latest(&self, public_key: &PublicKey) -> Result<Option<RelayListRecord>, Error> {
        let public_key: Vec<u8> = public_key.as_bytes().to_vec();

        let row: Option<EventRow> = self
            .pool
            .interact(move |conn| {
                Ok(conn
                    .query_row(LATEST_QUERY, [&public_key], EventRow::from_row)
                    .optional()?)
            })
            .await?;

        match row {
            Some(row) => row.into_record(),
            None => Ok(None),
        }
    }

    async fn latest_batch(
        &self,
        public_keys: &BTreeSet<PublicKey>,
    ) -> Result<Vec<RelayListRecord>, Error> {
        let keys: Vec<Vec<u8>> = public_keys
            .iter()
            .map(|pk| pk.as_bytes().to_vec())
            .collect();

        let rows: Vec<EventRow> = self
            .pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(LATEST_QUERY)?;

                let mut rows: Vec<EventRow> = Vec::with_capacity(keys.len());
                for key in keys.iter() {
                    if let Some(row) = stmt.query_row([key], EventRow::from_row).optional()? {
                        rows.push(row);
                    }
                }
                Ok(rows)
            })
            .await?;

        let mut records: Vec<RelayListRecord> = Vec::with_capacity(rows.len());
        for row in rows.into_iter() {
            if let Some(record) = row.into_record()? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn upsert_entries(&self, record: &RelayListRecord) -> Result<(), Error> {
        let entries: Vec<EntryParams> = entry_params(record);

        self.pool
            .interact(move |conn| {
                let tx = conn.transaction()?;
                upsert_entry_rows(&tx, &entries)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn entries_of(&self, public_key: &PublicKey) -> Result<Vec<RoutingEntry>, Error> {
        let public_key: Vec<u8> = public_key.as_bytes().to_vec();

        let rows: Vec<EntryRow> = self
            .pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT public_key, relay_url, permission, last_seen, event_id
                    FROM routing_table
                    WHERE public_key = ?1
                    ORDER BY last_seen DESC, relay_url ASC
                    "#,
                )?;

                let rows = stmt
                    .query_map([&public_key], EntryRow::from_row)?
                    .collect::<Result<Vec<EntryRow>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows.into_iter().filter_map(EntryRow::into_entry).collect())
    }

    async fn contacts(
        &self,
        public_keys: &BTreeSet<PublicKey>,
    ) -> Result<BTreeSet<PublicKey>, Error> {
        let keys: Vec<Vec<u8>> = public_keys
            .iter()
            .map(|pk| pk.as_bytes().to_vec())
            .collect();

        let found: Vec<Vec<u8>> = self
            .pool
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT EXISTS(SELECT 1 FROM routing_table WHERE public_key = ?1)",
                )?;

                let mut found: Vec<Vec<u8>> = Vec::with_capacity(keys.len());
                for key in keys.into_iter() {
                    let exists: bool = stmt.query_row([&key], |row| row.get(0))?;
                    if exists {
                        found.push(key);
                    }
                }
                Ok(found)
            })
            .await?;

        Ok(found
            .into_iter()
            .filter_map(|key| PublicKey::from_slice(&key).ok())
            .collect())
    }

    async fn cleanup(&self) -> Result<usize, Error> {
        let cutoff: i64 = (Timestamp::now() - ROUTING_ENTRY_TTL).as_secs() as i64;

        self.pool
            .interact(move |conn| {
                let removed: usize =
                    conn.execute("DELETE FROM routing_table WHERE last_seen < ?1", [cutoff])?;
                Ok(removed)
            })
            .await
    }

    async fn aggregate(&self) -> Result<OutboxStats, Error> {
        self.pool
            .interact(|conn| {
                let total_events: usize = conn
                    .query_row("SELECT COUNT(*) FROM outbox_events", [], |row| {
                        row.get::<_, i64>(0)
                    })? as usize;
                let total_routing_entries: usize = conn
                    .query_row("SELECT COUNT(*) FROM routing_table", [], |row| {
                        row.get::<_, i64>(0)
                    })? as usize;
                let unique_users: usize = conn.query_row(
                    "SELECT COUNT(DISTINCT public_key) FROM routing_table",
                    [],
                    |row| row.get::<_, i64>(0),
                )? as usize;
                let unique_relays: usize = conn.query_row(
                    "SELECT COUNT(DISTINCT relay_url) FROM routing_table",
                    [],
                    |row| row.get::<_, i64>(0),
                )? as usize;

                Ok(OutboxStats {
                    total_events,
                    total_routing_entries,
                    unique_users,
                    unique_relays,
                })
            })
            .await
    }

    /// Both phases of the write inside one transaction.
    async fn ingest_event(&self, record: &RelayListRecord) -> Result<(), Error> {
        let event_id: Vec<u8> = record.event_id.as_bytes().to_vec();
        let public_key: Vec<u8> = record.public_key.as_bytes().to_vec();
        let created_at: i64 = record.created_at.as_secs() as i64;
        let relays: String = relays_to_json(&record.relays)?;
        let stored_at: i64 = record.stored_at.as_secs() as i64;
        let entries: Vec<EntryParams> = entry_params(record);

        self.pool
            .interact(move |conn| {
                let tx = conn.transaction()?;
                insert_event_row(&tx, &event_id, &public_key, created_at, &relays, stored_at)?;
                upsert_entry_rows(&tx, &entries)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}

fn relays_to_json(relays: &[(RelayUrl, Option<RelayMetadata>)]) -> Result<String, Error> {
    let raw: Vec<(String, Option<String>)> = relays
        .iter()
        .map(|(url, marker)| {
            (
                url.as_str_without_trailing_slash().to_string(),
                marker.map(|m| m.to_string()),
            )
        })
        .collect();
    Ok(serde_json::to_string(&raw)?)
}

fn entry_params(record: &RelayListRecord) -> Vec<EntryParams> {
    RoutingEntry::derive(record)
        .map(|entry| {
            (
                entry.public_key.as_bytes().to_vec(),
                entry
                    .relay_url
                    .as_str_without_trailing_slash()
                    .to_string(),
                entry.permission.as_u8(),
                entry.last_seen.as_secs() as i64,
                entry.event_id.as_bytes().to_vec(),
            )
        })
        .collect()
}

fn insert_event_row(
    conn: &Connection,
    event_id: &[u8],
    public_key: &[u8],
    created_at: i64,
    relays: &str,
    stored_at: i64,
) -> Result<(), Error> {
    conn.execute(
        r#"
        INSERT INTO outbox_events (event_id, public_key, created_at, relays, stored_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (event_id) DO NOTHING
        "#,
        params![event_id, public_key, created_at, relays, stored_at],
    )?;
    Ok(())
}

fn upsert_entry_rows(tx: &Transaction<'_>, entries: &[EntryParams]) -> Result<(), Error> {
    let mut stmt = tx.prepare(UPSERT_ENTRY)?;

    for (public_key, relay_url, permission, last_seen, event_id) in entries.iter() {
        stmt.execute(params![public_key, relay_url, permission, last_seen, event_id])?;
    }

    Ok(())
}

impl OutboxStore for OutboxSqlite {
    fn store_relay_list_event<'a>(
        &'a self,
        event: &'a Event,
    ) -> BoxedFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move {
            let record: RelayListRecord = RelayListRecord::from_event(event)?;
            self.store_event(&record)
                .await
                .map_err(OutboxError::backend)
        })
    }

    fn latest_relay_list<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Option<RelayListRecord>, OutboxError>> {
        Box::pin(async move { self.latest(public_key).await.map_err(OutboxError::backend) })
    }

    fn relay_lists<'a>(
        &'a self,
        public_keys: &'a BTreeSet<PublicKey>,
    ) -> BoxedFuture<'a, Result<Vec<RelayListRecord>, OutboxError>> {
        Box::pin(async move {
            self.latest_batch(public_keys)
                .await
                .map_err(OutboxError::backend)
        })
    }

    fn store_routing_entries<'a>(
        &'a self,
        record: &'a RelayListRecord,
    ) -> BoxedFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move {
            self.upsert_entries(record)
                .await
                .map_err(OutboxError::backend)
        })
    }

    fn user_relays<'a>(
        &'a self,
        public_key: &'a PublicKey,
    ) -> BoxedFuture<'a, Result<Vec<RoutingEntry>, OutboxError>> {
        Box::pin(async move {
            self.entries_of(public_key)
                .await
                .map_err(OutboxError::backend)
        })
    }

    fn contacts_with_relays<'a>(
        &'a self,
        public_keys: &'a BTreeSet<PublicKey>,
    ) -> BoxedFuture<'a, Result<BTreeSet<PublicKey>, OutboxError>> {
        Box::pin(async move {
            self.contacts(public_keys)
                .await
                .map_err(OutboxError::backend)
        })
    }

    fn cleanup_old_entries(&self) -> BoxedFuture<Result<usize, OutboxError>> {
        Box::pin(async move { self.cleanup().await.map_err(OutboxError::backend) })
    }

    fn stats(&self) -> BoxedFuture<Result<OutboxStats, OutboxError>> {
        Box::pin(async move { self.aggregate().await.map_err(OutboxError::backend) })
    }

    fn ingest<'a>(&'a self, event: &'a Event) -> BoxedFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move {
            let record: RelayListRecord = RelayListRecord::from_event(event)?;
            self.ingest_event(&record)
                .await
                .map_err(OutboxError::backend)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Deref;

    use loran_outbox_test_suite::outbox_unit_tests;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug)]
    struct OutboxSqliteUnitTest {
        store: OutboxSqlite,
        _temp_dir: TempDir,
    }

    impl Deref for OutboxSqliteUnitTest {
        type Target = OutboxSqlite;

        fn deref(&self) -> &Self::Target {
            &self.store
        }
    }

    async fn setup() -> OutboxSqliteUnitTest {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.db");

        let store = OutboxSqlite::open(path).await.unwrap();

        OutboxSqliteUnitTest {
            store,
            _temp_dir: temp_dir,
        }
    }

    outbox_unit_tests!(OutboxSqliteUnitTest, setup);
}
