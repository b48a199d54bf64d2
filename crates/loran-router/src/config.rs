// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Relay configuration resolver
//!
//! Merges persisted per-user relay preferences with session-scoped
//! defaults discovered from the user's own relay list, on top of global
//! hardcoded defaults for brand-new users.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use loran_outbox::permission::RelayPermission;
use loran_outbox::RelayListRecord;
use nostr::util::BoxedFuture;
use nostr::{PublicKey, RelayUrl};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RELAYS, GLOBAL_CONFIG_KEY};

/// Configuration store error
#[derive(Debug)]
pub enum ConfigError {
    /// An error happened in the underlying key-value store.
    Backend(Box<dyn std::error::Error + Send + Sync>),
    /// JSON (de)serialization error
    Json(serde_json::Error),
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => fmt::Display::fmt(e, f),
            Self::Json(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl ConfigError {
    /// Create a new backend error
    #[inline]
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}

/// Abstract durable key-value configuration store.
pub trait ConfigStore: Any + Debug + Send + Sync {
    /// Get a value.
    fn get<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<String>, ConfigError>>;

    /// Set a value.
    fn set<'a>(&'a self, key: &'a str, value: &'a str)
        -> BoxedFuture<'a, Result<(), ConfigError>>;

    /// Remove a value.
    fn remove<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<(), ConfigError>>;
}

/// In-memory configuration store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<Option<String>, ConfigError>> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(inner.get(key).cloned())
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> BoxedFuture<'a, Result<(), ConfigError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxedFuture<'a, Result<(), ConfigError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.remove(key);
            Ok(())
        })
    }
}

/// Signing capability of the session, negotiated once at session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignerStatus {
    /// A signer is available
    Available,
    /// View-only session, nothing can be signed
    #[default]
    Unavailable,
}

/// Resolved relay configuration of the local user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConfig {
    /// Configured relay URLs, in configuration order
    pub relay_urls: Vec<RelayUrl>,
    /// Permission per relay URL
    pub permissions: HashMap<RelayUrl, RelayPermission>,
}

impl RelayConfig {
    /// Check if a relay is configured.
    #[inline]
    pub fn contains(&self, url: &RelayUrl) -> bool {
        self.permissions.contains_key(url)
    }

    /// Add a relay; an already configured relay keeps its permission.
    pub fn insert(&mut self, url: RelayUrl, permission: RelayPermission) {
        if !self.contains(&url) {
            self.relay_urls.push(url.clone());
            self.permissions.insert(url, permission);
        }
    }

    /// Add or update a relay permission.
    pub fn upsert(&mut self, url: RelayUrl, permission: RelayPermission) {
        if !self.contains(&url) {
            self.relay_urls.push(url.clone());
        }
        self.permissions.insert(url, permission);
    }

    /// Relays with a readable permission, in configuration order.
    pub fn readable_relays(&self) -> Vec<RelayUrl> {
        self.filter_relays(RelayPermission::is_readable)
    }

    /// Relays with a writable permission, in configuration order.
    pub fn writable_relays(&self) -> Vec<RelayUrl> {
        self.filter_relays(RelayPermission::is_writable)
    }

    fn filter_relays<F>(&self, f: F) -> Vec<RelayUrl>
    where
        F: Fn(&RelayPermission) -> bool,
    {
        self.relay_urls
            .iter()
            .filter(|url| self.permissions.get(url).map(&f).unwrap_or(false))
            .cloned()
            .collect()
    }

    fn global_defaults() -> Self {
        let mut config = Self::default();
        for (url, permission) in DEFAULT_RELAYS.iter() {
            if let Ok(url) = RelayUrl::parse(url) {
                config.insert(url, *permission);
            }
        }
        config
    }
}

/// Persisted JSON form of [`RelayConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRelayConfig {
    relay_urls: Vec<String>,
    permissions: BTreeMap<String, String>,
}

impl From<&RelayConfig> for PersistedRelayConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            relay_urls: config
                .relay_urls
                .iter()
                .map(|url| url.as_str_without_trailing_slash().to_string())
                .collect(),
            permissions: config
                .permissions
                .iter()
                .map(|(url, permission)| {
                    (
                        url.as_str_without_trailing_slash().to_string(),
                        permission.to_string(),
                    )
                })
                .collect(),
        }
    }
}

impl PersistedRelayConfig {
    /// Convert to the runtime form. Entries that fail to parse are
    /// dropped, not retried; they never abort the surrounding resolve.
    fn into_config(self) -> RelayConfig {
        let mut config = RelayConfig::default();

        for url in self.relay_urls.into_iter() {
            let parsed: RelayUrl = match RelayUrl::parse(&url) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Dropping invalid configured relay.");
                    continue;
                }
            };

            let permission: RelayPermission = match self
                .permissions
                .get(&url)
                .map(|raw| RelayPermission::from_str(raw))
            {
                Some(Ok(permission)) => permission,
                Some(Err(..)) => {
                    tracing::warn!(url = %url, "Dropping relay with invalid permission.");
                    continue;
                }
                None => RelayPermission::ReadWrite,
            };

            config.insert(parsed, permission);
        }

        config
    }
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    public_key: Option<PublicKey>,
    defaults: Vec<(RelayUrl, RelayPermission)>,
}

#[derive(Debug)]
struct Snapshot {
    fingerprint: String,
    config: RelayConfig,
}

/// Relay configuration resolver.
#[derive(Debug)]
pub struct RelayConfigResolver {
    store: Arc<dyn ConfigStore>,
    session: Mutex<SessionState>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl RelayConfigResolver {
    /// Construct a resolver on top of a configuration store.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            session: Mutex::new(SessionState::default()),
            snapshot: Mutex::new(None),
        }
    }

    /// Set the public key of the active session.
    pub fn set_session_public_key(&self, public_key: Option<PublicKey>) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.public_key = public_key;
    }

    /// Public key of the active session.
    pub fn session_public_key(&self) -> Option<PublicKey> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.public_key
    }

    /// Derive session-scoped relay defaults from the user's own relay
    /// list, once per login.
    ///
    /// A view-only session gets no write surface: every derived
    /// permission collapses to read. Session defaults are never
    /// persisted.
    pub fn set_session_defaults(&self, record: &RelayListRecord, signer: SignerStatus) {
        let mut defaults: Vec<(RelayUrl, RelayPermission)> = Vec::with_capacity(record.relays.len());

        for (url, marker) in record.relays.iter() {
            let permission: RelayPermission = match signer {
                SignerStatus::Available => RelayPermission::from_marker(marker.as_ref()),
                SignerStatus::Unavailable => RelayPermission::Read,
            };

            if !defaults.iter().any(|(existing, _)| existing == url) {
                defaults.push((url.clone(), permission));
            }
        }

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.defaults = defaults;
    }

    /// Clear the session state on sign-out.
    pub fn clear_session(&self) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.public_key = None;
        session.defaults.clear();
    }

    /// Resolve the configuration of the active session.
    pub async fn resolve_current(&self) -> RelayConfig {
        let public_key: Option<PublicKey> = self.session_public_key();
        self.resolve(public_key.as_ref()).await
    }

    /// Resolve the relay configuration of a user.
    ///
    /// Identical inputs short-circuit to the previous snapshot so
    /// downstream consumers can skip pool reconstruction.
    pub async fn resolve(&self, public_key: Option<&PublicKey>) -> RelayConfig {
        let key: String = config_key(public_key);

        let persisted: Option<String> = match self.store.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load relay configuration.");
                None
            }
        };

        let defaults: Vec<(RelayUrl, RelayPermission)> = {
            let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            session.defaults.clone()
        };

        let fingerprint: String = format!(
            "{key}|{}|{defaults:?}",
            persisted.as_deref().unwrap_or_default()
        );

        {
            let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = snapshot.as_ref() {
                if snapshot.fingerprint == fingerprint {
                    return snapshot.config.clone();
                }
            }
        }

        let mut config: RelayConfig = match persisted {
            Some(raw) => match serde_json::from_str::<PersistedRelayConfig>(&raw) {
                Ok(persisted) => persisted.into_config(),
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed relay configuration, using defaults.");
                    RelayConfig::global_defaults()
                }
            },
            None => RelayConfig::global_defaults(),
        };

        // Session defaults never override an explicitly configured relay
        for (url, permission) in defaults.into_iter() {
            config.insert(url, permission);
        }

        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        *snapshot = Some(Snapshot {
            fingerprint,
            config: config.clone(),
        });

        config
    }

    /// Persist the configuration of a user.
    pub async fn save(
        &self,
        public_key: Option<&PublicKey>,
        config: &RelayConfig,
    ) -> Result<(), ConfigError> {
        let key: String = config_key(public_key);
        let raw: String = serde_json::to_string(&PersistedRelayConfig::from(config))?;
        self.store.set(&key, &raw).await
    }

    /// Change the permission of one relay and persist the result.
    pub async fn set_relay_permission(
        &self,
        public_key: Option<&PublicKey>,
        url: RelayUrl,
        permission: RelayPermission,
    ) -> Result<RelayConfig, ConfigError> {
        let mut config: RelayConfig = self.resolve(public_key).await;
        config.upsert(url, permission);
        self.save(public_key, &config).await?;
        Ok(config)
    }
}

fn config_key(public_key: Option<&PublicKey>) -> String {
    match public_key {
        Some(public_key) => format!("relay-config-{}", public_key.to_hex()),
        None => GLOBAL_CONFIG_KEY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use nostr::{EventBuilder, Keys, Kind, Tag};
    use nostr::nips::nip65::RelayMetadata;

    use super::*;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    fn resolver() -> RelayConfigResolver {
        RelayConfigResolver::new(Arc::new(MemoryConfigStore::new()))
    }

    fn own_relay_list(keys: &Keys) -> RelayListRecord {
        let event = EventBuilder::new(Kind::RelayList, "")
            .tags([
                Tag::relay_metadata(url("wss://own-read.relay.io"), Some(RelayMetadata::Read)),
                Tag::relay_metadata(url("wss://own-write.relay.io"), Some(RelayMetadata::Write)),
            ])
            .sign_with_keys(keys)
            .unwrap();
        RelayListRecord::from_event(&event).unwrap()
    }

    #[tokio::test]
    async fn test_global_defaults_for_new_users() {
        let resolver = resolver();

        let config = resolver.resolve(None).await;
        assert!(!config.relay_urls.is_empty());
        assert!(config.contains(&url("wss://purplepag.es")));
        assert_eq!(
            config.permissions.get(&url("wss://purplepag.es")),
            Some(&RelayPermission::Indexer)
        );
    }

    #[tokio::test]
    async fn test_persisted_config_wins_over_defaults() {
        let resolver = resolver();
        let keys = Keys::generate();

        let mut config = RelayConfig::default();
        config.insert(url("wss://mine.relay.io"), RelayPermission::ReadWrite);
        resolver
            .save(Some(&keys.public_key), &config)
            .await
            .unwrap();

        let resolved = resolver.resolve(Some(&keys.public_key)).await;
        assert_eq!(resolved.relay_urls, vec![url("wss://mine.relay.io")]);
    }

    #[tokio::test]
    async fn test_session_defaults_layer_without_overriding() {
        let resolver = resolver();
        let keys = Keys::generate();
        resolver.set_session_public_key(Some(keys.public_key));

        // Explicit configuration marks the read relay as indexer
        let mut config = RelayConfig::default();
        config.insert(url("wss://own-read.relay.io"), RelayPermission::Indexer);
        resolver
            .save(Some(&keys.public_key), &config)
            .await
            .unwrap();

        resolver.set_session_defaults(&own_relay_list(&keys), SignerStatus::Available);

        let resolved = resolver.resolve_current().await;

        // Session default added the write relay...
        assert!(resolved.contains(&url("wss://own-write.relay.io")));
        // ...but never overrode the explicit permission
        assert_eq!(
            resolved.permissions.get(&url("wss://own-read.relay.io")),
            Some(&RelayPermission::Indexer)
        );
    }

    #[tokio::test]
    async fn test_view_only_session_gets_no_write_surface() {
        let resolver = resolver();
        let keys = Keys::generate();
        resolver.set_session_public_key(Some(keys.public_key));

        resolver.set_session_defaults(&own_relay_list(&keys), SignerStatus::Unavailable);

        let resolved = resolver.resolve_current().await;
        assert_eq!(
            resolved.permissions.get(&url("wss://own-write.relay.io")),
            Some(&RelayPermission::Read)
        );
        assert!(resolved
            .permissions
            .get(&url("wss://own-write.relay.io"))
            .is_some_and(|p| !p.is_writable()));
    }

    #[tokio::test]
    async fn test_session_defaults_cleared_on_sign_out() {
        let resolver = resolver();
        let keys = Keys::generate();
        resolver.set_session_public_key(Some(keys.public_key));
        resolver.set_session_defaults(&own_relay_list(&keys), SignerStatus::Available);

        resolver.clear_session();

        let resolved = resolver.resolve(None).await;
        assert!(!resolved.contains(&url("wss://own-write.relay.io")));
        assert!(resolver.session_public_key().is_none());
    }

    #[tokio::test]
    async fn test_malformed_persisted_config_falls_back() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set(GLOBAL_CONFIG_KEY, "{not json").await.unwrap();

        let resolver = RelayConfigResolver::new(store);
        let resolved = resolver.resolve(None).await;

        // Defaults apply as if nothing were persisted
        assert!(resolved.contains(&url("wss://relay.damus.io")));
    }

    #[tokio::test]
    async fn test_invalid_entries_dropped_individually() {
        let store = Arc::new(MemoryConfigStore::new());
        let raw = r#"{"relay_urls":["wss://good.relay.io","http://bad.relay.io"],"permissions":{"wss://good.relay.io":"readwrite","http://bad.relay.io":"read"}}"#;
        store.set(GLOBAL_CONFIG_KEY, raw).await.unwrap();

        let resolver = RelayConfigResolver::new(store);
        let resolved = resolver.resolve(None).await;

        assert_eq!(resolved.relay_urls, vec![url("wss://good.relay.io")]);
    }

    #[tokio::test]
    async fn test_resolve_is_stable_for_identical_inputs() {
        let resolver = resolver();

        let first = resolver.resolve(None).await;
        let second = resolver.resolve(None).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_external_change_recomputes() {
        let resolver = resolver();

        let before = resolver.resolve(None).await;
        assert!(!before.contains(&url("wss://added.relay.io")));

        resolver
            .set_relay_permission(None, url("wss://added.relay.io"), RelayPermission::Write)
            .await
            .unwrap();

        let after = resolver.resolve(None).await;
        assert!(after.contains(&url("wss://added.relay.io")));
        assert_eq!(
            after.permissions.get(&url("wss://added.relay.io")),
            Some(&RelayPermission::Write)
        );
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let resolver = resolver();

        let mut config = RelayConfig::default();
        config.insert(url("wss://a.relay.io"), RelayPermission::Read);
        config.insert(url("wss://b.relay.io"), RelayPermission::Indexer);

        resolver.save(None, &config).await.unwrap();
        let resolved = resolver.resolve(None).await;

        assert_eq!(resolved, config);
    }
}
