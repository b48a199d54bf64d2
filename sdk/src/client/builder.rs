// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Client builder

use std::sync::Arc;

use loran_outbox::OutboxStore;
use loran_outbox_memory::OutboxMemory;
use loran_pool::RelayTransport;
use loran_router::config::{ConfigStore, MemoryConfigStore};

use super::options::ClientOptions;
use super::Client;

/// Client builder
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    /// Relay transport
    pub transport: Arc<dyn RelayTransport>,
    /// Outbox store
    pub outbox: Arc<dyn OutboxStore>,
    /// Configuration store
    pub config_store: Arc<dyn ConfigStore>,
    /// Options
    pub opts: ClientOptions,
}

impl ClientBuilder {
    /// New builder with in-memory stores.
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self {
            transport,
            outbox: Arc::new(OutboxMemory::unbounded()),
            config_store: Arc::new(MemoryConfigStore::new()),
            opts: ClientOptions::default(),
        }
    }

    /// Set the outbox store
    #[inline]
    pub fn outbox<S>(mut self, store: S) -> Self
    where
        S: OutboxStore + 'static,
    {
        self.outbox = Arc::new(store);
        self
    }

    /// Set the configuration store
    #[inline]
    pub fn config_store<S>(mut self, store: S) -> Self
    where
        S: ConfigStore + 'static,
    {
        self.config_store = Arc::new(store);
        self
    }

    /// Set options
    #[inline]
    pub fn opts(mut self, opts: ClientOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Build [`Client`]
    #[inline]
    pub fn build(self) -> Client {
        Client::from_builder(self)
    }
}
