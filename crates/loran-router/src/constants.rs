// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

use std::time::Duration;

use loran_outbox::permission::RelayPermission;

// Health monitor

/// Failures after which a relay is marked unhealthy for feed operations.
pub(crate) const UNHEALTHY_AFTER_FAILURES: u64 = 3;

/// Metadata queries tolerate more failures: a relay that simply lacks a
/// profile is not unhealthy.
pub(crate) const METADATA_FAILURE_MULTIPLIER: u64 = 4;

/// Latency above this value scores zero.
pub(crate) const RESPONSE_TIME_THRESHOLD: Duration = Duration::from_millis(5000);

pub(crate) const SUCCESS_RATE_WEIGHT: f64 = 0.7;
pub(crate) const RESPONSE_TIME_WEIGHT: f64 = 0.3;

/// Window of the process-wide recent-failure counter used as a coarse
/// backpressure signal in the fallback path.
pub(crate) const RECENT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

// Fast-path relay cache

pub(crate) const RELAY_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

pub(crate) const RELAY_CACHE_CAPACITY: usize = 1024;

// Configuration

/// Relays used only for brand-new users with no persisted or discovered
/// preference.
pub(crate) const DEFAULT_RELAYS: &[(&str, RelayPermission)] = &[
    ("wss://relay.damus.io", RelayPermission::ReadWrite),
    ("wss://nos.lol", RelayPermission::ReadWrite),
    ("wss://relay.primal.net", RelayPermission::ReadWrite),
    ("wss://purplepag.es", RelayPermission::Indexer),
];

pub(crate) const GLOBAL_CONFIG_KEY: &str = "relay-config-default";
