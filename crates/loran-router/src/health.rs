// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Relay health monitor
//!
//! Tracks per-relay success/failure counters and a smoothed latency
//! estimate, and ranks candidate relays for routing. Records live for the
//! process lifetime and are never persisted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use nostr::{RelayUrl, Timestamp};

use crate::constants::{
    METADATA_FAILURE_MULTIPLIER, RECENT_FAILURE_WINDOW, RESPONSE_TIME_THRESHOLD,
    RESPONSE_TIME_WEIGHT, SUCCESS_RATE_WEIGHT, UNHEALTHY_AFTER_FAILURES,
};

/// Kind of operation a failure is accounted against.
///
/// Metadata queries are noisier across a decentralized network: a relay
/// that simply lacks a given profile is not unhealthy, so failures on
/// that path are tolerated longer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    /// Feed and general content operations
    #[default]
    Feed,
    /// Profile metadata operations
    Metadata,
}

impl OperationKind {
    fn failure_threshold(&self) -> u64 {
        match self {
            Self::Feed => UNHEALTHY_AFTER_FAILURES,
            Self::Metadata => UNHEALTHY_AFTER_FAILURES * METADATA_FAILURE_MULTIPLIER,
        }
    }
}

/// Health state of one relay.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayHealth {
    /// Successful operations
    pub success_count: u64,
    /// Failed operations
    pub failure_count: u64,
    /// Smoothed response time, `(avg + sample) / 2` on each success
    pub avg_response_time: Duration,
    /// Whether the relay is considered usable
    pub is_healthy: bool,
    /// Time of the most recent success or failure
    pub last_checked: Timestamp,
}

impl RelayHealth {
    fn new() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            avg_response_time: Duration::ZERO,
            is_healthy: true,
            last_checked: Timestamp::now(),
        }
    }

    fn success_rate(&self) -> f64 {
        let attempts: u64 = self.success_count + self.failure_count;
        if attempts > 0 {
            self.success_count as f64 / attempts as f64
        } else {
            1.0
        }
    }

    fn response_time_score(&self) -> f64 {
        let threshold: f64 = RESPONSE_TIME_THRESHOLD.as_millis() as f64;
        let avg: f64 = self.avg_response_time.as_millis() as f64;
        (threshold - avg).max(0.0) / threshold
    }

    fn score(&self) -> f64 {
        SUCCESS_RATE_WEIGHT * self.success_rate() + RESPONSE_TIME_WEIGHT * self.response_time_score()
    }
}

/// Per-relay stats snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayHealthSnapshot {
    /// Relay URL
    pub relay_url: RelayUrl,
    /// Health state
    pub health: RelayHealth,
}

/// Relay health monitor.
///
/// Shared by cloning; all mutation goes through an internal mutex so the
/// monitor can be used from concurrent tasks.
#[derive(Debug, Default)]
pub struct RelayMonitor {
    relays: Mutex<HashMap<RelayUrl, RelayHealth>>,
    recent_failures: Mutex<VecDeque<Instant>>,
}

impl RelayMonitor {
    /// Construct a new monitor with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful operation.
    pub fn record_success(&self, relay_url: &RelayUrl, response_time: Duration) {
        let mut relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        let health: &mut RelayHealth = relays
            .entry(relay_url.clone())
            .or_insert_with(RelayHealth::new);

        health.success_count += 1;
        health.avg_response_time = if health.avg_response_time.is_zero() {
            response_time
        } else {
            (health.avg_response_time + response_time) / 2
        };
        health.is_healthy = true;
        health.last_checked = Timestamp::now();
    }

    /// Record a failed operation.
    ///
    /// A relay with no prior record is created on first failure and stays
    /// healthy until it accumulates enough failures for the operation
    /// kind.
    pub fn record_failure(&self, relay_url: &RelayUrl, operation: OperationKind) {
        {
            let mut relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
            let health: &mut RelayHealth = relays
                .entry(relay_url.clone())
                .or_insert_with(RelayHealth::new);

            health.failure_count += 1;
            health.last_checked = Timestamp::now();

            if health.failure_count >= operation.failure_threshold() {
                if health.is_healthy {
                    tracing::debug!(relay = %relay_url, failures = health.failure_count, "Relay marked unhealthy.");
                }
                health.is_healthy = false;
            }
        }

        let mut recent = self
            .recent_failures
            .lock().unwrap_or_else(PoisonError::into_inner);
        recent.push_back(Instant::now());
        prune_window(&mut recent);
    }

    /// Check if a relay is usable. Unknown relays are healthy.
    pub fn is_healthy(&self, relay_url: &RelayUrl) -> bool {
        let relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        relays
            .get(relay_url)
            .map(|health| health.is_healthy)
            .unwrap_or(true)
    }

    /// Filter and rank candidates by health.
    ///
    /// Keeps candidates with no record or `is_healthy`, sorted descending
    /// by health score. The sort is stable: ties keep the input order.
    /// Unknown relays score as a perfect record.
    pub fn healthy_relays(&self, candidates: &[RelayUrl], limit: Option<usize>) -> Vec<RelayUrl> {
        let relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);

        let mut scored: Vec<(RelayUrl, f64)> = candidates
            .iter()
            .filter_map(|url| match relays.get(url) {
                Some(health) if !health.is_healthy => None,
                Some(health) => Some((url.clone(), health.score())),
                None => Some((url.clone(), 1.0)),
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let limit: usize = limit.unwrap_or(scored.len());
        scored.into_iter().take(limit).map(|(url, _)| url).collect()
    }

    /// Failures recorded within the last minute, across all relays.
    pub fn recent_failures(&self) -> usize {
        let mut recent = self
            .recent_failures
            .lock().unwrap_or_else(PoisonError::into_inner);
        prune_window(&mut recent);
        recent.len()
    }

    /// Clear the stats of one relay.
    pub fn reset_relay(&self, relay_url: &RelayUrl) {
        let mut relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        relays.remove(relay_url);
    }

    /// Clear all stats.
    pub fn reset_all(&self) {
        let mut relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        relays.clear();

        let mut recent = self
            .recent_failures
            .lock().unwrap_or_else(PoisonError::into_inner);
        recent.clear();
    }

    /// Per-relay stats for diagnostics.
    pub fn snapshot(&self) -> Vec<RelayHealthSnapshot> {
        let relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        relays
            .iter()
            .map(|(relay_url, health)| RelayHealthSnapshot {
                relay_url: relay_url.clone(),
                health: health.clone(),
            })
            .collect()
    }
}

fn prune_window(recent: &mut VecDeque<Instant>) {
    let now: Instant = Instant::now();
    while let Some(first) = recent.front() {
        if now.duration_since(*first) > RECENT_FAILURE_WINDOW {
            recent.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[test]
    fn test_unknown_relay_is_healthy() {
        let monitor = RelayMonitor::new();
        assert!(monitor.is_healthy(&url("wss://unknown.relay.io")));
    }

    #[test]
    fn test_feed_failure_threshold() {
        let monitor = RelayMonitor::new();
        let relay = url("wss://flaky.relay.io");

        monitor.record_failure(&relay, OperationKind::Feed);
        monitor.record_failure(&relay, OperationKind::Feed);
        assert!(monitor.is_healthy(&relay));

        monitor.record_failure(&relay, OperationKind::Feed);
        assert!(!monitor.is_healthy(&relay));
    }

    #[test]
    fn test_metadata_failure_threshold() {
        let monitor = RelayMonitor::new();
        let relay = url("wss://profiles.relay.io");

        for _ in 0..11 {
            monitor.record_failure(&relay, OperationKind::Metadata);
        }
        assert!(monitor.is_healthy(&relay));

        monitor.record_failure(&relay, OperationKind::Metadata);
        assert!(!monitor.is_healthy(&relay));
    }

    #[test]
    fn test_success_marks_healthy_again() {
        let monitor = RelayMonitor::new();
        let relay = url("wss://recovering.relay.io");

        for _ in 0..3 {
            monitor.record_failure(&relay, OperationKind::Feed);
        }
        assert!(!monitor.is_healthy(&relay));

        monitor.record_success(&relay, Duration::from_millis(50));
        assert!(monitor.is_healthy(&relay));
    }

    #[test]
    fn test_latency_smoothing() {
        let monitor = RelayMonitor::new();
        let relay = url("wss://slow.relay.io");

        monitor.record_success(&relay, Duration::from_millis(100));
        monitor.record_success(&relay, Duration::from_millis(300));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot[0].health.avg_response_time,
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_healthy_relays_excludes_unhealthy() {
        let monitor = RelayMonitor::new();
        let good = url("wss://good.relay.io");
        let bad = url("wss://bad.relay.io");

        monitor.record_success(&good, Duration::from_millis(50));
        for _ in 0..3 {
            monitor.record_failure(&bad, OperationKind::Feed);
        }

        let healthy = monitor.healthy_relays(&[good.clone(), bad.clone()], None);
        assert_eq!(healthy, vec![good]);
    }

    #[test]
    fn test_healthy_relays_ranking() {
        let monitor = RelayMonitor::new();
        let fast = url("wss://fast.relay.io");
        let slow = url("wss://slow.relay.io");

        monitor.record_success(&fast, Duration::from_millis(50));
        monitor.record_success(&slow, Duration::from_millis(4500));
        // One failure drops the slow relay's success rate as well
        monitor.record_failure(&slow, OperationKind::Feed);

        let ranked = monitor.healthy_relays(&[slow.clone(), fast.clone()], None);
        assert_eq!(ranked, vec![fast, slow]);
    }

    #[test]
    fn test_healthy_relays_stable_ties() {
        let monitor = RelayMonitor::new();
        let a = url("wss://a.relay.io");
        let b = url("wss://b.relay.io");
        let c = url("wss://c.relay.io");

        // No records: all tie at the unknown score and keep input order
        let ranked = monitor.healthy_relays(&[c.clone(), a.clone(), b.clone()], None);
        assert_eq!(ranked, vec![c, a, b]);
    }

    #[test]
    fn test_healthy_relays_limit() {
        let monitor = RelayMonitor::new();
        let candidates: Vec<RelayUrl> = (0..5)
            .map(|i| url(&format!("wss://relay{i}.example.com")))
            .collect();

        let limited = monitor.healthy_relays(&candidates, Some(2));
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_reset() {
        let monitor = RelayMonitor::new();
        let relay = url("wss://reset.relay.io");

        for _ in 0..3 {
            monitor.record_failure(&relay, OperationKind::Feed);
        }
        assert!(!monitor.is_healthy(&relay));

        monitor.reset_relay(&relay);
        assert!(monitor.is_healthy(&relay));

        monitor.record_failure(&relay, OperationKind::Feed);
        monitor.reset_all();
        assert!(monitor.snapshot().is_empty());
        assert_eq!(monitor.recent_failures(), 0);
    }

    #[test]
    fn test_recent_failures_window() {
        let monitor = RelayMonitor::new();
        let relay = url("wss://failing.relay.io");

        for _ in 0..4 {
            monitor.record_failure(&relay, OperationKind::Feed);
        }
        assert_eq!(monitor.recent_failures(), 4);
    }
}
