// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Outbox storage error

use std::fmt;

use nostr::Kind;

/// Outbox error
#[derive(Debug)]
pub enum OutboxError {
    /// An error happened in the underlying storage backend.
    Backend(Box<dyn std::error::Error + Send + Sync>),
    /// The event is not a NIP-65 relay list.
    NotRelayList {
        /// Kind of the rejected event
        kind: Kind,
    },
}

impl std::error::Error for OutboxError {}

impl fmt::Display for OutboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => e.fmt(f),
            Self::NotRelayList { kind } => write!(f, "not a relay list event: kind {kind}"),
        }
    }
}

impl OutboxError {
    /// Create a new backend error
    ///
    /// Shorthand for `OutboxError::Backend(Box::new(error))`.
    #[inline]
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}
