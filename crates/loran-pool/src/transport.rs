// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Relay transport boundary
//!
//! The pool drives an abstract duplex channel per relay; the WebSocket
//! implementation lives outside this crate.

use std::any::Any;
use std::fmt::{self, Debug};

use nostr::util::BoxedFuture;
use nostr::{Event, Filter, RelayUrl};

/// Transport error
#[derive(Debug)]
pub enum TransportError {
    /// Operation timed out
    Timeout,
    /// The relay could not be reached
    Unreachable,
    /// The relay returned a malformed response
    Malformed(String),
    /// Any other transport backend error
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl std::error::Error for TransportError {}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Unreachable => f.write_str("relay unreachable"),
            Self::Malformed(e) => write!(f, "malformed response: {e}"),
            Self::Backend(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl TransportError {
    /// Create a new backend error
    #[inline]
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}

/// Relay transport.
///
/// One persistent connection per relay URL; the pool owns the lifecycle.
pub trait RelayTransport: Any + Debug + Send + Sync {
    /// Open the channel to a relay.
    fn open<'a>(&'a self, url: &'a RelayUrl) -> BoxedFuture<'a, Result<(), TransportError>>;

    /// One-shot batched query over an already open channel.
    fn query<'a>(
        &'a self,
        url: &'a RelayUrl,
        filters: Vec<Filter>,
    ) -> BoxedFuture<'a, Result<Vec<Event>, TransportError>>;

    /// One-shot publish.
    fn publish<'a>(
        &'a self,
        url: &'a RelayUrl,
        event: &'a Event,
    ) -> BoxedFuture<'a, Result<(), TransportError>>;

    /// Release the channel.
    fn close<'a>(&'a self, url: &'a RelayUrl) -> BoxedFuture<'a, Result<(), TransportError>>;
}
