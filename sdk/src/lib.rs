// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Loran SDK
//!
//! Composition root of the outbox routing subsystem: wires the outbox
//! store, health monitor, configuration resolver, routers and connection
//! pool into a single client surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![warn(clippy::large_futures)]

pub use loran_outbox as outbox;
pub use loran_pool as pool;
pub use loran_router as router;
pub use nostr;

pub mod client;
pub mod prelude;

pub use self::client::builder::ClientBuilder;
pub use self::client::options::ClientOptions;
pub use self::client::{Client, Diagnostics, Error};
