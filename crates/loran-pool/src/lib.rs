// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Loran connection pool
//!
//! Owns one transport channel per relay URL and dispatches routing plans
//! produced by the router, merging results and feeding the health
//! monitor.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![warn(clippy::large_futures)]

pub mod error;
pub mod output;
pub mod pool;
pub mod prelude;
pub mod transport;

pub use self::error::PoolError;
pub use self::output::Output;
pub use self::pool::{ConnectionPool, PoolOptions};
pub use self::transport::{RelayTransport, TransportError};
