// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Loran relay router
//!
//! Decides which subset of the known relay set receives each outgoing
//! query and each outgoing publish, based on per-user relay lists
//! (NIP-65), relay health history and the configured relay pool.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![warn(clippy::large_futures)]

pub mod cache;
pub mod config;
mod constants;
pub mod event;
pub mod health;
pub mod hints;
pub mod options;
pub mod prelude;
pub mod req;

pub use self::cache::OutboxView;
pub use self::config::{
    ConfigStore, MemoryConfigStore, RelayConfig, RelayConfigResolver, SignerStatus,
};
pub use self::event::EventRouter;
pub use self::health::{OperationKind, RelayMonitor};
pub use self::hints::RelayHintQueue;
pub use self::options::{DeviceClass, RouterOptions};
pub use self::req::{RequestRouter, RoutingPlan};
