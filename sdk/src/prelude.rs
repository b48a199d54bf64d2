// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

// External crates
pub use loran_pool::prelude::*;
pub use nostr::prelude::*;

// Internal modules
pub use crate::client::*;
pub use crate::*;
