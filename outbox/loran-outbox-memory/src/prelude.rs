// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

pub use loran_outbox::prelude::*;

pub use crate::store::*;
pub use crate::*;
