// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

pub use loran_outbox::prelude::*;

pub use crate::cache::*;
pub use crate::config::*;
pub use crate::event::*;
pub use crate::health::*;
pub use crate::hints::*;
pub use crate::options::*;
pub use crate::req::*;
pub use crate::*;
