// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Prelude

#![allow(unknown_lints)]
#![allow(ambiguous_glob_reexports)]
#![doc(hidden)]

pub use loran_router::prelude::*;

pub use crate::error::*;
pub use crate::output::*;
pub use crate::pool::*;
pub use crate::transport::*;
pub use crate::*;
