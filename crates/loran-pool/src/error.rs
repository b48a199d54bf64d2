// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Pool error

use std::fmt;

/// Pool error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Every relay targeted by the routing plan failed.
    ///
    /// Partial failure is not an error; this is the terminal case where
    /// nothing was reachable.
    AllRelaysFailed,
}

impl std::error::Error for PoolError {}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllRelaysFailed => f.write_str("all targeted relays failed"),
        }
    }
}
