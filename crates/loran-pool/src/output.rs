// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Pool output

use std::collections::{HashMap, HashSet};

use nostr::RelayUrl;

/// Per-relay outcome of a pool operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Set of relays that succeeded
    pub success: HashSet<RelayUrl>,
    /// Map of relays that failed, with the related errors
    pub failed: HashMap<RelayUrl, String>,
}

impl Output {
    /// Check if at least one relay succeeded.
    #[inline]
    pub fn is_success(&self) -> bool {
        !self.success.is_empty()
    }
}
