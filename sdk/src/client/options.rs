// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Client options

use std::time::Duration;

use loran_pool::PoolOptions;
use loran_router::options::{DeviceClass, RouterOptions};

/// Options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Router options
    pub router: RouterOptions,
    /// Pool options
    pub pool: PoolOptions,
    /// Settle delay after sign-in on desktop (default: 300 ms)
    ///
    /// Socket re-establishment must get a head start before the first
    /// post-login query goes out.
    pub desktop_settle_delay: Duration,
    /// Settle delay after sign-in on constrained devices (default: 1200 ms)
    pub constrained_settle_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            router: RouterOptions::default(),
            pool: PoolOptions::default(),
            desktop_settle_delay: Duration::from_millis(300),
            constrained_settle_delay: Duration::from_millis(1200),
        }
    }
}

impl ClientOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set router options
    #[inline]
    pub fn router(mut self, opts: RouterOptions) -> Self {
        self.router = opts;
        self
    }

    /// Set pool options
    #[inline]
    pub fn pool(mut self, opts: PoolOptions) -> Self {
        self.pool = opts;
        self
    }

    /// Set the settle delays after sign-in
    #[inline]
    pub fn settle_delays(mut self, desktop: Duration, constrained: Duration) -> Self {
        self.desktop_settle_delay = desktop;
        self.constrained_settle_delay = constrained;
        self
    }

    /// Settle delay for the configured device class.
    #[inline]
    pub fn signin_settle_delay(&self) -> Duration {
        match self.router.device {
            DeviceClass::Desktop => self.desktop_settle_delay,
            DeviceClass::Constrained => self.constrained_settle_delay,
        }
    }
}
