// Copyright (c) 2024-2026 Loran Developers
// Distributed under the MIT software license

//! Router options

/// Device class of the running client.
///
/// Socket establishment and sustainable fan-out differ between a desktop
/// browser and a constrained mobile one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceClass {
    /// Desktop-class environment
    #[default]
    Desktop,
    /// Mobile or otherwise constrained environment
    Constrained,
}

/// Request router options.
///
/// The numeric defaults are tuned heuristics, not protocol constants;
/// override them per deployment as needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouterOptions {
    /// Device class (default: desktop)
    pub device: DeviceClass,
    /// Outbox relays targeted per query on desktop (default: 3)
    pub desktop_targets: usize,
    /// Outbox relays targeted per query on constrained devices (default: 2)
    pub constrained_targets: usize,
    /// Below this many healthy outbox relays, a single-author query blends
    /// in one fallback relay (default: 2)
    pub min_outbox_relays: usize,
    /// Fallback fan-out for author-scoped and metadata queries (default: 3)
    pub scoped_fanout: usize,
    /// Fallback fan-out for unscoped queries (default: 2)
    pub global_fanout: usize,
    /// Floor of the fan-out under backpressure (default: 2)
    pub min_fanout: usize,
    /// Recent failures beyond which the fallback fan-out is halved
    /// (default: 3)
    pub backpressure_threshold: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            device: DeviceClass::default(),
            desktop_targets: 3,
            constrained_targets: 2,
            min_outbox_relays: 2,
            scoped_fanout: 3,
            global_fanout: 2,
            min_fanout: 2,
            backpressure_threshold: 3,
        }
    }
}

impl RouterOptions {
    /// New default options
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device class
    #[inline]
    pub fn device(mut self, device: DeviceClass) -> Self {
        self.device = device;
        self
    }

    /// Set the fallback fan-out for author-scoped and metadata queries
    #[inline]
    pub fn scoped_fanout(mut self, fanout: usize) -> Self {
        self.scoped_fanout = fanout;
        self
    }

    /// Set the fallback fan-out for unscoped queries
    #[inline]
    pub fn global_fanout(mut self, fanout: usize) -> Self {
        self.global_fanout = fanout;
        self
    }

    /// Set the backpressure threshold
    #[inline]
    pub fn backpressure_threshold(mut self, threshold: usize) -> Self {
        self.backpressure_threshold = threshold;
        self
    }

    /// Outbox relays targeted per query on the configured device class.
    #[inline]
    pub fn target_relays(&self) -> usize {
        match self.device {
            DeviceClass::Desktop => self.desktop_targets,
            DeviceClass::Constrained => self.constrained_targets,
        }
    }
}
