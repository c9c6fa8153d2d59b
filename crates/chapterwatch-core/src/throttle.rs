//! Per-host request spacing.
//!
//! Every dispatch to a host reserves the next free slot for that host:
//!
//! ```text
//! wait      = max(0, slot[host] - now)
//! slot[host] = max(now, slot[host]) + min_delay + jitter
//! ```
//!
//! The read-and-advance happens under the map's per-shard lock, so two
//! concurrent callers for the same host always get distinct, spaced slots.
//! The lock is released before the caller sleeps; requests overlap in flight,
//! only their dispatch times are spaced. Different hosts never block each
//! other.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use chapterwatch_core::throttle::{HostThrottle, ThrottleConfig};
//!
//! # async fn run() {
//! let throttle = HostThrottle::new(
//!     ThrottleConfig::new(Duration::from_millis(900))
//!         .with_jitter(Duration::from_millis(50), Duration::from_millis(250)),
//! );
//! throttle.wait("manga.example").await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::Instant;

use crate::util::normalize_host;

/// Configuration for [`HostThrottle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between two dispatches to the same host.
    pub min_delay: Duration,

    /// Random jitter is drawn uniformly from `[jitter_min, jitter_max)`.
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl ThrottleConfig {
    /// Create a config with the given floor and no jitter.
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter_min = min;
        self.jitter_max = max.max(min);
        self
    }

    fn step(&self) -> Duration {
        self.min_delay + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let ms = rand::thread_rng()
            .gen_range(self.jitter_min.as_millis() as u64..self.jitter_max.as_millis() as u64);
        Duration::from_millis(ms)
    }
}

impl Default for ThrottleConfig {
    /// 900ms floor plus 50-250ms jitter.
    fn default() -> Self {
        Self::new(Duration::from_millis(900))
            .with_jitter(Duration::from_millis(50), Duration::from_millis(250))
    }
}

/// Shared per-host slot table. Clones share state.
#[derive(Debug, Clone)]
pub struct HostThrottle {
    config: ThrottleConfig,
    slots: Arc<DashMap<String, Instant>>,
}

impl HostThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            slots: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Reserve the next dispatch slot for `host` and return how long the
    /// caller must wait before sending.
    pub fn reserve(&self, host: &str) -> Duration {
        let now = Instant::now();
        let step = self.config.step();

        let mut slot = self.slots.entry(normalize_host(host)).or_insert(now);
        let wait = slot.saturating_duration_since(now);
        *slot = (*slot).max(now) + step;
        wait
    }

    /// Reserve a slot and sleep until it opens. Returns the time waited.
    pub async fn wait(&self, host: &str) -> Duration {
        let wait = self.reserve(host);
        if !wait.is_zero() {
            tracing::debug!(host = %host, sleep_ms = %wait.as_millis(), "Throttling request");
            tokio::time::sleep(wait).await;
        }
        wait
    }
}

impl Default for HostThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
