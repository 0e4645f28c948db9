//! Tunables for each layer, mirroring the teacher's `RetentionConfig`
//! shape: plain structs with a `Default` impl, no builder ceremony.

use std::time::Duration;

/// Knobs for one partition's [`crate::queue::writer::Queue`].
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub min_msg_size: usize,
    pub max_msg_size: usize,
    pub max_bytes_per_file: u64,
    /// `Put`s between automatic flushes; `0` disables auto-flush.
    pub sync_every: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_msg_size: 1,
            max_msg_size: 1 << 20,
            max_bytes_per_file: 100 * 1024 * 1024,
            sync_every: 2500,
        }
    }
}

/// Knobs for one [`crate::queue::reader::Reader`].
#[derive(Debug, Clone, Copy)]
pub struct ReaderConfig {
    pub min_msg_size: usize,
    pub max_msg_size: usize,
    pub max_bytes_per_file: u64,
    pub sync_every: u64,
    /// How often the reader persists its own checkpoint, independent of
    /// `sync_every` reads (mirrors `syncTimeout` in the original).
    pub sync_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            min_msg_size: 1,
            max_msg_size: 1 << 20,
            max_bytes_per_file: 100 * 1024 * 1024,
            sync_every: 2500,
            sync_timeout: Duration::from_secs(2),
        }
    }
}

/// Knobs for one [`crate::channel::Channel`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub msg_timeout: Duration,
    pub max_attempts: u16,
    pub max_deferred: usize,
    pub max_in_flight: usize,
    /// Bound on the channel's in-memory requeue ring (spec.md §4.4/§5
    /// `MemQueueSize`). Once full, an immediate (`delay == 0`) requeue
    /// spills into the deferred heap with `readyAt = now` instead of
    /// growing the ring, rather than being dropped.
    pub mem_queue_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            msg_timeout: Duration::from_secs(60),
            max_attempts: 5,
            max_deferred: 50_000,
            max_in_flight: 50_000,
            mem_queue_size: 10_000,
        }
    }
}

/// Knobs for the [`crate::registration::RegistrationDb`].
#[derive(Debug, Clone, Copy)]
pub struct RegistrationConfig {
    pub inactive_producer_timeout: Duration,
    pub tombstone_lifetime: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            inactive_producer_timeout: Duration::from_secs(300),
            tombstone_lifetime: Duration::from_secs(45),
        }
    }
}

/// Knobs for [`crate::cluster::aggregator::ClusterInfo`]'s HTTP client.
#[derive(Debug, Clone)]
pub struct ClusterClientConfig {
    pub request_timeout: Duration,
    pub version_pivot: &'static str,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            version_pivot: "0.2.29-alpha",
        }
    }
}
