//! Per-query configuration.

use logquery_core::ChunkerConfig;

/// Configuration shared by every Aggregator and Propagator a node spawns.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Wire batching limits for responses and propagations.
    pub chunker: ChunkerConfig,
    /// Capacity of each query actor's mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the requester-facing output channel.
    pub output_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            mailbox_capacity: 64,
            output_capacity: 1024,
        }
    }
}
