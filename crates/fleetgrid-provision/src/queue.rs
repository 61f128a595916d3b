//! Queue-depth oracle.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Task counts of one task queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending_tasks: u64,
    pub claimed_tasks: u64,
}

/// Source of pending/claimed counts. A pool's task queue id is its
/// worker pool id.
#[async_trait]
pub trait QueueOracle: Send + Sync {
    async fn task_queue_counts(&self, task_queue_id: &str) -> anyhow::Result<QueueCounts>;
}

/// Oracle backed by a map, for tests and for static deployments. Unknown
/// queues report zero.
#[derive(Debug, Default)]
pub struct StaticQueue {
    counts: Mutex<HashMap<String, QueueCounts>>,
}

impl StaticQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, task_queue_id: &str, pending_tasks: u64, claimed_tasks: u64) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.insert(
                task_queue_id.to_string(),
                QueueCounts {
                    pending_tasks,
                    claimed_tasks,
                },
            );
        }
    }
}

#[async_trait]
impl QueueOracle for StaticQueue {
    async fn task_queue_counts(&self, task_queue_id: &str) -> anyhow::Result<QueueCounts> {
        let counts = self
            .counts
            .lock()
            .map_err(|_| anyhow::anyhow!("queue counts lock poisoned"))?;
        Ok(counts.get(task_queue_id).copied().unwrap_or_default())
    }
}
