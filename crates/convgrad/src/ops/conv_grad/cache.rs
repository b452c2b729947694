//! Primitive cache: at most one compiled plan per distinct configuration.
//!
//! Plan construction is the expensive per-config step, so plans are built
//! once and shared for the lifetime of the cache. The cache is an explicit
//! object the caller constructs and passes around; there is no hidden
//! process-wide instance. Entries are never evicted; real workloads see a
//! handful of distinct configs, typically one per layer.

use super::config::ConvConfig;
use super::engine::{BackwardDataEngine, CompiledPlan};
use crate::Result;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_SHARDS: usize = 16;

/// Keyed store of compiled plans, sharded by key hash.
///
/// Concurrent callers with the same config serialize on one shard, so the
/// first caller builds while the rest wait and then receive the finished
/// plan; callers with configs on different shards proceed in parallel. A
/// lookup can never observe a partially constructed plan because the plan
/// is complete before the shard lock is released.
pub struct PrimitiveCache {
    shards: Vec<Mutex<HashMap<String, Arc<CompiledPlan>>>>,
    builds: AtomicUsize,
}

impl PrimitiveCache {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Fetch the plan for `config`, building it through `engine` on first
    /// use. Build failures are returned to the caller and not cached, so a
    /// later call may retry.
    pub fn get_or_build<E: BackwardDataEngine>(
        &self,
        config: &ConvConfig,
        engine: &E,
    ) -> Result<Arc<CompiledPlan>> {
        let key = config.cache_key();
        let mut shard = self
            .shards[self.shard_index(&key)]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(plan) = shard.get(&key) {
            return Ok(Arc::clone(plan));
        }

        let plan = Arc::new(engine.build_plan(config)?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        shard.insert(key, Arc::clone(&plan));
        Ok(plan)
    }

    /// Number of plans built so far; equals the number of distinct configs
    /// seen. Exposed for instrumentation and tests.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of cached plans
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|p| p.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}

impl Default for PrimitiveCache {
    fn default() -> Self {
        Self::new()
    }
}
