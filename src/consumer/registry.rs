//! Registry of consumer pools keyed by name.
//!
//! Components that want to share workers ask the manager for a pool by
//! name. The first request creates it; later requests get the same pool
//! back, untouched, whatever bounds they ask for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::pool::{ConsumerPool, PoolConfig, PoolError};

/// Owner of every consumer pool in a process.
#[derive(Debug, Default)]
pub struct PoolManager {
    pools: Mutex<HashMap<String, Arc<ConsumerPool>>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pool registered under `name`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if the pool has to be created
    /// and `config` is invalid. Config is not checked against an existing
    /// pool.
    pub fn get_or_create(&self, name: &str, config: PoolConfig) -> Result<Arc<ConsumerPool>, PoolError> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = pools.get(name) {
            if existing.config() != &config {
                tracing::debug!(
                    pool = name,
                    existing = ?existing.config(),
                    requested = ?config,
                    "Consumer pool already registered, keeping existing bounds"
                );
            }
            return Ok(Arc::clone(existing));
        }

        let pool = Arc::new(ConsumerPool::new(name, config)?);
        pools.insert(name.to_string(), Arc::clone(&pool));
        tracing::info!(pool = name, min_workers = config.min_workers, max_workers = config.max_workers, "Consumer pool registered");

        Ok(pool)
    }

    /// Look up a registered pool.
    pub fn get(&self, name: &str) -> Option<Arc<ConsumerPool>> {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Shut down and forget every pool.
    pub async fn shutdown_all(&self) {
        let pools: Vec<_> = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, pool)| pool)
            .collect();

        for pool in pools {
            pool.shutdown().await;
        }
    }

    /// Get the number of registered pools.
    #[cfg(test)]
    pub fn pool_count(&self) -> usize {
        self.pools.lock().unwrap().len()
    }
}
