//! Fault-injecting [`BlobStore`] decorator.
//!
//! Wraps any store and, with configurable probabilities, fails `save` as if the store were full
//! or `read` as if the payload were corrupted. Both probabilities default to 0. With a fixed seed
//! the sequence of injected faults is reproducible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::{ConfigError, FaultInjectionConfig};
use crate::error::{StoreError, StoreResult};

use super::BlobStore;

/// Number of faults injected so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub store_full: u64,
    pub corruption: u64,
}

#[derive(Debug)]
pub struct FaultInjectingStore<S> {
    inner: S,
    config: RwLock<FaultInjectionConfig>,
    rng: Mutex<StdRng>,
    store_full: AtomicU64,
    corruption: AtomicU64,
}

impl<S: BlobStore> FaultInjectingStore<S> {
    /// Wrap `inner`. Probabilities outside `[0, 1]` are clamped when drawn.
    pub fn new(inner: S, config: FaultInjectionConfig) -> Self {
        let rng = seeded(config.seed);
        Self {
            inner,
            config: RwLock::new(config),
            rng: Mutex::new(rng),
            store_full: AtomicU64::new(0),
            corruption: AtomicU64::new(0),
        }
    }

    /// Replace the probabilities. A new seed, if given, restarts the random sequence.
    pub fn set_config(&self, config: FaultInjectionConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::Invalid)?;
        if let Some(seed) = config.seed {
            *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = seeded(Some(seed));
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn config(&self) -> FaultInjectionConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fault_stats(&self) -> FaultStats {
        FaultStats {
            store_full: self.store_full.load(Ordering::Relaxed),
            corruption: self.corruption.load(Ordering::Relaxed),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn roll(&self, probability: f64) -> bool {
        if probability.is_nan() || probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_bool(probability)
    }
}

fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for FaultInjectingStore<S> {
    async fn save(&self, path: &str, bytes: Bytes) -> StoreResult<String> {
        let p = self.config().store_full_probability;
        if self.roll(p) {
            self.store_full.fetch_add(1, Ordering::Relaxed);
            debug!(path, "injected store-full fault");
            return Err(StoreError::Capacity {
                key: path.to_string(),
                size: bytes.len() as u64,
                limit: 0,
            });
        }
        self.inner.save(path, bytes).await
    }

    async fn read(&self, path: &str) -> StoreResult<Bytes> {
        let bytes = self.inner.read(path).await?;
        let p = self.config().corruption_probability;
        if self.roll(p) {
            self.corruption.fetch_add(1, Ordering::Relaxed);
            debug!(path, "injected corruption fault");
            return Err(StoreError::Corruption {
                key: path.to_string(),
                reason: "injected fault".to_string(),
            });
        }
        Ok(bytes)
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        self.inner.delete(path).await
    }
}
