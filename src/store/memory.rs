//! Bounded in-memory artifact store.
//!
//! A key to payload map with:
//! - a per-item size limit checked on `put`
//! - an entry-count ceiling (and optionally a cumulative byte budget) enforced by eviction
//! - a retention window on last access
//! - a semaphore capping concurrent operations, acquired under the operation timeout
//! - a SHA-256 of every payload, verified on `get`
//!
//! Eviction never runs on the request path. [`BoundedArtifactStore::spawn_eviction`] starts a
//! background task that runs on a fixed interval and whenever a `put` leaves the store over its
//! ceiling; [`BoundedArtifactStore::evict_now`] runs one cycle synchronously.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::hashing::content_hash;

use super::BlobStore;

#[derive(Debug)]
struct StoreEntry {
    payload: Bytes,
    content_hash: String,
    created_at: Instant,
    last_accessed_at: Instant,
    /// Insertion sequence; distinguishes a replaced entry from the one a snapshot saw.
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, StoreEntry>,
    total_bytes: u64,
    next_seq: u64,
}

impl State {
    fn remove(&mut self, key: &str) -> Option<StoreEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.payload.len() as u64);
        Some(entry)
    }

    fn over_ceiling(&self, limits: &StoreConfig) -> bool {
        self.entries.len() > limits.max_entries
            || (limits.enforce_total_bytes && self.total_bytes > limits.max_total_bytes)
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    limits: RwLock<StoreConfig>,
    permits: Semaphore,
    evictions: AtomicU64,
    pressure: Notify,
    shutdown: CancellationToken,
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub count: usize,
    pub total_bytes: u64,
    /// Entries removed by eviction since the store was created.
    pub evictions: u64,
    pub max_entries: usize,
    pub max_total_bytes: u64,
}

/// Candidate seen by an eviction snapshot.
struct Candidate {
    key: String,
    seq: u64,
    created_at: Instant,
    last_accessed_at: Instant,
}

enum Removal {
    Removed,
    /// Deleted concurrently.
    Gone,
    /// Replaced or read since the snapshot.
    Changed,
}

/// Bounded, concurrency-limited in-memory [`BlobStore`].
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Debug, Clone)]
pub struct BoundedArtifactStore {
    inner: Arc<Inner>,
}

impl BoundedArtifactStore {
    pub fn new(config: StoreConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent_operations.max(1));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                limits: RwLock::new(config),
                permits,
                evictions: AtomicU64::new(0),
                pressure: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Store `bytes` under `key`, replacing any previous entry.
    ///
    /// Fails with [`StoreError::Capacity`] if the payload exceeds `max_item_bytes`. The entry is
    /// inserted in one step: a cancelled `put` either stored the entry or left no trace.
    pub async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let limits = self.limits();
        let size = bytes.len() as u64;
        if size > limits.max_item_bytes {
            return Err(StoreError::Capacity {
                key: key.to_string(),
                size,
                limit: limits.max_item_bytes,
            });
        }

        let _permit = self.permit("put", &limits).await?;
        let hash = content_hash(&bytes);
        let now = Instant::now();

        let over = {
            let mut state = self.state();
            state.remove(key);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.total_bytes += size;
            state.entries.insert(
                key.to_string(),
                StoreEntry {
                    payload: bytes,
                    content_hash: hash,
                    created_at: now,
                    last_accessed_at: now,
                    seq,
                },
            );
            state.over_ceiling(&limits)
        };

        debug!(key, size, "artifact stored");
        if over {
            self.inner.pressure.notify_one();
        }
        Ok(())
    }

    /// Read the payload under `key`, marking it as recently used.
    pub async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let limits = self.limits();
        let _permit = self.permit("get", &limits).await?;

        let (payload, expected) = {
            let mut state = self.state();
            let entry = state
                .entries
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            entry.last_accessed_at = Instant::now();
            (entry.payload.clone(), entry.content_hash.clone())
        };

        if content_hash(&payload) != expected {
            return Err(StoreError::Corruption {
                key: key.to_string(),
                reason: "payload does not match its recorded content hash".to_string(),
            });
        }
        Ok(payload)
    }

    /// Remove `key`. Returns whether an entry existed.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let limits = self.limits();
        let _permit = self.permit("delete", &limits).await?;
        let existed = self.state().remove(key).is_some();
        debug!(key, existed, "artifact deleted");
        Ok(existed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Keys currently stored, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.state().entries.keys().cloned().collect()
    }

    pub fn stats(&self) -> StoreStats {
        let limits = self.limits();
        let state = self.state();
        StoreStats {
            count: state.entries.len(),
            total_bytes: state.total_bytes,
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            max_entries: limits.max_entries,
            max_total_bytes: limits.max_total_bytes,
        }
    }

    /// Replace the capacity and retention limits.
    ///
    /// `max_concurrent_operations` and `eviction_interval_secs` are fixed when the store and its
    /// eviction task are created; changes to them are ignored here.
    pub fn update_limits(&self, config: StoreConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::Invalid)?;
        let over = self.state().over_ceiling(&config);
        {
            let mut limits = self
                .inner
                .limits
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let concurrency = limits.max_concurrent_operations;
            let interval = limits.eviction_interval_secs;
            *limits = StoreConfig {
                max_concurrent_operations: concurrency,
                eviction_interval_secs: interval,
                ..config
            };
        }
        info!("artifact store limits updated");
        if over {
            self.inner.pressure.notify_one();
        }
        Ok(())
    }

    /// Run one eviction cycle now. Returns the number of entries removed.
    ///
    /// 1. Entries not accessed within the retention window are removed.
    /// 2. While still over the entry ceiling (or the byte budget, when enforced), the least
    ///    recently accessed entries are removed, oldest-created first among equals.
    ///
    /// Keys are snapshotted before anything is removed. An entry deleted, replaced, or read after
    /// the snapshot is skipped.
    pub fn evict_now(&self) -> usize {
        let limits = self.limits();
        let now = Instant::now();
        let retention = limits.retention();

        let mut snapshot: Vec<Candidate> = {
            let state = self.state();
            state
                .entries
                .iter()
                .map(|(key, e)| Candidate {
                    key: key.clone(),
                    seq: e.seq,
                    created_at: e.created_at,
                    last_accessed_at: e.last_accessed_at,
                })
                .collect()
        };
        snapshot.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.seq.cmp(&b.seq))
        });

        let mut expired = 0usize;
        let mut displaced = 0usize;
        let mut survivors = Vec::with_capacity(snapshot.len());
        for candidate in snapshot {
            if now.saturating_duration_since(candidate.last_accessed_at) >= retention {
                if self.remove_candidate(&candidate, "expired") {
                    expired += 1;
                }
            } else {
                survivors.push(candidate);
            }
        }

        for candidate in survivors {
            if !self.state().over_ceiling(&limits) {
                break;
            }
            if self.remove_candidate(&candidate, "over capacity") {
                displaced += 1;
            }
        }

        let removed = expired + displaced;
        if removed > 0 {
            self.inner
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            info!(expired, displaced, "artifact store eviction cycle");
        }
        removed
    }

    /// Start the background eviction task on the current tokio runtime.
    ///
    /// The task runs every `eviction_interval_secs` and whenever a write leaves the store over
    /// its ceiling. It stops when the returned handle is shut down or dropped, or when the store
    /// is closed.
    pub fn spawn_eviction(&self) -> EvictionHandle {
        let token = self.inner.shutdown.child_token();
        let period = self.limits().eviction_interval();
        let store = self.clone();
        let stop = token.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?period, "eviction task started");
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = store.inner.pressure.notified() => {}
                }
                store.evict_now();
            }
            debug!("eviction task stopped");
        });

        EvictionHandle {
            token,
            join: Some(join),
        }
    }

    /// Reject all further operations and stop any eviction task. Stored entries stay readable
    /// through [`Self::keys`] and [`Self::stats`] only.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.shutdown.cancel();
    }

    fn remove_candidate(&self, candidate: &Candidate, reason: &'static str) -> bool {
        let outcome = {
            let mut state = self.state();
            let unchanged = state.entries.get(&candidate.key).map(|e| {
                e.seq == candidate.seq && e.last_accessed_at == candidate.last_accessed_at
            });
            match unchanged {
                None => Removal::Gone,
                Some(false) => Removal::Changed,
                Some(true) => {
                    state.remove(&candidate.key);
                    Removal::Removed
                }
            }
        };

        match outcome {
            Removal::Removed => {
                debug!(key = %candidate.key, reason, "artifact evicted");
                true
            }
            Removal::Gone => {
                warn!(key = %candidate.key, reason, "eviction skipped: entry already removed");
                false
            }
            Removal::Changed => {
                debug!(key = %candidate.key, reason, "eviction skipped: entry changed since snapshot");
                false
            }
        }
    }

    async fn permit(
        &self,
        operation: &'static str,
        limits: &StoreConfig,
    ) -> StoreResult<SemaphorePermit<'_>> {
        let after = limits.operation_timeout();
        match tokio::time::timeout(after, self.inner.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(StoreError::Closed),
            Err(_) => Err(StoreError::Timeout { operation, after }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limits(&self) -> StoreConfig {
        self.inner
            .limits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BlobStore for BoundedArtifactStore {
    async fn save(&self, path: &str, bytes: Bytes) -> StoreResult<String> {
        self.put(path, bytes).await?;
        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> StoreResult<Bytes> {
        self.get(path).await
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        BoundedArtifactStore::delete(self, path).await
    }
}

/// Handle to a running eviction task.
///
/// Dropping the handle signals the task to stop; [`EvictionHandle::shutdown`] also waits for it.
#[derive(Debug)]
pub struct EvictionHandle {
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl EvictionHandle {
    /// Stop the task and wait for its current cycle to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "eviction task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for EvictionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
