// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Object pooling for reducing allocation churn
//!
//! This module provides a free-list pool for reusing objects that would
//! otherwise be allocated and dropped every tick, such as octree cells.
//!
//! Pools are deliberately single-threaded: an [`ObjectPool`] can be moved to
//! another thread but cannot be shared between threads. Every simulation
//! context and every worker thread owns its own pool and passes it by
//! `&mut` handle to whatever needs it.

use crate::error::LayoutError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Configuration for object pool behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of pooled objects (available plus in use)
    pub max_size: usize,
    /// Extra objects that may be constructed beyond `max_size` before the
    /// pool gives up and disables pooling
    pub overflow_budget: usize,
    /// Number of objects to construct up front
    pub prewarm: usize,
    /// Whether to log when the pool allocates or discards objects
    pub log_resize_events: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_size: 65_536,
            overflow_budget: 65_536,
            prewarm: 0,
            log_resize_events: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with custom limits
    pub fn new(max_size: usize, overflow_budget: usize) -> Self {
        PoolConfig {
            max_size,
            overflow_budget,
            prewarm: 0,
            log_resize_events: false,
        }
    }

    /// Enable logging for allocation events
    pub fn with_logging(mut self) -> Self {
        self.log_resize_events = true;
        self
    }

    /// Construct `count` objects when the pool is created
    pub fn with_prewarm(mut self, count: usize) -> Self {
        self.prewarm = count;
        self
    }

    /// Total number of outstanding objects tolerated before pooling is disabled
    pub fn hard_limit(&self) -> usize {
        self.max_size.saturating_add(self.overflow_budget)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.max_size == 0 {
            return Err(LayoutError::config("max_size", "must be at least 1"));
        }
        if self.prewarm > self.max_size {
            return Err(LayoutError::config(
                "prewarm",
                format!("{} exceeds max_size {}", self.prewarm, self.max_size),
            ));
        }
        Ok(())
    }
}

/// Statistics for monitoring pool performance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    /// Number of times an object was served from the free list
    pub hits: usize,
    /// Number of times a new object had to be constructed
    pub misses: usize,
    /// Total objects ever constructed by this pool
    pub total_created: usize,
    /// Objects currently sitting in the free list
    pub available: usize,
    /// Objects currently handed out
    pub in_use: usize,
    /// Peak number of objects handed out at once
    pub peak_in_use: usize,
    /// Free-list entries discarded because they failed validation
    pub rejected: usize,
    /// Released objects discarded because their reset failed
    pub reset_failures: usize,
    /// Number of times the hard limit was hit and pooling disabled
    pub exhaustions: usize,
}

impl PoolStats {
    /// Calculate the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

type Factory<T> = Box<dyn FnMut() -> T + Send>;
type Reset<T> = Box<dyn FnMut(&mut T) -> Result<(), String> + Send>;
type Validator<T> = Box<dyn Fn(&T) -> bool + Send>;

/// A reusable free list of objects
///
/// # Example
///
/// ```
/// use force_layout::pool::{ObjectPool, PoolConfig};
///
/// let mut pool = ObjectPool::new("scratch", PoolConfig::new(4, 0), Vec::<f64>::new)
///     .with_reset(|v| {
///         v.clear();
///         Ok(())
///     });
///
/// let mut buf = pool.acquire();
/// buf.push(1.0);
/// pool.release(buf);
///
/// let buf = pool.acquire();
/// assert!(buf.is_empty());
/// assert_eq!(pool.stats().total_created, 1);
/// ```
pub struct ObjectPool<T> {
    kind: &'static str,
    free: Vec<T>,
    config: PoolConfig,
    stats: PoolStats,
    factory: Factory<T>,
    reset: Reset<T>,
    validator: Option<Validator<T>>,
    pooling_enabled: bool,
}

impl<T> ObjectPool<T> {
    /// Create a pool that constructs objects with `factory`
    ///
    /// `kind` names the pooled object in log output and errors. The pool is
    /// prewarmed according to `config.prewarm`.
    pub fn new<F>(kind: &'static str, config: PoolConfig, factory: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        let prewarm = config.prewarm;
        let mut pool = ObjectPool {
            kind,
            free: Vec::with_capacity(prewarm),
            config,
            stats: PoolStats::default(),
            factory: Box::new(factory),
            reset: Box::new(|_| Ok(())),
            validator: None,
            pooling_enabled: true,
        };
        pool.prewarm(prewarm);
        pool
    }

    /// Set the function run on every released object
    ///
    /// An object whose reset returns an error is discarded instead of being
    /// returned to the free list.
    pub fn with_reset<R>(mut self, reset: R) -> Self
    where
        R: FnMut(&mut T) -> Result<(), String> + Send + 'static,
    {
        self.reset = Box::new(reset);
        self
    }

    /// Set a validator checked before a pooled object is handed out
    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&T) -> bool + Send + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Acquire an object, reusing a pooled one when possible
    ///
    /// Never fails: when the pool is exhausted it disables pooling and keeps
    /// constructing fresh objects.
    pub fn acquire(&mut self) -> T {
        if self.pooling_enabled {
            if let Some(obj) = self.pop_valid() {
                self.stats.hits += 1;
                self.mark_acquired();
                return obj;
            }

            if self.stats.in_use >= self.config.hard_limit() {
                self.disable_pooling();
            }
        }

        self.construct()
    }

    /// Acquire an object, failing instead of degrading when the pool is exhausted
    pub fn try_acquire(&mut self) -> Result<T, LayoutError> {
        if let Some(obj) = self.pop_valid() {
            self.stats.hits += 1;
            self.mark_acquired();
            return Ok(obj);
        }

        let limit = self.config.hard_limit();
        if self.stats.in_use >= limit {
            return Err(LayoutError::AllocationExhausted {
                kind: self.kind,
                in_use: self.stats.in_use,
                limit,
            });
        }

        Ok(self.construct())
    }

    /// Return an object to the pool
    ///
    /// The object is reset first. It is dropped when the reset fails, when
    /// pooling is disabled, or when keeping it would exceed `max_size`.
    pub fn release(&mut self, mut obj: T) {
        self.stats.in_use = self.stats.in_use.saturating_sub(1);

        if !self.pooling_enabled {
            return;
        }

        if let Err(reason) = (self.reset)(&mut obj) {
            self.stats.reset_failures += 1;
            warn!(kind = self.kind, %reason, "discarding pooled object after failed reset");
            return;
        }

        if self.free.len() + self.stats.in_use >= self.config.max_size {
            // Pool is full, object is dropped
            return;
        }

        self.free.push(obj);
        self.stats.available = self.free.len();
    }

    /// Construct objects until `count` are available, within `max_size`
    ///
    /// Returns the number of objects constructed.
    pub fn prewarm(&mut self, count: usize) -> usize {
        let room = self
            .config
            .max_size
            .saturating_sub(self.stats.in_use + self.free.len());
        let wanted = count.saturating_sub(self.free.len()).min(room);

        self.free.reserve(wanted);
        for _ in 0..wanted {
            let obj = (self.factory)();
            self.free.push(obj);
        }
        self.stats.total_created += wanted;
        self.stats.available = self.free.len();

        if wanted > 0 && self.config.log_resize_events {
            debug!(kind = self.kind, created = wanted, "prewarmed pool");
        }
        wanted
    }

    /// Drop free objects until at most `target` remain
    ///
    /// Objects currently in use are not affected. Returns the number dropped.
    pub fn trim(&mut self, target: usize) -> usize {
        let removed = self.free.len().saturating_sub(target);
        self.free.truncate(target);
        self.free.shrink_to_fit();
        self.stats.available = self.free.len();
        removed
    }

    /// Drop every free object
    pub fn clear(&mut self) {
        self.trim(0);
    }

    /// Re-enable pooling after an exhaustion
    pub fn reenable(&mut self) {
        self.pooling_enabled = true;
    }

    /// Whether objects are currently being pooled
    pub fn is_pooling_enabled(&self) -> bool {
        self.pooling_enabled
    }

    /// Name of the pooled object kind
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.clone()
    }

    /// Number of objects in the free list
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Check if the free list is empty
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    fn pop_valid(&mut self) -> Option<T> {
        while let Some(obj) = self.free.pop() {
            let valid = self.validator.as_ref().map_or(true, |v| v(&obj));
            if valid {
                self.stats.available = self.free.len();
                return Some(obj);
            }
            self.stats.rejected += 1;
            if self.config.log_resize_events {
                debug!(kind = self.kind, "discarding pooled object that failed validation");
            }
        }
        self.stats.available = 0;
        None
    }

    fn construct(&mut self) -> T {
        self.stats.misses += 1;
        self.stats.total_created += 1;
        if self.config.log_resize_events {
            debug!(
                kind = self.kind,
                hit_rate = self.stats.hit_rate(),
                "allocating new pooled object"
            );
        }
        let obj = (self.factory)();
        self.mark_acquired();
        obj
    }

    fn mark_acquired(&mut self) {
        self.stats.in_use += 1;
        if self.stats.in_use > self.stats.peak_in_use {
            self.stats.peak_in_use = self.stats.in_use;
        }
    }

    fn disable_pooling(&mut self) {
        self.pooling_enabled = false;
        self.stats.exhaustions += 1;
        warn!(
            kind = self.kind,
            in_use = self.stats.in_use,
            limit = self.config.hard_limit(),
            "pool exhausted, pooling disabled"
        );
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .field("pooling_enabled", &self.pooling_enabled)
            .finish()
    }
}
