// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded pool of open external dataset handles.
//!
//! A store owns exactly one pool. Handles are checked out with
//! [`DatasetPool::acquire`] and come back when the [`PooledDataset`] guard is
//! released or dropped, whichever happens first. Idle handles are kept for
//! reuse up to `max_idle` and closed once they sit unused for longer than
//! `idle_timeout_secs`.

use crate::error::{DsgError, Result};
use crate::store::{ExternalDataset, ExternalProvider};
use diagnostics::*;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Handles open at once, idle or checked out
    #[serde(default = "default_max_open")]
    pub max_open: usize,

    /// Idle handles retained for reuse
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_max_open() -> usize {
    64
}

fn default_max_idle() -> usize {
    32
}

fn default_idle_timeout_secs() -> u64 {
    600
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_open == 0 {
            return Err(DsgError::config("pool.max_open must be greater than 0"));
        }
        if self.max_idle > self.max_open {
            return Err(DsgError::config(format!(
                "pool.max_idle ({}) cannot exceed pool.max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub outstanding: usize,
    pub idle: usize,
}

struct IdleHandle {
    locator: String,
    dataset: Box<dyn ExternalDataset>,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    outstanding: usize,
    idle: Vec<IdleHandle>,
}

struct PoolInner {
    provider: Arc<dyn ExternalProvider>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

#[derive(Clone)]
pub struct DatasetPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for DatasetPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl DatasetPool {
    #[must_use]
    pub fn new(provider: Arc<dyn ExternalProvider>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                provider,
                config,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a handle for `locator`, reusing an idle one if possible
    pub fn acquire(&self, locator: &str) -> Result<PooledDataset> {
        let mut retired = Vec::new();
        let reused = {
            let mut state = self.inner.lock();
            self.inner.evict_expired(&mut state, &mut retired);

            if let Some(pos) = state.idle.iter().rposition(|h| h.locator == locator) {
                let handle = state.idle.remove(pos);
                state.outstanding += 1;
                Some(handle.dataset)
            } else {
                if state.outstanding + state.idle.len() >= self.inner.config.max_open {
                    // Make room by retiring the oldest idle handle of another locator
                    if state.idle.is_empty() {
                        drop(state);
                        close_all(retired);
                        return Err(DsgError::PoolExhausted {
                            locator: locator.to_string(),
                            max_open: self.inner.config.max_open,
                        });
                    }
                    retired.push(state.idle.remove(0));
                }
                // Reserve the slot before opening outside the lock
                state.outstanding += 1;
                None
            }
        };
        close_all(retired);

        let dataset = match reused {
            Some(dataset) => {
                debug!("Reusing idle dataset handle for {locator}", locator: locator);
                dataset
            }
            None => match self.inner.provider.open(locator) {
                Ok(dataset) => {
                    debug!("Opened dataset handle for {locator}", locator: locator);
                    dataset
                }
                Err(err) => {
                    self.inner.lock().outstanding -= 1;
                    return Err(err);
                }
            },
        };

        Ok(PooledDataset {
            pool: Arc::clone(&self.inner),
            locator: locator.to_string(),
            dataset: Some(dataset),
        })
    }

    /// Close every idle handle; checked-out handles are closed as they return
    pub fn clear(&self) {
        let retired = std::mem::take(&mut self.inner.lock().idle);
        let count = retired.len();
        if count > 0 {
            debug!("Closing {count} idle dataset handles", count: count);
        }
        close_all(retired);
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            outstanding: state.outstanding,
            idle: state.idle.len(),
        }
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding the lock leaves the counters consistent
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn evict_expired(&self, state: &mut PoolState, retired: &mut Vec<IdleHandle>) {
        let timeout = self.config.idle_timeout();
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
            .into_iter()
            .partition(|h| h.since.elapsed() > timeout);
        state.idle = kept;
        retired.extend(expired);
    }

    fn release(&self, locator: String, dataset: Box<dyn ExternalDataset>) {
        let mut retired = Vec::new();
        {
            let mut state = self.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            self.evict_expired(&mut state, &mut retired);
            let handle = IdleHandle {
                locator,
                dataset,
                since: Instant::now(),
            };
            if state.idle.len() < self.config.max_idle {
                state.idle.push(handle);
            } else {
                retired.push(handle);
            }
        }
        close_all(retired);
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        close_all(std::mem::take(&mut state.idle));
    }
}

fn close_all(handles: Vec<IdleHandle>) {
    for mut handle in handles {
        let locator = handle.locator.as_str();
        debug!("Closing dataset handle for {locator}", locator: locator);
        handle.dataset.close();
    }
}

/// A checked-out dataset handle, returned to its pool exactly once
pub struct PooledDataset {
    pool: Arc<PoolInner>,
    locator: String,
    dataset: Option<Box<dyn ExternalDataset>>,
}

impl PooledDataset {
    #[must_use]
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Return the handle to the pool now rather than at drop
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(dataset) = self.dataset.take() {
            self.pool.release(std::mem::take(&mut self.locator), dataset);
        }
    }
}

impl std::fmt::Debug for PooledDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledDataset")
            .field("locator", &self.locator)
            .field("released", &self.dataset.is_none())
            .finish()
    }
}

impl Deref for PooledDataset {
    type Target = dyn ExternalDataset;

    fn deref(&self) -> &Self::Target {
        match self.dataset.as_deref() {
            Some(dataset) => dataset,
            // Only `give_back` empties the slot, and it runs from consuming
            // `release` or from `drop`
            None => unreachable!("pooled dataset used after release"),
        }
    }
}

impl Drop for PooledDataset {
    fn drop(&mut self) {
        self.give_back();
    }
}
