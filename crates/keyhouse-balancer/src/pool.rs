//! Backend Pool and Selection
//!
//! The pool tracks a static list of backends, each with a health state and
//! the load counters the selection policies read.
//!
//! ## Health State Machine
//!
//! ```text
//! Unknown ──▶ Alive ◀──▶ Dead
//! ```
//!
//! Every backend starts `Unknown`; the first probe cycle resolves it. Only
//! the prober moves a backend between states - a failed forward never
//! does. Only `Alive` backends are selectable.
//!
//! ## Selection Policies
//!
//! - **ConsistentHash** (default): `alive[hash(path) % len(alive)]` with a
//!   SHA-256 path hash truncated to its first four big-endian bytes. The
//!   same path maps to the same backend while the alive-set is stable,
//!   which buys cache affinity and reproducibility under test.
//! - **LeastConnections**: lowest in-flight count, ties broken by lowest
//!   index.
//! - **LeastTraffic**: lowest cumulative forwarded body bytes.
//!
//! Selection and its counter updates run under one mutex, so they are
//! atomic with respect to concurrent selections and health updates. The
//! in-flight count is released through [`BackendLease`], which also folds
//! the forwarded byte count back into the pool when the response body has
//! been fully relayed (or the request was abandoned).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{BalancerError, Result};

/// Health state of a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendState {
    /// No probe has resolved this backend yet.
    Unknown,
    /// Last probe returned 200.
    Alive,
    /// Last probe errored or returned non-200.
    Dead,
}

impl BackendState {
    pub fn is_alive(self) -> bool {
        matches!(self, BackendState::Alive)
    }
}

/// Backend selection policy; one is injected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    #[default]
    ConsistentHash,
    LeastConnections,
    LeastTraffic,
}

#[derive(Debug)]
struct BackendSlot {
    addr: String,
    state: BackendState,
    in_flight: u64,
    bytes_forwarded: u64,
}

/// The static backend pool.
pub struct BackendPool {
    slots: Arc<Mutex<Vec<BackendSlot>>>,
    policy: SelectionPolicy,
}

impl BackendPool {
    pub fn new(backends: Vec<String>, policy: SelectionPolicy) -> Self {
        let slots = backends
            .into_iter()
            .map(|addr| BackendSlot {
                addr,
                state: BackendState::Unknown,
                in_flight: 0,
                bytes_forwarded: 0,
            })
            .collect();

        Self {
            slots: Arc::new(Mutex::new(slots)),
            policy,
        }
    }

    /// Picks an alive backend for `path` according to the configured
    /// policy, charging one in-flight request to it. The returned lease
    /// releases the charge on drop.
    pub fn select(&self, path: &str) -> Result<BackendLease> {
        let mut slots = self.slots.lock().expect("pool mutex poisoned");

        let alive: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state.is_alive())
            .map(|(i, _)| i)
            .collect();

        if alive.is_empty() {
            return Err(BalancerError::NoBackendAvailable);
        }

        let chosen = match self.policy {
            SelectionPolicy::ConsistentHash => alive[hash_path(path) as usize % alive.len()],
            SelectionPolicy::LeastConnections => alive
                .iter()
                .copied()
                .min_by_key(|&i| (slots[i].in_flight, i))
                .expect("alive set is non-empty"),
            SelectionPolicy::LeastTraffic => alive
                .iter()
                .copied()
                .min_by_key(|&i| (slots[i].bytes_forwarded, i))
                .expect("alive set is non-empty"),
        };

        slots[chosen].in_flight += 1;
        let addr = slots[chosen].addr.clone();

        Ok(BackendLease {
            slots: Arc::clone(&self.slots),
            index: chosen,
            addr,
            bytes: AtomicU64::new(0),
        })
    }

    /// Applies a probe result. The prober is the sole caller; state
    /// transitions are logged.
    pub fn set_state(&self, addr: &str, alive: bool) {
        let mut slots = self.slots.lock().expect("pool mutex poisoned");
        let Some(slot) = slots.iter_mut().find(|slot| slot.addr == addr) else {
            return;
        };

        let next = if alive {
            BackendState::Alive
        } else {
            BackendState::Dead
        };

        if slot.state != next {
            info!(backend = %addr, from = ?slot.state, to = ?next, "backend state changed");
            slot.state = next;
        }
    }

    /// Addresses of every backend, alive or not.
    pub fn backend_addrs(&self) -> Vec<String> {
        self.slots
            .lock()
            .expect("pool mutex poisoned")
            .iter()
            .map(|slot| slot.addr.clone())
            .collect()
    }

    /// Current `(addr, state)` pairs.
    pub fn states(&self) -> Vec<(String, BackendState)> {
        self.slots
            .lock()
            .expect("pool mutex poisoned")
            .iter()
            .map(|slot| (slot.addr.clone(), slot.state))
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.slots
            .lock()
            .expect("pool mutex poisoned")
            .iter()
            .filter(|slot| slot.state.is_alive())
            .count()
    }
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool")
            .field("policy", &self.policy)
            .field("backends", &self.states())
            .finish()
    }
}

/// One dispatched request's hold on a backend.
///
/// Dropping the lease decrements the backend's in-flight count and folds
/// the recorded byte count into its cumulative traffic, whether the
/// forward completed or was abandoned mid-body.
pub struct BackendLease {
    slots: Arc<Mutex<Vec<BackendSlot>>>,
    index: usize,
    addr: String,
    bytes: AtomicU64,
}

impl BackendLease {
    /// Address of the chosen backend.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Adds relayed response-body bytes for the least-traffic policy.
    pub fn record_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().expect("pool mutex poisoned");
        let slot = &mut slots[self.index];
        slot.in_flight = slot.in_flight.saturating_sub(1);
        slot.bytes_forwarded += self.bytes.load(Ordering::Relaxed);
    }
}

/// SHA-256 of the path, truncated to the first four bytes, big-endian.
fn hash_path(path: &str) -> u32 {
    let digest = Sha256::digest(path.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
