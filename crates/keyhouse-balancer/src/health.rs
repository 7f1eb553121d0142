//! Health Probing
//!
//! A prober task walks the backend pool every `probe_interval`, issues
//! `GET /health` against each backend, and applies the result to the
//! pool's state machine. The prober is the only mutator of the alive-set;
//! forward failures are reported to clients but never touch health state.
//!
//! A probe counts as healthy exactly when the request succeeds with status
//! 200 - any other status, connect error or timeout marks the backend
//! dead until a later probe says otherwise.
//!
//! ## Usage
//!
//! ```ignore
//! use keyhouse_balancer::health::{HealthProber, HttpHealthChecker};
//!
//! let checker = Arc::new(HttpHealthChecker::new("http", Duration::from_secs(3)));
//! let prober = HealthProber::new(pool, checker, Duration::from_secs(10));
//! let handle = prober.start();
//!
//! // ... on shutdown:
//! handle.stop().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::pool::BackendPool;

/// The probing seam: answers whether one backend is healthy right now.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, addr: &str) -> bool;
}

/// Probes `GET {scheme}://{addr}/health` with a bounded timeout.
pub struct HttpHealthChecker {
    client: reqwest::Client,
    scheme: String,
    timeout: Duration,
}

impl HttpHealthChecker {
    pub fn new(scheme: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            scheme: scheme.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(&self, addr: &str) -> bool {
        let url = format!("{}://{}/health", self.scheme, addr);
        match tokio::time::timeout(self.timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => response.status() == reqwest::StatusCode::OK,
            Ok(Err(_)) | Err(_) => false,
        }
    }
}

/// Scripted checker for tests: backends are healthy only when marked so.
pub struct StaticHealthChecker {
    healthy: std::sync::Mutex<HashMap<String, bool>>,
}

impl StaticHealthChecker {
    pub fn new() -> Self {
        Self {
            healthy: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, addr: &str, healthy: bool) {
        self.healthy
            .lock()
            .expect("checker mutex poisoned")
            .insert(addr.to_string(), healthy);
    }
}

impl Default for StaticHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthChecker for StaticHealthChecker {
    async fn check(&self, addr: &str) -> bool {
        self.healthy
            .lock()
            .expect("checker mutex poisoned")
            .get(addr)
            .copied()
            .unwrap_or(false)
    }
}

/// Periodic prober over a backend pool.
pub struct HealthProber {
    pool: Arc<BackendPool>,
    checker: Arc<dyn HealthChecker>,
    interval: Duration,
}

impl HealthProber {
    pub fn new(pool: Arc<BackendPool>, checker: Arc<dyn HealthChecker>, interval: Duration) -> Self {
        Self {
            pool,
            checker,
            interval,
        }
    }

    /// Spawns the probe loop. The first cycle runs immediately, resolving
    /// the initial `Unknown` states without waiting a full interval.
    pub fn start(self) -> ProberHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("health prober shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.probe_all().await;
                    }
                }
            }
        });

        ProberHandle { shutdown_tx, task }
    }

    /// One probe cycle over every backend.
    pub async fn probe_all(&self) {
        for addr in self.pool.backend_addrs() {
            let alive = self.checker.check(&addr).await;
            self.pool.set_state(&addr, alive);
        }
    }
}

/// Handle to a running prober; stops the loop on request.
pub struct ProberHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ProberHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BackendState, SelectionPolicy};

    fn test_pool() -> Arc<BackendPool> {
        Arc::new(BackendPool::new(
            vec!["server1:8080".to_string(), "server2:8080".to_string()],
            SelectionPolicy::ConsistentHash,
        ))
    }

    #[tokio::test]
    async fn test_probe_cycle_resolves_unknown() {
        let pool = test_pool();
        let checker = Arc::new(StaticHealthChecker::new());
        checker.set("server1:8080", true);
        // server2 deliberately unscripted: checks come back unhealthy

        let prober = HealthProber::new(Arc::clone(&pool), checker, Duration::from_secs(10));
        prober.probe_all().await;

        let states: HashMap<_, _> = pool.states().into_iter().collect();
        assert_eq!(states["server1:8080"], BackendState::Alive);
        assert_eq!(states["server2:8080"], BackendState::Dead);
    }

    #[tokio::test]
    async fn test_probe_recovers_dead_backend() {
        let pool = test_pool();
        let checker = Arc::new(StaticHealthChecker::new());

        let prober = HealthProber::new(
            Arc::clone(&pool),
            Arc::clone(&checker) as Arc<dyn HealthChecker>,
            Duration::from_secs(10),
        );

        prober.probe_all().await;
        assert_eq!(pool.alive_count(), 0);

        checker.set("server1:8080", true);
        checker.set("server2:8080", true);
        prober.probe_all().await;
        assert_eq!(pool.alive_count(), 2);
    }

    #[tokio::test]
    async fn test_prober_loop_runs_and_stops() {
        let pool = test_pool();
        let checker = Arc::new(StaticHealthChecker::new());
        checker.set("server1:8080", true);
        checker.set("server2:8080", true);

        let prober = HealthProber::new(
            Arc::clone(&pool),
            checker as Arc<dyn HealthChecker>,
            Duration::from_millis(20),
        );
        let handle = prober.start();

        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.alive_count(), 2);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_http_checker_rejects_unreachable() {
        // Nothing listens on this port; the probe must come back unhealthy
        let checker = HttpHealthChecker::new("http", Duration::from_millis(200));
        assert!(!checker.check("127.0.0.1:1").await);
    }
}
