//! Balancer error types.
//!
//! Both variants map to `503 Service Unavailable` at the HTTP surface; the
//! balancer retries nothing on its own, and a failed forward never marks a
//! backend unhealthy - only the prober changes the alive-set.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("no alive backend available")]
    NoBackendAvailable,

    #[error("forward failed: {0}")]
    Forward(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, BalancerError>;
