//! Store Configuration
//!
//! ## StoreConfig
//!
//! Controls how segments are rolled and when sealed segments are merged:
//!
//! - **size_limit**: Roll the active segment when the next record would push
//!   it past this size (default: 4MB)
//! - **compaction_threshold**: Number of sealed segments that triggers a
//!   background compaction (default: 2)
//!
//! ## Usage
//!
//! ```ignore
//! use keyhouse_store::StoreConfig;
//!
//! // Small segments for tests
//! let config = StoreConfig {
//!     size_limit: 250,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum segment size in bytes before rollover (default: 4MB)
    #[serde(default = "default_size_limit")]
    pub size_limit: u64,

    /// Sealed-segment count that triggers compaction (default: 2)
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            size_limit: default_size_limit(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

fn default_size_limit() -> u64 {
    4 * 1024 * 1024 // 4MB
}

fn default_compaction_threshold() -> usize {
    2
}
