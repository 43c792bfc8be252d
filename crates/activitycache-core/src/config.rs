//! Cache configuration and its fluent builder.
//!
//! # Example
//!
//! ```rust
//! use activitycache_core::config::CacheConfig;
//!
//! let config = CacheConfig::builder()
//!     .default_max_items(50)
//!     .build();
//! assert_eq!(config.max_merge_depth, 5);
//! ```

use serde::{Deserialize, Serialize};

use crate::merge::MAX_MERGE_DEPTH;

/// Tunables shared by every cache operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How many times a filtered write may be split around catch-all
    /// intervals before the interval set is declared inconsistent.
    #[serde(default = "default_max_merge_depth")]
    pub max_merge_depth: usize,
    /// Page size applied to reads that don't set `max_items`. `None` = unbounded.
    #[serde(default)]
    pub default_max_items: Option<usize>,
}

fn default_max_merge_depth() -> usize {
    MAX_MERGE_DEPTH
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_merge_depth: MAX_MERGE_DEPTH,
            default_max_items: None,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }
}

/// Fluent builder for [`CacheConfig`].
#[derive(Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Set the filtered-merge split limit.
    pub fn max_merge_depth(mut self, depth: usize) -> Self {
        self.config.max_merge_depth = depth;
        self
    }

    /// Set the page size used when a read gives no `max_items`.
    pub fn default_max_items(mut self, n: usize) -> Self {
        self.config.default_max_items = Some(n);
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}
