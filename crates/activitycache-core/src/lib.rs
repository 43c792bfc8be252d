//! activitycache-core — interval-tracking cache of wallet account activity.
//!
//! # Architecture
//!
//! ```text
//! ActivityCache
//!     ├── get_closest_interval   (query engine, read-only transaction)
//!     ├── put_activities         (merge engine, read-write transaction)
//!     │       ├── catch-all path  (overwrite + trim filtered + join)
//!     │       └── filtered path   (worklist carved around catch-all intervals)
//!     ├── delete_activities_by_account
//!     └── CacheStore backend (memory / SQLite)
//!             ├── activities     (chain, account, filter, position / hash)
//!             ├── intervals      (chain, account, filter, [lower, upper))
//!             └── asset registry (chain, contract, token id)
//! ```

pub mod assets;
pub mod cache;
pub mod config;
pub mod error;
pub mod merge;
pub mod position;
pub mod query;
pub mod range;
pub mod store;
pub mod types;

pub use cache::{ActivityCache, EvmActivityCache, TezosActivityCache};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use error::CacheError;
pub use merge::MAX_MERGE_DEPTH;
pub use position::{BlockHeight, ChainFamily, LevelPointer, Position, SortKey};
pub use range::PositionRange;
pub use store::{CacheStore, CacheTx, TxMode};
pub use types::{
    Activity, AssetKey, AssetRecord, ClosestInterval, ClosestIntervalQuery, Operation,
    OperationAsset, OperationKind, PutActivities, Scope, StoredActivity, StoredInterval,
    StoredOperation,
};
