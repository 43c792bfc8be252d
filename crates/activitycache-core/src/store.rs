//! Storage seam — the transactional primitives the query and merge engines run on.
//!
//! A backend hands out one [`CacheTx`] per public cache call. Everything the
//! call does goes through that transaction; dropping it without
//! [`CacheTx::commit`] discards every change.
//!
//! Implementations: `MemoryStore` and `SqliteStore` in `activitycache-storage`.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::position::Position;
use crate::range::PositionRange;
use crate::types::{AssetKey, AssetRecord, OperationAsset, Scope, StoredActivity, StoredInterval};

/// Access mode requested when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

impl TxMode {
    /// Fails with [`CacheError::ReadOnly`] unless writes are allowed.
    pub fn ensure_writable(self) -> Result<(), CacheError> {
        match self {
            Self::ReadWrite => Ok(()),
            Self::ReadOnly => Err(CacheError::ReadOnly),
        }
    }
}

/// A backend able to open cache transactions for one position type.
#[async_trait]
pub trait CacheStore<P: Position>: Send + Sync {
    /// Open a transaction spanning the activity, interval and asset tables.
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn CacheTx<P>>, CacheError>;
}

/// One atomic unit of work against the three cache tables.
#[async_trait]
pub trait CacheTx<P: Position>: Send {
    fn mode(&self) -> TxMode;

    // ─── Intervals ────────────────────────────────────────────────────────────

    /// All intervals of `scope`, newest (greatest `upper`) first.
    async fn intervals(&mut self, scope: &Scope) -> Result<Vec<StoredInterval<P>>, CacheError>;

    /// All intervals of every scope under `(chain, account)`, newest first.
    async fn account_intervals(
        &mut self,
        chain: &str,
        account: &str,
    ) -> Result<Vec<StoredInterval<P>>, CacheError>;

    async fn insert_interval(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<i64, CacheError>;

    async fn delete_interval(&mut self, id: i64) -> Result<(), CacheError>;

    // ─── Activities ───────────────────────────────────────────────────────────

    /// Activities of `scope` with a position inside `range`, newest first.
    async fn activities_in_range(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<Vec<StoredActivity<P>>, CacheError>;

    /// Insert or replace (identity: scope + hash).
    async fn put_activity(&mut self, activity: StoredActivity<P>) -> Result<(), CacheError>;

    /// Returns the number of deleted activities.
    async fn delete_activities_in_range(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<u64, CacheError>;

    /// Drop every interval and activity of `(chain, account)`.
    /// Returns `(intervals, activities)` deleted.
    async fn delete_account(&mut self, chain: &str, account: &str) -> Result<(u64, u64), CacheError>;

    /// Registry ids referenced by any stored activity of `chain`, across accounts.
    async fn referenced_asset_ids(&mut self, chain: &str) -> Result<HashSet<i64>, CacheError>;

    // ─── Asset registry ───────────────────────────────────────────────────────

    async fn asset_by_key(&mut self, key: &AssetKey) -> Result<Option<AssetRecord>, CacheError>;

    async fn assets_by_ids(&mut self, ids: &[i64]) -> Result<Vec<AssetRecord>, CacheError>;

    /// Create a registry entry and return its id.
    async fn insert_asset(&mut self, key: &AssetKey, asset: &OperationAsset) -> Result<i64, CacheError>;

    /// Ids of every registry entry of `chain`.
    async fn asset_ids(&mut self, chain: &str) -> Result<Vec<i64>, CacheError>;

    async fn delete_assets(&mut self, ids: &[i64]) -> Result<(), CacheError>;

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Make every change of this transaction visible. A second call is a no-op.
    async fn commit(&mut self) -> Result<(), CacheError>;
}

/// Sort activities newest first; equal positions order by hash, descending.
pub fn sort_newest_first<P: Position>(activities: &mut [StoredActivity<P>]) {
    activities.sort_by(|a, b| {
        b.position
            .cmp(&a.position)
            .then_with(|| b.hash.cmp(&a.hash))
    });
}

/// Sort intervals by `upper`, newest first.
pub fn sort_intervals_newest_first<P: Position>(intervals: &mut [StoredInterval<P>]) {
    intervals.sort_by(|a, b| b.range.upper.cmp(&a.range.upper));
}
