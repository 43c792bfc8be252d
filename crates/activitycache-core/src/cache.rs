//! The public cache facade: one transaction per call.

use std::marker::PhantomData;

use tracing::info;

use crate::assets::collect_garbage;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::merge;
use crate::position::{BlockHeight, LevelPointer, Position};
use crate::query;
use crate::store::{CacheStore, TxMode};
use crate::types::{ClosestInterval, ClosestIntervalQuery, PutActivities, Scope, StoredInterval};

/// Account-activity cache over a storage backend `S`, for position type `P`.
pub struct ActivityCache<P, S> {
    store: S,
    config: CacheConfig,
    _position: PhantomData<fn() -> P>,
}

/// Cache for integer-height chains.
pub type EvmActivityCache<S> = ActivityCache<BlockHeight, S>;

/// Cache for level/timestamp chains.
pub type TezosActivityCache<S> = ActivityCache<LevelPointer, S>;

impl<P, S> ActivityCache<P, S>
where
    P: Position,
    S: CacheStore<P>,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    pub fn with_config(store: S, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            _position: PhantomData,
        }
    }

    /// Return the closest known interval at or below `query.older_than` and
    /// its activities, newest first.
    ///
    /// `Ok(None)` means nothing is cached for the requested position; the
    /// caller should fetch from the indexer.
    pub async fn get_closest_interval(
        &self,
        query: &ClosestIntervalQuery<P>,
    ) -> Result<Option<ClosestInterval<P>>, CacheError> {
        let mut tx = self.store.begin(TxMode::ReadOnly).await?;
        query::closest_interval(tx.as_mut(), query, self.config.default_max_items).await
    }

    /// Record a contiguous chunk of history and reconcile intervals.
    ///
    /// Validation errors are raised before a transaction is opened; any other
    /// failure rolls the whole write back.
    pub async fn put_activities(&self, request: PutActivities<P>) -> Result<(), CacheError> {
        let Some(write) = merge::prepare(request)? else {
            return Ok(());
        };

        let mut tx = self.store.begin(TxMode::ReadWrite).await?;
        merge::apply(tx.as_mut(), write, self.config.max_merge_depth).await?;
        tx.commit().await
    }

    /// Forget everything cached for `(chain, account)`, across all filters.
    pub async fn delete_activities_by_account(
        &self,
        chain: &str,
        account: &str,
    ) -> Result<(), CacheError> {
        let mut tx = self.store.begin(TxMode::ReadWrite).await?;
        let (intervals, activities) = tx.delete_account(chain, account).await?;
        let assets = collect_garbage(tx.as_mut(), chain).await?;
        tx.commit().await?;

        info!(chain, account, intervals, activities, assets, "account activity purged");
        Ok(())
    }

    /// Stored intervals of `scope`, newest first.
    pub async fn intervals(&self, scope: &Scope) -> Result<Vec<StoredInterval<P>>, CacheError> {
        let mut tx = self.store.begin(TxMode::ReadOnly).await?;
        tx.intervals(scope).await
    }

    /// Number of asset-registry entries held for `chain`.
    pub async fn asset_count(&self, chain: &str) -> Result<usize, CacheError> {
        let mut tx = self.store.begin(TxMode::ReadOnly).await?;
        Ok(tx.asset_ids(chain).await?.len())
    }
}
