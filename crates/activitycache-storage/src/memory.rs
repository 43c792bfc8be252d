//! In-memory storage backend.
//!
//! Keeps intervals, activities and the asset registry in RAM behind a tokio
//! `RwLock`. Read transactions share the lock; a write transaction holds it
//! exclusively and edits a working copy that replaces the state on commit, so
//! a dropped or failed transaction leaves nothing behind.
//!
//! All data is lost when the process exits.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use activitycache_core::error::CacheError;
use activitycache_core::position::Position;
use activitycache_core::range::PositionRange;
use activitycache_core::store::{self, CacheStore, CacheTx, TxMode};
use activitycache_core::types::{
    AssetKey, AssetRecord, OperationAsset, Scope, StoredActivity, StoredInterval,
};

/// Tables of one in-memory cache.
#[derive(Debug, Clone)]
struct MemoryState<P> {
    intervals: BTreeMap<i64, StoredInterval<P>>,
    activities: BTreeMap<(Scope, String), StoredActivity<P>>,
    assets: BTreeMap<i64, AssetRecord>,
    next_interval_id: i64,
    next_asset_id: i64,
}

impl<P> Default for MemoryState<P> {
    fn default() -> Self {
        Self {
            intervals: BTreeMap::new(),
            activities: BTreeMap::new(),
            assets: BTreeMap::new(),
            next_interval_id: 1,
            next_asset_id: 1,
        }
    }
}

/// In-memory cache storage for one position type.
///
/// Cheaply cloneable; clones share the same tables.
pub struct MemoryStore<P> {
    state: Arc<RwLock<MemoryState<P>>>,
}

impl<P> Clone for MemoryStore<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<P> Default for MemoryStore<P> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }
}

impl<P: Position> MemoryStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored activities across all scopes.
    pub async fn activity_count(&self) -> usize {
        self.state.read().await.activities.len()
    }

    /// Total number of stored intervals across all scopes.
    pub async fn interval_count(&self) -> usize {
        self.state.read().await.intervals.len()
    }

    /// Total number of asset-registry entries across all chains.
    pub async fn asset_count(&self) -> usize {
        self.state.read().await.assets.len()
    }
}

#[async_trait]
impl<P: Position> CacheStore<P> for MemoryStore<P> {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn CacheTx<P>>, CacheError> {
        let access = match mode {
            TxMode::ReadOnly => Access::Read(Arc::clone(&self.state).read_owned().await),
            TxMode::ReadWrite => {
                let guard = Arc::clone(&self.state).write_owned().await;
                let working = Some((*guard).clone());
                Access::Write { guard, working }
            }
        };
        Ok(Box::new(MemoryTx { access }))
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

enum Access<P> {
    Read(OwnedRwLockReadGuard<MemoryState<P>>),
    Write {
        guard: OwnedRwLockWriteGuard<MemoryState<P>>,
        // Moved into `guard` on commit
        working: Option<MemoryState<P>>,
    },
}

/// A transaction over [`MemoryStore`].
pub struct MemoryTx<P> {
    access: Access<P>,
}

impl<P> MemoryTx<P> {
    fn state(&self) -> &MemoryState<P> {
        match &self.access {
            Access::Read(guard) => &**guard,
            Access::Write { guard, working } => working.as_ref().unwrap_or(&**guard),
        }
    }

    fn state_mut(&mut self) -> Result<&mut MemoryState<P>, CacheError> {
        match &mut self.access {
            Access::Read(_) => Err(CacheError::ReadOnly),
            Access::Write { working, .. } => working
                .as_mut()
                .ok_or_else(|| CacheError::Storage("transaction already committed".into())),
        }
    }
}

#[async_trait]
impl<P: Position> CacheTx<P> for MemoryTx<P> {
    fn mode(&self) -> TxMode {
        match self.access {
            Access::Read(_) => TxMode::ReadOnly,
            Access::Write { .. } => TxMode::ReadWrite,
        }
    }

    async fn intervals(&mut self, scope: &Scope) -> Result<Vec<StoredInterval<P>>, CacheError> {
        let mut found: Vec<_> = self
            .state()
            .intervals
            .values()
            .filter(|i| &i.scope == scope)
            .cloned()
            .collect();
        store::sort_intervals_newest_first(&mut found);
        Ok(found)
    }

    async fn account_intervals(
        &mut self,
        chain: &str,
        account: &str,
    ) -> Result<Vec<StoredInterval<P>>, CacheError> {
        let mut found: Vec<_> = self
            .state()
            .intervals
            .values()
            .filter(|i| i.scope.chain == chain && i.scope.account == account)
            .cloned()
            .collect();
        store::sort_intervals_newest_first(&mut found);
        Ok(found)
    }

    async fn insert_interval(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<i64, CacheError> {
        let state = self.state_mut()?;
        let id = state.next_interval_id;
        state.next_interval_id += 1;
        state.intervals.insert(
            id,
            StoredInterval {
                id,
                scope: scope.clone(),
                range: range.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_interval(&mut self, id: i64) -> Result<(), CacheError> {
        self.state_mut()?.intervals.remove(&id);
        Ok(())
    }

    async fn activities_in_range(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<Vec<StoredActivity<P>>, CacheError> {
        let mut found: Vec<_> = self
            .state()
            .activities
            .values()
            .filter(|a| &a.scope == scope && range.contains(&a.position))
            .cloned()
            .collect();
        store::sort_newest_first(&mut found);
        Ok(found)
    }

    async fn put_activity(&mut self, activity: StoredActivity<P>) -> Result<(), CacheError> {
        let key = (activity.scope.clone(), activity.hash.clone());
        self.state_mut()?.activities.insert(key, activity);
        Ok(())
    }

    async fn delete_activities_in_range(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<u64, CacheError> {
        let activities = &mut self.state_mut()?.activities;
        let before = activities.len();
        activities.retain(|_, a| !(&a.scope == scope && range.contains(&a.position)));
        Ok((before - activities.len()) as u64)
    }

    async fn delete_account(&mut self, chain: &str, account: &str) -> Result<(u64, u64), CacheError> {
        let state = self.state_mut()?;
        let owned = |scope: &Scope| scope.chain == chain && scope.account == account;

        let intervals_before = state.intervals.len();
        state.intervals.retain(|_, i| !owned(&i.scope));
        let activities_before = state.activities.len();
        state.activities.retain(|_, a| !owned(&a.scope));

        Ok((
            (intervals_before - state.intervals.len()) as u64,
            (activities_before - state.activities.len()) as u64,
        ))
    }

    async fn referenced_asset_ids(&mut self, chain: &str) -> Result<HashSet<i64>, CacheError> {
        Ok(self
            .state()
            .activities
            .values()
            .filter(|a| a.scope.chain == chain)
            .flat_map(|a| a.asset_ids())
            .collect())
    }

    async fn asset_by_key(&mut self, key: &AssetKey) -> Result<Option<AssetRecord>, CacheError> {
        Ok(self
            .state()
            .assets
            .values()
            .find(|record| {
                record.chain == key.chain
                    && record.contract == key.contract
                    && record.token_id == key.token_id
            })
            .cloned())
    }

    async fn assets_by_ids(&mut self, ids: &[i64]) -> Result<Vec<AssetRecord>, CacheError> {
        let assets = &self.state().assets;
        Ok(ids.iter().filter_map(|id| assets.get(id).cloned()).collect())
    }

    async fn insert_asset(&mut self, key: &AssetKey, asset: &OperationAsset) -> Result<i64, CacheError> {
        let state = self.state_mut()?;
        let id = state.next_asset_id;
        state.next_asset_id += 1;
        state.assets.insert(
            id,
            AssetRecord {
                id,
                chain: key.chain.clone(),
                contract: key.contract.clone(),
                token_id: key.token_id.clone(),
                symbol: asset.symbol.clone(),
                decimals: asset.decimals,
                icon_url: asset.icon_url.clone(),
                nft: asset.nft,
            },
        );
        Ok(id)
    }

    async fn asset_ids(&mut self, chain: &str) -> Result<Vec<i64>, CacheError> {
        Ok(self
            .state()
            .assets
            .values()
            .filter(|record| record.chain == chain)
            .map(|record| record.id)
            .collect())
    }

    async fn delete_assets(&mut self, ids: &[i64]) -> Result<(), CacheError> {
        let assets = &mut self.state_mut()?.assets;
        for id in ids {
            assets.remove(id);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CacheError> {
        if let Access::Write { guard, working } = &mut self.access {
            if let Some(state) = working.take() {
                **guard = state;
            }
        }
        Ok(())
    }
}
