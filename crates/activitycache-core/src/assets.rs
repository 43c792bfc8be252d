//! Asset registry maintenance.
//!
//! Operations reference registry entries by id instead of repeating token
//! metadata. Entries are created on first reference and removed once no
//! stored activity of the chain points at them; references are counted by
//! scanning, inside the same transaction as the deletion.

use std::collections::HashMap;

use tracing::debug;

use crate::error::CacheError;
use crate::position::Position;
use crate::store::CacheTx;
use crate::types::{Activity, AssetKey, AssetRef, Operation, StoredActivity, StoredOperation};

/// Resolves registry ids for the assets of a write, creating missing entries.
///
/// Remembers ids already resolved during the current call so repeated assets
/// cost one lookup.
pub(crate) struct AssetRegistrar {
    chain: String,
    resolved: HashMap<AssetKey, i64>,
}

impl AssetRegistrar {
    pub(crate) fn new(chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            resolved: HashMap::new(),
        }
    }

    /// Convert API operations into their stored form.
    pub(crate) async fn register<P: Position>(
        &mut self,
        tx: &mut dyn CacheTx<P>,
        operations: &[Operation],
    ) -> Result<Vec<StoredOperation>, CacheError> {
        let mut stored = Vec::with_capacity(operations.len());
        for op in operations {
            let asset = match &op.asset {
                Some(asset) => {
                    let key = AssetKey::for_asset(&self.chain, asset);
                    let asset_id = match self.resolved.get(&key) {
                        Some(id) => *id,
                        None => {
                            let id = match tx.asset_by_key(&key).await? {
                                Some(existing) => existing.id,
                                None => {
                                    let id = tx.insert_asset(&key, asset).await?;
                                    debug!(chain = %key.chain, contract = %key.contract, token_id = %key.token_id, id, "asset registered");
                                    id
                                }
                            };
                            self.resolved.insert(key, id);
                            id
                        }
                    };
                    Some(AssetRef {
                        asset_id,
                        amount: asset.amount.clone(),
                    })
                }
                None => None,
            };

            stored.push(StoredOperation {
                kind: op.kind,
                from: op.from.clone(),
                to: op.to.clone(),
                asset,
            });
        }
        Ok(stored)
    }
}

/// Rebuild API activities from stored ones, re-attaching registry metadata.
pub(crate) async fn attach_assets<P: Position>(
    tx: &mut dyn CacheTx<P>,
    stored: Vec<StoredActivity<P>>,
) -> Result<Vec<Activity<P>>, CacheError> {
    let mut ids: Vec<i64> = stored.iter().flat_map(|a| a.asset_ids()).collect();
    ids.sort_unstable();
    ids.dedup();

    let registry: HashMap<i64, _> = if ids.is_empty() {
        HashMap::new()
    } else {
        tx.assets_by_ids(&ids)
            .await?
            .into_iter()
            .map(|record| (record.id, record))
            .collect()
    };

    stored
        .into_iter()
        .map(|activity| {
            let operations = activity
                .operations
                .into_iter()
                .map(|op| {
                    let asset = match op.asset {
                        Some(AssetRef { asset_id, amount }) => {
                            let record = registry.get(&asset_id).ok_or_else(|| {
                                CacheError::Storage(format!("dangling asset reference {asset_id}"))
                            })?;
                            Some(record.to_operation_asset(&amount))
                        }
                        None => None,
                    };
                    Ok(Operation {
                        kind: op.kind,
                        from: op.from,
                        to: op.to,
                        asset,
                    })
                })
                .collect::<Result<Vec<_>, CacheError>>()?;

            Ok(Activity {
                chain: activity.scope.chain,
                hash: activity.hash,
                position: activity.position,
                operations,
            })
        })
        .collect()
}

/// Delete registry entries of `chain` no surviving activity references.
///
/// Returns the number of deleted entries.
pub(crate) async fn collect_garbage<P: Position>(
    tx: &mut dyn CacheTx<P>,
    chain: &str,
) -> Result<usize, CacheError> {
    let referenced = tx.referenced_asset_ids(chain).await?;
    let orphans: Vec<i64> = tx
        .asset_ids(chain)
        .await?
        .into_iter()
        .filter(|id| !referenced.contains(id))
        .collect();

    if !orphans.is_empty() {
        tx.delete_assets(&orphans).await?;
        debug!(chain, count = orphans.len(), "orphaned assets removed");
    }
    Ok(orphans.len())
}
