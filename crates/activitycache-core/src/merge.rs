//! Merge engine — records a freshly fetched chunk of history and reconciles it
//! with the intervals already known for the account.
//!
//! A write asserts "everything in `[oldest, older_than)` for this scope is now
//! known". Two paths:
//!
//! - **catch-all** (`filter == ""`): overwrite the range, trim filter-specific
//!   intervals out of it, then join with touching catch-all intervals.
//! - **filter-specific**: never re-claim a range a catch-all interval already
//!   answers. The asserted range is carved around catch-all intervals by an
//!   explicit worklist whose depth is capped; running past the cap means the
//!   stored intervals already violate their invariants.
//!
//! Both paths end with asset-registry garbage collection and run inside the
//! caller's transaction.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::assets::{collect_garbage, AssetRegistrar};
use crate::error::CacheError;
use crate::position::Position;
use crate::range::PositionRange;
use crate::store::CacheTx;
use crate::types::{Activity, PutActivities, Scope, StoredActivity, StoredInterval};

/// Default cap on filter-path worklist depth.
pub const MAX_MERGE_DEPTH: usize = 5;

/// A validated write, ready to be applied.
#[derive(Debug, Clone)]
pub(crate) struct PreparedWrite<P> {
    pub scope: Scope,
    pub range: PositionRange<P>,
    /// Stored activities of the scope below this position are replaced;
    /// those at or above it are kept.
    pub complete_below: P,
    /// Newest first, all inside `range`.
    pub activities: Vec<Activity<P>>,
}

/// Validate a write request and derive the asserted range.
///
/// Returns `Ok(None)` when the request asserts nothing. Fails with
/// [`CacheError::InvalidInput`] before anything is touched when the batch
/// mixes chains.
pub(crate) fn prepare<P: Position>(
    request: PutActivities<P>,
) -> Result<Option<PreparedWrite<P>>, CacheError> {
    let PutActivities {
        mut activities,
        chain,
        account,
        filter,
        older_than,
    } = request;

    if let Some(foreign) = activities.iter().find(|a| a.chain != chain) {
        return Err(CacheError::InvalidInput(format!(
            "activity {} belongs to chain '{}', expected '{}'",
            foreign.hash, foreign.chain, chain
        )));
    }

    activities.sort_by(|a, b| {
        b.position
            .cmp(&a.position)
            .then_with(|| b.hash.cmp(&a.hash))
    });

    // A page may repeat the block or level it was requested below; the bound
    // then grows to cover it but only positions below `older_than` are replaced.
    let upper = match (&older_than, activities.first()) {
        (Some(limit), Some(newest)) if &newest.position >= limit => {
            let raised = newest.position.shift(1)?;
            debug!(hash = %newest.hash, requested = %limit, raised = %raised, "write bound raised");
            raised
        }
        (Some(limit), _) => limit.clone(),
        (None, Some(newest)) => newest.position.shift(1)?,
        (None, None) => return Ok(None),
    };
    let complete_below = older_than.unwrap_or_else(|| upper.clone());

    let lower = activities
        .last()
        .map(|oldest| oldest.position.clone())
        .unwrap_or_else(P::genesis);

    let range = PositionRange::new(lower, upper);
    if range.is_empty() {
        return Ok(None);
    }

    Ok(Some(PreparedWrite {
        scope: Scope::new(chain, account, filter),
        range,
        complete_below,
        activities,
    }))
}

/// Apply a prepared write inside `tx`.
pub(crate) async fn apply<P: Position>(
    tx: &mut dyn CacheTx<P>,
    write: PreparedWrite<P>,
    max_depth: usize,
) -> Result<(), CacheError> {
    let chain = write.scope.chain.clone();
    let mut registrar = AssetRegistrar::new(chain.clone());

    if write.scope.is_catch_all() {
        overwrite_for_all_contracts(tx, &mut registrar, write).await?;
    } else {
        overwrite_by_filter(tx, &mut registrar, write, max_depth).await?;
    }

    collect_garbage(tx, &chain).await?;
    Ok(())
}

// ─── Catch-all path ───────────────────────────────────────────────────────────

async fn overwrite_for_all_contracts<P: Position>(
    tx: &mut dyn CacheTx<P>,
    registrar: &mut AssetRegistrar,
    write: PreparedWrite<P>,
) -> Result<(), CacheError> {
    let PreparedWrite {
        scope,
        range,
        complete_below,
        activities,
    } = write;

    let replaced = tx
        .delete_activities_in_range(&scope, &replaced_part(&range, &complete_below))
        .await?;
    insert_activities(tx, registrar, &scope, &activities).await?;

    let existing = tx.intervals(&scope).await?;
    if existing.iter().any(|i| i.range.covers(&range)) {
        debug!(
            chain = %scope.chain,
            account = %scope.account,
            lower = %range.lower,
            upper = %range.upper,
            replaced,
            "catch-all range already known"
        );
        return Ok(());
    }

    trim_filtered_intervals(tx, &scope, &range).await?;

    let joined = join_touching(tx, &scope, &range, existing).await?;
    debug!(
        chain = %scope.chain,
        account = %scope.account,
        lower = %joined.lower,
        upper = %joined.upper,
        inserted = activities.len(),
        replaced,
        "catch-all interval recorded"
    );
    Ok(())
}

/// Cut `range` out of every filter-specific interval of the account and drop
/// the filtered activities inside it: the catch-all range now answers for them.
async fn trim_filtered_intervals<P: Position>(
    tx: &mut dyn CacheTx<P>,
    catch_all: &Scope,
    range: &PositionRange<P>,
) -> Result<(), CacheError> {
    let overlapping: Vec<StoredInterval<P>> = tx
        .account_intervals(&catch_all.chain, &catch_all.account)
        .await?
        .into_iter()
        .filter(|i| !i.scope.is_catch_all() && i.range.overlaps(range))
        .collect();

    let mut scopes = BTreeSet::new();
    for interval in overlapping {
        tx.delete_interval(interval.id).await?;
        for piece in interval.range.subtract(range) {
            tx.insert_interval(&interval.scope, &piece).await?;
        }
        debug!(
            filter = %interval.scope.filter,
            lower = %interval.range.lower,
            upper = %interval.range.upper,
            "filtered interval trimmed"
        );
        scopes.insert(interval.scope);
    }

    for scope in &scopes {
        tx.delete_activities_in_range(scope, range).await?;
    }
    Ok(())
}

// ─── Filter-specific path ─────────────────────────────────────────────────────

/// One pending sub-range of a filtered write.
struct MergeTask<P> {
    range: PositionRange<P>,
    activities: Vec<Activity<P>>,
    depth: usize,
}

impl<P: Position> MergeTask<P> {
    /// A narrower task holding only the activities inside `range`.
    fn narrowed(&self, range: PositionRange<P>) -> Self {
        let activities = self
            .activities
            .iter()
            .filter(|a| range.contains(&a.position))
            .cloned()
            .collect();
        Self {
            range,
            activities,
            depth: self.depth + 1,
        }
    }
}

async fn overwrite_by_filter<P: Position>(
    tx: &mut dyn CacheTx<P>,
    registrar: &mut AssetRegistrar,
    write: PreparedWrite<P>,
    max_depth: usize,
) -> Result<(), CacheError> {
    let scope = write.scope;
    let catch_all_scope = scope.to_catch_all();
    let complete_below = write.complete_below;

    let mut tasks = vec![MergeTask {
        range: write.range,
        activities: write.activities,
        depth: 0,
    }];

    while let Some(task) = tasks.pop() {
        if task.depth > max_depth {
            warn!(
                chain = %scope.chain,
                account = %scope.account,
                filter = %scope.filter,
                depth = task.depth,
                lower = %task.range.lower,
                upper = %task.range.upper,
                "filtered merge exceeded depth limit"
            );
            return Err(CacheError::Consistency {
                depth: task.depth,
                reason: format!(
                    "range [{}, {}) of filter '{}' did not settle within {max_depth} splits",
                    task.range.lower, task.range.upper, scope.filter
                ),
            });
        }
        if task.range.is_empty() {
            continue;
        }

        let catch_all = tx.intervals(&catch_all_scope).await?;
        if catch_all.iter().any(|c| c.range.covers(&task.range)) {
            debug!(filter = %scope.filter, lower = %task.range.lower, upper = %task.range.upper, "range answered by catch-all");
            continue;
        }

        tx.delete_activities_in_range(&scope, &replaced_part(&task.range, &complete_below))
            .await?;

        let own = tx.intervals(&scope).await?;
        if own.iter().any(|i| i.range.covers(&task.range)) {
            insert_activities(tx, registrar, &scope, &task.activities).await?;
            continue;
        }

        for subset in own.iter().filter(|i| task.range.covers(&i.range)) {
            tx.delete_interval(subset.id).await?;
        }

        let inner: Vec<PositionRange<P>> = catch_all
            .iter()
            .filter(|c| task.range.covers(&c.range))
            .map(|c| c.range.clone())
            .collect();
        if !inner.is_empty() {
            for gap in task.range.gaps_around(&inner) {
                tasks.push(task.narrowed(gap));
            }
            continue;
        }

        let overlapping: Vec<&StoredInterval<P>> =
            catch_all.iter().filter(|c| c.range.overlaps(&task.range)).collect();

        if let Some(newer) = overlapping.iter().find(|c| c.range.lower > task.range.lower) {
            let below = PositionRange::new(task.range.lower.clone(), newer.range.lower.clone());
            tasks.push(task.narrowed(below));
            continue;
        }

        if let Some(older) = overlapping.iter().find(|c| c.range.upper < task.range.upper) {
            let above = PositionRange::new(older.range.upper.clone(), task.range.upper.clone());
            tasks.push(task.narrowed(above));
            continue;
        }

        let own = tx.intervals(&scope).await?;
        let joined = join_touching(tx, &scope, &task.range, own).await?;
        insert_activities(tx, registrar, &scope, &task.activities).await?;
        debug!(
            chain = %scope.chain,
            account = %scope.account,
            filter = %scope.filter,
            lower = %joined.lower,
            upper = %joined.upper,
            depth = task.depth,
            inserted = task.activities.len(),
            "filtered interval recorded"
        );
    }
    Ok(())
}

// ─── Shared steps ─────────────────────────────────────────────────────────────

/// The part of `range` whose stored activities a write replaces.
fn replaced_part<P: Position>(range: &PositionRange<P>, complete_below: &P) -> PositionRange<P> {
    let upper = range.upper.clone().min(complete_below.clone());
    PositionRange::new(range.lower.clone(), upper)
}

/// Replace every interval of `scope` touching `range` with their joint hull.
///
/// Returns the stored range.
async fn join_touching<P: Position>(
    tx: &mut dyn CacheTx<P>,
    scope: &Scope,
    range: &PositionRange<P>,
    existing: Vec<StoredInterval<P>>,
) -> Result<PositionRange<P>, CacheError> {
    let touching: Vec<StoredInterval<P>> =
        existing.into_iter().filter(|i| i.range.touches(range)).collect();
    let joined = range.join(touching.iter().map(|i| &i.range));

    for interval in &touching {
        tx.delete_interval(interval.id).await?;
    }
    tx.insert_interval(scope, &joined).await?;
    Ok(joined)
}

async fn insert_activities<P: Position>(
    tx: &mut dyn CacheTx<P>,
    registrar: &mut AssetRegistrar,
    scope: &Scope,
    activities: &[Activity<P>],
) -> Result<(), CacheError> {
    for activity in activities {
        let operations = registrar.register(tx, &activity.operations).await?;
        tx.put_activity(StoredActivity {
            scope: scope.clone(),
            hash: activity.hash.clone(),
            position: activity.position.clone(),
            operations,
        })
        .await?;
    }
    Ok(())
}
