//! Query engine — answers "activities older than P" from the closest known interval.

use tracing::debug;

use crate::assets::attach_assets;
use crate::error::CacheError;
use crate::position::Position;
use crate::range::PositionRange;
use crate::store::CacheTx;
use crate::types::{Activity, ClosestInterval, ClosestIntervalQuery, Scope, StoredInterval};

/// Find the most relevant interval for `query` and load its activities.
///
/// Returns `Ok(None)` when neither the filtered nor the catch-all scope has an
/// interval holding anything older than `older_than`.
pub(crate) async fn closest_interval<P: Position>(
    tx: &mut dyn CacheTx<P>,
    query: &ClosestIntervalQuery<P>,
    default_max_items: Option<usize>,
) -> Result<Option<ClosestInterval<P>>, CacheError> {
    let scope = query.scope();
    let older_than = query.older_than.as_ref();

    let filtered = newest_candidate(tx.intervals(&scope).await?, older_than);
    let catch_all = if scope.is_catch_all() {
        None
    } else {
        newest_candidate(tx.intervals(&scope.to_catch_all()).await?, older_than)
    };

    let chosen = match (filtered, catch_all) {
        (None, None) => return Ok(None),
        (Some(f), None) => f,
        (None, Some(c)) => c,
        // Ties favour the filter-specific interval
        (Some(f), Some(c)) => {
            if c.range.upper > f.range.upper {
                c
            } else {
                f
            }
        }
    };

    let upper = match older_than {
        Some(limit) if limit < &chosen.range.upper => limit.clone(),
        _ => chosen.range.upper.clone(),
    };
    let window = PositionRange::new(chosen.range.lower.clone(), upper);

    let mut stored = tx.activities_in_range(&chosen.scope, &window).await?;
    let mut lower_limit = window.lower.clone();
    if let Some(max) = query.max_items.or(default_max_items).filter(|n| *n > 0) {
        if stored.len() > max {
            stored.truncate(max);
            if let Some(last) = stored.last() {
                lower_limit = last.position.clone();
            }
        }
    }

    let mut activities = attach_assets(tx, stored).await?;
    if !scope.is_catch_all() && chosen.scope.is_catch_all() {
        activities = narrow_to_filter(activities, &scope);
    }

    debug!(
        chain = %scope.chain,
        account = %scope.account,
        filter = %scope.filter,
        from_catch_all = chosen.scope.is_catch_all(),
        upper = %window.upper,
        lower = %lower_limit,
        count = activities.len(),
        "closest interval loaded"
    );

    Ok(Some(ClosestInterval {
        activities,
        upper_limit: window.upper,
        lower_limit,
    }))
}

/// The interval with the greatest `upper` among those holding positions
/// older than `older_than`.
fn newest_candidate<P: Position>(
    intervals: Vec<StoredInterval<P>>,
    older_than: Option<&P>,
) -> Option<StoredInterval<P>> {
    intervals
        .into_iter()
        .filter(|i| older_than.map_or(true, |limit| &i.range.lower < limit))
        .max_by(|a, b| a.range.upper.cmp(&b.range.upper))
}

/// Keep only operations touching the filtered asset; drop emptied activities.
fn narrow_to_filter<P: Position>(activities: Vec<Activity<P>>, scope: &Scope) -> Vec<Activity<P>> {
    activities
        .into_iter()
        .filter_map(|mut activity| {
            activity.operations.retain(|op| {
                op.asset
                    .as_ref()
                    .map_or(false, |asset| asset.matches_filter(&scope.filter))
            });
            (!activity.operations.is_empty()).then_some(activity)
        })
        .collect()
}
