//! End-to-end cache scenarios over the in-memory backend.
//!
//! Each test drives the public `ActivityCache` API only and asserts the
//! resulting intervals, activities and asset registry.

use activitycache_core::{
    Activity, BlockHeight, CacheConfig, CacheError, ClosestInterval, ClosestIntervalQuery,
    EvmActivityCache, LevelPointer, Operation, OperationAsset, OperationKind, PutActivities, Scope,
    TezosActivityCache,
};
use activitycache_storage::MemoryStore;

const CHAIN: &str = "1";
const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
const BOB: &str = "0xb0b0000000000000000000000000000000000002";
const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn transfer(hash: &str, height: u64, contract: &str, amount: &str) -> Activity<BlockHeight> {
    Activity {
        chain: CHAIN.into(),
        hash: hash.into(),
        position: BlockHeight(height),
        operations: vec![Operation {
            kind: OperationKind::Receive,
            from: BOB.into(),
            to: ALICE.into(),
            asset: Some(OperationAsset {
                contract: contract.into(),
                token_id: None,
                symbol: if contract == USDC { "USDC" } else { "DAI" }.into(),
                decimals: if contract == USDC { 6 } else { 18 },
                icon_url: None,
                nft: false,
                amount: amount.into(),
            }),
        }],
    }
}

fn usdc(hash: &str, height: u64) -> Activity<BlockHeight> {
    transfer(hash, height, USDC, "1000000")
}

fn dai(hash: &str, height: u64) -> Activity<BlockHeight> {
    transfer(hash, height, DAI, "5000000000000000000")
}

fn setup() -> (MemoryStore<BlockHeight>, EvmActivityCache<MemoryStore<BlockHeight>>) {
    let store = MemoryStore::new();
    let cache = EvmActivityCache::new(store.clone());
    (store, cache)
}

async fn put(
    cache: &EvmActivityCache<MemoryStore<BlockHeight>>,
    account: &str,
    filter: &str,
    activities: Vec<Activity<BlockHeight>>,
    older_than: u64,
) {
    cache
        .put_activities(
            PutActivities::new(CHAIN, account, activities)
                .filter(filter)
                .older_than(BlockHeight(older_than)),
        )
        .await
        .unwrap();
}

/// Stored `[lower, upper)` pairs of a scope, newest first.
async fn ranges(
    cache: &EvmActivityCache<MemoryStore<BlockHeight>>,
    account: &str,
    filter: &str,
) -> Vec<(u64, u64)> {
    cache
        .intervals(&Scope::new(CHAIN, account, filter))
        .await
        .unwrap()
        .into_iter()
        .map(|i| (i.range.lower.0, i.range.upper.0))
        .collect()
}

async fn query(
    cache: &EvmActivityCache<MemoryStore<BlockHeight>>,
    query: ClosestIntervalQuery<BlockHeight>,
) -> ClosestInterval<BlockHeight> {
    cache
        .get_closest_interval(&query)
        .await
        .unwrap()
        .expect("an interval should answer the query")
}

fn hashes(result: &ClosestInterval<BlockHeight>) -> Vec<&str> {
    result.activities.iter().map(|a| a.hash.as_str()).collect()
}

/// Contract of every asset-bearing operation, newest first.
fn contracts(result: &ClosestInterval<BlockHeight>) -> Vec<&str> {
    result
        .activities
        .iter()
        .flat_map(|a| &a.operations)
        .filter_map(|op| op.asset.as_ref())
        .map(|asset| asset.contract.as_str())
        .collect()
}

// ─── Catch-all merging ────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_cache_answers_nothing() {
    let (_, cache) = setup();
    let result = cache
        .get_closest_interval(&ClosestIntervalQuery::new(CHAIN, ALICE))
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn adjacent_chunks_join_into_one_interval() {
    let (_, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xa", 100), dai("0xb", 90)], 110).await;
    put(&cache, ALICE, "", vec![usdc("0xc", 80), dai("0xd", 70)], 90).await;

    assert_eq!(ranges(&cache, ALICE, "").await, vec![(70, 110)]);

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert_eq!(hashes(&result), vec!["0xa", "0xb", "0xc", "0xd"]);
    assert_eq!(result.upper_limit, BlockHeight(110));
    assert_eq!(result.lower_limit, BlockHeight(70));
}

#[tokio::test]
async fn disjoint_chunks_stay_apart() {
    let (_, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xa", 100), usdc("0xb", 90)], 110).await;
    put(&cache, ALICE, "", vec![usdc("0xc", 20), usdc("0xd", 10)], 30).await;

    assert_eq!(ranges(&cache, ALICE, "").await, vec![(90, 110), (10, 30)]);

    // Newest interval wins without a bound
    let newest = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert_eq!(hashes(&newest), vec!["0xa", "0xb"]);

    // Inside the gap, the older interval answers up to its own upper bound
    let older = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).older_than(BlockHeight(50))).await;
    assert_eq!(hashes(&older), vec!["0xc", "0xd"]);
    assert_eq!(older.upper_limit, BlockHeight(30));
    assert_eq!(older.lower_limit, BlockHeight(10));
}

#[tokio::test]
async fn query_bound_cuts_into_interval() {
    let (_, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xa", 100), usdc("0xb", 90), usdc("0xc", 80)], 110).await;

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).older_than(BlockHeight(90))).await;
    assert_eq!(hashes(&result), vec!["0xc"]);
    assert_eq!(result.upper_limit, BlockHeight(90));
    assert_eq!(result.lower_limit, BlockHeight(80));
}

#[tokio::test]
async fn gap_write_merges_both_neighbours() {
    let (_, cache) = setup();
    put(&cache, ALICE, USDC, vec![usdc("0xa", 100), usdc("0xb", 90)], 110).await;
    put(&cache, ALICE, USDC, vec![usdc("0xe", 20), usdc("0xf", 10)], 30).await;
    assert_eq!(ranges(&cache, ALICE, USDC).await.len(), 2);

    // [30, 90) is adjacent to both stored intervals
    put(&cache, ALICE, USDC, vec![usdc("0xc", 60), usdc("0xd", 30)], 90).await;

    assert_eq!(ranges(&cache, ALICE, USDC).await, vec![(10, 110)]);
    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).filter(USDC)).await;
    assert_eq!(hashes(&result), vec!["0xa", "0xb", "0xc", "0xd", "0xe", "0xf"]);
}

#[tokio::test]
async fn superset_write_replaces_single_activity() {
    let (store, cache) = setup();
    put(
        &cache,
        ALICE,
        "",
        vec![usdc("0xh0", 40), usdc("0xh1", 30), usdc("0xh2", 20), usdc("0xh3", 10)],
        50,
    )
    .await;

    let replacement = transfer("0xh1", 30, USDC, "-42");
    put(&cache, ALICE, "", vec![replacement], 31).await;

    assert_eq!(ranges(&cache, ALICE, "").await, vec![(10, 50)]);
    assert_eq!(store.activity_count().await, 4);

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert_eq!(hashes(&result), vec!["0xh0", "0xh1", "0xh2", "0xh3"]);
    let amounts: Vec<&str> = result
        .activities
        .iter()
        .map(|a| a.operations[0].asset.as_ref().unwrap().amount.as_str())
        .collect();
    assert_eq!(amounts, vec!["1000000", "-42", "1000000", "1000000"]);
    assert_eq!(store.asset_count().await, 1);
}

#[tokio::test]
async fn repeated_write_is_idempotent() {
    let (store, cache) = setup();
    let batch = || vec![usdc("0xa", 100), dai("0xb", 90), usdc("0xc", 80)];

    put(&cache, ALICE, "", batch(), 110).await;
    let first = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;

    put(&cache, ALICE, "", batch(), 110).await;
    let second = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;

    assert_eq!(first, second);
    assert_eq!(store.interval_count().await, 1);
    assert_eq!(store.activity_count().await, 3);
    assert_eq!(store.asset_count().await, 2);
}

#[tokio::test]
async fn activities_roundtrip_with_asset_metadata() {
    let (_, cache) = setup();
    let nft = Activity {
        chain: CHAIN.into(),
        hash: "0xnft".into(),
        position: BlockHeight(77),
        operations: vec![
            Operation {
                kind: OperationKind::Send,
                from: ALICE.into(),
                to: BOB.into(),
                asset: Some(OperationAsset {
                    contract: "0xBC4CA0EdA7647A8aB7C2061c2E118A18a936f13D".into(),
                    token_id: Some("8520".into()),
                    symbol: "BAYC".into(),
                    decimals: 0,
                    icon_url: Some("https://example.org/bayc.png".into()),
                    nft: true,
                    amount: "-1".into(),
                }),
            },
            Operation {
                kind: OperationKind::Interaction,
                from: ALICE.into(),
                to: BOB.into(),
                asset: None,
            },
        ],
    };
    put(&cache, ALICE, "", vec![nft.clone()], 78).await;

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert_eq!(result.activities, vec![nft]);
}

#[tokio::test]
async fn empty_write_marks_range_known() {
    let (store, cache) = setup();

    // Nothing asserted without a bound
    cache
        .put_activities(PutActivities::new(CHAIN, ALICE, vec![]))
        .await
        .unwrap();
    assert_eq!(store.interval_count().await, 0);

    put(&cache, ALICE, "", vec![], 50).await;
    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert!(result.activities.is_empty());
    assert_eq!(result.upper_limit, BlockHeight(50));
    assert_eq!(result.lower_limit, BlockHeight(0));
}

// ─── Query limits ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn max_items_truncates_and_reports_lower_limit() {
    let (_, cache) = setup();
    put(
        &cache,
        ALICE,
        "",
        vec![usdc("0xa", 40), usdc("0xb", 30), usdc("0xc", 20), usdc("0xd", 10)],
        50,
    )
    .await;

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).max_items(2)).await;
    assert_eq!(hashes(&result), vec!["0xa", "0xb"]);
    assert_eq!(result.upper_limit, BlockHeight(50));
    assert_eq!(result.lower_limit, BlockHeight(30));

    // Zero means unbounded
    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).max_items(0)).await;
    assert_eq!(result.activities.len(), 4);
    assert_eq!(result.lower_limit, BlockHeight(10));
}

#[tokio::test]
async fn configured_default_max_items_applies() {
    let store = MemoryStore::new();
    let cache = EvmActivityCache::with_config(
        store,
        CacheConfig::builder().default_max_items(1).build(),
    );
    put(&cache, ALICE, "", vec![usdc("0xa", 40), usdc("0xb", 30)], 50).await;

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert_eq!(hashes(&result), vec!["0xa"]);

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).max_items(5)).await;
    assert_eq!(result.activities.len(), 2);
}

// ─── Catch-all and filter interplay ───────────────────────────────────────────

#[tokio::test]
async fn filter_write_inside_catch_all_is_absorbed() {
    let (_, cache) = setup();
    put(
        &cache,
        ALICE,
        "",
        vec![usdc("0xa", 40), dai("0xb", 30), usdc("0xc", 20), dai("0xd", 10)],
        50,
    )
    .await;
    put(&cache, ALICE, USDC, vec![usdc("0xc", 20), usdc("0xa", 30)], 40).await;

    assert!(ranges(&cache, ALICE, USDC).await.is_empty());

    // The catch-all interval answers, narrowed to the filtered contract
    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).filter(USDC)).await;
    assert_eq!(hashes(&result), vec!["0xa", "0xc"]);
    assert_eq!(result.upper_limit, BlockHeight(50));
    assert_eq!(result.lower_limit, BlockHeight(10));
}

#[tokio::test]
async fn filter_matching_ignores_ascii_case() {
    let (_, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xa", 40), dai("0xb", 30)], 50).await;

    let filter = USDC.to_ascii_lowercase();
    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).filter(filter)).await;
    assert_eq!(hashes(&result), vec!["0xa"]);
}

#[tokio::test]
async fn catch_all_write_trims_filter_intervals() {
    let (store, cache) = setup();
    put(
        &cache,
        ALICE,
        USDC,
        vec![usdc("0xf4", 40), usdc("0xf3", 30), usdc("0xf2", 20), usdc("0xf1", 10)],
        50,
    )
    .await;

    put(&cache, ALICE, "", vec![usdc("0xc3", 30), dai("0xc2", 25)], 35).await;

    assert_eq!(ranges(&cache, ALICE, USDC).await, vec![(35, 50), (10, 25)]);
    assert_eq!(ranges(&cache, ALICE, "").await, vec![(25, 35)]);
    // 0xf3 fell inside the catch-all range
    assert_eq!(store.activity_count().await, 5);

    let newest = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).filter(USDC)).await;
    assert_eq!(hashes(&newest), vec!["0xf4"]);

    let middle = query(
        &cache,
        ClosestIntervalQuery::new(CHAIN, ALICE)
            .filter(USDC)
            .older_than(BlockHeight(35)),
    )
    .await;
    assert_eq!(hashes(&middle), vec!["0xc3"]);
    assert_eq!(middle.upper_limit, BlockHeight(35));
    assert_eq!(middle.lower_limit, BlockHeight(25));
}

#[tokio::test]
async fn catch_all_superset_removes_filter_interval() {
    let (_, cache) = setup();
    put(&cache, ALICE, DAI, vec![dai("0xd1", 30)], 40).await;
    put(&cache, ALICE, "", vec![dai("0xd1", 30), usdc("0xu1", 10)], 60).await;

    assert!(ranges(&cache, ALICE, DAI).await.is_empty());
    assert_eq!(ranges(&cache, ALICE, "").await, vec![(10, 60)]);
}

#[tokio::test]
async fn filter_write_splits_around_catch_all_subset() {
    let (store, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xc25", 25), dai("0xc20", 20)], 30).await;

    put(
        &cache,
        ALICE,
        USDC,
        vec![usdc("0xf45", 45), usdc("0xf35", 35), usdc("0xc25", 25), usdc("0xf15", 15)],
        50,
    )
    .await;

    assert_eq!(ranges(&cache, ALICE, USDC).await, vec![(30, 50), (15, 20)]);
    assert_eq!(ranges(&cache, ALICE, "").await, vec![(20, 30)]);
    // Two catch-all activities plus three filtered ones
    assert_eq!(store.activity_count().await, 5);

    let newest = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).filter(USDC)).await;
    assert_eq!(hashes(&newest), vec!["0xf45", "0xf35"]);

    let middle = query(
        &cache,
        ClosestIntervalQuery::new(CHAIN, ALICE)
            .filter(USDC)
            .older_than(BlockHeight(30)),
    )
    .await;
    assert_eq!(hashes(&middle), vec!["0xc25"]);
    assert_eq!(middle.upper_limit, BlockHeight(30));
}

#[tokio::test]
async fn repeated_filter_write_is_idempotent() {
    let (store, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xc25", 25), dai("0xc20", 20)], 30).await;
    let batch = || {
        vec![usdc("0xf45", 45), usdc("0xf35", 35), usdc("0xc25", 25), usdc("0xf15", 15)]
    };

    put(&cache, ALICE, USDC, batch(), 50).await;
    let filtered = ranges(&cache, ALICE, USDC).await;
    let catch_all = ranges(&cache, ALICE, "").await;
    let (activities, assets) = (store.activity_count().await, store.asset_count().await);
    let newest = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).filter(USDC)).await;
    let older = query(
        &cache,
        ClosestIntervalQuery::new(CHAIN, ALICE)
            .filter(USDC)
            .older_than(BlockHeight(20)),
    )
    .await;

    put(&cache, ALICE, USDC, batch(), 50).await;

    assert_eq!(ranges(&cache, ALICE, USDC).await, filtered);
    assert_eq!(ranges(&cache, ALICE, "").await, catch_all);
    assert_eq!(filtered, vec![(30, 50), (15, 20)]);
    assert_eq!(store.activity_count().await, activities);
    assert_eq!(store.asset_count().await, assets);
    assert_eq!(
        query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).filter(USDC)).await,
        newest
    );
    let again = query(
        &cache,
        ClosestIntervalQuery::new(CHAIN, ALICE)
            .filter(USDC)
            .older_than(BlockHeight(20)),
    )
    .await;
    assert_eq!(again, older);
    assert_eq!(hashes(&again), vec!["0xf15"]);
}

#[tokio::test]
async fn filter_write_clips_partial_catch_all_overlap() {
    let (_, cache) = setup();

    // Catch-all newer than the filtered write: keep the part below it
    put(&cache, ALICE, "", vec![usdc("0xa50", 50), usdc("0xa30", 30)], 60).await;
    put(&cache, ALICE, USDC, vec![usdc("0xa35", 35), usdc("0xa25", 25)], 40).await;
    assert_eq!(ranges(&cache, ALICE, USDC).await, vec![(25, 30)]);

    // Catch-all older than the filtered write: keep the part above it
    put(&cache, BOB, "", vec![usdc("0xb20", 20), usdc("0xb10", 10)], 30).await;
    put(&cache, BOB, USDC, vec![usdc("0xb35", 35), usdc("0xb25", 25)], 40).await;
    assert_eq!(ranges(&cache, BOB, USDC).await, vec![(30, 40)]);

    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, BOB).filter(USDC)).await;
    assert_eq!(hashes(&result), vec!["0xb35"]);
}

#[tokio::test]
async fn filter_write_refreshes_covered_range() {
    let (store, cache) = setup();
    put(&cache, ALICE, USDC, vec![usdc("0xa", 40), usdc("0xb", 30), usdc("0xc", 20)], 50).await;
    put(&cache, ALICE, USDC, vec![usdc("0xb2", 35)], 40).await;

    assert_eq!(ranges(&cache, ALICE, USDC).await, vec![(20, 50)]);
    // Nothing stored fell inside [35, 40)
    assert_eq!(store.activity_count().await, 4);

    put(&cache, ALICE, USDC, vec![], 50).await;
    // Asserting [0, 50) is empty wipes the filtered history below 50
    assert_eq!(ranges(&cache, ALICE, USDC).await, vec![(0, 50)]);
    assert_eq!(store.activity_count().await, 0);
}

// ─── Validation and failure ───────────────────────────────────────────────────

#[tokio::test]
async fn mixed_chain_write_is_rejected_untouched() {
    let (store, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xa", 40)], 50).await;

    let mut foreign = usdc("0xpoly", 30);
    foreign.chain = "137".into();
    let err = cache
        .put_activities(PutActivities::new(CHAIN, ALICE, vec![usdc("0xb", 35), foreign]))
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::InvalidInput(_)));
    assert_eq!(store.activity_count().await, 1);
    assert_eq!(ranges(&cache, ALICE, "").await, vec![(40, 50)]);
}

#[tokio::test]
async fn next_page_may_repeat_the_cut_block() {
    let (store, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xb", 20), usdc("0xa", 20)], 30).await;

    let page = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE).max_items(1)).await;
    assert_eq!(hashes(&page), vec!["0xb"]);
    assert_eq!(page.lower_limit, BlockHeight(20));

    // The indexer answers "older than 20" with the rest of block 20 included
    cache
        .put_activities(
            PutActivities::new(CHAIN, ALICE, vec![usdc("0xa", 20), usdc("0x9", 10)])
                .older_than(page.lower_limit),
        )
        .await
        .unwrap();

    assert_eq!(ranges(&cache, ALICE, "").await, vec![(10, 30)]);
    assert_eq!(store.activity_count().await, 3);
    let all = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert_eq!(hashes(&all), vec!["0xb", "0xa", "0x9"]);
}

#[tokio::test]
async fn filtered_page_at_cut_block_keeps_neighbours() {
    let (store, cache) = setup();
    put(&cache, ALICE, USDC, vec![usdc("0xb", 20), usdc("0xa", 20)], 30).await;

    cache
        .put_activities(
            PutActivities::new(CHAIN, ALICE, vec![usdc("0xa", 20), usdc("0x9", 10)])
                .filter(USDC)
                .older_than(BlockHeight(20)),
        )
        .await
        .unwrap();

    assert_eq!(ranges(&cache, ALICE, USDC).await, vec![(10, 30)]);
    assert_eq!(store.activity_count().await, 3);
}

#[tokio::test]
async fn runaway_split_fails_and_rolls_back() {
    let store = MemoryStore::new();
    let cache = EvmActivityCache::with_config(
        store.clone(),
        CacheConfig::builder().max_merge_depth(0).build(),
    );
    put(&cache, ALICE, "", vec![usdc("0xc25", 25), usdc("0xc20", 20)], 30).await;

    let err = cache
        .put_activities(
            PutActivities::new(CHAIN, ALICE, vec![usdc("0xf45", 45), usdc("0xf15", 15)])
                .filter(USDC)
                .older_than(BlockHeight(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Consistency { depth: 1, .. }));
    assert!(err.is_fatal());
    assert_eq!(store.interval_count().await, 1);
    assert_eq!(store.activity_count().await, 2);
    assert_eq!(store.asset_count().await, 1);
}

// ─── Deletion and asset garbage collection ────────────────────────────────────

#[tokio::test]
async fn delete_account_spares_shared_assets() {
    let (store, cache) = setup();
    put(&cache, ALICE, "", vec![usdc("0xa1", 40), dai("0xa2", 30)], 50).await;
    put(&cache, ALICE, DAI, vec![dai("0xa0", 60)], 70).await;
    put(&cache, BOB, "", vec![usdc("0xb1", 40)], 50).await;
    assert_eq!(store.asset_count().await, 2);

    cache.delete_activities_by_account(CHAIN, ALICE).await.unwrap();

    assert!(cache
        .get_closest_interval(&ClosestIntervalQuery::new(CHAIN, ALICE).filter(DAI))
        .await
        .unwrap()
        .is_none());
    assert!(ranges(&cache, ALICE, DAI).await.is_empty());

    assert_eq!(store.asset_count().await, 1);
    let bob = query(&cache, ClosestIntervalQuery::new(CHAIN, BOB)).await;
    assert_eq!(hashes(&bob), vec!["0xb1"]);
    assert_eq!(contracts(&bob), vec![USDC]);
}

#[tokio::test]
async fn delete_unknown_account_is_a_no_op() {
    let (store, cache) = setup();
    put(&cache, BOB, "", vec![usdc("0xb1", 40)], 50).await;

    cache.delete_activities_by_account(CHAIN, ALICE).await.unwrap();

    assert_eq!(store.activity_count().await, 1);
    assert_eq!(store.asset_count().await, 1);
}

#[tokio::test]
async fn replaced_activity_releases_its_asset() {
    let (store, cache) = setup();
    put(&cache, ALICE, "", vec![dai("0xa", 40)], 50).await;
    put(&cache, ALICE, "", vec![usdc("0xa", 40)], 50).await;

    assert_eq!(store.asset_count().await, 1);
    let result = query(&cache, ClosestIntervalQuery::new(CHAIN, ALICE)).await;
    assert_eq!(contracts(&result), vec![USDC]);
}

// ─── Level/timestamp family ───────────────────────────────────────────────────

fn tezos_op(hash: &str, level: u64, timestamp: &str) -> Activity<LevelPointer> {
    Activity {
        chain: "mainnet".into(),
        hash: hash.into(),
        position: LevelPointer::new(hash, Some(level), timestamp),
        operations: vec![Operation {
            kind: OperationKind::Receive,
            from: "tz1burnburnburnburnburnburnburjAYjjX".into(),
            to: "tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".into(),
            asset: Some(OperationAsset {
                contract: "KT1XnTn74bUtxHfDtBmm2bGZAQfhPbvKWR8o".into(),
                token_id: Some("0".into()),
                symbol: "USDt".into(),
                decimals: 6,
                icon_url: None,
                nft: false,
                amount: "250000".into(),
            }),
        }],
    }
}

#[tokio::test]
async fn level_pointer_chunks_merge() {
    let store: MemoryStore<LevelPointer> = MemoryStore::new();
    let cache = TezosActivityCache::new(store.clone());
    let account = "tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb";

    cache
        .put_activities(PutActivities::new(
            "mainnet",
            account,
            vec![
                tezos_op("ooNewest", 4_000_100, "2023-06-01T12:00:00Z"),
                tezos_op("ooOlder", 4_000_090, "2023-06-01T11:55:00Z"),
            ],
        ))
        .await
        .unwrap();

    let first = cache
        .get_closest_interval(&ClosestIntervalQuery::new("mainnet", account))
        .await
        .unwrap()
        .unwrap();
    // Without a bound the upper limit sits one step above the newest op
    assert_eq!(first.upper_limit.level, Some(4_000_101));
    assert_eq!(first.upper_limit.timestamp, "2023-06-01T12:00:01Z");
    assert_eq!(first.lower_limit.level, Some(4_000_090));

    cache
        .put_activities(
            PutActivities::new(
                "mainnet",
                account,
                vec![tezos_op("ooOldest", 4_000_070, "2023-06-01T11:50:00Z")],
            )
            .older_than(first.lower_limit.clone()),
        )
        .await
        .unwrap();

    let intervals = cache
        .intervals(&Scope::catch_all("mainnet", account))
        .await
        .unwrap();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].range.lower.level, Some(4_000_070));
    assert_eq!(intervals[0].range.upper.level, Some(4_000_101));

    let filtered = cache
        .get_closest_interval(
            &ClosestIntervalQuery::new("mainnet", account)
                .filter("kt1xntn74butxhfdtbmm2bgzaqfhpbvkwr8o_0")
                .max_items(2),
        )
        .await
        .unwrap()
        .unwrap();
    let hashes: Vec<&str> = filtered.activities.iter().map(|a| a.hash.as_str()).collect();
    assert_eq!(hashes, vec!["ooNewest", "ooOlder"]);
    assert_eq!(filtered.lower_limit.level, Some(4_000_090));
    assert_eq!(store.asset_count().await, 1);
}
