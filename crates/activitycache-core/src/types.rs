//! Shared types: scopes, activities, operations, registry entries and the
//! request/response shapes of the public operations.

use serde::{Deserialize, Serialize};

use crate::range::PositionRange;

/// Token id stored in the registry for fungible (non-NFT) assets.
pub const FUNGIBLE_TOKEN_ID: &str = "-1";

// ─── Scope ────────────────────────────────────────────────────────────────────

/// The `(chain, account, filter)` key that partitions intervals and activities.
///
/// An empty `filter` is the catch-all scope ("all contracts/assets").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub chain: String,
    pub account: String,
    pub filter: String,
}

impl Scope {
    pub fn new(chain: impl Into<String>, account: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            account: account.into(),
            filter: filter.into(),
        }
    }

    /// The catch-all scope of `(chain, account)`.
    pub fn catch_all(chain: impl Into<String>, account: impl Into<String>) -> Self {
        Self::new(chain, account, "")
    }

    pub fn is_catch_all(&self) -> bool {
        self.filter.is_empty()
    }

    /// The catch-all sibling of this scope.
    pub fn to_catch_all(&self) -> Self {
        Self::catch_all(self.chain.clone(), self.account.clone())
    }
}

// ─── Intervals ────────────────────────────────────────────────────────────────

/// A persisted claim: every activity of the scope within `range` is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInterval<P> {
    /// Backend-assigned identity.
    pub id: i64,
    pub scope: Scope,
    pub range: PositionRange<P>,
}

// ─── Activities ───────────────────────────────────────────────────────────────

/// What an operation did, from the account's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Send,
    Receive,
    Interaction,
    Approve,
    Other,
}

/// Asset moved by an operation, as handed to and returned from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationAsset {
    /// Token contract address.
    pub contract: String,
    /// `None` for fungible tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub nft: bool,
    /// Signed amount in atomic units (e.g. `"-1500000"`).
    pub amount: String,
}

impl OperationAsset {
    /// The token id as stored in the registry (fungible sentinel when absent).
    pub fn registry_token_id(&self) -> &str {
        self.token_id.as_deref().unwrap_or(FUNGIBLE_TOKEN_ID)
    }

    /// Returns `true` if a scope filter selects this asset.
    ///
    /// A filter names either the contract (`"0xA0b8…"`) or a single token of
    /// it (`"KT1…_0"`); matching is ASCII case-insensitive.
    pub fn matches_filter(&self, filter: &str) -> bool {
        if filter.eq_ignore_ascii_case(&self.contract) {
            return true;
        }
        match filter.rsplit_once('_') {
            Some((contract, token_id)) => {
                contract.eq_ignore_ascii_case(&self.contract)
                    && token_id == self.registry_token_id()
            }
            None => false,
        }
    }
}

/// One effect within an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<OperationAsset>,
}

/// One historical on-chain event visible to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity<P> {
    pub chain: String,
    /// Transaction / operation-group hash.
    pub hash: String,
    pub position: P,
    pub operations: Vec<Operation>,
}

// ─── Storage records ──────────────────────────────────────────────────────────

/// Per-operation pointer into the asset registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub asset_id: i64,
    pub amount: String,
}

/// An operation as persisted: the asset metadata lives in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOperation {
    pub kind: OperationKind,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetRef>,
}

/// An activity as persisted under a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredActivity<P> {
    pub scope: Scope,
    pub hash: String,
    pub position: P,
    pub operations: Vec<StoredOperation>,
}

impl<P> StoredActivity<P> {
    /// Registry ids referenced by this activity's operations.
    pub fn asset_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.operations.iter().filter_map(|op| op.asset.as_ref().map(|a| a.asset_id))
    }
}

/// Deduplication key of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    pub chain: String,
    pub contract: String,
    pub token_id: String,
}

impl AssetKey {
    pub fn for_asset(chain: &str, asset: &OperationAsset) -> Self {
        Self {
            chain: chain.to_string(),
            contract: asset.contract.clone(),
            token_id: asset.registry_token_id().to_string(),
        }
    }
}

/// A deduplicated asset-registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: i64,
    pub chain: String,
    pub contract: String,
    /// Real token id, or [`FUNGIBLE_TOKEN_ID`].
    pub token_id: String,
    pub symbol: String,
    pub decimals: u8,
    pub icon_url: Option<String>,
    pub nft: bool,
}

impl AssetRecord {
    /// Rebuild the API-side asset for an operation that moved `amount`.
    pub fn to_operation_asset(&self, amount: &str) -> OperationAsset {
        OperationAsset {
            contract: self.contract.clone(),
            token_id: (self.token_id != FUNGIBLE_TOKEN_ID).then(|| self.token_id.clone()),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
            icon_url: self.icon_url.clone(),
            nft: self.nft,
            amount: amount.to_string(),
        }
    }
}

// ─── Requests / responses ─────────────────────────────────────────────────────

/// Arguments of `get_closest_interval`.
#[derive(Debug, Clone)]
pub struct ClosestIntervalQuery<P> {
    pub chain: String,
    pub account: String,
    /// Empty = catch-all.
    pub filter: String,
    /// Only activities strictly older than this pointer; `None` = newest.
    pub older_than: Option<P>,
    /// Cap on returned activities; `None` or `0` = unbounded.
    pub max_items: Option<usize>,
}

impl<P> ClosestIntervalQuery<P> {
    pub fn new(chain: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            account: account.into(),
            filter: String::new(),
            older_than: None,
            max_items: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn older_than(mut self, position: P) -> Self {
        self.older_than = Some(position);
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.chain.clone(), self.account.clone(), self.filter.clone())
    }
}

/// Result of `get_closest_interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosestInterval<P> {
    /// Newest first.
    pub activities: Vec<Activity<P>>,
    /// Exclusive upper bound of what was answered.
    pub upper_limit: P,
    /// Inclusive lower bound; the oldest returned position when truncated.
    pub lower_limit: P,
}

/// Arguments of `put_activities`.
#[derive(Debug, Clone)]
pub struct PutActivities<P> {
    /// A contiguous chunk of history; any order.
    pub activities: Vec<Activity<P>>,
    pub chain: String,
    pub account: String,
    /// Empty = catch-all.
    pub filter: String,
    /// Exclusive upper bound of the chunk; derived from the newest activity when `None`.
    pub older_than: Option<P>,
}

impl<P> PutActivities<P> {
    pub fn new(chain: impl Into<String>, account: impl Into<String>, activities: Vec<Activity<P>>) -> Self {
        Self {
            activities,
            chain: chain.into(),
            account: account.into(),
            filter: String::new(),
            older_than: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn older_than(mut self, position: P) -> Self {
        self.older_than = Some(position);
        self
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
