//! Positions — the totally ordered pointers that bound activities and intervals.
//!
//! Every range algorithm in this crate is written against [`Position`], so the
//! two chain families share one query/merge engine:
//!
//! - [`BlockHeight`] — EVM-style chains, a plain block number.
//! - [`LevelPointer`] — Tezos-style chains, a `(hash, level?, timestamp)` tuple.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The chain family a position type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Integer block heights.
    Evm,
    /// Composite level/timestamp/hash pointers.
    Tezos,
}

impl ChainFamily {
    /// Storage discriminant (`"evm"` / `"tezos"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Tezos => "tezos",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainFamily {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            "tezos" => Ok(Self::Tezos),
            other => Err(CacheError::InvalidInput(format!("unknown chain family '{other}'"))),
        }
    }
}

/// A totally ordered pointer into one chain family's history.
pub trait Position:
    Clone + Ord + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The family this position type serves.
    const FAMILY: ChainFamily;

    /// Oldest possible position; the lower bound asserted by an empty write.
    fn genesis() -> Self;

    /// A synthetic position `steps` steps newer (negative: older) than `self`.
    fn shift(&self, steps: i64) -> Result<Self, CacheError>;

    /// Column values a storage backend can index and range-filter on.
    fn sort_key(&self) -> SortKey<'_>;
}

/// Indexable form of a position.
///
/// Two positions of one family compare by `ordinal` when both carry one,
/// otherwise by `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey<'a> {
    /// Block height or level.
    pub ordinal: Option<u64>,
    /// RFC 3339 UTC timestamp.
    pub timestamp: Option<&'a str>,
}

// ─── BlockHeight ──────────────────────────────────────────────────────────────

/// Block number on an integer-height chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u64);

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockHeight {
    fn from(height: u64) -> Self {
        Self(height)
    }
}

impl Position for BlockHeight {
    const FAMILY: ChainFamily = ChainFamily::Evm;

    fn genesis() -> Self {
        Self(0)
    }

    fn shift(&self, steps: i64) -> Result<Self, CacheError> {
        Ok(Self(self.0.saturating_add_signed(steps)))
    }

    fn sort_key(&self) -> SortKey<'_> {
        SortKey {
            ordinal: Some(self.0),
            timestamp: None,
        }
    }
}

// ─── LevelPointer ─────────────────────────────────────────────────────────────

/// Pointer on a level/timestamp chain.
///
/// Two pointers compare by `level` when both carry one, otherwise by
/// `timestamp` (RFC 3339 UTC strings sort lexicographically). The `hash` never
/// takes part in ordering; synthetic boundary pointers carry an empty hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelPointer {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u64>,
    pub timestamp: String,
}

impl LevelPointer {
    pub fn new(hash: impl Into<String>, level: Option<u64>, timestamp: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            level,
            timestamp: timestamp.into(),
        }
    }

    /// Returns `true` for boundary markers built by [`Position::shift`] or
    /// [`Position::genesis`].
    pub fn is_synthetic(&self) -> bool {
        self.hash.is_empty()
    }
}

impl Ord for LevelPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.level, other.level) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.timestamp.cmp(&other.timestamp),
        }
    }
}

impl PartialOrd for LevelPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LevelPointer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LevelPointer {}

impl fmt::Display for LevelPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Some(level) => write!(f, "level {level} ({})", self.timestamp),
            None => f.write_str(&self.timestamp),
        }
    }
}

impl Position for LevelPointer {
    const FAMILY: ChainFamily = ChainFamily::Tezos;

    fn genesis() -> Self {
        Self::new("", Some(0), "1970-01-01T00:00:00Z")
    }

    fn shift(&self, steps: i64) -> Result<Self, CacheError> {
        let parsed = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| CacheError::Position(format!("'{}': {e}", self.timestamp)))?;
        let shifted = parsed.with_timezone(&Utc) + Duration::seconds(steps);

        Ok(Self {
            hash: String::new(),
            level: self.level.map(|l| l.saturating_add_signed(steps)),
            timestamp: shifted.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }

    fn sort_key(&self) -> SortKey<'_> {
        SortKey {
            ordinal: self.level,
            timestamp: Some(&self.timestamp),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
