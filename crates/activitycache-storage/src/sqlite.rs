//! SQLite storage backend for the activity cache.
//!
//! Persists activities, intervals and the asset registry to a single SQLite
//! file shared by both chain families (rows carry a `family` discriminant).
//! Uses `sqlx` with WAL mode; every cache call runs in one SQLite transaction.
//!
//! Positions are stored as JSON next to their sort key: an `ordinal`
//! column (block height or level) and a `ts` column (timestamp). Range
//! filters compare ordinals when both sides carry one and timestamps
//! otherwise, which is the order [`Position`] defines, so scans and range
//! deletes run on the `(family, chain, account, filter, ordinal | ts)`
//! indexes instead of in Rust.
//!
//! Write transactions are serialised inside the store. SQLite allows one
//! writer per file and a deferred transaction that upgrades to a write lock
//! fails with `SQLITE_BUSY` rather than waiting for it.
//!
//! # Usage
//! ```rust,no_run
//! use activitycache_core::{BlockHeight, EvmActivityCache};
//! use activitycache_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./activity.db").await?;
//! let cache: EvmActivityCache<_> = EvmActivityCache::new(store);
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use activitycache_core::error::CacheError;
use activitycache_core::position::Position;
use activitycache_core::range::PositionRange;
use activitycache_core::store::{self, CacheStore, CacheTx, TxMode};
use activitycache_core::types::{
    AssetKey, AssetRecord, OperationAsset, Scope, StoredActivity, StoredInterval, StoredOperation,
};

const ASSET_COLUMNS: &str = "id, chain, contract, token_id, symbol, decimals, icon_url, nft";

fn db_err(e: sqlx::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

fn ordinal_column(ordinal: u64) -> Result<i64, CacheError> {
    i64::try_from(ordinal)
        .map_err(|_| CacheError::Storage(format!("position {ordinal} exceeds the SQLite integer range")))
}

// ─── Connection options ────────────────────────────────────────────────────────

/// Pool options for the SQLite backend.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Maximum number of pooled connections (default: 5)
    pub max_connections: u32,
    /// Seconds to wait for a free connection (default: 30)
    pub acquire_timeout_secs: u64,
    /// Seconds a statement waits on a file lock held by another process (default: 5)
    pub busy_timeout_secs: u64,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 30,
            busy_timeout_secs: 5,
        }
    }
}

// ─── SqliteStore ──────────────────────────────────────────────────────────────

/// SQLite-backed cache storage. Cheaply cloneable (wraps a pool); clones
/// share the writer lock.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./activity.db"`) or a full
    /// SQLite URL (`"sqlite:./activity.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        Self::open_with_options(path, SqliteOptions::default()).await
    }

    /// Open with custom pool options.
    pub async fn open_with_options(path: &str, opts: SqliteOptions) -> Result<Self, CacheError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let connect = SqliteConnectOptions::from_str(&url)
            .map_err(db_err)?
            .busy_timeout(Duration::from_secs(opts.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(Duration::from_secs(opts.acquire_timeout_secs))
            .connect_with(connect)
            .await
            .map_err(db_err)?;

        debug!(%url, max_connections = opts.max_connections, "sqlite store opened");
        Self::with_pool(pool).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection: every connection to `sqlite::memory:` is a
    /// separate database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, CacheError> {
        let store = Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes and enable WAL mode.
    async fn init_schema(&self) -> Result<(), CacheError> {
        // WAL mode: readers don't block the single writer
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS activities (
                family     TEXT NOT NULL,
                chain      TEXT NOT NULL,
                account    TEXT NOT NULL,
                filter     TEXT NOT NULL,
                hash       TEXT NOT NULL,
                ordinal    INTEGER,
                ts         TEXT,
                position   TEXT NOT NULL,
                operations TEXT NOT NULL,
                asset_ids  TEXT NOT NULL,
                PRIMARY KEY (family, chain, account, filter, hash)
            );",
            "CREATE INDEX IF NOT EXISTS idx_activities_ordinal
                ON activities (family, chain, account, filter, ordinal);",
            "CREATE INDEX IF NOT EXISTS idx_activities_ts
                ON activities (family, chain, account, filter, ts);",
            "CREATE INDEX IF NOT EXISTS idx_activities_hash
                ON activities (family, chain, account, hash);",
            "CREATE TABLE IF NOT EXISTS intervals (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                family        TEXT NOT NULL,
                chain         TEXT NOT NULL,
                account       TEXT NOT NULL,
                filter        TEXT NOT NULL,
                upper_ordinal INTEGER,
                upper_ts      TEXT,
                lower_ordinal INTEGER,
                lower_ts      TEXT,
                upper_pos     TEXT NOT NULL,
                lower_pos     TEXT NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_intervals_upper
                ON intervals (family, chain, account, filter, upper_ordinal, upper_ts);",
            "CREATE INDEX IF NOT EXISTS idx_intervals_lower
                ON intervals (family, chain, account, filter, lower_ordinal, lower_ts);",
            "CREATE TABLE IF NOT EXISTS assets (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                family   TEXT    NOT NULL,
                chain    TEXT    NOT NULL,
                contract TEXT    NOT NULL,
                token_id TEXT    NOT NULL,
                symbol   TEXT    NOT NULL,
                decimals INTEGER NOT NULL,
                icon_url TEXT,
                nft      INTEGER NOT NULL,
                UNIQUE (family, chain, contract, token_id)
            );",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: Position> CacheStore<P> for SqliteStore {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn CacheTx<P>>, CacheError> {
        // Taken before BEGIN so writers queue here instead of failing on the file lock
        let writer = match mode {
            TxMode::ReadWrite => Some(Arc::clone(&self.writer).lock_owned().await),
            TxMode::ReadOnly => None,
        };
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(SqliteTx {
            tx: Some(tx),
            _writer: writer,
            mode,
            _position: PhantomData,
        }))
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A transaction over [`SqliteStore`]; rolled back on drop unless committed.
///
/// A write transaction holds the store's writer lock until it is dropped.
pub struct SqliteTx<P> {
    // Declared before `_writer`: the rollback is issued before the lock is released
    tx: Option<Transaction<'static, Sqlite>>,
    _writer: Option<OwnedMutexGuard<()>>,
    mode: TxMode,
    _position: PhantomData<fn() -> P>,
}

impl<P: Position> SqliteTx<P> {
    fn family() -> &'static str {
        P::FAMILY.as_str()
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection, CacheError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| CacheError::Storage("transaction already committed".into()))
    }

    fn writable_conn(&mut self) -> Result<&mut SqliteConnection, CacheError> {
        self.mode.ensure_writable()?;
        self.conn()
    }

    /// `<head> WHERE family = ? AND chain = ? AND account = ? AND filter = ?`
    fn scoped(head: &str, scope: &Scope) -> QueryBuilder<'static, Sqlite> {
        let mut query = QueryBuilder::new(head);
        query
            .push(" WHERE family = ")
            .push_bind(Self::family())
            .push(" AND chain = ")
            .push_bind(scope.chain.clone())
            .push(" AND account = ")
            .push_bind(scope.account.clone())
            .push(" AND filter = ")
            .push_bind(scope.filter.clone());
        query
    }

    /// Restrict an activity query to `lower <= position < upper`.
    fn push_range(
        query: &mut QueryBuilder<'static, Sqlite>,
        range: &PositionRange<P>,
    ) -> Result<(), CacheError> {
        Self::push_bound(query, &range.lower, ">=")?;
        Self::push_bound(query, &range.upper, "<")
    }

    fn push_bound(
        query: &mut QueryBuilder<'static, Sqlite>,
        bound: &P,
        op: &str,
    ) -> Result<(), CacheError> {
        let key = bound.sort_key();
        match (key.ordinal, key.timestamp) {
            (Some(ordinal), timestamp) => {
                query.push(format!(" AND (ordinal {op} "));
                query.push_bind(ordinal_column(ordinal)?);
                // Rows without an ordinal fall back to timestamp order
                if let Some(ts) = timestamp {
                    query.push(format!(" OR (ordinal IS NULL AND ts {op} "));
                    query.push_bind(ts.to_string());
                    query.push(")");
                }
                query.push(")");
            }
            (None, Some(ts)) => {
                query.push(format!(" AND ts {op} "));
                query.push_bind(ts.to_string());
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn decode_interval(row: &SqliteRow) -> Result<StoredInterval<P>, CacheError> {
        Ok(StoredInterval {
            id: row.get("id"),
            scope: Scope::new(
                row.get::<String, _>("chain"),
                row.get::<String, _>("account"),
                row.get::<String, _>("filter"),
            ),
            range: PositionRange::new(
                serde_json::from_str(&row.get::<String, _>("lower_pos"))?,
                serde_json::from_str(&row.get::<String, _>("upper_pos"))?,
            ),
        })
    }

    fn decode_asset(row: &SqliteRow) -> Result<AssetRecord, CacheError> {
        let decimals = row.get::<i64, _>("decimals");
        Ok(AssetRecord {
            id: row.get("id"),
            chain: row.get("chain"),
            contract: row.get("contract"),
            token_id: row.get("token_id"),
            symbol: row.get("symbol"),
            decimals: u8::try_from(decimals)
                .map_err(|_| CacheError::Storage(format!("asset decimals out of range: {decimals}")))?,
            icon_url: row.get("icon_url"),
            nft: row.get("nft"),
        })
    }
}

#[async_trait]
impl<P: Position> CacheTx<P> for SqliteTx<P> {
    fn mode(&self) -> TxMode {
        self.mode
    }

    async fn intervals(&mut self, scope: &Scope) -> Result<Vec<StoredInterval<P>>, CacheError> {
        let mut query = Self::scoped(
            "SELECT id, chain, account, filter, upper_pos, lower_pos FROM intervals",
            scope,
        );
        query.push(" ORDER BY upper_ordinal DESC, upper_ts DESC");
        let rows = query
            .build()
            .fetch_all(&mut *self.conn()?)
            .await
            .map_err(db_err)?;

        let mut found = rows
            .iter()
            .map(Self::decode_interval)
            .collect::<Result<Vec<_>, _>>()?;
        store::sort_intervals_newest_first(&mut found);
        Ok(found)
    }

    async fn account_intervals(
        &mut self,
        chain: &str,
        account: &str,
    ) -> Result<Vec<StoredInterval<P>>, CacheError> {
        let rows = sqlx::query(
            "SELECT id, chain, account, filter, upper_pos, lower_pos FROM intervals
             WHERE family = ? AND chain = ? AND account = ?",
        )
        .bind(Self::family())
        .bind(chain)
        .bind(account)
        .fetch_all(&mut *self.conn()?)
        .await
        .map_err(db_err)?;

        let mut found = rows
            .iter()
            .map(Self::decode_interval)
            .collect::<Result<Vec<_>, _>>()?;
        store::sort_intervals_newest_first(&mut found);
        Ok(found)
    }

    async fn insert_interval(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<i64, CacheError> {
        let upper = serde_json::to_string(&range.upper)?;
        let lower = serde_json::to_string(&range.lower)?;
        let upper_key = range.upper.sort_key();
        let lower_key = range.lower.sort_key();
        let upper_ordinal = upper_key.ordinal.map(ordinal_column).transpose()?;
        let lower_ordinal = lower_key.ordinal.map(ordinal_column).transpose()?;

        let result = sqlx::query(
            "INSERT INTO intervals
             (family, chain, account, filter, upper_ordinal, upper_ts, lower_ordinal, lower_ts,
              upper_pos, lower_pos)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Self::family())
        .bind(&scope.chain)
        .bind(&scope.account)
        .bind(&scope.filter)
        .bind(upper_ordinal)
        .bind(upper_key.timestamp)
        .bind(lower_ordinal)
        .bind(lower_key.timestamp)
        .bind(&upper)
        .bind(&lower)
        .execute(&mut *self.writable_conn()?)
        .await
        .map_err(db_err)?;

        Ok(result.last_insert_rowid())
    }

    async fn delete_interval(&mut self, id: i64) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM intervals WHERE id = ?")
            .bind(id)
            .execute(&mut *self.writable_conn()?)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn activities_in_range(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<Vec<StoredActivity<P>>, CacheError> {
        let mut query = Self::scoped("SELECT hash, position, operations FROM activities", scope);
        Self::push_range(&mut query, range)?;
        let rows = query
            .build()
            .fetch_all(&mut *self.conn()?)
            .await
            .map_err(db_err)?;

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let operations: Vec<StoredOperation> =
                serde_json::from_str(&row.get::<String, _>("operations"))?;
            found.push(StoredActivity {
                scope: scope.clone(),
                hash: row.get("hash"),
                position: serde_json::from_str(&row.get::<String, _>("position"))?,
                operations,
            });
        }
        store::sort_newest_first(&mut found);
        Ok(found)
    }

    async fn put_activity(&mut self, activity: StoredActivity<P>) -> Result<(), CacheError> {
        let position = serde_json::to_string(&activity.position)?;
        let operations = serde_json::to_string(&activity.operations)?;
        let asset_ids = serde_json::to_string(&activity.asset_ids().collect::<Vec<_>>())?;
        let key = activity.position.sort_key();
        let ordinal = key.ordinal.map(ordinal_column).transpose()?;

        sqlx::query(
            "INSERT OR REPLACE INTO activities
             (family, chain, account, filter, hash, ordinal, ts, position, operations, asset_ids)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Self::family())
        .bind(&activity.scope.chain)
        .bind(&activity.scope.account)
        .bind(&activity.scope.filter)
        .bind(&activity.hash)
        .bind(ordinal)
        .bind(key.timestamp)
        .bind(&position)
        .bind(&operations)
        .bind(&asset_ids)
        .execute(&mut *self.writable_conn()?)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn delete_activities_in_range(
        &mut self,
        scope: &Scope,
        range: &PositionRange<P>,
    ) -> Result<u64, CacheError> {
        let mut query = Self::scoped("DELETE FROM activities", scope);
        Self::push_range(&mut query, range)?;
        let deleted = query
            .build()
            .execute(&mut *self.writable_conn()?)
            .await
            .map_err(db_err)?
            .rows_affected();

        if deleted > 0 {
            debug!(chain = %scope.chain, account = %scope.account, filter = %scope.filter, count = deleted, "activities deleted");
        }
        Ok(deleted)
    }

    async fn delete_account(&mut self, chain: &str, account: &str) -> Result<(u64, u64), CacheError> {
        let intervals = sqlx::query(
            "DELETE FROM intervals WHERE family = ? AND chain = ? AND account = ?",
        )
        .bind(Self::family())
        .bind(chain)
        .bind(account)
        .execute(&mut *self.writable_conn()?)
        .await
        .map_err(db_err)?;

        let activities = sqlx::query(
            "DELETE FROM activities WHERE family = ? AND chain = ? AND account = ?",
        )
        .bind(Self::family())
        .bind(chain)
        .bind(account)
        .execute(&mut *self.conn()?)
        .await
        .map_err(db_err)?;

        Ok((intervals.rows_affected(), activities.rows_affected()))
    }

    async fn referenced_asset_ids(&mut self, chain: &str) -> Result<HashSet<i64>, CacheError> {
        let rows = sqlx::query("SELECT asset_ids FROM activities WHERE family = ? AND chain = ?")
            .bind(Self::family())
            .bind(chain)
            .fetch_all(&mut *self.conn()?)
            .await
            .map_err(db_err)?;

        let mut referenced = HashSet::new();
        for row in rows {
            let ids: Vec<i64> = serde_json::from_str(&row.get::<String, _>("asset_ids"))?;
            referenced.extend(ids);
        }
        Ok(referenced)
    }

    async fn asset_by_key(&mut self, key: &AssetKey) -> Result<Option<AssetRecord>, CacheError> {
        let row = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets
             WHERE family = ? AND chain = ? AND contract = ? AND token_id = ?"
        ))
        .bind(Self::family())
        .bind(&key.chain)
        .bind(&key.contract)
        .bind(&key.token_id)
        .fetch_optional(&mut *self.conn()?)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::decode_asset).transpose()
    }

    async fn assets_by_ids(&mut self, ids: &[i64]) -> Result<Vec<AssetRecord>, CacheError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {ASSET_COLUMNS} FROM assets WHERE family = "));
        query.push_bind(Self::family()).push(" AND id IN (");
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(") ORDER BY id");

        let rows = query
            .build()
            .fetch_all(&mut *self.conn()?)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::decode_asset).collect()
    }

    async fn insert_asset(&mut self, key: &AssetKey, asset: &OperationAsset) -> Result<i64, CacheError> {
        let result = sqlx::query(
            "INSERT INTO assets (family, chain, contract, token_id, symbol, decimals, icon_url, nft)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Self::family())
        .bind(&key.chain)
        .bind(&key.contract)
        .bind(&key.token_id)
        .bind(&asset.symbol)
        .bind(i64::from(asset.decimals))
        .bind(&asset.icon_url)
        .bind(asset.nft)
        .execute(&mut *self.writable_conn()?)
        .await
        .map_err(db_err)?;

        Ok(result.last_insert_rowid())
    }

    async fn asset_ids(&mut self, chain: &str) -> Result<Vec<i64>, CacheError> {
        let rows = sqlx::query("SELECT id FROM assets WHERE family = ? AND chain = ? ORDER BY id")
            .bind(Self::family())
            .bind(chain)
            .fetch_all(&mut *self.conn()?)
            .await
            .map_err(db_err)?;

        Ok(rows.iter().map(|row| row.get::<i64, _>("id")).collect())
    }

    async fn delete_assets(&mut self, ids: &[i64]) -> Result<(), CacheError> {
        self.mode.ensure_writable()?;
        if ids.is_empty() {
            return Ok(());
        }
        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM assets WHERE family = ");
        query.push_bind(Self::family()).push(" AND id IN (");
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(")");

        query
            .build()
            .execute(&mut *self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CacheError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(db_err)?;
        }
        self._writer.take();
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
