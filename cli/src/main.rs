//! activitycache CLI — inspect and purge a SQLite activity cache.
//!
//! Usage:
//! ```bash
//! activitycache intervals ./activity.db evm 1 0xabc...            # catch-all
//! activitycache intervals ./activity.db tezos mainnet tz1... KT1..._0
//! activitycache purge     ./activity.db evm 1 0xabc...
//! activitycache info
//! ```

mod logging;

use std::env;
use std::process;

use activitycache_core::{
    ActivityCache, BlockHeight, CacheConfig, ChainFamily, LevelPointer, Position, Scope,
};
use activitycache_storage::SqliteStore;
use anyhow::{bail, Context};
use tracing::debug;

use crate::logging::{init_tracing, LogConfig, LOG_ENV};

#[tokio::main]
async fn main() {
    let mut args: Vec<String> = env::args().collect();
    let json = take_flag(&mut args, "--json");
    init_tracing(&LogConfig::from_env(json));

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("activitycache {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "intervals" => cmd_intervals(&args[2..], json).await,
        "purge" => cmd_purge(&args[2..]).await,
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// Remove every occurrence of `flag`; returns whether it was present.
fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn print_usage() {
    println!("activitycache {}", env!("CARGO_PKG_VERSION"));
    println!("Interval-tracking cache of wallet account activity\n");
    println!("USAGE:");
    println!("    activitycache [--json] <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info                                             Show cache configuration info");
    println!("    intervals <db> <evm|tezos> <chain> <account> [filter]");
    println!("                                                     List stored intervals, newest first");
    println!("    purge <db> <evm|tezos> <chain> <account>         Delete all cached activity of an account");
    println!("    version                                          Print version");
    println!("    help                                             Print this help\n");
    println!("ENVIRONMENT:");
    println!("    {LOG_ENV}    Log filter directives (default: warn)");
}

fn cmd_info() {
    let config = CacheConfig::default();
    println!("activitycache v{}", env!("CARGO_PKG_VERSION"));
    println!("  Max merge depth: {}", config.max_merge_depth);
    println!("  Default max items: unbounded");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Chain families: evm (block height), tezos (level / timestamp)");
}

/// `<db> <family> <chain> <account> [filter]`
struct Target {
    db: String,
    family: ChainFamily,
    scope: Scope,
}

impl Target {
    fn parse(args: &[String], allow_filter: bool) -> anyhow::Result<Self> {
        let max = if allow_filter { 5 } else { 4 };
        if args.len() < 4 || args.len() > max {
            bail!("expected <db> <evm|tezos> <chain> <account>{}", if allow_filter { " [filter]" } else { "" });
        }
        let family: ChainFamily = args[1].parse()?;
        let filter = args.get(4).cloned().unwrap_or_default();
        Ok(Self {
            db: args[0].clone(),
            family,
            scope: Scope::new(args[2].as_str(), args[3].as_str(), filter),
        })
    }

    async fn open(&self) -> anyhow::Result<SqliteStore> {
        debug!(db = %self.db, family = %self.family, "opening cache database");
        SqliteStore::open(&self.db)
            .await
            .with_context(|| format!("opening cache database {}", self.db))
    }
}

async fn cmd_intervals(args: &[String], json: bool) -> anyhow::Result<()> {
    let target = Target::parse(args, true)?;
    let store = target.open().await?;
    match target.family {
        ChainFamily::Evm => print_intervals::<BlockHeight>(store, &target.scope, json).await,
        ChainFamily::Tezos => print_intervals::<LevelPointer>(store, &target.scope, json).await,
    }
}

async fn print_intervals<P: Position>(
    store: SqliteStore,
    scope: &Scope,
    json: bool,
) -> anyhow::Result<()> {
    let cache: ActivityCache<P, SqliteStore> = ActivityCache::new(store);
    let intervals = cache.intervals(scope).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&intervals)?);
        return Ok(());
    }

    let filter = if scope.is_catch_all() { "<all>" } else { scope.filter.as_str() };
    println!("{} / {} / {filter}: {} interval(s)", scope.chain, scope.account, intervals.len());
    for interval in &intervals {
        println!("  #{:<6} [{}, {})", interval.id, interval.range.lower, interval.range.upper);
    }
    Ok(())
}

async fn cmd_purge(args: &[String]) -> anyhow::Result<()> {
    let target = Target::parse(args, false)?;
    let store = target.open().await?;
    match target.family {
        ChainFamily::Evm => purge::<BlockHeight>(store, &target.scope).await,
        ChainFamily::Tezos => purge::<LevelPointer>(store, &target.scope).await,
    }
}

async fn purge<P: Position>(store: SqliteStore, scope: &Scope) -> anyhow::Result<()> {
    let cache: ActivityCache<P, SqliteStore> = ActivityCache::new(store);
    cache
        .delete_activities_by_account(&scope.chain, &scope.account)
        .await?;
    println!(
        "purged {} / {} ({} asset(s) left on chain)",
        scope.chain,
        scope.account,
        cache.asset_count(&scope.chain).await?
    );
    Ok(())
}
