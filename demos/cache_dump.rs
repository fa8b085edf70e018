#![allow(unused_crate_dependencies)]
#![allow(clippy::print_stdout)]

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use sscanf::sscanf;

use gattcache::fs::{load_config, DirStore};
use gattcache::gatt::{CacheStore, Config, Database};
use gattcache::le::{Addr, RawAddr};

/// Prints GATT client databases from a cache directory.
#[derive(Clone, Debug, clap::Parser)]
struct Args {
    /// Root of the cache directory (defaults to the user data directory).
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Client configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Peer address in XX:XX:XX:XX:XX:XX format.
    #[arg(short, long, value_parser=raw_addr)]
    peer: Option<RawAddr>,

    /// Peer address is random.
    #[arg(short, long)]
    random: bool,

    /// Database hash in hexadecimal.
    #[arg(long, value_parser=hex128)]
    hash: Option<u128>,

    /// Remove databases exceeding the configured limit.
    #[arg(long)]
    evict: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let cfg = match args.config {
        Some(ref path) => load_config(path).ok_or_else(|| anyhow!("invalid configuration"))?,
        None => Config::default(),
    };
    let store = match args.dir {
        Some(ref dir) => DirStore::open(dir),
        None => DirStore::per_user("gattcache").ok_or_else(|| anyhow!("no user directory"))?,
    };
    if args.evict {
        store.evict(cfg.max_hash_entries);
    }
    if let Some(raw) = args.peer {
        let peer = if args.random {
            Addr::Random(raw)
        } else {
            Addr::Public(raw)
        };
        let db = store.load_by_identity(peer).ok_or_else(|| anyhow!("{peer} not found"))?;
        print(&format!("{peer}"), &db);
        return Ok(());
    }
    let hashes = args.hash.map_or_else(|| store.hashes(), |h| vec![h]);
    for h in hashes {
        let db = store.load_by_hash(h).ok_or_else(|| anyhow!("{h:032X} not found"))?;
        print(&format!("{h:032X}"), &db);
    }
    Ok(())
}

fn print(name: &str, db: &Database) {
    println!("{name} ({:032X}):", db.hash());
    print!("{db}");
    db.dump();
}

fn raw_addr(s: &str) -> Result<RawAddr, String> {
    s.parse().map_err(|_| format!("invalid address: {s}"))
}

fn hex128(s: &str) -> Result<u128, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    sscanf!(s, "{u128:x}").map_err(|e| e.to_string())
}
