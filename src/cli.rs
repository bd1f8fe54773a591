//! Command-line interface definitions

use clap::{Args, Parser, Subcommand};
use embedcache::expiration::Expiration;

/// Run single memcache operations through the embedded client.
///
/// Each invocation behaves like one host transaction: buffered writes are
/// drained before exit.
#[derive(Parser, Debug)]
#[command(name = "embedcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file; `EMBEDCACHE_*` variables are used without one
    #[arg(long, env = "EMBEDCACHE_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Key, value and optional expiration of a write
#[derive(Args, Debug)]
pub struct StoreArgs {
    pub key: String,
    pub value: String,
    /// Seconds, an RFC 3339 instant, or units such as "2 hours"
    #[arg(value_parser = parse_expiration)]
    pub expire: Option<Expiration>,
}

/// Key and optional offset of a counter update
#[derive(Args, Debug)]
pub struct DeltaArgs {
    pub key: String,
    /// Defaults to 1; a negative offset counts the other way
    #[arg(allow_negative_numbers = true)]
    pub offset: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch one value
    Get { key: String },

    /// Store unconditionally
    Set(StoreArgs),

    /// Store only if the key is absent
    Add(StoreArgs),

    /// Store only if the key exists
    Replace(StoreArgs),

    /// Append to an existing value
    Append(StoreArgs),

    /// Prepend to an existing value
    Prepend(StoreArgs),

    /// Increment a counter
    Incr(DeltaArgs),

    /// Decrement a counter
    Decr(DeltaArgs),

    /// Delete a key
    Delete {
        key: String,
        /// Hold time before the key may be added again
        #[arg(value_parser = parse_expiration)]
        hold: Option<Expiration>,
    },

    /// Fetch several keys in one round trip per server
    Mget {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Invalidate every item on every server
    Flush,

    /// Per-server statistics
    Stats,
}

fn parse_expiration(s: &str) -> Result<Expiration, String> {
    s.parse().map_err(|e| format!("{e}"))
}
