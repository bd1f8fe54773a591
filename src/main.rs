//! embedcache - run single cache operations from the command line
//!
//! Configuration comes from the TOML file named by `--config` (or
//! `EMBEDCACHE_CONFIG`), or from `EMBEDCACHE_*` environment variables.
//! Each invocation behaves like one host transaction: buffered writes are
//! drained at the end.

mod cli;

use anyhow::Context as _;
use clap::Parser;
use cli::{Cli, Command, DeltaArgs, StoreArgs};
use embedcache::config::Config;
use embedcache::context::Context;
use embedcache::multiget::KeyArray;
use embedcache::protocol::StoreKind;
use embedcache::transaction::TxnEvent;
use embedcache::{Counter, Outcome};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(path) = &cli.config {
        info!("Loading configuration from {}", path);
        Config::from_file(path)?
    } else {
        Config::from_env()?
    };
    debug!("Configuration: {:?}", config);

    let mut ctx = Context::new(config);
    ctx.load().context("failed to load memcache client")?;

    run(&mut ctx, cli.command)?;

    ctx.on_transaction_event(TxnEvent::PreCommit);
    ctx.on_transaction_event(TxnEvent::Commit);

    if let Some(metrics) = ctx.metrics_text() {
        debug!("metrics:\n{}", metrics);
    }
    Ok(())
}

fn print_outcome(outcome: Outcome) {
    match outcome.as_bool() {
        Some(ok) => println!("{ok}"),
        None => println!("pending"),
    }
}

fn print_counter(counter: Counter) {
    match counter {
        Counter::Value(n) => println!("{n}"),
        Counter::NoReply => println!("(null)"),
    }
}

fn store(ctx: &mut Context, kind: StoreKind, args: StoreArgs) -> anyhow::Result<()> {
    let outcome = ctx.store(
        kind,
        Some(args.key.as_bytes()),
        Some(args.value.as_bytes()),
        args.expire,
    )?;
    print_outcome(outcome);
    Ok(())
}

fn run(ctx: &mut Context, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get { key } => match ctx.get(Some(key.as_bytes()))? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(null)"),
        },
        Command::Set(args) => store(ctx, StoreKind::Set, args)?,
        Command::Add(args) => store(ctx, StoreKind::Add, args)?,
        Command::Replace(args) => store(ctx, StoreKind::Replace, args)?,
        Command::Append(args) => store(ctx, StoreKind::Append, args)?,
        Command::Prepend(args) => store(ctx, StoreKind::Prepend, args)?,
        Command::Incr(DeltaArgs { key, offset }) => {
            print_counter(ctx.incr(Some(key.as_bytes()), offset)?);
        }
        Command::Decr(DeltaArgs { key, offset }) => {
            print_counter(ctx.decr(Some(key.as_bytes()), offset)?);
        }
        Command::Delete { key, hold } => print_outcome(ctx.delete(Some(key.as_bytes()), hold)?),
        Command::Mget { keys } => {
            let keys = KeyArray::from_keys(&keys);
            for (key, value) in ctx.get_multi(Some(&keys))? {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Command::Flush => print_outcome(ctx.flush_all()?),
        Command::Stats => print!("{}", ctx.stats()?),
    }
    Ok(())
}
