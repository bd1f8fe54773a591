//! # embedcache
//!
//! Memcached client meant to be embedded in a database host process.
//!
//! The host talks to one [`Context`]. It owns a [`Client`] that dispatches
//! commands to a swappable [`backend::Backend`]: a blocking backend that
//! waits for every reply, or a buffered one that batches writes until a
//! read, a watermark or a commit forces them out.
//!
//! ## Features
//!
//! - set/add/replace/append/prepend with relative or absolute expiration
//! - get, streaming multi-get, incr/decr over a signed domain, delete, flush
//! - behavior lists (`FLAG[:VALUE],...`) for hashing, distribution, timeouts
//! - commit-time draining of buffered writes
//! - per-server stats that survive unreachable servers
//!
//! ## Example
//!
//! ```ignore
//! use embedcache::prelude::*;
//!
//! let mut ctx = Context::new(Config::from_env()?);
//! ctx.load()?;
//! ctx.set(Some(b"greeting".as_slice()), Some(b"hello".as_slice()), None)?;
//! ctx.on_transaction_event(TxnEvent::PreCommit);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌─────────┐    ┌────────┐    ┌──────────────────────┐
//! │ host     │───▶│ Context │───▶│ Client │───▶│ Backend              │
//! │ (SQL fn, │    │ (load,  │    │ (cmds, │    │  ├─ blocking (bin)   │
//! │  txn cb) │    │  config)│    │  dirty)│    │  └─ buffered (text)  │
//! └──────────┘    └─────────┘    └────────┘    └──────────────────────┘
//! ```

// Modules
pub mod backend;
pub mod behavior;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod expiration;
pub mod metrics;
pub mod multiget;
pub mod prelude;
pub mod protocol;
pub mod stats;
pub mod transaction;

// Re-exports for convenience
pub use client::{Client, Counter, Outcome};
pub use context::Context;
pub use error::{BackendError, CacheError, ProtocolError, Result};
