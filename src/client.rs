//! Command dispatch over a backend
//!
//! The cache is best-effort. Shape errors (bad keys, out-of-range numbers)
//! fail the call, but failures reported by the cache only log a warning and
//! count as a miss or an unapplied write.

use crate::backend::{Backend, ServerAddr, Status, parse_server_list};
use crate::behavior::{ApplyReport, apply_list};
use crate::error::{BackendError, CacheError, Result};
use crate::expiration::Expiration;
use crate::metrics::Metrics;
use crate::multiget::{KeyArray, MultiGet};
use crate::protocol::{Direction, MAX_KEY_LENGTH, StoreKind, is_valid_key_length};
use crate::stats::{self, StatEntry};
use crate::transaction::{TransactionBuffer, TxnEvent};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Counter value the binary protocol reports for a quiet request
pub const NO_REPLY: u64 = u64::MAX;

/// Result of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Accepted into a buffer, not yet acknowledged
    Pending,
}

impl Outcome {
    /// `Pending` has no boolean value
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Outcome::Success => Some(true),
            Outcome::Failure => Some(false),
            Outcome::Pending => None,
        }
    }
}

/// Result of an atomic counter update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Value(i64),
    /// No value came back: buffered, quiet, missing or failed
    NoReply,
}

impl Counter {
    pub fn value(self) -> Option<i64> {
        match self {
            Counter::Value(n) => Some(n),
            Counter::NoReply => None,
        }
    }
}

pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    if is_valid_key_length(key) {
        Ok(())
    } else {
        Err(CacheError::Validation(format!(
            "memcache key cannot be empty or longer than {} bytes",
            MAX_KEY_LENGTH - 1
        )))
    }
}

/// One loaded cache client
pub struct Client {
    backend: Box<dyn Backend>,
    txn: TransactionBuffer,
    metrics: Arc<Metrics>,
}

impl Client {
    pub fn new(backend: Box<dyn Backend>, metrics: Arc<Metrics>, flush_on_commit: bool) -> Self {
        Self {
            backend,
            txn: TransactionBuffer::new(flush_on_commit),
            metrics,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Buffered writes await a drain
    pub fn is_dirty(&self) -> bool {
        self.txn.is_dirty()
    }

    pub fn set_flush_on_commit(&mut self, enabled: bool) {
        self.txn.set_flush_on_commit(enabled);
    }

    /// Apply a `FLAG[:VALUE],...` behavior list
    pub fn apply_behavior(&mut self, list: &str) -> Result<ApplyReport> {
        apply_list(self.backend.as_mut(), list)
    }

    pub fn set_credentials(&mut self, username: &str, password: &str) -> Result<()> {
        match self.backend.set_credentials(username, password) {
            Status::Failure(BackendError::Unsupported(reason)) => Err(CacheError::Config(reason)),
            Status::Failure(e) => Err(CacheError::Transient(e)),
            _ => Ok(()),
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8], expire: Expiration) -> Result<Outcome> {
        self.store(StoreKind::Add, key, value, expire)
    }

    pub fn replace(&mut self, key: &[u8], value: &[u8], expire: Expiration) -> Result<Outcome> {
        self.store(StoreKind::Replace, key, value, expire)
    }

    pub fn set(&mut self, key: &[u8], value: &[u8], expire: Expiration) -> Result<Outcome> {
        self.store(StoreKind::Set, key, value, expire)
    }

    pub fn prepend(&mut self, key: &[u8], value: &[u8], expire: Expiration) -> Result<Outcome> {
        self.store(StoreKind::Prepend, key, value, expire)
    }

    pub fn append(&mut self, key: &[u8], value: &[u8], expire: Expiration) -> Result<Outcome> {
        self.store(StoreKind::Append, key, value, expire)
    }

    /// Validate, compute the expiration and dispatch one write
    pub fn store(
        &mut self,
        kind: StoreKind,
        key: &[u8],
        value: &[u8],
        expire: Expiration,
    ) -> Result<Outcome> {
        check_key(key)?;
        let expire = expire.to_seconds()?;
        let _timer = self.metrics.cmd_latency.start_timer();
        match kind {
            StoreKind::Add => self.metrics.cmd_add.inc(),
            StoreKind::Replace => self.metrics.cmd_replace.inc(),
            StoreKind::Set => self.metrics.cmd_set.inc(),
            StoreKind::Prepend => self.metrics.cmd_prepend.inc(),
            StoreKind::Append => self.metrics.cmd_append.inc(),
        }

        trace!(?kind, bytes = value.len(), expire, "store");
        let status = self.backend.store(kind, key, value, expire, 0);
        Ok(self.outcome(status, kind.name()))
    }

    /// `None` on a miss or when the cache could not be reached
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        let _timer = self.metrics.cmd_latency.start_timer();
        self.metrics.cmd_get.inc();

        match self.backend.get(key) {
            Ok(Some(value)) => {
                self.metrics.get_hits.inc();
                Ok(Some(value))
            }
            Ok(None) => {
                self.metrics.get_misses.inc();
                Ok(None)
            }
            Err(e) => {
                self.metrics.transient_errors.inc();
                warn!(error = %e, "failed to get memcache value");
                Ok(None)
            }
        }
    }

    pub fn incr(&mut self, key: &[u8], offset: i64) -> Result<Counter> {
        self.delta(Direction::Increment, key, offset)
    }

    pub fn decr(&mut self, key: &[u8], offset: i64) -> Result<Counter> {
        self.delta(Direction::Decrement, key, offset)
    }

    /// Counters are unsigned on the wire: a negative offset flips direction
    fn delta(&mut self, direction: Direction, key: &[u8], offset: i64) -> Result<Counter> {
        check_key(key)?;
        let _timer = self.metrics.cmd_latency.start_timer();
        match direction {
            Direction::Increment => self.metrics.cmd_incr.inc(),
            Direction::Decrement => self.metrics.cmd_decr.inc(),
        }

        let direction = if offset < 0 { direction.flip() } else { direction };
        let (status, value) = self.backend.delta(key, offset.unsigned_abs(), direction);
        trace!(?direction, offset, ?status, value, "delta");

        match status {
            Status::Success if value == NO_REPLY => Ok(Counter::NoReply),
            Status::Success => i64::try_from(value).map(Counter::Value).map_err(|_| {
                CacheError::Range("value received from memcache is out of BIGINT range".to_string())
            }),
            Status::Buffered => {
                self.metrics.buffered_writes.inc();
                self.txn.observe(&status);
                Ok(Counter::NoReply)
            }
            Status::NotFound => {
                warn!(command = direction.name(), "memcache key not found");
                Ok(Counter::NoReply)
            }
            Status::Failure(e) => {
                if e.is_transport() {
                    self.metrics.transient_errors.inc();
                }
                warn!(command = direction.name(), error = %e, "memcache counter update failed");
                Ok(Counter::NoReply)
            }
        }
    }

    /// `Success` when deleted, `Failure` when absent or on error
    pub fn delete(&mut self, key: &[u8], hold: Expiration) -> Result<Outcome> {
        check_key(key)?;
        let hold = hold.to_seconds()?;
        let _timer = self.metrics.cmd_latency.start_timer();
        self.metrics.cmd_delete.inc();

        let status = self.backend.delete(key, hold);
        if matches!(status, Status::NotFound) {
            return Ok(Outcome::Failure);
        }
        Ok(self.outcome(status, "delete"))
    }

    /// Invalidate every item on every server
    pub fn flush_all(&mut self) -> Outcome {
        let _timer = self.metrics.cmd_latency.start_timer();
        self.metrics.cmd_flush.inc();
        let status = self.backend.flush(0);
        self.outcome(status, "flush_all")
    }

    /// Append servers from a `host[:port],...` list
    pub fn server_add(&mut self, list: &str) -> bool {
        let servers: Vec<ServerAddr> = match parse_server_list(list) {
            Ok(servers) => servers,
            Err(e) => {
                warn!(list, error = %e, "failed to parse memcache server list");
                return false;
            }
        };
        match self.backend.add_servers(&servers) {
            Status::Success => {
                info!(added = servers.len(), "added memcache servers");
                true
            }
            Status::Failure(e) => {
                warn!(list, error = %e, "failed to add memcache servers");
                false
            }
            other => {
                debug!(status = ?other, "server add returned status");
                true
            }
        }
    }

    /// Text report covering every server
    pub fn stats(&mut self) -> String {
        stats::render(&stats::collect(self.backend.as_mut()))
    }

    pub fn stat_entries(&mut self) -> Vec<StatEntry> {
        stats::entries(&stats::collect(self.backend.as_mut()))
    }

    /// Start a streaming lookup; borrows the client until dropped
    pub fn get_multi(&mut self, keys: &KeyArray) -> Result<MultiGet<'_>> {
        self.metrics.cmd_get_multi.inc();
        MultiGet::new(self.backend.as_mut(), Arc::clone(&self.metrics), keys)
    }

    /// Send buffered writes now, regardless of the commit setting
    pub fn drain(&mut self) -> Status {
        self.metrics.drains.inc();
        let status = self.backend.drain();
        match &status {
            Status::Failure(e) => {
                self.metrics.drain_failures.inc();
                warn!(error = %e, "failed to flush buffered memcache writes");
            }
            _ => self.txn.reset(),
        }
        status
    }

    pub fn on_transaction_event(&mut self, event: TxnEvent) {
        if let Some(status) = self.txn.on_event(event, self.backend.as_mut()) {
            self.metrics.drains.inc();
            if matches!(status, Status::Failure(_)) {
                self.metrics.drain_failures.inc();
            }
        }
    }

    /// Map a write status, recording buffered writes and logging failures
    fn outcome(&mut self, status: Status, command: &str) -> Outcome {
        match status {
            Status::Success => Outcome::Success,
            Status::Buffered => {
                self.metrics.buffered_writes.inc();
                self.txn.observe(&Status::Buffered);
                Outcome::Pending
            }
            Status::NotFound => {
                warn!(command, "memcache key not found");
                Outcome::Failure
            }
            Status::Failure(e) => {
                if e.is_transport() {
                    self.metrics.transient_errors.inc();
                }
                warn!(command, error = %e, "memcache command failed");
                Outcome::Failure
            }
        }
    }
}
