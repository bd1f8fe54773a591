//! Commit-time flushing of client-side write buffers
//!
//! The cache sits outside the host's transactional domain. Writes that were
//! only buffered are pushed out at pre-commit so they become visible around
//! the time the transaction does; nothing is undone on abort.

use crate::backend::{Backend, Status};
use tracing::{debug, warn};

/// Host transaction lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnEvent {
    PreCommit,
    Commit,
    Abort,
}

/// Tracks whether buffered writes await a drain
#[derive(Debug, Default)]
pub struct TransactionBuffer {
    dirty: bool,
    flush_on_commit: bool,
}

impl TransactionBuffer {
    pub fn new(flush_on_commit: bool) -> Self {
        Self {
            dirty: false,
            flush_on_commit,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn flush_on_commit(&self) -> bool {
        self.flush_on_commit
    }

    pub fn set_flush_on_commit(&mut self, enabled: bool) {
        self.flush_on_commit = enabled;
    }

    /// Record a backend status; `Buffered` marks the buffer dirty
    pub fn observe(&mut self, status: &Status) {
        if matches!(status, Status::Buffered) {
            self.dirty = true;
        }
    }

    /// Forget pending writes, e.g. when the backend they sat in is dropped
    pub fn reset(&mut self) {
        self.dirty = false;
    }

    /// Handle a transaction event
    ///
    /// Only `PreCommit` acts, and only when flushing on commit is enabled and
    /// something was buffered. Returns the drain status when one was issued.
    /// A failed drain keeps the buffer dirty for the next commit.
    pub fn on_event(&mut self, event: TxnEvent, backend: &mut dyn Backend) -> Option<Status> {
        if event != TxnEvent::PreCommit || !self.flush_on_commit || !self.dirty {
            return None;
        }

        let status = backend.drain();
        match &status {
            Status::Failure(e) => {
                warn!(error = %e, "failed to flush buffered memcache writes at commit");
            }
            _ => {
                debug!("flushed buffered memcache writes at commit");
                self.dirty = false;
            }
        }
        Some(status)
    }
}
