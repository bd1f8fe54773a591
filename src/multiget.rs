//! Streaming batched lookup
//!
//! A [`MultiGet`] issues one request for every key on its first `next()` and
//! then pulls one hit per call. Misses never show up. The order of hits
//! follows the servers' replies, not the input. Dropping the iterator early
//! abandons the outstanding request.

use crate::backend::{Backend, MultiGetCursor};
use crate::error::{CacheError, Result};
use crate::metrics::Metrics;
use crate::protocol::{MAX_KEY_LENGTH, is_valid_key_length};
use std::sync::Arc;
use tracing::{debug, warn};

/// Array of nullable keys as handed over by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyArray {
    dims: usize,
    elements: Vec<Option<Vec<u8>>>,
}

impl KeyArray {
    /// One-dimensional array
    pub fn new(elements: Vec<Option<Vec<u8>>>) -> Self {
        Self { dims: 1, elements }
    }

    /// Array with an explicit dimension count
    pub fn with_dims(dims: usize, elements: Vec<Option<Vec<u8>>>) -> Self {
        Self { dims, elements }
    }

    pub fn from_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        Self::new(keys.into_iter().map(|k| Some(k.as_ref().to_vec())).collect())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Non-null keys, validated
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        if self.dims > 1 {
            return Err(CacheError::Validation(
                "multi-dimensional arrays are not supported".to_string(),
            ));
        }
        let mut keys = Vec::with_capacity(self.elements.len());
        for key in self.elements.iter().flatten() {
            if !is_valid_key_length(key) {
                return Err(CacheError::Validation(format!(
                    "memcache key cannot be empty or longer than {} bytes",
                    MAX_KEY_LENGTH - 1
                )));
            }
            keys.push(key.clone());
        }
        Ok(keys)
    }
}

enum State {
    NotStarted(Vec<Vec<u8>>),
    RequestIssued(MultiGetCursor),
    Yielding(MultiGetCursor),
    Exhausted,
}

/// Lazy sequence of `(key, value)` hits
pub struct MultiGet<'a> {
    backend: &'a mut dyn Backend,
    metrics: Arc<Metrics>,
    state: State,
}

impl<'a> MultiGet<'a> {
    /// Validate `keys`; no I/O happens until the first `next()`
    pub fn new(backend: &'a mut dyn Backend, metrics: Arc<Metrics>, keys: &KeyArray) -> Result<Self> {
        let keys = keys.keys()?;
        Ok(Self {
            backend,
            metrics,
            state: State::NotStarted(keys),
        })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    fn begin(&mut self, keys: Vec<Vec<u8>>) -> Option<MultiGetCursor> {
        if keys.is_empty() {
            return None;
        }
        debug!(keys = keys.len(), "issuing multi-get");
        match self.backend.multi_get_begin(&keys) {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                self.metrics.transient_errors.inc();
                warn!(error = %e, "failed to issue memcache multi-get");
                None
            }
        }
    }
}

impl Iterator for MultiGet<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let mut cursor = match std::mem::replace(&mut self.state, State::Exhausted) {
            State::NotStarted(keys) => self.begin(keys)?,
            State::RequestIssued(cursor) | State::Yielding(cursor) => cursor,
            State::Exhausted => return None,
        };

        match self.backend.multi_get_next(&mut cursor) {
            Ok(Some(hit)) => {
                self.metrics.get_hits.inc();
                self.state = State::Yielding(cursor);
                Some(hit)
            }
            Ok(None) => None,
            Err(e) => {
                self.metrics.transient_errors.inc();
                warn!(error = %e, "failed to fetch memcache multi-get result");
                self.backend.multi_get_abandon(cursor);
                None
            }
        }
    }
}

impl Drop for MultiGet<'_> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, State::Exhausted) {
            State::RequestIssued(cursor) | State::Yielding(cursor) => {
                debug!("abandoning unfinished multi-get");
                self.backend.multi_get_abandon(cursor);
            }
            State::NotStarted(_) | State::Exhausted => {}
        }
    }
}
