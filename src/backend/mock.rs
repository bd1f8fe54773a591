//! In-memory backend for unit tests

use super::{Backend, MultiGetCursor, ServerAddr, ServerHandle, Status};
use crate::behavior::Behavior;
use crate::error::BackendError;
use crate::protocol::{Direction, StoreKind};
use std::collections::{HashMap, VecDeque};
use std::io;

fn io_error() -> BackendError {
    BackendError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "mock offline"))
}

pub struct MockServer {
    pub addr: ServerAddr,
    /// `Err` makes the server unreachable for stats
    pub stats: Result<Vec<(String, String)>, String>,
}

impl ServerHandle for MockServer {
    fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    fn stats(&mut self) -> Result<Vec<(String, String)>, BackendError> {
        self.stats
            .clone()
            .map_err(|msg| BackendError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, msg)))
    }
}

#[derive(Default)]
pub struct MockBackend {
    pub behaviors: Vec<(Behavior, u64)>,
    pub unsupported: Vec<Behavior>,
    pub data: HashMap<Vec<u8>, Vec<u8>>,
    /// Last expiration passed to a write
    pub last_expire: Option<u32>,
    /// Writes report `Buffered` and are applied on drain
    pub buffered: bool,
    queued: Vec<(Vec<u8>, Vec<u8>)>,
    /// Every request fails with an I/O error
    pub offline: bool,
    /// Drains that will fail before one succeeds
    pub failing_drains: usize,
    pub drains: usize,
    pub servers: Vec<MockServer>,
    pub credentials: Option<(String, String)>,
    /// Multi-get fails after yielding this many hits
    pub multi_get_fail_after: Option<usize>,
    pub multi_get_begins: usize,
    pub abandoned: usize,
    hits: Vec<(Vec<u8>, Vec<u8>)>,
    yielded: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(pairs: &[(&str, &str)]) -> Self {
        let mut backend = Self::new();
        for (k, v) in pairs {
            backend.data.insert(k.as_bytes().to_vec(), v.as_bytes().to_vec());
        }
        backend
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn add_servers(&mut self, servers: &[ServerAddr]) -> Status {
        self.servers.extend(servers.iter().map(|addr| MockServer {
            addr: addr.clone(),
            stats: Ok(Vec::new()),
        }));
        Status::Success
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        if self.offline {
            return Err(io_error());
        }
        Ok(self.data.get(key).cloned())
    }

    fn store(
        &mut self,
        kind: StoreKind,
        key: &[u8],
        value: &[u8],
        expire: u32,
        _flags: u32,
    ) -> Status {
        if self.offline {
            return Status::Failure(io_error());
        }
        self.last_expire = Some(expire);
        if self.buffered {
            self.queued.push((key.to_vec(), value.to_vec()));
            return Status::Buffered;
        }
        let exists = self.data.contains_key(key);
        match kind {
            StoreKind::Add if exists => Status::Failure(BackendError::NotStored),
            StoreKind::Replace | StoreKind::Append | StoreKind::Prepend if !exists => {
                Status::Failure(BackendError::NotStored)
            }
            StoreKind::Append => {
                if let Some(current) = self.data.get_mut(key) {
                    current.extend_from_slice(value);
                }
                Status::Success
            }
            StoreKind::Prepend => {
                if let Some(current) = self.data.get_mut(key) {
                    let mut joined = value.to_vec();
                    joined.extend_from_slice(current);
                    *current = joined;
                }
                Status::Success
            }
            _ => {
                self.data.insert(key.to_vec(), value.to_vec());
                Status::Success
            }
        }
    }

    fn delta(&mut self, key: &[u8], offset: u64, direction: Direction) -> (Status, u64) {
        if self.offline {
            return (Status::Failure(io_error()), 0);
        }
        if self.buffered {
            return (Status::Buffered, 0);
        }
        let Some(current) = self.data.get_mut(key) else {
            return (Status::NotFound, 0);
        };
        let Some(n) = std::str::from_utf8(current)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        else {
            return (Status::Failure(BackendError::NonNumeric), 0);
        };
        let n = match direction {
            Direction::Increment => n.wrapping_add(offset),
            Direction::Decrement => n.saturating_sub(offset),
        };
        *current = n.to_string().into_bytes();
        (Status::Success, n)
    }

    fn delete(&mut self, key: &[u8], _hold: u32) -> Status {
        if self.offline {
            return Status::Failure(io_error());
        }
        if self.buffered {
            return Status::Buffered;
        }
        match self.data.remove(key) {
            Some(_) => Status::Success,
            None => Status::NotFound,
        }
    }

    fn flush(&mut self, expire: u32) -> Status {
        if self.offline {
            return Status::Failure(io_error());
        }
        self.last_expire = Some(expire);
        self.data.clear();
        Status::Success
    }

    fn drain(&mut self) -> Status {
        self.drains += 1;
        if self.failing_drains > 0 {
            self.failing_drains -= 1;
            return Status::Failure(io_error());
        }
        for (key, value) in self.queued.drain(..) {
            self.data.insert(key, value);
        }
        Status::Success
    }

    fn set_behavior(&mut self, behavior: Behavior, value: u64) -> Status {
        if self.unsupported.contains(&behavior) {
            return Status::Failure(BackendError::Unsupported(behavior.to_string()));
        }
        self.behaviors.push((behavior, value));
        Status::Success
    }

    fn set_credentials(&mut self, username: &str, password: &str) -> Status {
        self.credentials = Some((username.to_string(), password.to_string()));
        Status::Success
    }

    fn multi_get_begin(&mut self, keys: &[Vec<u8>]) -> Result<MultiGetCursor, BackendError> {
        self.multi_get_begins += 1;
        if self.offline {
            return Err(io_error());
        }
        self.hits = keys
            .iter()
            .filter_map(|k| self.data.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        self.yielded = 0;
        Ok(MultiGetCursor::new((0..self.hits.len()).collect::<VecDeque<_>>()))
    }

    fn multi_get_next(
        &mut self,
        cursor: &mut MultiGetCursor,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, BackendError> {
        if self.multi_get_fail_after == Some(self.yielded) {
            cursor.awaiting.clear();
            return Err(io_error());
        }
        match cursor.awaiting.pop_front() {
            Some(idx) => {
                self.yielded += 1;
                Ok(self.hits.get(idx).cloned())
            }
            None => Ok(None),
        }
    }

    fn multi_get_abandon(&mut self, _cursor: MultiGetCursor) {
        self.abandoned += 1;
    }

    fn for_each_server(&mut self, f: &mut dyn FnMut(&mut dyn ServerHandle)) {
        for server in &mut self.servers {
            f(server);
        }
    }
}
