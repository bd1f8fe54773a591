//! Backend client adapters
//!
//! The rest of the crate talks to the cache only through [`Backend`]. Two
//! implementations exist: [`BlockingBackend`] waits for every reply, and
//! [`BufferedBackend`] batches writes client-side until a read or a drain
//! forces them out. Which one runs is decided once, from configuration.

pub mod blocking;
pub mod buffered;
mod connection;
pub mod hash;
#[cfg(test)]
pub mod mock;
mod pool;
pub mod ring;
pub mod server;
mod wire;

pub use blocking::BlockingBackend;
pub use buffered::BufferedBackend;
pub use connection::SocketOptions;
pub use server::{DEFAULT_PORT, ServerAddr, parse_server_list};

use crate::behavior::Behavior;
use crate::error::BackendError;
use crate::protocol::{Direction, StoreKind};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;

/// Result of a backend request
#[derive(Debug)]
pub enum Status {
    Success,
    NotFound,
    /// Accepted without a server acknowledgment yet
    Buffered,
    Failure(BackendError),
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl From<BackendError> for Status {
    fn from(e: BackendError) -> Self {
        Status::Failure(e)
    }
}

impl From<Result<Status, BackendError>> for Status {
    fn from(result: Result<Status, BackendError>) -> Self {
        result.unwrap_or_else(Status::Failure)
    }
}

/// One server as seen by stats collection
pub trait ServerHandle {
    fn addr(&self) -> &ServerAddr;
    fn stats(&mut self) -> Result<Vec<(String, String)>, BackendError>;
}

/// Position inside an outstanding multi-get
///
/// Holds the servers that still owe replies, in the order they are read.
/// A cursor belongs to the backend that issued it and cannot be restarted.
#[derive(Debug, Default)]
pub struct MultiGetCursor {
    pub(crate) awaiting: VecDeque<usize>,
}

impl MultiGetCursor {
    pub(crate) fn new(awaiting: VecDeque<usize>) -> Self {
        Self { awaiting }
    }

    /// No server owes replies anymore
    pub fn is_finished(&self) -> bool {
        self.awaiting.is_empty()
    }
}

/// Capability set every backend provides
pub trait Backend {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Append servers to the distribution
    fn add_servers(&mut self, servers: &[ServerAddr]) -> Status;

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;

    /// Write family: add, replace, set, prepend, append
    fn store(
        &mut self,
        kind: StoreKind,
        key: &[u8],
        value: &[u8],
        expire: u32,
        flags: u32,
    ) -> Status;

    /// Atomic counter update. The value is meaningful only on `Success`.
    fn delta(&mut self, key: &[u8], offset: u64, direction: Direction) -> (Status, u64);

    /// Delete a key, optionally holding it back from `add` for `hold` seconds
    fn delete(&mut self, key: &[u8], hold: u32) -> Status;

    /// Invalidate every item on every server after `expire` seconds
    fn flush(&mut self, expire: u32) -> Status;

    /// Send buffered writes and wait until the servers acknowledged them
    fn drain(&mut self) -> Status;

    fn set_behavior(&mut self, behavior: Behavior, value: u64) -> Status;

    /// SASL credentials applied to every connection
    fn set_credentials(&mut self, username: &str, password: &str) -> Status;

    fn multi_get_begin(&mut self, keys: &[Vec<u8>]) -> Result<MultiGetCursor, BackendError>;

    /// Next hit, `None` once every server finished
    fn multi_get_next(
        &mut self,
        cursor: &mut MultiGetCursor,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, BackendError>;

    /// Give up on a cursor; replies still in flight are discarded
    fn multi_get_abandon(&mut self, cursor: MultiGetCursor);

    /// Visit every server in list order
    fn for_each_server(&mut self, f: &mut dyn FnMut(&mut dyn ServerHandle));
}

/// Which backend implementation to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Blocking,
    Buffered,
}

impl BackendKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "blocking" => Some(BackendKind::Blocking),
            "buffered" => Some(BackendKind::Buffered),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Blocking => f.write_str("blocking"),
            BackendKind::Buffered => f.write_str("buffered"),
        }
    }
}

/// Build a backend over a server list with its load-time defaults
///
/// The blocking backend starts on the binary protocol. Sockets open lazily.
pub fn connect(kind: BackendKind, servers: &[ServerAddr]) -> Box<dyn Backend> {
    match kind {
        BackendKind::Blocking => {
            let mut backend = BlockingBackend::new(servers);
            backend.set_behavior(Behavior::BinaryProtocol, 1);
            Box::new(backend)
        }
        BackendKind::Buffered => Box::new(BufferedBackend::new(servers)),
    }
}

/// Behavior values are plain integers, booleans are anything non-zero
pub(crate) fn flag(value: u64) -> bool {
    value != 0
}

pub(crate) fn unsupported(backend: &str, behavior: Behavior, value: u64) -> Status {
    Status::Failure(BackendError::Unsupported(format!(
        "{behavior}={value} on the {backend} backend"
    )))
}
