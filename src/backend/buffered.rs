//! Backend that batches writes client-side
//!
//! Text protocol only. While `BUFFER_REQUESTS` is on, writes are queued with
//! `noreply` in the owning server's send buffer and report `Buffered`. The
//! buffer goes out when a watermark is crossed, ahead of any read on that
//! server, or on drain. Keys always use the one-at-a-time hash with modula
//! distribution.

use super::pool::Pool;
use super::server::ServerAddr;
use super::{Backend, MultiGetCursor, ServerHandle, Status, flag, unsupported, wire};
use crate::behavior::{Behavior, Distribution, HashAlgorithm};
use crate::error::BackendError;
use crate::protocol::{Direction, RequestWriter, StoreKind};
use tracing::{debug, trace};

const NAME: &str = "buffered";

/// Queued requests per server before the buffer is sent
pub const DEFAULT_MSG_WATERMARK: usize = 500;
/// Queued bytes per server before the buffer is sent
pub const DEFAULT_BYTES_WATERMARK: usize = 65536;

pub struct BufferedBackend {
    pool: Pool,
    buffering: bool,
    noreply: bool,
    msg_watermark: usize,
    bytes_watermark: usize,
}

impl BufferedBackend {
    pub fn new(servers: &[ServerAddr]) -> Self {
        Self {
            pool: Pool::new(servers),
            buffering: true,
            noreply: false,
            msg_watermark: DEFAULT_MSG_WATERMARK,
            bytes_watermark: DEFAULT_BYTES_WATERMARK,
        }
    }

    /// Requests still sitting in send buffers
    pub fn queued(&self) -> usize {
        self.pool.servers.iter().map(|conn| conn.out.messages()).sum()
    }

    /// Send one server's buffer if it crossed a watermark
    fn spill(&mut self, idx: usize) -> Status {
        let out = &self.pool.servers[idx].out;
        if out.messages() < self.msg_watermark && out.len() < self.bytes_watermark {
            return Status::Buffered;
        }
        trace!(
            server = idx,
            messages = out.messages(),
            bytes = out.len(),
            "watermark crossed, sending buffer"
        );
        match self.pool.run(idx, |conn, opts| conn.send(opts)) {
            Ok(()) => Status::Buffered,
            Err(e) => Status::Failure(e),
        }
    }

    /// Queue a noreply request on the server owning `key`
    fn enqueue(&mut self, key: &[u8], write: impl FnOnce(&mut RequestWriter)) -> Status {
        let idx = match self.pool.pick(key) {
            Ok(idx) => idx,
            Err(e) => return e.into(),
        };
        let conn = &mut self.pool.servers[idx];
        write(&mut conn.out);
        conn.unconfirmed = true;
        self.spill(idx)
    }

    /// Accept only the value this backend is fixed to
    fn fixed(&self, behavior: Behavior, value: u64, fixed: u64) -> Status {
        if value == fixed {
            Status::Success
        } else {
            unsupported(NAME, behavior, value)
        }
    }
}

impl Backend for BufferedBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn add_servers(&mut self, servers: &[ServerAddr]) -> Status {
        self.pool.add(servers);
        Status::Success
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        let idx = self.pool.pick(key)?;
        self.pool.run(idx, |conn, opts| wire::text_get(conn, opts, key))
    }

    fn store(
        &mut self,
        kind: StoreKind,
        key: &[u8],
        value: &[u8],
        expire: u32,
        flags: u32,
    ) -> Status {
        if self.buffering {
            return self.enqueue(key, |out| out.store(kind, key, flags, expire, value, true));
        }
        let idx = match self.pool.pick(key) {
            Ok(idx) => idx,
            Err(e) => return e.into(),
        };
        let noreply = self.noreply;
        self.pool
            .run(idx, |conn, opts| {
                wire::text_store(conn, opts, kind, key, value, expire, flags, noreply)
            })
            .into()
    }

    /// Counters need their reply, so only `NOREPLY` queues them
    fn delta(&mut self, key: &[u8], offset: u64, direction: Direction) -> (Status, u64) {
        if self.buffering && self.noreply {
            let status = self.enqueue(key, |out| out.delta(direction, key, offset, true));
            return (status, 0);
        }
        let idx = match self.pool.pick(key) {
            Ok(idx) => idx,
            Err(e) => return (e.into(), 0),
        };
        let noreply = self.noreply;
        self.pool
            .run(idx, |conn, opts| {
                wire::text_delta(conn, opts, direction, key, offset, noreply)
            })
            .unwrap_or_else(|e| (Status::Failure(e), 0))
    }

    fn delete(&mut self, key: &[u8], hold: u32) -> Status {
        if self.buffering {
            return self.enqueue(key, |out| out.delete(key, hold, true));
        }
        let idx = match self.pool.pick(key) {
            Ok(idx) => idx,
            Err(e) => return e.into(),
        };
        let noreply = self.noreply;
        self.pool
            .run(idx, |conn, opts| wire::text_delete(conn, opts, key, hold, noreply))
            .into()
    }

    fn flush(&mut self, expire: u32) -> Status {
        if !self.buffering {
            let noreply = self.noreply;
            return self
                .pool
                .broadcast(|conn, opts| wire::text_flush(conn, opts, expire, noreply));
        }
        if self.pool.servers.is_empty() {
            return Status::Failure(BackendError::NoServers);
        }
        for idx in 0..self.pool.servers.len() {
            let conn = &mut self.pool.servers[idx];
            conn.out.flush_all(expire, true);
            conn.unconfirmed = true;
            if let Status::Failure(e) = self.spill(idx) {
                return Status::Failure(e);
            }
        }
        Status::Buffered
    }

    fn drain(&mut self) -> Status {
        debug!(queued = self.queued(), "draining send buffers");
        self.pool.drain()
    }

    fn set_behavior(&mut self, behavior: Behavior, value: u64) -> Status {
        if let Some(status) = self.pool.apply_common(behavior, value) {
            return status;
        }
        let status = match behavior {
            Behavior::BufferRequests => {
                self.buffering = flag(value);
                Status::Success
            }
            Behavior::Noreply => {
                self.noreply = flag(value);
                Status::Success
            }
            Behavior::IoMsgWatermark => {
                self.msg_watermark = usize::try_from(value).unwrap_or(usize::MAX);
                Status::Success
            }
            Behavior::IoBytesWatermark => {
                self.bytes_watermark = usize::try_from(value).unwrap_or(usize::MAX);
                Status::Success
            }
            Behavior::Hash => self.fixed(behavior, value, HashAlgorithm::Default as u64),
            Behavior::Distribution => self.fixed(behavior, value, Distribution::Modula as u64),
            Behavior::Ketama | Behavior::KetamaWeighted | Behavior::BinaryProtocol => {
                self.fixed(behavior, value, 0)
            }
            _ => unsupported(NAME, behavior, value),
        };
        debug!(%behavior, value, ?status, "set behavior");
        status
    }

    fn set_credentials(&mut self, _username: &str, _password: &str) -> Status {
        Status::Failure(BackendError::Unsupported(
            "SASL authentication on the buffered backend".to_string(),
        ))
    }

    fn multi_get_begin(&mut self, keys: &[Vec<u8>]) -> Result<MultiGetCursor, BackendError> {
        self.pool.multi_get_begin(keys)
    }

    fn multi_get_next(
        &mut self,
        cursor: &mut MultiGetCursor,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, BackendError> {
        self.pool.multi_get_next(cursor)
    }

    fn multi_get_abandon(&mut self, cursor: MultiGetCursor) {
        self.pool.multi_get_abandon(cursor);
    }

    fn for_each_server(&mut self, f: &mut dyn FnMut(&mut dyn ServerHandle)) {
        self.pool.for_each_server(f);
    }
}
