//! Backend that waits for every reply
//!
//! Speaks the binary protocol when `BINARY_PROTOCOL` is on (the loader turns
//! it on) and the text protocol otherwise. With `NOREPLY` writes go out as
//! quiet requests and report `Buffered` until a drain confirms them.

use super::pool::Pool;
use super::ring::RingConfig;
use super::server::ServerAddr;
use super::{Backend, MultiGetCursor, ServerHandle, Status, flag, unsupported, wire};
use crate::behavior::{Behavior, Distribution, HashAlgorithm};
use crate::error::BackendError;
use crate::protocol::{Direction, StoreKind};
use tracing::{debug, trace};

const NAME: &str = "blocking";

pub struct BlockingBackend {
    pool: Pool,
    noreply: bool,
}

impl BlockingBackend {
    pub fn new(servers: &[ServerAddr]) -> Self {
        Self {
            pool: Pool::new(servers),
            noreply: false,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.pool.binary
    }

    fn set_binary(&mut self, enabled: bool) -> Status {
        if !enabled && self.pool.credentials.is_some() {
            return Status::Failure(BackendError::Unsupported(
                "SASL authentication requires the binary protocol".to_string(),
            ));
        }
        if self.pool.binary != enabled {
            // Replies already in flight belong to the old protocol
            self.pool.binary = enabled;
            self.pool.reconnect_all();
        }
        Status::Success
    }

    fn set_ring(&mut self, behavior: Behavior, value: u64) -> Status {
        let mut config: RingConfig = self.pool.ring.config;
        match behavior {
            Behavior::Hash => match HashAlgorithm::from_value(value) {
                Some(hash) => config.hash = hash,
                None => return unsupported(NAME, behavior, value),
            },
            Behavior::KetamaHash => match HashAlgorithm::from_value(value) {
                Some(hash) => config.ketama_hash = hash,
                None => return unsupported(NAME, behavior, value),
            },
            Behavior::Distribution => match Distribution::from_value(value) {
                Some(distribution) => config.distribution = distribution,
                None => return unsupported(NAME, behavior, value),
            },
            Behavior::Ketama if flag(value) => {
                config.distribution = Distribution::ConsistentKetama;
                config.hash = HashAlgorithm::Md5;
                config.ketama_hash = HashAlgorithm::Md5;
            }
            Behavior::Ketama => {
                config.distribution = Distribution::Modula;
                config.hash = HashAlgorithm::Default;
            }
            Behavior::KetamaWeighted => {
                config.weighted = flag(value);
                if config.weighted && !config.distribution.is_consistent() {
                    config.distribution = Distribution::ConsistentKetama;
                    config.ketama_hash = HashAlgorithm::Md5;
                }
            }
            _ => return unsupported(NAME, behavior, value),
        }
        self.pool.set_ring(config);
        Status::Success
    }
}

impl Backend for BlockingBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn add_servers(&mut self, servers: &[ServerAddr]) -> Status {
        self.pool.add(servers);
        Status::Success
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        let idx = self.pool.pick(key)?;
        let binary = self.pool.binary;
        self.pool.run(idx, |conn, opts| {
            if binary {
                wire::bin_get(conn, opts, key)
            } else {
                wire::text_get(conn, opts, key)
            }
        })
    }

    fn store(
        &mut self,
        kind: StoreKind,
        key: &[u8],
        value: &[u8],
        expire: u32,
        flags: u32,
    ) -> Status {
        let idx = match self.pool.pick(key) {
            Ok(idx) => idx,
            Err(e) => return e.into(),
        };
        trace!(?kind, bytes = value.len(), server = idx, "store");
        let (binary, quiet) = (self.pool.binary, self.noreply);
        self.pool
            .run(idx, |conn, opts| {
                if binary {
                    wire::bin_store(conn, opts, kind, key, value, expire, flags, quiet)
                } else {
                    wire::text_store(conn, opts, kind, key, value, expire, flags, quiet)
                }
            })
            .into()
    }

    fn delta(&mut self, key: &[u8], offset: u64, direction: Direction) -> (Status, u64) {
        let idx = match self.pool.pick(key) {
            Ok(idx) => idx,
            Err(e) => return (e.into(), 0),
        };
        let (binary, quiet) = (self.pool.binary, self.noreply);
        self.pool
            .run(idx, |conn, opts| {
                if binary {
                    wire::bin_delta(conn, opts, direction, key, offset, quiet)
                } else {
                    wire::text_delta(conn, opts, direction, key, offset, quiet)
                }
            })
            .unwrap_or_else(|e| (Status::Failure(e), 0))
    }

    fn delete(&mut self, key: &[u8], hold: u32) -> Status {
        if hold > 0 && self.pool.binary {
            return Status::Failure(BackendError::Unsupported(
                "delete hold time requires the text protocol".to_string(),
            ));
        }
        let idx = match self.pool.pick(key) {
            Ok(idx) => idx,
            Err(e) => return e.into(),
        };
        let (binary, quiet) = (self.pool.binary, self.noreply);
        self.pool
            .run(idx, |conn, opts| {
                if binary {
                    wire::bin_delete(conn, opts, key, quiet)
                } else {
                    wire::text_delete(conn, opts, key, hold, quiet)
                }
            })
            .into()
    }

    fn flush(&mut self, expire: u32) -> Status {
        let (binary, quiet) = (self.pool.binary, self.noreply);
        self.pool.broadcast(|conn, opts| {
            if binary {
                wire::bin_flush(conn, opts, expire, quiet)
            } else {
                wire::text_flush(conn, opts, expire, quiet)
            }
        })
    }

    fn drain(&mut self) -> Status {
        self.pool.drain()
    }

    fn set_behavior(&mut self, behavior: Behavior, value: u64) -> Status {
        if let Some(status) = self.pool.apply_common(behavior, value) {
            return status;
        }
        let status = match behavior {
            Behavior::BinaryProtocol => self.set_binary(flag(value)),
            Behavior::Noreply => {
                self.noreply = flag(value);
                Status::Success
            }
            Behavior::BufferRequests if !flag(value) => Status::Success,
            Behavior::Hash
            | Behavior::KetamaHash
            | Behavior::Distribution
            | Behavior::Ketama
            | Behavior::KetamaWeighted => self.set_ring(behavior, value),
            _ => unsupported(NAME, behavior, value),
        };
        debug!(%behavior, value, ?status, "set behavior");
        status
    }

    fn set_credentials(&mut self, username: &str, password: &str) -> Status {
        if !self.pool.binary {
            return Status::Failure(BackendError::Unsupported(
                "SASL authentication requires the binary protocol".to_string(),
            ));
        }
        self.pool.credentials = Some((username.to_string(), password.to_string()));
        // Authenticate again on next use
        self.pool.reconnect_all();
        Status::Success
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
