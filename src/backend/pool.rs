//! Server pool shared by both backends
//!
//! Owns the connections, key distribution and failure policy. The backends
//! decide what to send; the pool decides where and keeps the bookkeeping.

use super::connection::{Connection, SocketOptions};
use super::ring::{Ring, RingConfig};
use super::server::ServerAddr;
use super::{MultiGetCursor, ServerHandle, Status, flag, wire};
use crate::behavior::Behavior;
use crate::error::BackendError;
use crate::protocol::{is_valid_key, is_valid_key_length};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct Pool {
    pub servers: Vec<Connection>,
    pub ring: Ring,
    pub opts: SocketOptions,
    pub binary: bool,
    pub verify_key: bool,
    pub sort_hosts: bool,
    /// Failures before a server is marked dead, 0 disables
    pub failure_limit: u32,
    pub retry_timeout: Duration,
    pub remove_failed: bool,
    pub credentials: Option<(String, String)>,
}

impl Pool {
    pub fn new(servers: &[ServerAddr]) -> Self {
        let mut pool = Self {
            servers: Vec::new(),
            ring: Ring::new(RingConfig::default()),
            opts: SocketOptions::default(),
            binary: false,
            verify_key: false,
            sort_hosts: false,
            failure_limit: 0,
            retry_timeout: Duration::from_secs(2),
            remove_failed: false,
            credentials: None,
        };
        pool.add(servers);
        pool
    }

    pub fn add(&mut self, servers: &[ServerAddr]) {
        self.servers
            .extend(servers.iter().cloned().map(Connection::new));
        if self.sort_hosts {
            self.servers.sort_by(|a, b| a.addr.cmp(&b.addr));
        }
        self.rebuild();
    }

    /// Recompute the distribution over live servers
    pub fn rebuild(&mut self) {
        let now = Instant::now();
        let remove_failed = self.remove_failed;
        self.ring.rebuild(
            self.servers
                .iter()
                .enumerate()
                .filter(|(_, conn)| !(remove_failed && conn.is_dead(now)))
                .map(|(idx, conn)| (idx, &conn.addr)),
        );
    }

    pub fn set_ring(&mut self, config: RingConfig) {
        self.ring.config = config;
        self.rebuild();
    }

    pub fn set_sort_hosts(&mut self, enabled: bool) {
        self.sort_hosts = enabled;
        if enabled {
            self.servers.sort_by(|a, b| a.addr.cmp(&b.addr));
            self.rebuild();
        }
    }

    /// Drop every connection so new socket options take effect
    pub fn reconnect_all(&mut self) {
        for conn in &mut self.servers {
            conn.reset();
        }
    }

    pub fn has_unsent(&self) -> bool {
        self.servers.iter().any(|conn| !conn.out.is_empty())
    }

    pub fn check_key(&self, key: &[u8]) -> Result<(), BackendError> {
        let ok = if self.verify_key && !self.binary {
            is_valid_key(key)
        } else {
            is_valid_key_length(key)
        };
        if ok {
            Ok(())
        } else {
            Err(BackendError::InvalidKey)
        }
    }

    /// Server index for a key, honoring retry windows
    pub fn pick(&mut self, key: &[u8]) -> Result<usize, BackendError> {
        self.check_key(key)?;
        self.revive_expired();
        if self.servers.is_empty() {
            return Err(BackendError::NoServers);
        }
        let idx = self.ring.select(key).ok_or(BackendError::NoServers)?;
        let conn = &self.servers[idx];
        if conn.is_dead(Instant::now()) {
            return Err(BackendError::ServerMarkedDead(conn.addr.to_string()));
        }
        Ok(idx)
    }

    fn revive_expired(&mut self) {
        let now = Instant::now();
        let mut revived = false;
        for conn in &mut self.servers {
            if conn.revive(now) {
                debug!(server = %conn.addr, "retry window elapsed");
                revived = true;
            }
        }
        if revived && self.remove_failed {
            self.rebuild();
        }
    }

    /// Run one exchange on a server with connect, auth and failure accounting
    pub fn run<T>(
        &mut self,
        idx: usize,
        op: impl FnOnce(&mut Connection, &SocketOptions) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let result = self.prepare(idx).and_then(|()| op(&mut self.servers[idx], &self.opts));
        match result {
            Ok(out) => {
                self.servers[idx].record_success();
                Ok(out)
            }
            Err(e) => {
                if e.is_transport() {
                    self.fail(idx, &e);
                }
                Err(e)
            }
        }
    }

    fn prepare(&mut self, idx: usize) -> Result<(), BackendError> {
        let conn = &mut self.servers[idx];
        if !self.binary || conn.authenticated {
            return Ok(());
        }
        let Some((username, password)) = &self.credentials else {
            return Ok(());
        };
        conn.ensure_connected(&self.opts)?;
        match wire::bin_sasl_plain(conn, &self.opts, username, password)? {
            Status::Success => Ok(()),
            Status::Failure(e) => Err(e),
            other => Err(BackendError::AuthFailed(format!("{other:?}"))),
        }
    }

    fn fail(&mut self, idx: usize, error: &BackendError) {
        let conn = &mut self.servers[idx];
        warn!(server = %conn.addr, error = %error, "server request failed");
        conn.reset();
        if conn.record_failure(self.failure_limit, self.retry_timeout) {
            warn!(
                server = %conn.addr,
                retry_secs = self.retry_timeout.as_secs(),
                "server marked dead"
            );
            if self.remove_failed {
                self.rebuild();
            }
        }
    }

    /// Settings both backends handle the same way. `None` if not one of them.
    pub fn apply_common(&mut self, behavior: Behavior, value: u64) -> Option<Status> {
        match behavior {
            Behavior::SndTimeout => self.opts.send_timeout = Duration::from_micros(value),
            Behavior::RcvTimeout => self.opts.recv_timeout = Duration::from_micros(value),
            Behavior::PollTimeout => self.opts.poll_timeout = Duration::from_millis(value),
            Behavior::ConnectTimeout => self.opts.connect_timeout = Duration::from_millis(value),
            Behavior::TcpNodelay => self.opts.tcp_nodelay = flag(value),
            Behavior::RetryTimeout => self.retry_timeout = Duration::from_secs(value),
            Behavior::ServerFailureLimit => {
                self.failure_limit = u32::try_from(value).unwrap_or(u32::MAX);
            }
            Behavior::RemoveFailedServers => {
                self.remove_failed = flag(value);
                self.rebuild();
            }
            Behavior::VerifyKey => self.verify_key = flag(value),
            Behavior::SortHosts => self.set_sort_hosts(flag(value)),
            _ => return None,
        }
        if matches!(
            behavior,
            Behavior::SndTimeout | Behavior::RcvTimeout | Behavior::PollTimeout | Behavior::TcpNodelay
        ) {
            for conn in &mut self.servers {
                conn.apply_options(&self.opts);
            }
        }
        Some(Status::Success)
    }

    /// Send and confirm every server holding unsent, unconfirmed or failed writes
    pub fn drain(&mut self) -> Status {
        let mut first_error = None;
        for idx in 0..self.servers.len() {
            let conn = &self.servers[idx];
            if conn.out.is_empty() && !conn.unconfirmed && conn.quiet_error.is_none() {
                continue;
            }
            let binary = self.binary;
            let result = self.run(idx, |conn, opts| {
                if binary {
                    wire::bin_confirm(conn, opts)
                } else {
                    wire::text_confirm(conn, opts)
                }
            });
            let error = match result {
                Ok(Status::Failure(e)) | Err(e) => e,
                Ok(_) => continue,
            };
            first_error.get_or_insert(error);
        }
        first_error.map_or(Status::Success, Status::Failure)
    }

    /// Run `op` on every server in list order, stopping at the first failure
    pub fn broadcast(
        &mut self,
        mut op: impl FnMut(&mut Connection, &SocketOptions) -> Result<Status, BackendError>,
    ) -> Status {
        if self.servers.is_empty() {
            return Status::Failure(BackendError::NoServers);
        }
        let mut last = Status::Success;
        for idx in 0..self.servers.len() {
            if self.servers[idx].is_dead(Instant::now()) {
                continue;
            }
            match self.run(idx, &mut op) {
                Ok(Status::Failure(e)) | Err(e) => return Status::Failure(e),
                Ok(status) => last = status,
            }
        }
        last
    }

    /// Send one batched request per server that owns any of `keys`
    pub fn multi_get_begin(&mut self, keys: &[Vec<u8>]) -> Result<MultiGetCursor, BackendError> {
        let mut groups: BTreeMap<usize, Vec<&[u8]>> = BTreeMap::new();
        for key in keys {
            let idx = self.pick(key)?;
            groups.entry(idx).or_default().push(key);
        }

        let mut cursor = MultiGetCursor::new(VecDeque::new());
        let binary = self.binary;
        for (idx, keys) in groups {
            let sent = self.run(idx, |conn, opts| {
                if binary {
                    wire::bin_multi_get(conn, opts, &keys)
                } else {
                    wire::text_multi_get(conn, opts, &keys)
                }
            });
            if let Err(e) = sent {
                self.multi_get_abandon(cursor);
                return Err(e);
            }
            cursor.awaiting.push_back(idx);
        }
        Ok(cursor)
    }

    pub fn multi_get_next(
        &mut self,
        cursor: &mut MultiGetCursor,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, BackendError> {
        let binary = self.binary;
        while let Some(&idx) = cursor.awaiting.front() {
            let next = self.run(idx, |conn, opts| {
                if binary {
                    wire::bin_multi_next(conn, opts)
                } else {
                    wire::text_multi_next(conn, opts)
                }
            });
            match next {
                Ok(Some(item)) => return Ok(Some(item)),
                Ok(None) => {
                    cursor.awaiting.pop_front();
                }
                Err(e) => {
                    // The failed server was reset by run(), the rest still stream
                    if !e.is_transport() {
                        self.servers[idx].reset();
                    }
                    cursor.awaiting.pop_front();
                    let rest = std::mem::take(cursor);
                    self.multi_get_abandon(rest);
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Reset connections that still owe multi-get replies
    pub fn multi_get_abandon(&mut self, cursor: MultiGetCursor) {
        for idx in cursor.awaiting {
            if let Some(conn) = self.servers.get_mut(idx) {
                debug!(server = %conn.addr, "abandoning multi-get");
                conn.reset();
            }
        }
    }

    pub fn for_each_server(&mut self, f: &mut dyn FnMut(&mut dyn ServerHandle)) {
        let binary = self.binary;
        for idx in 0..self.servers.len() {
            let login = self.prepare(idx).err();
            let mut handle = PoolServer {
                conn: &mut self.servers[idx],
                opts: &self.opts,
                binary,
                login,
            };
            f(&mut handle);
        }
    }
}

/// Per-server view handed out by `for_each_server`
struct PoolServer<'a> {
    conn: &'a mut Connection,
    opts: &'a SocketOptions,
    binary: bool,
    /// Failed SASL login, reported instead of stats
    login: Option<BackendError>,
}

impl ServerHandle for PoolServer<'_> {
    fn addr(&self) -> &ServerAddr {
        &self.conn.addr
    }

    fn stats(&mut self) -> Result<Vec<(String, String)>, BackendError> {
        let result = match self.login.take() {
            Some(e) => Err(e),
            None if self.binary => wire::bin_stats(self.conn, self.opts),
            None => wire::text_stats(self.conn, self.opts),
        };
        if let Err(e) = &result
            && e.is_transport()
        {
            self.conn.reset();
        }
        result
    }
}
