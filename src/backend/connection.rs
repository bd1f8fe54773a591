//! Blocking TCP connection to one server

use crate::backend::server::ServerAddr;
use crate::error::BackendError;
use crate::protocol::RequestWriter;
use crate::protocol::binary::{self, Decoded, Packet};
use crate::protocol::{ParseResult, Reply, parse};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const READ_CHUNK: usize = 8192;

/// Socket settings shared by every connection of a backend
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub connect_timeout: Duration,
    /// Zero falls back to `poll_timeout`
    pub send_timeout: Duration,
    /// Zero falls back to `poll_timeout`
    pub recv_timeout: Duration,
    pub poll_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(4000),
            send_timeout: Duration::ZERO,
            recv_timeout: Duration::ZERO,
            poll_timeout: Duration::from_millis(5000),
            tcp_nodelay: false,
        }
    }
}

impl SocketOptions {
    fn effective(&self, timeout: Duration) -> Option<Duration> {
        let timeout = if timeout.is_zero() {
            self.poll_timeout
        } else {
            timeout
        };
        (!timeout.is_zero()).then_some(timeout)
    }
}

/// One server's socket plus its buffers and failure state
pub struct Connection {
    pub addr: ServerAddr,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    /// Requests not yet written to the socket
    pub out: RequestWriter,
    /// Writes were sent without waiting for a reply
    pub unconfirmed: bool,
    /// A `version` fence was sent ahead of the next expected text reply
    pub fenced: bool,
    pub authenticated: bool,
    /// First failure reported for a quiet request, held until confirmation
    pub quiet_error: Option<BackendError>,
    failures: u32,
    dead_until: Option<Instant>,
    opaque: u32,
}

impl Connection {
    pub fn new(addr: ServerAddr) -> Self {
        Self {
            addr,
            stream: None,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            out: RequestWriter::default(),
            unconfirmed: false,
            fenced: false,
            authenticated: false,
            quiet_error: None,
            failures: 0,
            dead_until: None,
            opaque: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self, opts: &SocketOptions) -> Result<&mut TcpStream, BackendError> {
        if self.stream.is_none() {
            let stream = open(&self.addr, opts)?;
            debug!(server = %self.addr, "connected");
            self.authenticated = false;
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected).into())
    }

    /// Open the socket if needed without sending anything
    pub fn ensure_connected(&mut self, opts: &SocketOptions) -> Result<(), BackendError> {
        self.stream(opts).map(|_| ())
    }

    /// Push changed socket options onto an open socket
    pub fn apply_options(&mut self, opts: &SocketOptions) {
        let Some(stream) = &self.stream else {
            return;
        };
        let applied = stream
            .set_nodelay(opts.tcp_nodelay)
            .and_then(|()| stream.set_read_timeout(opts.effective(opts.recv_timeout)))
            .and_then(|()| stream.set_write_timeout(opts.effective(opts.send_timeout)));
        if let Err(e) = applied {
            debug!(server = %self.addr, error = %e, "socket options rejected, reconnecting");
            self.reset();
        }
    }

    /// Write every buffered request to the socket
    pub fn send(&mut self, opts: &SocketOptions) -> Result<(), BackendError> {
        if self.out.is_empty() {
            return Ok(());
        }
        let buf = self.out.take();
        trace!(server = %self.addr, bytes = buf.len(), "sending");
        let stream = self.stream(opts)?;
        stream.write_all(&buf)?;
        stream.flush()?;
        Ok(())
    }

    fn fill(&mut self, opts: &SocketOptions) -> Result<(), BackendError> {
        let mut chunk = [0u8; READ_CHUNK];
        let stream = self.stream(opts)?;
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server closed connection").into());
        }
        self.read_buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Read one text reply and hand it to `f` while it borrows the buffer
    pub fn read_reply<T>(
        &mut self,
        opts: &SocketOptions,
        f: impl FnOnce(Reply<'_>) -> T,
    ) -> Result<T, BackendError> {
        loop {
            match parse(&self.read_buf) {
                ParseResult::Complete(reply, consumed) => {
                    let out = f(reply);
                    self.read_buf.advance(consumed);
                    return Ok(out);
                }
                ParseResult::NeedMoreData => self.fill(opts)?,
                ParseResult::Error(e) => return Err(e.into()),
            }
        }
    }

    /// Read one binary response packet and hand it to `f`
    pub fn read_packet<T>(
        &mut self,
        opts: &SocketOptions,
        f: impl FnOnce(Packet<'_>) -> T,
    ) -> Result<T, BackendError> {
        loop {
            match binary::decode(&self.read_buf) {
                Decoded::Complete(packet, consumed) => {
                    let out = f(packet);
                    self.read_buf.advance(consumed);
                    return Ok(out);
                }
                Decoded::NeedMoreData => self.fill(opts)?,
                Decoded::Error(e) => return Err(e.into()),
            }
        }
    }

    /// Fresh opaque value for a binary request
    pub fn next_opaque(&mut self) -> u32 {
        self.opaque = self.opaque.wrapping_add(1);
        self.opaque
    }

    /// Drop the socket and anything in flight
    pub fn reset(&mut self) {
        if self.stream.take().is_some() {
            debug!(server = %self.addr, "connection reset");
        }
        self.read_buf.clear();
        self.out.clear();
        self.unconfirmed = false;
        self.fenced = false;
        self.authenticated = false;
        self.quiet_error = None;
    }

    /// Server is inside its retry window
    pub fn is_dead(&self, now: Instant) -> bool {
        self.dead_until.is_some_and(|until| now < until)
    }

    /// Clear an expired retry window. Returns true if the server came back.
    pub fn revive(&mut self, now: Instant) -> bool {
        match self.dead_until {
            Some(until) if now >= until => {
                self.dead_until = None;
                self.failures = 0;
                true
            }
            _ => false,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Count a failure. Returns true when this failure marked the server dead.
    pub fn record_failure(&mut self, limit: u32, retry: Duration) -> bool {
        self.failures += 1;
        if limit > 0 && self.failures >= limit && self.dead_until.is_none() {
            self.dead_until = Some(Instant::now() + retry);
            return true;
        }
        false
    }
}

fn open(addr: &ServerAddr, opts: &SocketOptions) -> Result<TcpStream, BackendError> {
    let mut last = None;
    for sock in (addr.host.as_str(), addr.port).to_socket_addrs()? {
        let attempt = if opts.connect_timeout.is_zero() {
            TcpStream::connect(sock)
        } else {
            TcpStream::connect_timeout(&sock, opts.connect_timeout)
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(opts.tcp_nodelay)?;
                stream.set_read_timeout(opts.effective(opts.recv_timeout))?;
                stream.set_write_timeout(opts.effective(opts.send_timeout))?;
                return Ok(stream);
            }
            Err(e) => last = Some(e),
        }
    }
    Err(last
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))
        .into())
}
