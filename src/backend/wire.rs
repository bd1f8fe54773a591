//! Request/reply exchanges over one connection
//!
//! Every function returns `Err` only for transport trouble (socket errors,
//! unparseable or out-of-sequence replies). Server-side refusals come back
//! as `Status::Failure` so the caller can tell a sick connection from a
//! rejected request.

use super::Status;
use super::connection::{Connection, SocketOptions};
use crate::error::{BackendError, ProtocolError};
use crate::protocol::binary::{self, Packet, opcode, status};
use crate::protocol::{Direction, Reply, RequestWriter, StoreKind};
use tracing::debug;

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Map an error reply to a backend error
fn error_reply(reply: &Reply<'_>) -> BackendError {
    match reply {
        Reply::Error => BackendError::UnknownCommand,
        Reply::ClientError(msg) => {
            let msg = lossy(msg);
            if msg.contains("non-numeric") {
                BackendError::NonNumeric
            } else {
                BackendError::Client(msg)
            }
        }
        Reply::ServerError(msg) => {
            let msg = lossy(msg);
            if msg.contains("too large") {
                BackendError::ValueTooLarge
            } else {
                BackendError::Server(msg)
            }
        }
        other => unexpected(other),
    }
}

fn unexpected(reply: &Reply<'_>) -> BackendError {
    ProtocolError::InvalidReply(format!("unexpected reply {reply:?}")).into()
}

fn status_error(code: u16, body: &[u8]) -> BackendError {
    match code {
        status::KEY_EXISTS => BackendError::Exists,
        status::VALUE_TOO_LARGE => BackendError::ValueTooLarge,
        status::INVALID_ARGUMENTS => BackendError::Client(lossy(body)),
        status::ITEM_NOT_STORED => BackendError::NotStored,
        status::NON_NUMERIC => BackendError::NonNumeric,
        status::AUTH_ERROR => BackendError::AuthFailed(lossy(body)),
        status::UNKNOWN_COMMAND => BackendError::UnknownCommand,
        status::OUT_OF_MEMORY => BackendError::Server("out of memory".to_string()),
        other => BackendError::Server(format!("status {other:#06x}: {}", lossy(body))),
    }
}

fn packet_status(packet: &Packet<'_>) -> Status {
    match packet.status {
        status::NO_ERROR => Status::Success,
        status::KEY_NOT_FOUND => Status::NotFound,
        code => Status::Failure(status_error(code, packet.value)),
    }
}

/// One item of a retrieval reply
enum Item {
    Value(Vec<u8>, Vec<u8>),
    End,
}

fn read_item(conn: &mut Connection, opts: &SocketOptions) -> Result<Item, BackendError> {
    conn.read_reply(opts, |reply| match reply {
        Reply::Value { key, data, .. } => Ok(Item::Value(key.to_vec(), data.to_vec())),
        Reply::End => Ok(Item::End),
        r if r.is_error() => Err(error_reply(&r)),
        other => Err(unexpected(&other)),
    })?
}

// Text protocol

/// Queue a `version` fence ahead of a request that expects a reply
///
/// Earlier noreply requests only ever answer with error lines, and those all
/// arrive before the fence's `VERSION`. The request's own reply follows it.
fn text_fence(conn: &mut Connection) {
    if conn.unconfirmed && !conn.fenced {
        conn.out.version();
        conn.fenced = true;
    }
}

/// Read up to and including the fence, holding the first error line until
/// the next confirmation
fn text_settle(conn: &mut Connection, opts: &SocketOptions) -> Result<(), BackendError> {
    while conn.fenced {
        let stale = conn.read_reply(opts, |reply| match reply {
            Reply::Version(_) => Ok(None),
            r if r.is_error() => Ok(Some(error_reply(&r))),
            other => Err(unexpected(&other)),
        })??;
        match stale {
            Some(e) => {
                debug!(error = %e, "error reply to noreply request");
                conn.quiet_error.get_or_insert(e);
            }
            None => {
                conn.fenced = false;
                conn.unconfirmed = false;
            }
        }
    }
    Ok(())
}

/// Send a request that expects a reply, fenced off from earlier noreply ones
fn text_exchange(
    conn: &mut Connection,
    opts: &SocketOptions,
    write: impl FnOnce(&mut RequestWriter),
) -> Result<(), BackendError> {
    text_fence(conn);
    write(&mut conn.out);
    conn.send(opts)?;
    text_settle(conn, opts)
}

#[allow(clippy::too_many_arguments)]
pub fn text_store(
    conn: &mut Connection,
    opts: &SocketOptions,
    kind: StoreKind,
    key: &[u8],
    value: &[u8],
    exptime: u32,
    flags: u32,
    noreply: bool,
) -> Result<Status, BackendError> {
    if noreply {
        conn.out.store(kind, key, flags, exptime, value, true);
        conn.send(opts)?;
        conn.unconfirmed = true;
        return Ok(Status::Buffered);
    }
    text_exchange(conn, opts, |out| out.store(kind, key, flags, exptime, value, false))?;
    conn.read_reply(opts, |reply| match reply {
        Reply::Stored => Ok(Status::Success),
        Reply::NotStored => Ok(Status::Failure(BackendError::NotStored)),
        Reply::Exists => Ok(Status::Failure(BackendError::Exists)),
        Reply::NotFound => Ok(Status::NotFound),
        r if r.is_error() => Ok(Status::Failure(error_reply(&r))),
        other => Err(unexpected(&other)),
    })?
}

pub fn text_get(
    conn: &mut Connection,
    opts: &SocketOptions,
    key: &[u8],
) -> Result<Option<Vec<u8>>, BackendError> {
    text_exchange(conn, opts, |out| out.get(&[key]))?;
    let mut found = None;
    loop {
        match read_item(conn, opts)? {
            Item::Value(_, data) => found = Some(data),
            Item::End => return Ok(found),
        }
    }
}

pub fn text_delta(
    conn: &mut Connection,
    opts: &SocketOptions,
    direction: Direction,
    key: &[u8],
    offset: u64,
    noreply: bool,
) -> Result<(Status, u64), BackendError> {
    if noreply {
        conn.out.delta(direction, key, offset, true);
        conn.send(opts)?;
        conn.unconfirmed = true;
        return Ok((Status::Buffered, 0));
    }
    text_exchange(conn, opts, |out| out.delta(direction, key, offset, false))?;
    conn.read_reply(opts, |reply| match reply {
        Reply::Numeric(value) => Ok((Status::Success, value)),
        Reply::NotFound => Ok((Status::NotFound, 0)),
        r if r.is_error() => Ok((Status::Failure(error_reply(&r)), 0)),
        other => Err(unexpected(&other)),
    })?
}

pub fn text_delete(
    conn: &mut Connection,
    opts: &SocketOptions,
    key: &[u8],
    hold: u32,
    noreply: bool,
) -> Result<Status, BackendError> {
    if noreply {
        conn.out.delete(key, hold, true);
        conn.send(opts)?;
        conn.unconfirmed = true;
        return Ok(Status::Buffered);
    }
    text_exchange(conn, opts, |out| out.delete(key, hold, false))?;
    conn.read_reply(opts, |reply| match reply {
        Reply::Deleted => Ok(Status::Success),
        Reply::NotFound => Ok(Status::NotFound),
        r if r.is_error() => Ok(Status::Failure(error_reply(&r))),
        other => Err(unexpected(&other)),
    })?
}

pub fn text_flush(
    conn: &mut Connection,
    opts: &SocketOptions,
    delay: u32,
    noreply: bool,
) -> Result<Status, BackendError> {
    if noreply {
        conn.out.flush_all(delay, true);
        conn.send(opts)?;
        conn.unconfirmed = true;
        return Ok(Status::Buffered);
    }
    text_exchange(conn, opts, |out| out.flush_all(delay, false))?;
    conn.read_reply(opts, |reply| match reply {
        Reply::Ok => Ok(Status::Success),
        r if r.is_error() => Ok(Status::Failure(error_reply(&r))),
        other => Err(unexpected(&other)),
    })?
}

/// Send pending requests and wait for a `version` round trip
///
/// Error lines that arrive before the version reply belong to earlier
/// noreply requests; the first one fails the confirmation, as does one
/// held from an earlier fence.
pub fn text_confirm(conn: &mut Connection, opts: &SocketOptions) -> Result<Status, BackendError> {
    text_settle(conn, opts)?;
    conn.out.version();
    conn.send(opts)?;
    let mut first_error = conn.quiet_error.take();
    loop {
        let done = conn.read_reply(opts, |reply| match reply {
            Reply::Version(_) => Ok(true),
            r if r.is_error() => {
                let e = error_reply(&r);
                debug!(error = %e, "error reply to unconfirmed request");
                first_error.get_or_insert(e);
                Ok(false)
            }
            other => Err(unexpected(&other)),
        })??;
        if done {
            break;
        }
    }
    conn.unconfirmed = false;
    Ok(first_error.map_or(Status::Success, Status::Failure))
}

pub fn text_stats(
    conn: &mut Connection,
    opts: &SocketOptions,
) -> Result<Vec<(String, String)>, BackendError> {
    text_exchange(conn, opts, RequestWriter::stats)?;
    let mut stats = Vec::new();
    loop {
        let done = conn.read_reply(opts, |reply| match reply {
            Reply::Stat { name, value } => {
                stats.push((lossy(name), lossy(value)));
                Ok(false)
            }
            Reply::End => Ok(true),
            r if r.is_error() => Err(error_reply(&r)),
            other => Err(unexpected(&other)),
        })??;
        if done {
            return Ok(stats);
        }
    }
}

/// Queue one `get` covering every key routed to this server
pub fn text_multi_get(
    conn: &mut Connection,
    opts: &SocketOptions,
    keys: &[&[u8]],
) -> Result<(), BackendError> {
    text_fence(conn);
    conn.out.get(keys);
    conn.send(opts)
}

/// Next hit of an outstanding multi-get, `None` once the server sent END
pub fn text_multi_next(
    conn: &mut Connection,
    opts: &SocketOptions,
) -> Result<Option<(Vec<u8>, Vec<u8>)>, BackendError> {
    text_settle(conn, opts)?;
    match read_item(conn, opts)? {
        Item::Value(key, data) => Ok(Some((key, data))),
        Item::End => Ok(None),
    }
}

// Binary protocol

fn bin_request(conn: &mut Connection, op: u8, key: &[u8], extras: &[u8], value: &[u8]) -> u32 {
    let opaque = conn.next_opaque();
    binary::encode_request(conn.out.raw_mut(), op, key, extras, value, opaque);
    conn.out.mark_message();
    opaque
}

/// Read packets until the one answering `opaque`
///
/// Anything else in between answers an earlier quiet request, and only
/// failures are ever sent for those.
fn bin_response<T>(
    conn: &mut Connection,
    opts: &SocketOptions,
    opaque: u32,
    mut f: impl FnMut(Packet<'_>) -> T,
) -> Result<T, BackendError> {
    loop {
        let (out, stale) = conn.read_packet(opts, |packet| {
            if packet.opaque == opaque {
                (Some(f(packet)), None)
            } else if packet.status != status::NO_ERROR {
                (None, Some(status_error(packet.status, packet.value)))
            } else {
                (None, None)
            }
        })?;
        if let Some(e) = stale {
            debug!(error = %e, "failure reply to quiet request");
            conn.quiet_error.get_or_insert(e);
        }
        if let Some(out) = out {
            return Ok(out);
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn bin_store(
    conn: &mut Connection,
    opts: &SocketOptions,
    kind: StoreKind,
    key: &[u8],
    value: &[u8],
    expiration: u32,
    flags: u32,
    quiet: bool,
) -> Result<Status, BackendError> {
    let extras = binary::store_extras(flags, expiration);
    let extras: &[u8] = if kind.is_concat() { &[] } else { &extras };
    let opaque = bin_request(conn, binary::store_opcode(kind, quiet), key, extras, value);
    conn.send(opts)?;
    if quiet {
        conn.unconfirmed = true;
        return Ok(Status::Buffered);
    }
    bin_response(conn, opts, opaque, |packet| packet_status(&packet))
}

pub fn bin_get(
    conn: &mut Connection,
    opts: &SocketOptions,
    key: &[u8],
) -> Result<Option<Vec<u8>>, BackendError> {
    let opaque = bin_request(conn, opcode::GET, key, &[], &[]);
    conn.send(opts)?;
    bin_response(conn, opts, opaque, |packet| match packet.status {
        status::NO_ERROR => Ok(Some(packet.value.to_vec())),
        status::KEY_NOT_FOUND => Ok(None),
        code => Err(status_error(code, packet.value)),
    })?
}

/// Counters are never created by a delta, missing keys stay missing
pub fn bin_delta(
    conn: &mut Connection,
    opts: &SocketOptions,
    direction: Direction,
    key: &[u8],
    offset: u64,
    quiet: bool,
) -> Result<(Status, u64), BackendError> {
    let extras = binary::delta_extras(offset, 0, binary::EXPIRATION_NOT_ADD);
    let opaque = bin_request(conn, binary::delta_opcode(direction, quiet), key, &extras, &[]);
    conn.send(opts)?;
    if quiet {
        conn.unconfirmed = true;
        return Ok((Status::Buffered, 0));
    }
    bin_response(conn, opts, opaque, |packet| match packet_status(&packet) {
        Status::Success => packet
            .counter()
            .map(|value| (Status::Success, value))
            .map_err(BackendError::from),
        other => Ok((other, 0)),
    })?
}

pub fn bin_delete(
    conn: &mut Connection,
    opts: &SocketOptions,
    key: &[u8],
    quiet: bool,
) -> Result<Status, BackendError> {
    let op = if quiet { opcode::DELETEQ } else { opcode::DELETE };
    let opaque = bin_request(conn, op, key, &[], &[]);
    conn.send(opts)?;
    if quiet {
        conn.unconfirmed = true;
        return Ok(Status::Buffered);
    }
    bin_response(conn, opts, opaque, |packet| packet_status(&packet))
}

pub fn bin_flush(
    conn: &mut Connection,
    opts: &SocketOptions,
    delay: u32,
    quiet: bool,
) -> Result<Status, BackendError> {
    let op = if quiet { opcode::FLUSHQ } else { opcode::FLUSH };
    let extras = delay.to_be_bytes();
    let extras: &[u8] = if delay > 0 { &extras } else { &[] };
    let opaque = bin_request(conn, op, &[], extras, &[]);
    conn.send(opts)?;
    if quiet {
        conn.unconfirmed = true;
        return Ok(Status::Buffered);
    }
    bin_response(conn, opts, opaque, |packet| packet_status(&packet))
}

/// Send pending requests and wait for a NOOP round trip
pub fn bin_confirm(conn: &mut Connection, opts: &SocketOptions) -> Result<Status, BackendError> {
    let opaque = bin_request(conn, opcode::NOOP, &[], &[], &[]);
    conn.send(opts)?;
    bin_response(conn, opts, opaque, |_| ())?;
    conn.unconfirmed = false;
    Ok(conn
        .quiet_error
        .take()
        .map_or(Status::Success, Status::Failure))
}

pub fn bin_stats(
    conn: &mut Connection,
    opts: &SocketOptions,
) -> Result<Vec<(String, String)>, BackendError> {
    let opaque = bin_request(conn, opcode::STAT, &[], &[], &[]);
    conn.send(opts)?;
    let mut stats = Vec::new();
    loop {
        // The terminating packet carries an empty key
        let entry = bin_response(conn, opts, opaque, |packet| match packet.status {
            status::NO_ERROR if packet.key.is_empty() => Ok(None),
            status::NO_ERROR => Ok(Some((lossy(packet.key), lossy(packet.value)))),
            code => Err(status_error(code, packet.value)),
        })??;
        match entry {
            Some(entry) => stats.push(entry),
            None => return Ok(stats),
        }
    }
}

/// SASL PLAIN exchange. A rejected login is not a transport error.
pub fn bin_sasl_plain(
    conn: &mut Connection,
    opts: &SocketOptions,
    username: &str,
    password: &str,
) -> Result<Status, BackendError> {
    let mut token = Vec::with_capacity(username.len() + password.len() + 2);
    token.push(0);
    token.extend_from_slice(username.as_bytes());
    token.push(0);
    token.extend_from_slice(password.as_bytes());

    let opaque = bin_request(conn, opcode::SASL_AUTH, b"PLAIN", &[], &token);
    conn.send(opts)?;
    let status = bin_response(conn, opts, opaque, |packet| packet_status(&packet))?;
    if matches!(status, Status::Success) {
        conn.authenticated = true;
    }
    Ok(status)
}

/// Queue a GETKQ per key followed by a NOOP terminator
pub fn bin_multi_get(
    conn: &mut Connection,
    opts: &SocketOptions,
    keys: &[&[u8]],
) -> Result<(), BackendError> {
    for key in keys {
        bin_request(conn, opcode::GETKQ, key, &[], &[]);
    }
    bin_request(conn, opcode::NOOP, &[], &[], &[]);
    conn.send(opts)
}

/// Next hit of an outstanding multi-get, `None` once the NOOP arrives
///
/// Failures answering earlier quiet writes can be interleaved; they are held
/// for the next confirmation like in [`bin_response`].
pub fn bin_multi_next(
    conn: &mut Connection,
    opts: &SocketOptions,
) -> Result<Option<(Vec<u8>, Vec<u8>)>, BackendError> {
    loop {
        let (step, stale) = conn.read_packet(opts, |packet| match (packet.opcode, packet.status) {
            (opcode::NOOP, _) => (Some(None), None),
            (opcode::GETKQ, status::NO_ERROR) => {
                (Some(Some((packet.key.to_vec(), packet.value.to_vec()))), None)
            }
            (opcode::GETKQ, _) | (_, status::NO_ERROR) => (None, None),
            (_, code) => (None, Some(status_error(code, packet.value))),
        })?;
        if let Some(e) = stale {
            debug!(error = %e, "failure reply to quiet request");
            conn.quiet_error.get_or_insert(e);
        }
        if let Some(step) = step {
            return Ok(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::server::ServerAddr;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one connection: check each request, answer with canned bytes
    fn scripted(exchanges: Vec<(Vec<u8>, Vec<u8>)>) -> (Connection, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            for (expect, answer) in exchanges {
                let mut got = vec![0u8; expect.len()];
                sock.read_exact(&mut got).unwrap();
                assert_eq!(got, expect, "request {:?}", String::from_utf8_lossy(&got));
                sock.write_all(&answer).unwrap();
            }
        });
        (Connection::new(ServerAddr::new("127.0.0.1", port)), handle)
    }

    fn response(op: u8, code: u16, opaque: u32, key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut out = vec![binary::RESPONSE_MAGIC, op];
        out.extend_from_slice(&(key.len() as u16).to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&code.to_be_bytes());
        out.extend_from_slice(&((key.len() + value.len()) as u32).to_be_bytes());
        out.extend_from_slice(&opaque.to_be_bytes());
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(key);
        out.extend_from_slice(value);
        out
    }

    fn request(op: u8, key: &[u8], extras: &[u8], value: &[u8], opaque: u32) -> Vec<u8> {
        let mut out = bytes::BytesMut::new();
        binary::encode_request(&mut out, op, key, extras, value, opaque);
        out.to_vec()
    }

    #[test]
    fn test_text_store_replies() {
        let (mut conn, server) = scripted(vec![
            (b"set k 0 60 1\r\nv\r\n".to_vec(), b"STORED\r\n".to_vec()),
            (b"add k 0 0 1\r\nv\r\n".to_vec(), b"NOT_STORED\r\n".to_vec()),
            (
                b"set big 0 0 1\r\nv\r\n".to_vec(),
                b"SERVER_ERROR object too large for cache\r\n".to_vec(),
            ),
        ]);
        let opts = SocketOptions::default();

        let status = text_store(&mut conn, &opts, StoreKind::Set, b"k", b"v", 60, 0, false);
        assert!(matches!(status, Ok(Status::Success)));
        let status = text_store(&mut conn, &opts, StoreKind::Add, b"k", b"v", 0, 0, false);
        assert!(matches!(status, Ok(Status::Failure(BackendError::NotStored))));
        let status = text_store(&mut conn, &opts, StoreKind::Set, b"big", b"v", 0, 0, false);
        assert!(matches!(status, Ok(Status::Failure(BackendError::ValueTooLarge))));
        server.join().unwrap();
    }

    #[test]
    fn test_text_get_and_delta() {
        let (mut conn, server) = scripted(vec![
            (b"get k\r\n".to_vec(), b"VALUE k 0 3\r\nabc\r\nEND\r\n".to_vec()),
            (b"get miss\r\n".to_vec(), b"END\r\n".to_vec()),
            (b"incr n 5\r\n".to_vec(), b"15\r\n".to_vec()),
            (
                b"decr s 1\r\n".to_vec(),
                b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n".to_vec(),
            ),
        ]);
        let opts = SocketOptions::default();

        assert_eq!(text_get(&mut conn, &opts, b"k").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(text_get(&mut conn, &opts, b"miss").unwrap(), None);
        match text_delta(&mut conn, &opts, Direction::Increment, b"n", 5, false) {
            Ok((Status::Success, 15)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        match text_delta(&mut conn, &opts, Direction::Decrement, b"s", 1, false) {
            Ok((Status::Failure(BackendError::NonNumeric), 0)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_text_confirm_reports_earlier_error() {
        let (mut conn, server) = scripted(vec![(
            b"set k 0 0 1 noreply\r\nv\r\nversion\r\n".to_vec(),
            b"SERVER_ERROR out of memory storing object\r\nVERSION 1.6.21\r\n".to_vec(),
        )]);
        let opts = SocketOptions::default();

        conn.out.store(StoreKind::Set, b"k", 0, 0, b"v", true);
        match text_confirm(&mut conn, &opts) {
            Ok(Status::Failure(BackendError::Server(msg))) => assert!(msg.contains("out of memory")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!conn.unconfirmed);
        server.join().unwrap();
    }

    #[test]
    fn test_text_get_after_failed_noreply_write() {
        let (mut conn, server) = scripted(vec![
            (
                b"set k0 0 0 2 noreply\r\nv0\r\nversion\r\nget k1\r\n".to_vec(),
                b"SERVER_ERROR out of memory storing object\r\nVERSION 1.6.21\r\nVALUE k1 0 2\r\nv1\r\nEND\r\n"
                    .to_vec(),
            ),
            (b"get k2\r\n".to_vec(), b"END\r\n".to_vec()),
            (b"version\r\n".to_vec(), b"VERSION 1.6.21\r\n".to_vec()),
        ]);
        let opts = SocketOptions::default();

        conn.out.store(StoreKind::Set, b"k0", 0, 0, b"v0", true);
        conn.unconfirmed = true;
        assert_eq!(text_get(&mut conn, &opts, b"k1").unwrap(), Some(b"v1".to_vec()));
        assert!(!conn.unconfirmed);
        assert!(matches!(conn.quiet_error, Some(BackendError::Server(_))));
        assert_eq!(text_get(&mut conn, &opts, b"k2").unwrap(), None);

        // The held error fails the next confirmation, once
        match text_confirm(&mut conn, &opts) {
            Ok(Status::Failure(BackendError::Server(msg))) => assert!(msg.contains("out of memory")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(conn.quiet_error.is_none());
        server.join().unwrap();
    }

    #[test]
    fn test_text_store_after_noreply_write() {
        let (mut conn, server) = scripted(vec![
            (b"delete a noreply\r\n".to_vec(), Vec::new()),
            (
                b"version\r\nadd b 0 0 1\r\nv\r\n".to_vec(),
                b"VERSION 1.6.21\r\nNOT_STORED\r\n".to_vec(),
            ),
        ]);
        let opts = SocketOptions::default();

        assert!(matches!(text_delete(&mut conn, &opts, b"a", 0, true), Ok(Status::Buffered)));
        assert!(conn.unconfirmed);
        // The store's own refusal is not taken for the delete's
        let status = text_store(&mut conn, &opts, StoreKind::Add, b"b", b"v", 0, 0, false);
        assert!(matches!(status, Ok(Status::Failure(BackendError::NotStored))));
        assert!(conn.quiet_error.is_none());
        assert!(!conn.unconfirmed);
        server.join().unwrap();
    }

    #[test]
    fn test_text_multi_get_after_failed_noreply_write() {
        let (mut conn, server) = scripted(vec![(
            b"incr n 1 noreply\r\nversion\r\nget a\r\n".to_vec(),
            b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\nVERSION 1.6.21\r\nVALUE a 0 1\r\n1\r\nEND\r\n"
                .to_vec(),
        )]);
        let opts = SocketOptions::default();

        conn.out.delta(Direction::Increment, b"n", 1, true);
        conn.unconfirmed = true;
        text_multi_get(&mut conn, &opts, &[b"a".as_slice()]).unwrap();
        assert_eq!(
            text_multi_next(&mut conn, &opts).unwrap(),
            Some((b"a".to_vec(), b"1".to_vec()))
        );
        assert_eq!(text_multi_next(&mut conn, &opts).unwrap(), None);
        assert!(matches!(conn.quiet_error, Some(BackendError::NonNumeric)));
        server.join().unwrap();
    }

    #[test]
    fn test_text_stats() {
        let (mut conn, server) = scripted(vec![(
            b"stats\r\n".to_vec(),
            b"STAT pid 42\r\nSTAT version 1.6.21\r\nEND\r\n".to_vec(),
        )]);
        let stats = text_stats(&mut conn, &SocketOptions::default()).unwrap();
        assert_eq!(
            stats,
            vec![
                ("pid".to_string(), "42".to_string()),
                ("version".to_string(), "1.6.21".to_string()),
            ]
        );
        server.join().unwrap();
    }

    #[test]
    fn test_text_multi_get() {
        let (mut conn, server) = scripted(vec![(
            b"get a b\r\n".to_vec(),
            b"VALUE a 0 1\r\n1\r\nVALUE b 0 1\r\n2\r\nEND\r\n".to_vec(),
        )]);
        let opts = SocketOptions::default();
        text_multi_get(&mut conn, &opts, &[b"a".as_slice(), b"b".as_slice()]).unwrap();
        assert_eq!(
            text_multi_next(&mut conn, &opts).unwrap(),
            Some((b"a".to_vec(), b"1".to_vec()))
        );
        assert_eq!(
            text_multi_next(&mut conn, &opts).unwrap(),
            Some((b"b".to_vec(), b"2".to_vec()))
        );
        assert_eq!(text_multi_next(&mut conn, &opts).unwrap(), None);
        server.join().unwrap();
    }

    #[test]
    fn test_bin_get_skips_quiet_failure() {
        let extras = binary::store_extras(0, 0);
        let mut first = request(opcode::SETQ, b"k", &extras, b"v", 1);
        first.extend(request(opcode::GET, b"k", &[], &[], 2));

        let mut answer = response(opcode::SETQ, status::OUT_OF_MEMORY, 1, b"", b"");
        answer.extend(response(opcode::GET, status::KEY_NOT_FOUND, 2, b"", b"Not found"));

        let (mut conn, server) = scripted(vec![(first, answer)]);
        let opts = SocketOptions::default();

        conn.out.raw_mut().extend_from_slice(&request(opcode::SETQ, b"k", &extras, b"v", 1));
        conn.out.mark_message();
        conn.next_opaque();
        assert_eq!(bin_get(&mut conn, &opts, b"k").unwrap(), None);
        assert!(matches!(conn.quiet_error, Some(BackendError::Server(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_bin_delta_and_confirm() {
        let extras = binary::delta_extras(3, 0, binary::EXPIRATION_NOT_ADD);
        let (mut conn, server) = scripted(vec![
            (
                request(opcode::INCREMENT, b"n", &extras, &[], 1),
                response(opcode::INCREMENT, status::NO_ERROR, 1, b"", &10u64.to_be_bytes()),
            ),
            (
                request(opcode::NOOP, &[], &[], &[], 2),
                response(opcode::NOOP, status::NO_ERROR, 2, b"", b""),
            ),
        ]);
        let opts = SocketOptions::default();

        match bin_delta(&mut conn, &opts, Direction::Increment, b"n", 3, false) {
            Ok((Status::Success, 10)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(bin_confirm(&mut conn, &opts), Ok(Status::Success)));
        server.join().unwrap();
    }

    #[test]
    fn test_bin_multi_get() {
        let mut req = request(opcode::GETKQ, b"a", &[], &[], 1);
        req.extend(request(opcode::GETKQ, b"b", &[], &[], 2));
        req.extend(request(opcode::NOOP, &[], &[], &[], 3));
        let mut answer = response(opcode::GETKQ, status::NO_ERROR, 2, b"b", b"2");
        answer.extend(response(opcode::NOOP, status::NO_ERROR, 3, b"", b""));

        let (mut conn, server) = scripted(vec![(req, answer)]);
        let opts = SocketOptions::default();
        bin_multi_get(&mut conn, &opts, &[b"a".as_slice(), b"b".as_slice()]).unwrap();
        assert_eq!(
            bin_multi_next(&mut conn, &opts).unwrap(),
            Some((b"b".to_vec(), b"2".to_vec()))
        );
        assert_eq!(bin_multi_next(&mut conn, &opts).unwrap(), None);
        server.join().unwrap();
    }

    #[test]
    fn test_bin_multi_get_holds_quiet_failure() {
        let extras = binary::store_extras(0, 0);
        let mut req = request(opcode::SETQ, b"k", &extras, b"v", 1);
        req.extend(request(opcode::GETKQ, b"a", &[], &[], 2));
        req.extend(request(opcode::NOOP, &[], &[], &[], 3));
        let mut answer = response(opcode::SETQ, status::OUT_OF_MEMORY, 1, b"", b"");
        answer.extend(response(opcode::NOOP, status::NO_ERROR, 3, b"", b""));

        let (mut conn, server) = scripted(vec![
            (req, answer),
            (
                request(opcode::NOOP, &[], &[], &[], 4),
                response(opcode::NOOP, status::NO_ERROR, 4, b"", b""),
            ),
        ]);
        let opts = SocketOptions::default();

        bin_store(&mut conn, &opts, StoreKind::Set, b"k", b"v", 0, 0, true).unwrap();
        bin_multi_get(&mut conn, &opts, &[b"a".as_slice()]).unwrap();
        assert_eq!(bin_multi_next(&mut conn, &opts).unwrap(), None);
        assert!(matches!(conn.quiet_error, Some(BackendError::Server(_))));

        assert!(matches!(
            bin_confirm(&mut conn, &opts),
            Ok(Status::Failure(BackendError::Server(_)))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_bin_sasl() {
        let (mut conn, server) = scripted(vec![
            (
                request(opcode::SASL_AUTH, b"PLAIN", &[], b"\0user\0secret", 1),
                response(opcode::SASL_AUTH, status::NO_ERROR, 1, b"", b"Authenticated"),
            ),
            (
                request(opcode::SASL_AUTH, b"PLAIN", &[], b"\0user\0wrong", 2),
                response(opcode::SASL_AUTH, status::AUTH_ERROR, 2, b"", b"Auth failure"),
            ),
        ]);
        let opts = SocketOptions::default();
        assert!(matches!(
            bin_sasl_plain(&mut conn, &opts, "user", "secret"),
            Ok(Status::Success)
        ));
        assert!(conn.authenticated);
        assert!(matches!(
            bin_sasl_plain(&mut conn, &opts, "user", "wrong"),
            Ok(Status::Failure(BackendError::AuthFailed(_)))
        ));
        server.join().unwrap();
    }
}
