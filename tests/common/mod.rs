//! In-process memcached stand-in speaking the text and binary protocols

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const MAGIC_REQUEST: u8 = 0x80;
const MAGIC_RESPONSE: u8 = 0x81;

const NOT_FOUND: u16 = 0x0001;
const EXISTS: u16 = 0x0002;
const NOT_STORED: u16 = 0x0005;
const NON_NUMERIC: u16 = 0x0006;
const AUTH_ERROR: u16 = 0x0020;
const UNKNOWN_COMMAND: u16 = 0x0081;

#[derive(Default)]
pub struct Shared {
    items: Mutex<HashMap<Vec<u8>, (u32, Vec<u8>)>>,
    /// `version` and NOOP requests seen, i.e. delivery confirmations
    confirmations: AtomicUsize,
    /// Write requests seen, quiet or not
    writes: AtomicUsize,
    credentials: Option<(String, String)>,
}

pub struct FakeServer {
    pub port: u16,
    shared: Arc<Shared>,
}

impl FakeServer {
    pub fn start() -> Self {
        Self::spawn(Shared::default())
    }

    /// Binary requests other than SASL need a login first
    pub fn with_credentials(username: &str, password: &str) -> Self {
        Self::spawn(Shared {
            credentials: Some((username.to_string(), password.to_string())),
            ..Shared::default()
        })
    }

    fn spawn(shared: Shared) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(shared);
        let accept = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let shared = Arc::clone(&accept);
                thread::spawn(move || {
                    let _ = serve(stream, &shared);
                });
            }
        });
        Self { port, shared }
    }

    pub fn server(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn item(&self, key: &str) -> Option<Vec<u8>> {
        let items = self.shared.items.lock().unwrap();
        items.get(key.as_bytes()).map(|(_, data)| data.clone())
    }

    pub fn insert(&self, key: &str, value: &str) {
        let mut items = self.shared.items.lock().unwrap();
        items.insert(key.as_bytes().to_vec(), (0, value.as_bytes().to_vec()));
    }

    pub fn len(&self) -> usize {
        self.shared.items.lock().unwrap().len()
    }

    pub fn confirmations(&self) -> usize {
        self.shared.confirmations.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.shared.writes.load(Ordering::SeqCst)
    }
}

/// Port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

enum StoreResult {
    Stored,
    NotStored,
}

fn store(shared: &Shared, verb: &str, key: &[u8], flags: u32, data: Vec<u8>) -> StoreResult {
    shared.writes.fetch_add(1, Ordering::SeqCst);
    let mut items = shared.items.lock().unwrap();
    let exists = items.contains_key(key);
    match verb {
        "add" if exists => StoreResult::NotStored,
        "replace" | "append" | "prepend" if !exists => StoreResult::NotStored,
        "append" => {
            if let Some((_, current)) = items.get_mut(key) {
                current.extend_from_slice(&data);
            }
            StoreResult::Stored
        }
        "prepend" => {
            if let Some((_, current)) = items.get_mut(key) {
                let mut joined = data;
                joined.extend_from_slice(current);
                *current = joined;
            }
            StoreResult::Stored
        }
        _ => {
            items.insert(key.to_vec(), (flags, data));
            StoreResult::Stored
        }
    }
}

enum DeltaResult {
    Value(u64),
    NotFound,
    NonNumeric,
}

fn delta(shared: &Shared, incr: bool, key: &[u8], offset: u64) -> DeltaResult {
    shared.writes.fetch_add(1, Ordering::SeqCst);
    let mut items = shared.items.lock().unwrap();
    let Some((_, data)) = items.get_mut(key) else {
        return DeltaResult::NotFound;
    };
    let Some(n) = std::str::from_utf8(data).ok().and_then(|s| s.parse::<u64>().ok()) else {
        return DeltaResult::NonNumeric;
    };
    let n = if incr {
        n.wrapping_add(offset)
    } else {
        n.saturating_sub(offset)
    };
    *data = n.to_string().into_bytes();
    DeltaResult::Value(n)
}

fn delete(shared: &Shared, key: &[u8]) -> bool {
    shared.writes.fetch_add(1, Ordering::SeqCst);
    shared.items.lock().unwrap().remove(key).is_some()
}

fn stats(shared: &Shared) -> Vec<(String, String)> {
    let items = shared.items.lock().unwrap();
    vec![
        ("pid".to_string(), std::process::id().to_string()),
        ("curr_items".to_string(), items.len().to_string()),
    ]
}

fn serve(stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut authenticated = false;
    loop {
        let first = match reader.fill_buf()? {
            [] => return Ok(()),
            buf => buf[0],
        };
        if first == MAGIC_REQUEST {
            serve_binary(&mut reader, &mut writer, shared, &mut authenticated)?;
        } else {
            serve_text(&mut reader, &mut writer, shared)?;
        }
    }
}

fn serve_text(
    reader: &mut BufReader<TcpStream>,
    writer: &mut TcpStream,
    shared: &Shared,
) -> std::io::Result<()> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    let line = String::from_utf8_lossy(&line).trim_end().to_string();
    let parts: Vec<&str> = line.split(' ').collect();
    let noreply = parts.last() == Some(&"noreply");
    let mut out = Vec::new();

    match parts[0] {
        verb @ ("set" | "add" | "replace" | "append" | "prepend") => {
            let flags: u32 = parts[2].parse().unwrap();
            let len: usize = parts[4].parse().unwrap();
            let mut data = vec![0; len + 2];
            reader.read_exact(&mut data)?;
            data.truncate(len);
            match store(shared, verb, parts[1].as_bytes(), flags, data) {
                StoreResult::Stored => out.extend_from_slice(b"STORED\r\n"),
                StoreResult::NotStored => out.extend_from_slice(b"NOT_STORED\r\n"),
            }
        }
        "get" | "gets" => {
            let items = shared.items.lock().unwrap();
            for key in &parts[1..] {
                if let Some((flags, data)) = items.get(key.as_bytes()) {
                    out.extend_from_slice(format!("VALUE {key} {flags} {}\r\n", data.len()).as_bytes());
                    out.extend_from_slice(data);
                    out.extend_from_slice(b"\r\n");
                }
            }
            out.extend_from_slice(b"END\r\n");
        }
        verb @ ("incr" | "decr") => {
            let offset: u64 = parts[2].parse().unwrap();
            match delta(shared, verb == "incr", parts[1].as_bytes(), offset) {
                DeltaResult::Value(n) => out.extend_from_slice(format!("{n}\r\n").as_bytes()),
                DeltaResult::NotFound => out.extend_from_slice(b"NOT_FOUND\r\n"),
                DeltaResult::NonNumeric => out.extend_from_slice(
                    b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n",
                ),
            }
        }
        "delete" => {
            if delete(shared, parts[1].as_bytes()) {
                out.extend_from_slice(b"DELETED\r\n");
            } else {
                out.extend_from_slice(b"NOT_FOUND\r\n");
            }
        }
        "flush_all" => {
            shared.writes.fetch_add(1, Ordering::SeqCst);
            shared.items.lock().unwrap().clear();
            out.extend_from_slice(b"OK\r\n");
        }
        "stats" => {
            for (name, value) in stats(shared) {
                out.extend_from_slice(format!("STAT {name} {value}\r\n").as_bytes());
            }
            out.extend_from_slice(b"END\r\n");
        }
        "version" => {
            shared.confirmations.fetch_add(1, Ordering::SeqCst);
            out.extend_from_slice(b"VERSION 1.6.0-fake\r\n");
        }
        _ => out.extend_from_slice(b"ERROR\r\n"),
    }

    // Errors are reported even for noreply requests
    let is_error = out.starts_with(b"CLIENT_ERROR") || out.starts_with(b"ERROR");
    if !noreply || is_error {
        writer.write_all(&out)?;
    }
    Ok(())
}

struct Request {
    opcode: u8,
    opaque: u32,
    extras: Vec<u8>,
    key: Vec<u8>,
    value: Vec<u8>,
}

fn read_request(reader: &mut BufReader<TcpStream>) -> std::io::Result<Request> {
    let mut header = [0u8; 24];
    reader.read_exact(&mut header)?;
    let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_len = header[4] as usize;
    let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let opaque = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let mut body = vec![0; body_len];
    reader.read_exact(&mut body)?;
    let value = body.split_off(extras_len + key_len);
    let key = body.split_off(extras_len);
    Ok(Request {
        opcode: header[1],
        opaque,
        extras: body,
        key,
        value,
    })
}

fn packet(opcode: u8, status: u16, opaque: u32, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = vec![MAGIC_RESPONSE, opcode];
    out.extend_from_slice(&(key.len() as u16).to_be_bytes());
    out.push(extras.len() as u8);
    out.push(0);
    out.extend_from_slice(&status.to_be_bytes());
    out.extend_from_slice(&((extras.len() + key.len() + value.len()) as u32).to_be_bytes());
    out.extend_from_slice(&opaque.to_be_bytes());
    out.extend_from_slice(&0u64.to_be_bytes());
    out.extend_from_slice(extras);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

fn serve_binary(
    reader: &mut BufReader<TcpStream>,
    writer: &mut TcpStream,
    shared: &Shared,
    authenticated: &mut bool,
) -> std::io::Result<()> {
    let req = read_request(reader)?;
    let op = req.opcode;
    let reply = |status: u16, extras: &[u8], key: &[u8], value: &[u8]| {
        packet(op, status, req.opaque, extras, key, value)
    };
    let error = |status: u16| reply(status, &[], &[], b"error");

    let needs_auth = shared.credentials.is_some() && !*authenticated;
    let (out, quiet_success) = match op {
        0x21 => {
            let expected = shared.credentials.as_ref().map(|(u, p)| {
                let mut token = vec![0];
                token.extend_from_slice(u.as_bytes());
                token.push(0);
                token.extend_from_slice(p.as_bytes());
                token
            });
            if expected.as_deref() == Some(req.value.as_slice()) {
                *authenticated = true;
                (reply(0, &[], &[], b"Authenticated"), false)
            } else {
                (error(AUTH_ERROR), false)
            }
        }
        0x0a => {
            shared.confirmations.fetch_add(1, Ordering::SeqCst);
            (reply(0, &[], &[], &[]), false)
        }
        0x0b => (reply(0, &[], &[], b"1.6.0-fake"), false),
        _ if needs_auth => (error(AUTH_ERROR), false),
        // get, getk, getkq
        0x00 | 0x0c | 0x0d => {
            let items = shared.items.lock().unwrap();
            let key: &[u8] = if op == 0x00 { &[] } else { &req.key };
            match items.get(&req.key) {
                Some((flags, data)) => (reply(0, &flags.to_be_bytes(), key, data), false),
                None if op == 0x0d => (Vec::new(), true),
                None => (reply(NOT_FOUND, &[], key, b"Not found"), false),
            }
        }
        // set, add, replace, append, prepend and their quiet forms
        0x01 | 0x02 | 0x03 | 0x0e | 0x0f | 0x11 | 0x12 | 0x13 | 0x19 | 0x1a => {
            let verb = match op {
                0x01 | 0x11 => "set",
                0x02 | 0x12 => "add",
                0x03 | 0x13 => "replace",
                0x0e | 0x19 => "append",
                _ => "prepend",
            };
            let flags = if req.extras.len() >= 4 {
                u32::from_be_bytes([req.extras[0], req.extras[1], req.extras[2], req.extras[3]])
            } else {
                0
            };
            let quiet = op >= 0x11;
            match store(shared, verb, &req.key, flags, req.value.clone()) {
                StoreResult::Stored => (reply(0, &[], &[], &[]), quiet),
                StoreResult::NotStored if verb == "add" => (error(EXISTS), false),
                StoreResult::NotStored => (error(NOT_STORED), false),
            }
        }
        // delete, deleteq
        0x04 | 0x14 => {
            if delete(shared, &req.key) {
                (reply(0, &[], &[], &[]), op == 0x14)
            } else {
                (error(NOT_FOUND), false)
            }
        }
        // increment, decrement and quiet forms
        0x05 | 0x06 | 0x15 | 0x16 => {
            let offset = u64::from_be_bytes(req.extras[..8].try_into().unwrap());
            let incr = op == 0x05 || op == 0x15;
            match delta(shared, incr, &req.key, offset) {
                DeltaResult::Value(n) => (reply(0, &[], &[], &n.to_be_bytes()), op >= 0x15),
                DeltaResult::NotFound => (error(NOT_FOUND), false),
                DeltaResult::NonNumeric => (error(NON_NUMERIC), false),
            }
        }
        // flush, flushq
        0x08 | 0x18 => {
            shared.writes.fetch_add(1, Ordering::SeqCst);
            shared.items.lock().unwrap().clear();
            (reply(0, &[], &[], &[]), op == 0x18)
        }
        0x10 => {
            let mut out = Vec::new();
            for (name, value) in stats(shared) {
                out.extend(reply(0, &[], name.as_bytes(), value.as_bytes()));
            }
            out.extend(reply(0, &[], &[], &[]));
            (out, false)
        }
        _ => (error(UNKNOWN_COMMAND), false),
    };

    if !quiet_success {
        writer.write_all(&out)?;
    }
    Ok(())
}
