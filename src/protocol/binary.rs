//! Memcached binary protocol packets
//!
//! Header layout (24 bytes, big endian):
//! magic(1) opcode(1) key_len(2) extras_len(1) data_type(1)
//! vbucket|status(2) body_len(4) opaque(4) cas(8)

use crate::ProtocolError;
use crate::protocol::command::{Direction, StoreKind};
use bytes::{BufMut, BytesMut};

pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;
pub const HEADER_LEN: usize = 24;

/// Expiration telling incr/decr never to create a missing counter
pub const EXPIRATION_NOT_ADD: u32 = 0xffff_ffff;

/// Opcodes used by this client
pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const INCREMENT: u8 = 0x05;
    pub const DECREMENT: u8 = 0x06;
    pub const FLUSH: u8 = 0x08;
    pub const NOOP: u8 = 0x0a;
    pub const VERSION: u8 = 0x0b;
    pub const GETK: u8 = 0x0c;
    pub const GETKQ: u8 = 0x0d;
    pub const APPEND: u8 = 0x0e;
    pub const PREPEND: u8 = 0x0f;
    pub const STAT: u8 = 0x10;
    pub const SETQ: u8 = 0x11;
    pub const ADDQ: u8 = 0x12;
    pub const REPLACEQ: u8 = 0x13;
    pub const DELETEQ: u8 = 0x14;
    pub const INCREMENTQ: u8 = 0x15;
    pub const DECREMENTQ: u8 = 0x16;
    pub const FLUSHQ: u8 = 0x18;
    pub const APPENDQ: u8 = 0x19;
    pub const PREPENDQ: u8 = 0x1a;
    pub const SASL_AUTH: u8 = 0x21;
}

/// Response status codes
pub mod status {
    pub const NO_ERROR: u16 = 0x0000;
    pub const KEY_NOT_FOUND: u16 = 0x0001;
    pub const KEY_EXISTS: u16 = 0x0002;
    pub const VALUE_TOO_LARGE: u16 = 0x0003;
    pub const INVALID_ARGUMENTS: u16 = 0x0004;
    pub const ITEM_NOT_STORED: u16 = 0x0005;
    pub const NON_NUMERIC: u16 = 0x0006;
    pub const AUTH_ERROR: u16 = 0x0020;
    pub const UNKNOWN_COMMAND: u16 = 0x0081;
    pub const OUT_OF_MEMORY: u16 = 0x0082;
}

/// Opcode for a storage command, quiet variants suppress success replies
pub fn store_opcode(kind: StoreKind, quiet: bool) -> u8 {
    match (kind, quiet) {
        (StoreKind::Set, false) => opcode::SET,
        (StoreKind::Set, true) => opcode::SETQ,
        (StoreKind::Add, false) => opcode::ADD,
        (StoreKind::Add, true) => opcode::ADDQ,
        (StoreKind::Replace, false) => opcode::REPLACE,
        (StoreKind::Replace, true) => opcode::REPLACEQ,
        (StoreKind::Append, false) => opcode::APPEND,
        (StoreKind::Append, true) => opcode::APPENDQ,
        (StoreKind::Prepend, false) => opcode::PREPEND,
        (StoreKind::Prepend, true) => opcode::PREPENDQ,
    }
}

/// Opcode for incr/decr
pub fn delta_opcode(direction: Direction, quiet: bool) -> u8 {
    match (direction, quiet) {
        (Direction::Increment, false) => opcode::INCREMENT,
        (Direction::Increment, true) => opcode::INCREMENTQ,
        (Direction::Decrement, false) => opcode::DECREMENT,
        (Direction::Decrement, true) => opcode::DECREMENTQ,
    }
}

/// Append one request packet to `out`
pub fn encode_request(
    out: &mut BytesMut,
    opcode: u8,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    opaque: u32,
) {
    let body_len = extras.len() + key.len() + value.len();
    out.reserve(HEADER_LEN + body_len);
    out.put_u8(REQUEST_MAGIC);
    out.put_u8(opcode);
    out.put_u16(key.len() as u16);
    out.put_u8(extras.len() as u8);
    out.put_u8(0); // raw bytes data type
    out.put_u16(0); // vbucket
    out.put_u32(body_len as u32);
    out.put_u32(opaque);
    out.put_u64(0); // cas
    out.extend_from_slice(extras);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
}

/// Extras for set/add/replace: flags, expiration
pub fn store_extras(flags: u32, expiration: u32) -> [u8; 8] {
    let mut extras = [0u8; 8];
    extras[..4].copy_from_slice(&flags.to_be_bytes());
    extras[4..].copy_from_slice(&expiration.to_be_bytes());
    extras
}

/// Extras for incr/decr: delta, initial value, expiration
pub fn delta_extras(offset: u64, initial: u64, expiration: u32) -> [u8; 20] {
    let mut extras = [0u8; 20];
    extras[..8].copy_from_slice(&offset.to_be_bytes());
    extras[8..16].copy_from_slice(&initial.to_be_bytes());
    extras[16..].copy_from_slice(&expiration.to_be_bytes());
    extras
}

/// Response packet, borrowing from the read buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    pub opcode: u8,
    pub status: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: &'a [u8],
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl Packet<'_> {
    /// Counter value carried by an incr/decr response
    pub fn counter(&self) -> Result<u64, ProtocolError> {
        let bytes: [u8; 8] = self
            .value
            .try_into()
            .map_err(|_| ProtocolError::InvalidNumericValue)?;
        Ok(u64::from_be_bytes(bytes))
    }
}

/// Result of decoding
#[derive(Debug)]
pub enum Decoded<'a> {
    /// Packet fully decoded
    Complete(Packet<'a>, usize),
    /// Need more data to complete decoding
    NeedMoreData,
    /// Decode error
    Error(ProtocolError),
}

/// Decode one response packet from a buffer
pub fn decode(buf: &[u8]) -> Decoded<'_> {
    if buf.len() < HEADER_LEN {
        return Decoded::NeedMoreData;
    }
    if buf[0] != RESPONSE_MAGIC {
        return Decoded::Error(ProtocolError::InvalidMagic(buf[0]));
    }

    let opcode = buf[1];
    let key_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let extras_len = buf[4] as usize;
    let status = u16::from_be_bytes([buf[6], buf[7]]);
    let body_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
    let opaque = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
    let cas = u64::from_be_bytes([
        buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
    ]);

    if extras_len + key_len > body_len {
        return Decoded::Error(ProtocolError::InvalidBytesLength);
    }

    let total = HEADER_LEN + body_len;
    if buf.len() < total {
        return Decoded::NeedMoreData;
    }

    let body = &buf[HEADER_LEN..total];
    let (extras, rest) = body.split_at(extras_len);
    let (key, value) = rest.split_at(key_len);

    Decoded::Complete(
        Packet {
            opcode,
            status,
            opaque,
            cas,
            extras,
            key,
            value,
        },
        total,
    )
}
