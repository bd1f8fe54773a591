//! Memcached text protocol request builder

use crate::protocol::command::{Direction, StoreKind};
use bytes::BytesMut;
use itoa::Buffer;

/// Request writer for the memcached text protocol
///
/// Requests accumulate in one buffer so several of them can go out in a
/// single write.
pub struct RequestWriter {
    buf: BytesMut,
    messages: usize,
}

impl RequestWriter {
    /// Create a new request writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            messages: 0,
        }
    }

    /// Get the internal buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Number of requests currently buffered
    pub fn messages(&self) -> usize {
        self.messages
    }

    /// Take the buffer, leaving an empty buffer in its place
    pub fn take(&mut self) -> BytesMut {
        self.messages = 0;
        std::mem::take(&mut self.buf)
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.messages = 0;
        self.buf.clear();
    }

    /// Returns true if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Raw bytes produced by another encoder (binary packets)
    pub fn extend_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.messages += 1;
    }

    /// Mutable access for encoders writing in place
    pub(crate) fn raw_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Count a message written through `raw_mut`
    pub(crate) fn mark_message(&mut self) {
        self.messages += 1;
    }

    /// Write a storage command
    /// Format: <verb> <key> <flags> <exptime> <bytes> [noreply]\r\n<data>\r\n
    pub fn store(
        &mut self,
        kind: StoreKind,
        key: &[u8],
        flags: u32,
        exptime: u32,
        data: &[u8],
        noreply: bool,
    ) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(kind.verb());
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(itoa_buf.format(flags).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(itoa_buf.format(exptime).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(data.len()).as_bytes());
        self.noreply(noreply);
        self.buf.extend_from_slice(b"\r\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self.messages += 1;
    }

    /// Write a retrieval command for one or more keys
    /// Format: get <key>*\r\n
    pub fn get<K: AsRef<[u8]>>(&mut self, keys: &[K]) {
        self.buf.extend_from_slice(b"get");
        for key in keys {
            self.buf.extend_from_slice(b" ");
            self.buf.extend_from_slice(key.as_ref());
        }
        self.buf.extend_from_slice(b"\r\n");
        self.messages += 1;
    }

    /// Write an incr/decr command
    /// Format: incr|decr <key> <value> [noreply]\r\n
    pub fn delta(&mut self, direction: Direction, key: &[u8], offset: u64, noreply: bool) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(direction.verb());
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(itoa_buf.format(offset).as_bytes());
        self.noreply(noreply);
        self.buf.extend_from_slice(b"\r\n");
        self.messages += 1;
    }

    /// Write a delete command
    /// Format: delete <key> [hold] [noreply]\r\n
    pub fn delete(&mut self, key: &[u8], hold: u32, noreply: bool) {
        self.buf.extend_from_slice(b"delete ");
        self.buf.extend_from_slice(key);
        if hold > 0 {
            let mut itoa_buf = Buffer::new();
            self.buf.extend_from_slice(b" ");
            self.buf.extend_from_slice(itoa_buf.format(hold).as_bytes());
        }
        self.noreply(noreply);
        self.buf.extend_from_slice(b"\r\n");
        self.messages += 1;
    }

    /// Write a flush_all command
    /// Format: flush_all [delay] [noreply]\r\n
    pub fn flush_all(&mut self, delay: u32, noreply: bool) {
        self.buf.extend_from_slice(b"flush_all");
        if delay > 0 {
            let mut itoa_buf = Buffer::new();
            self.buf.extend_from_slice(b" ");
            self.buf.extend_from_slice(itoa_buf.format(delay).as_bytes());
        }
        self.noreply(noreply);
        self.buf.extend_from_slice(b"\r\n");
        self.messages += 1;
    }

    /// Write a stats command
    pub fn stats(&mut self) {
        self.buf.extend_from_slice(b"stats\r\n");
        self.messages += 1;
    }

    /// Write a version command
    /// Used as the round trip that confirms earlier noreply requests
    pub fn version(&mut self) {
        self.buf.extend_from_slice(b"version\r\n");
        self.messages += 1;
    }

    fn noreply(&mut self, noreply: bool) {
        if noreply {
            self.buf.extend_from_slice(b" noreply");
        }
    }
}

impl Default for RequestWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}
