//! Hand-written memcached text protocol reply parser
//!
//! Two-phase parsing:
//! 1. Parse the reply line (up to \r\n)
//! 2. For VALUE replies, read the data block

use crate::ProtocolError;
use crate::protocol::reply::Reply;

/// Case-insensitive word comparison (avoids allocation from to_ascii_lowercase)
#[inline]
fn word_eq(word: &[u8], expected: &[u8]) -> bool {
    word.len() == expected.len()
        && word
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| a.to_ascii_uppercase() == *b)
}

/// Result of parsing
#[derive(Debug)]
pub enum ParseResult<'a> {
    /// Reply fully parsed
    Complete(Reply<'a>, usize),
    /// Need more data to complete parsing
    NeedMoreData,
    /// Parse error
    Error(ProtocolError),
}

/// Parse one memcached reply from a buffer
pub fn parse(buf: &[u8]) -> ParseResult<'_> {
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return ParseResult::NeedMoreData,
    };

    let line = &buf[..line_end];
    let consumed = line_end + 2;

    let (word, rest) = split_word(line);
    if word.is_empty() {
        return ParseResult::Error(ProtocolError::InvalidReply("empty line".to_string()));
    }

    if word[0].is_ascii_digit() {
        return match parse_u64(trim_end(line)) {
            Some(n) => ParseResult::Complete(Reply::Numeric(n), consumed),
            None => ParseResult::Error(ProtocolError::InvalidNumericValue),
        };
    }

    let reply = if word_eq(word, b"VALUE") {
        return parse_value(rest, buf, line_end);
    } else if word_eq(word, b"STAT") {
        let (name, value) = split_word(rest);
        Reply::Stat { name, value }
    } else if word_eq(word, b"STORED") {
        Reply::Stored
    } else if word_eq(word, b"NOT_STORED") {
        Reply::NotStored
    } else if word_eq(word, b"EXISTS") {
        Reply::Exists
    } else if word_eq(word, b"NOT_FOUND") {
        Reply::NotFound
    } else if word_eq(word, b"DELETED") {
        Reply::Deleted
    } else if word_eq(word, b"TOUCHED") {
        Reply::Touched
    } else if word_eq(word, b"OK") {
        Reply::Ok
    } else if word_eq(word, b"END") {
        Reply::End
    } else if word_eq(word, b"VERSION") {
        Reply::Version(rest)
    } else if word_eq(word, b"ERROR") {
        Reply::Error
    } else if word_eq(word, b"CLIENT_ERROR") {
        Reply::ClientError(rest)
    } else if word_eq(word, b"SERVER_ERROR") {
        Reply::ServerError(rest)
    } else {
        return ParseResult::Error(ProtocolError::InvalidReply(
            String::from_utf8_lossy(word).to_string(),
        ));
    };

    ParseResult::Complete(reply, consumed)
}

/// Find \r\n in buffer using SIMD-accelerated search
#[inline]
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while let Some(i) = memchr::memchr(b'\r', &buf[offset..]) {
        let pos = offset + i;
        if buf.get(pos + 1) == Some(&b'\n') {
            return Some(pos);
        }
        offset = pos + 1;
    }
    None
}

/// Parse VALUE <key> <flags> <bytes> [<cas>] and its data block
fn parse_value<'a>(rest: &'a [u8], buf: &'a [u8], line_end: usize) -> ParseResult<'a> {
    let mut parts = rest.split(|&b| b == b' ').filter(|p| !p.is_empty());

    let key = match parts.next() {
        Some(k) => k,
        None => {
            return ParseResult::Error(ProtocolError::InvalidReply(
                "VALUE without key".to_string(),
            ));
        }
    };

    let flags = match parts.next().and_then(parse_u32) {
        Some(f) => f,
        None => return ParseResult::Error(ProtocolError::InvalidFlags),
    };

    let bytes = match parts.next().and_then(parse_usize) {
        Some(b) => b,
        None => return ParseResult::Error(ProtocolError::InvalidBytesLength),
    };

    let cas = parts.next().and_then(parse_u64);

    // Check if we have enough data for the data block
    let data_start = line_end + 2;
    let Some((data_end, total_needed)) = data_start
        .checked_add(bytes)
        .and_then(|end| Some((end, end.checked_add(2)?)))
    else {
        return ParseResult::Error(ProtocolError::InvalidBytesLength);
    };

    if buf.len() < total_needed {
        return ParseResult::NeedMoreData;
    }

    // Verify trailing \r\n
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return ParseResult::Error(ProtocolError::UnexpectedData);
    }

    ParseResult::Complete(
        Reply::Value {
            key,
            flags,
            data: &buf[data_start..data_end],
            cas,
        },
        total_needed,
    )
}

/// Split off the first space-delimited word
fn split_word(line: &[u8]) -> (&[u8], &[u8]) {
    match memchr::memchr(b' ', line) {
        Some(pos) => (&line[..pos], &line[pos + 1..]),
        None => (line, &[]),
    }
}

/// Old servers pad decr replies with trailing spaces
fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

/// Parse bytes as u32
fn parse_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as u64
fn parse_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as usize
fn parse_usize(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
