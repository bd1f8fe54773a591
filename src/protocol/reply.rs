//! Memcached text protocol reply types

/// Parsed server reply, borrowing from the read buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<'a> {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,
    Ok,

    /// END terminates retrieval and stats replies
    End,

    /// VALUE <key> <flags> <bytes> [<cas>]\r\n<data>\r\n
    Value {
        key: &'a [u8],
        flags: u32,
        data: &'a [u8],
        cas: Option<u64>,
    },

    /// Result of incr/decr
    Numeric(u64),

    /// STAT <name> <value>
    Stat { name: &'a [u8], value: &'a [u8] },

    /// VERSION <version>
    Version(&'a [u8]),

    Error,
    ClientError(&'a [u8]),
    ServerError(&'a [u8]),
}

impl Reply<'_> {
    /// Returns true for ERROR, CLIENT_ERROR and SERVER_ERROR
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reply::Error | Reply::ClientError(_) | Reply::ServerError(_)
        )
    }
}
