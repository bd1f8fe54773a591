//! Server list parsing: `host[:port[:weight]],...`

use crate::error::BackendError;
use std::fmt;

/// Default memcached port
pub const DEFAULT_PORT: u16 = 11211;

/// One cache server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
    /// Relative share of the continuum under weighted ketama
    pub weight: u32,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 1,
        }
    }

    /// Parse a single `host[:port[:weight]]` entry. IPv6 hosts go in brackets.
    pub fn parse(entry: &str) -> Result<Self, BackendError> {
        let entry = entry.trim();
        let invalid = || BackendError::InvalidServer(entry.to_string());

        let (host, rest) = if let Some(stripped) = entry.strip_prefix('[') {
            let end = stripped.find(']').ok_or_else(invalid)?;
            let rest = &stripped[end + 1..];
            let rest = match rest.strip_prefix(':') {
                Some(r) => Some(r),
                None if rest.is_empty() => None,
                None => return Err(invalid()),
            };
            (&stripped[..end], rest)
        } else {
            match entry.split_once(':') {
                Some((host, rest)) => (host, Some(rest)),
                None => (entry, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        let mut server = Self::new(host, DEFAULT_PORT);
        if let Some(rest) = rest {
            let (port, weight) = match rest.split_once(':') {
                Some((port, weight)) => (port, Some(weight)),
                None => (rest, None),
            };
            if !port.is_empty() {
                server.port = port.parse().map_err(|_| invalid())?;
            }
            if let Some(weight) = weight {
                server.weight = weight.parse().map_err(|_| invalid())?;
                if server.weight == 0 {
                    return Err(invalid());
                }
            }
        }

        Ok(server)
    }

    /// Label used in stats reports: `host (port)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.host, self.port)
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse a comma-separated server list. Empty entries are skipped.
pub fn parse_server_list(list: &str) -> Result<Vec<ServerAddr>, BackendError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ServerAddr::parse)
        .collect()
}
