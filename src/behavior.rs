//! Behavior flags and the `FLAG[:VALUE],...` list resolver
//!
//! Flag names resolve through static tables. Each name also accepts its
//! canonical long form (`MEMCACHED_BEHAVIOR_TCP_NODELAY` for `TCP_NODELAY`,
//! `MEMCACHED_HASH_MD5` for `MD5`, `MEMCACHED_DISTRIBUTION_MODULA` for
//! `MODULA`). Matching is case-insensitive.

use crate::backend::{Backend, Status};
use crate::error::{BackendError, CacheError, Result};
use tracing::{debug, warn};

const BEHAVIOR_PREFIX: &str = "MEMCACHED_BEHAVIOR_";
const HASH_PREFIX: &str = "MEMCACHED_HASH_";
const DISTRIBUTION_PREFIX: &str = "MEMCACHED_DISTRIBUTION_";

/// Adapter-level tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    UseUdp,
    NoBlock,
    SndTimeout,
    HashWithPrefixKey,
    RcvTimeout,
    TcpNodelay,
    Hash,
    Distribution,
    CacheLookups,
    SupportCas,
    Ketama,
    KetamaWeighted,
    KetamaHash,
    PollTimeout,
    UserData,
    BufferRequests,
    VerifyKey,
    SortHosts,
    SocketSendSize,
    SocketRecvSize,
    RetryTimeout,
    ConnectTimeout,
    BinaryProtocol,
    ServerFailureLimit,
    IoMsgWatermark,
    IoBytesWatermark,
    IoKeyPrefetch,
    Noreply,
    NumberOfReplicas,
    RandomizeReplicaRead,
    RemoveFailedServers,
}

static BEHAVIOR_NAMES: &[(&str, Behavior)] = &[
    ("USE_UDP", Behavior::UseUdp),
    ("NO_BLOCK", Behavior::NoBlock),
    ("SND_TIMEOUT", Behavior::SndTimeout),
    ("HASH_WITH_PREFIX_KEY", Behavior::HashWithPrefixKey),
    ("RCV_TIMEOUT", Behavior::RcvTimeout),
    ("TCP_NODELAY", Behavior::TcpNodelay),
    ("HASH", Behavior::Hash),
    ("DISTRIBUTION", Behavior::Distribution),
    ("CACHE_LOOKUPS", Behavior::CacheLookups),
    ("SUPPORT_CAS", Behavior::SupportCas),
    ("KETAMA", Behavior::Ketama),
    ("KETAMA_WEIGHTED", Behavior::KetamaWeighted),
    ("KETAMA_HASH", Behavior::KetamaHash),
    ("POLL_TIMEOUT", Behavior::PollTimeout),
    ("USER_DATA", Behavior::UserData),
    ("BUFFER_REQUESTS", Behavior::BufferRequests),
    ("VERIFY_KEY", Behavior::VerifyKey),
    ("SORT_HOSTS", Behavior::SortHosts),
    ("SOCKET_SEND_SIZE", Behavior::SocketSendSize),
    ("SOCKET_RECV_SIZE", Behavior::SocketRecvSize),
    ("RETRY_TIMEOUT", Behavior::RetryTimeout),
    ("CONNECT_TIMEOUT", Behavior::ConnectTimeout),
    ("BINARY_PROTOCOL", Behavior::BinaryProtocol),
    ("SERVER_FAILURE_LIMIT", Behavior::ServerFailureLimit),
    ("IO_MSG_WATERMARK", Behavior::IoMsgWatermark),
    ("IO_BYTES_WATERMARK", Behavior::IoBytesWatermark),
    ("IO_KEY_PREFETCH", Behavior::IoKeyPrefetch),
    ("NOREPLY", Behavior::Noreply),
    ("NUMBER_OF_REPLICAS", Behavior::NumberOfReplicas),
    ("RANDOMIZE_REPLICA_READ", Behavior::RandomizeReplicaRead),
    ("REMOVE_FAILED_SERVERS", Behavior::RemoveFailedServers),
];

impl Behavior {
    /// Resolve a flag name, short or `MEMCACHED_BEHAVIOR_` form
    pub fn from_name(name: &str) -> Option<Self> {
        lookup(BEHAVIOR_NAMES, name, BEHAVIOR_PREFIX)
    }

    /// Short canonical name
    pub fn name(self) -> &'static str {
        BEHAVIOR_NAMES
            .iter()
            .find(|(_, b)| *b == self)
            .map_or("UNKNOWN", |(n, _)| n)
    }

    /// Flags whose value is a hash algorithm name
    fn takes_hash(self) -> bool {
        matches!(self, Behavior::Hash | Behavior::KetamaHash)
    }
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Key hashing algorithms, numbered as the behavior value carries them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// Bob Jenkins' one-at-a-time
    #[default]
    Default = 0,
    Md5 = 1,
    Crc = 2,
    Fnv1_64 = 3,
    Fnv1a64 = 4,
    Fnv1_32 = 5,
    Fnv1a32 = 6,
    Hsieh = 7,
    Murmur = 8,
    Jenkins = 9,
}

static HASH_NAMES: &[(&str, HashAlgorithm)] = &[
    ("DEFAULT", HashAlgorithm::Default),
    ("MD5", HashAlgorithm::Md5),
    ("CRC", HashAlgorithm::Crc),
    ("FNV1_64", HashAlgorithm::Fnv1_64),
    ("FNV1A_64", HashAlgorithm::Fnv1a64),
    ("FNV1_32", HashAlgorithm::Fnv1_32),
    ("FNV1A_32", HashAlgorithm::Fnv1a32),
    ("HSIEH", HashAlgorithm::Hsieh),
    ("MURMUR", HashAlgorithm::Murmur),
    ("JENKINS", HashAlgorithm::Jenkins),
];

impl HashAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        lookup(HASH_NAMES, name, HASH_PREFIX)
    }

    pub fn from_value(value: u64) -> Option<Self> {
        HASH_NAMES
            .iter()
            .map(|(_, h)| *h)
            .find(|h| *h as u64 == value)
    }
}

/// Server selection strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Distribution {
    #[default]
    Modula = 0,
    Consistent = 1,
    ConsistentKetama = 2,
    Random = 3,
}

static DISTRIBUTION_NAMES: &[(&str, Distribution)] = &[
    ("MODULA", Distribution::Modula),
    ("CONSISTENT", Distribution::Consistent),
    ("CONSISTENT_KETAMA", Distribution::ConsistentKetama),
    ("RANDOM", Distribution::Random),
];

impl Distribution {
    pub fn from_name(name: &str) -> Option<Self> {
        lookup(DISTRIBUTION_NAMES, name, DISTRIBUTION_PREFIX)
    }

    pub fn from_value(value: u64) -> Option<Self> {
        DISTRIBUTION_NAMES
            .iter()
            .map(|(_, d)| *d)
            .find(|d| *d as u64 == value)
    }

    /// Both consistent variants walk the same continuum
    pub fn is_consistent(self) -> bool {
        matches!(self, Distribution::Consistent | Distribution::ConsistentKetama)
    }
}

fn lookup<T: Copy>(table: &[(&str, T)], name: &str, prefix: &str) -> Option<T> {
    let upper = name.trim().to_ascii_uppercase();
    let short = upper.strip_prefix(prefix).unwrap_or(&upper);
    table.iter().find(|(n, _)| *n == short).map(|(_, v)| *v)
}

/// Resolve the value half of a `FLAG:VALUE` token
pub fn resolve_value(behavior: Behavior, data: &str) -> Result<u64> {
    let data = data.trim();
    if behavior.takes_hash() {
        return HashAlgorithm::from_name(data)
            .map(|h| h as u64)
            .ok_or_else(|| CacheError::Config(format!("invalid hash name: {data}")));
    }
    if behavior == Behavior::Distribution {
        return Distribution::from_name(data)
            .map(|d| d as u64)
            .ok_or_else(|| CacheError::Config(format!("invalid distribution name: {data}")));
    }
    data.parse::<u64>().map_err(|_| {
        CacheError::Config(format!("invalid memcached behavior param {behavior}: {data}"))
    })
}

/// Outcome of applying a behavior list
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Settings the backend accepted, in list order
    pub applied: Vec<(Behavior, u64)>,
    /// Settings the backend reported a non-fatal failure for
    pub failed: Vec<Behavior>,
    /// Byte offset where parsing stopped on a malformed token
    pub aborted_at: Option<usize>,
}

/// Parse and apply a `FLAG[:VALUE],...` list left to right
///
/// A malformed token (empty flag name, empty value after `:`) stops parsing
/// and leaves the tail unapplied. Unknown names and unsupported capabilities
/// are hard errors. Neither case rolls back flags applied before it.
pub fn apply_list(backend: &mut dyn Backend, list: &str) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    let mut offset = 0;

    for token in list.split(',') {
        let start = offset;
        offset += token.len() + 1;

        if token.trim().is_empty() {
            // Trailing separator or an empty list
            if start + token.len() >= list.len() {
                break;
            }
            warn!(position = start, "empty behavior flag, ignoring rest of list");
            report.aborted_at = Some(start);
            break;
        }

        let (flag, data) = match token.split_once(':') {
            Some((flag, data)) => (flag.trim(), Some(data.trim())),
            None => (token.trim(), None),
        };

        if flag.is_empty() {
            warn!(position = start, "empty behavior flag, ignoring rest of list");
            report.aborted_at = Some(start);
            break;
        }
        if data.is_some_and(str::is_empty) {
            warn!(flag, position = start, "empty behavior data, ignoring rest of list");
            report.aborted_at = Some(start);
            break;
        }

        let behavior = Behavior::from_name(flag)
            .ok_or_else(|| CacheError::Config(format!("Unknown memcached behavior flag: {flag}")))?;

        let value = match data {
            Some(data) => resolve_value(behavior, data)?,
            None if behavior.takes_hash() || behavior == Behavior::Distribution => {
                return Err(CacheError::Config(format!(
                    "memcached behavior {behavior} requires a value"
                )));
            }
            None => 1,
        };

        match backend.set_behavior(behavior, value) {
            Status::Success => {
                debug!(%behavior, value, "applied behavior");
                report.applied.push((behavior, value));
            }
            Status::Failure(BackendError::Unsupported(reason)) => {
                return Err(CacheError::Config(format!(
                    "{} backend cannot honor {behavior}: {reason}",
                    backend.name()
                )));
            }
            Status::Failure(e) => {
                warn!(%behavior, value, error = %e, "failed to set memcached behavior");
                report.failed.push(behavior);
            }
            other => {
                debug!(%behavior, value, status = ?other, "behavior applied with status");
                report.applied.push((behavior, value));
            }
        }
    }

    Ok(report)
}
