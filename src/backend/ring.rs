//! Server selection: modula, ketama continuum, random

use crate::backend::server::ServerAddr;
use crate::behavior::{Distribution, HashAlgorithm};
use rand::Rng;

/// Digests per server on an MD5 continuum, each split into four points
const MD5_DIGESTS_PER_SERVER: u32 = 40;
const MD5_POINTS_PER_DIGEST: u32 = 4;
/// Points per server when the continuum hash is not MD5
const POINTS_PER_SERVER: u32 = 100;

/// Distribution settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingConfig {
    pub distribution: Distribution,
    /// Hash applied to keys
    pub hash: HashAlgorithm,
    /// Hash used to place servers on the continuum
    pub ketama_hash: HashAlgorithm,
    pub weighted: bool,
}

/// Maps keys to server indices
#[derive(Debug, Default)]
pub struct Ring {
    pub config: RingConfig,
    /// Indices of servers eligible for selection
    candidates: Vec<usize>,
    /// Sorted `(point, server index)` pairs
    continuum: Vec<(u32, usize)>,
}

impl Ring {
    pub fn new(config: RingConfig) -> Self {
        Self {
            config,
            candidates: Vec::new(),
            continuum: Vec::new(),
        }
    }

    /// Rebuild over `(index, server)` pairs, in list order
    pub fn rebuild<'a>(&mut self, servers: impl IntoIterator<Item = (usize, &'a ServerAddr)>) {
        let servers: Vec<(usize, &ServerAddr)> = servers.into_iter().collect();
        self.candidates = servers.iter().map(|(idx, _)| *idx).collect();
        self.continuum.clear();

        if self.config.distribution.is_consistent() && !servers.is_empty() {
            self.build_continuum(&servers);
        }
    }

    fn build_continuum(&mut self, servers: &[(usize, &ServerAddr)]) {
        let md5 = self.config.ketama_hash == HashAlgorithm::Md5;
        let per_server = if md5 {
            MD5_DIGESTS_PER_SERVER
        } else {
            POINTS_PER_SERVER
        };
        let total_weight: u64 = servers.iter().map(|(_, s)| u64::from(s.weight)).sum();
        let count = servers.len() as f64;

        for (idx, server) in servers {
            let entries = if self.config.weighted {
                let share = f64::from(server.weight) / total_weight as f64;
                ((share * f64::from(per_server) * count) + 1e-10).floor() as u32
            } else {
                per_server
            };

            for i in 0..entries {
                let label = format!("{}:{}-{}", server.host, server.port, i);
                if md5 {
                    let digest = md5::compute(label.as_bytes());
                    for chunk in digest.chunks_exact(4).take(MD5_POINTS_PER_DIGEST as usize) {
                        let point = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                        self.continuum.push((point, *idx));
                    }
                } else {
                    let point = self.config.ketama_hash.hash(label.as_bytes());
                    self.continuum.push((point, *idx));
                }
            }
        }

        self.continuum.sort_unstable();
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Server index for a key
    pub fn select(&self, key: &[u8]) -> Option<usize> {
        if self.candidates.is_empty() {
            return None;
        }
        if self.candidates.len() == 1 {
            return Some(self.candidates[0]);
        }

        match self.config.distribution {
            Distribution::Modula => {
                let hash = self.config.hash.hash(key) as usize;
                Some(self.candidates[hash % self.candidates.len()])
            }
            Distribution::Random => {
                let pick = rand::thread_rng().gen_range(0..self.candidates.len());
                Some(self.candidates[pick])
            }
            Distribution::Consistent | Distribution::ConsistentKetama => {
                let hash = self.config.hash.hash(key);
                let pos = self.continuum.partition_point(|(point, _)| *point < hash);
                self.continuum
                    .get(pos)
                    .or_else(|| self.continuum.first())
                    .map(|(_, idx)| *idx)
            }
        }
    }
}
