//! Per-server statistics report

use crate::backend::{Backend, ServerAddr};
use tracing::warn;

/// One `STAT` line from one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatEntry {
    pub server: ServerAddr,
    pub key: String,
    pub value: String,
}

/// Stats of one server, or why they could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub server: ServerAddr,
    pub stats: Result<Vec<(String, String)>, String>,
}

/// Ask every server for its stats, in server-list order
///
/// An unreachable server is recorded with its error; the others still report.
pub fn collect(backend: &mut dyn Backend) -> Vec<ServerStats> {
    let mut report = Vec::new();
    backend.for_each_server(&mut |server| {
        let stats = server.stats().map_err(|e| {
            warn!(server = %server.addr(), error = %e, "failed to get memcache stats");
            e.to_string()
        });
        report.push(ServerStats {
            server: server.addr().clone(),
            stats,
        });
    });
    report
}

/// Flatten collected stats into entries, skipping unreachable servers
pub fn entries(report: &[ServerStats]) -> Vec<StatEntry> {
    report
        .iter()
        .filter_map(|block| block.stats.as_ref().ok().map(|stats| (block, stats)))
        .flat_map(|(block, stats)| {
            stats.iter().map(move |(key, value)| StatEntry {
                server: block.server.clone(),
                key: key.clone(),
                value: value.clone(),
            })
        })
        .collect()
}

/// Render the text report: one block per server, separated by blank lines
pub fn render(report: &[ServerStats]) -> String {
    let mut out = String::new();
    for (i, block) in report.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str("Server: ");
        out.push_str(&block.server.label());
        out.push('\n');
        match &block.stats {
            Ok(stats) => {
                for (key, value) in stats {
                    out.push_str(key);
                    out.push_str(": ");
                    out.push_str(value);
                    out.push('\n');
                }
            }
            Err(msg) => {
                out.push_str("error: ");
                out.push_str(msg);
                out.push('\n');
            }
        }
    }
    out
}
