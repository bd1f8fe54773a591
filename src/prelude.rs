//! Prelude module for common imports.
//!
//! # Usage
//!
//! ```ignore
//! use embedcache::prelude::*;
//! ```

// Error types
pub use crate::error::{BackendError, CacheError, ProtocolError, Result};

// Configuration
pub use crate::config::{ClientConfig, Config, MetricsConfig};

// Host surface
pub use crate::client::{Client, Counter, Outcome};
pub use crate::context::Context;
pub use crate::expiration::{Expiration, Interval};
pub use crate::multiget::{KeyArray, MultiGet};
pub use crate::stats::StatEntry;
pub use crate::transaction::TxnEvent;

// Backends
pub use crate::backend::{Backend, BackendKind, ServerAddr, Status};
pub use crate::behavior::{Behavior, Distribution, HashAlgorithm};

// Metrics
pub use crate::metrics::Metrics;
