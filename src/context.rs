//! Host-facing entry point
//!
//! A [`Context`] owns the one cache client of an embedding host. It is
//! created unloaded, builds the client on `load()` and rebuilds it whenever
//! the server list changes. Arguments arrive as `Option` where the host
//! allows nulls.

use crate::backend::{self, parse_server_list};
use crate::client::{Client, Counter, Outcome};
use crate::config::{ClientConfig, Config};
use crate::error::{CacheError, Result};
use crate::expiration::Expiration;
use crate::metrics::Metrics;
use crate::multiget::{KeyArray, MultiGet};
use crate::protocol::StoreKind;
use crate::stats::StatEntry;
use crate::transaction::TxnEvent;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn require<'a, T: ?Sized>(arg: Option<&'a T>, what: &str) -> Result<&'a T> {
    arg.ok_or_else(|| CacheError::Validation(format!("memcache {what} cannot be NULL")))
}

pub struct Context {
    config: ClientConfig,
    metrics_enabled: bool,
    client: Option<Client>,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self {
            config: config.client,
            metrics_enabled: config.metrics.enabled,
            client: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.client.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the client from the current configuration
    ///
    /// A configured behavior list that fails partway leaves the client
    /// unloaded.
    pub fn load(&mut self) -> Result<()> {
        if self.client.is_some() {
            debug!("memcache client already loaded");
            return Ok(());
        }
        self.client = Some(self.build()?);
        Ok(())
    }

    /// Drop the client
    pub fn unload(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_dirty() {
                warn!("discarding buffered memcache writes on unload");
            }
            info!(backend = client.backend_name(), "memcache client unloaded");
        }
    }

    /// Replace the server list, rebuilding a loaded client
    ///
    /// On failure the previous list and client stay in place.
    pub fn assign_servers(&mut self, list: &str) -> Result<()> {
        let previous = std::mem::replace(&mut self.config.servers, list.to_string());
        if self.client.is_none() {
            return Ok(());
        }
        match self.build() {
            Ok(client) => {
                if let Some(old) = self.client.replace(client)
                    && old.is_dirty()
                {
                    warn!("server list changed, discarding buffered memcache writes");
                }
                Ok(())
            }
            Err(e) => {
                self.config.servers = previous;
                Err(e)
            }
        }
    }

    /// Record a behavior list and apply it to a loaded client
    ///
    /// Flags applied before a failing one stay applied, but a list that
    /// fails is not recorded, so later rebuilds keep the previous one.
    pub fn assign_behavior(&mut self, list: &str) -> Result<()> {
        if let Some(client) = self.client.as_mut() {
            client.apply_behavior(list)?;
        }
        self.config.behavior = list.to_string();
        Ok(())
    }

    pub fn set_flush_on_commit(&mut self, enabled: bool) {
        self.config.flush_on_commit = enabled;
        if let Some(client) = self.client.as_mut() {
            client.set_flush_on_commit(enabled);
        }
    }

    fn build(&self) -> Result<Client> {
        let servers = if self.config.servers.trim().is_empty() {
            Vec::new()
        } else {
            parse_server_list(&self.config.servers)
                .map_err(|e| CacheError::Config(format!("invalid memcache server list: {e}")))?
        };

        let metrics = Arc::new(Metrics::new()?);
        let backend = backend::connect(self.config.backend, &servers);
        let mut client = Client::new(backend, metrics, self.config.flush_on_commit);

        if !self.config.behavior.trim().is_empty() {
            client.apply_behavior(&self.config.behavior)?;
        }
        if let Some((username, password)) = self.config.credentials() {
            client.set_credentials(username, password)?;
        }

        info!(
            backend = client.backend_name(),
            servers = servers.len(),
            "memcache client loaded"
        );
        Ok(client)
    }

    fn client(&mut self) -> Result<&mut Client> {
        self.client.as_mut().ok_or(CacheError::NotInitialized)
    }

    pub fn store(
        &mut self,
        kind: StoreKind,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        expire: Option<Expiration>,
    ) -> Result<Outcome> {
        let key = require(key, "key")?;
        let value = require(value, "value")?;
        self.client()?
            .store(kind, key, value, expire.unwrap_or_default())
    }

    pub fn add(
        &mut self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        expire: Option<Expiration>,
    ) -> Result<Outcome> {
        self.store(StoreKind::Add, key, value, expire)
    }

    pub fn replace(
        &mut self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        expire: Option<Expiration>,
    ) -> Result<Outcome> {
        self.store(StoreKind::Replace, key, value, expire)
    }

    pub fn set(
        &mut self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        expire: Option<Expiration>,
    ) -> Result<Outcome> {
        self.store(StoreKind::Set, key, value, expire)
    }

    pub fn prepend(
        &mut self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        expire: Option<Expiration>,
    ) -> Result<Outcome> {
        self.store(StoreKind::Prepend, key, value, expire)
    }

    pub fn append(
        &mut self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        expire: Option<Expiration>,
    ) -> Result<Outcome> {
        self.store(StoreKind::Append, key, value, expire)
    }

    pub fn get(&mut self, key: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let key = require(key, "key")?;
        self.client()?.get(key)
    }

    /// Offset defaults to 1
    pub fn incr(&mut self, key: Option<&[u8]>, offset: Option<i64>) -> Result<Counter> {
        let key = require(key, "key")?;
        self.client()?.incr(key, offset.unwrap_or(1))
    }

    /// Offset defaults to 1
    pub fn decr(&mut self, key: Option<&[u8]>, offset: Option<i64>) -> Result<Counter> {
        let key = require(key, "key")?;
        self.client()?.decr(key, offset.unwrap_or(1))
    }

    pub fn delete(&mut self, key: Option<&[u8]>, hold: Option<Expiration>) -> Result<Outcome> {
        let key = require(key, "key")?;
        self.client()?.delete(key, hold.unwrap_or_default())
    }

    pub fn flush_all(&mut self) -> Result<Outcome> {
        Ok(self.client()?.flush_all())
    }

    pub fn server_add(&mut self, list: Option<&str>) -> Result<bool> {
        let list = require(list, "server list")?;
        Ok(self.client()?.server_add(list))
    }

    pub fn stats(&mut self) -> Result<String> {
        Ok(self.client()?.stats())
    }

    pub fn stat_entries(&mut self) -> Result<Vec<StatEntry>> {
        Ok(self.client()?.stat_entries())
    }

    pub fn get_multi(&mut self, keys: Option<&KeyArray>) -> Result<MultiGet<'_>> {
        let keys = require(keys, "key array")?;
        self.client()?.get_multi(keys)
    }

    /// Forward a host transaction event; ignored while unloaded
    pub fn on_transaction_event(&mut self, event: TxnEvent) {
        if let Some(client) = self.client.as_mut() {
            client.on_transaction_event(event);
        }
    }

    /// Prometheus text, when metrics are enabled and a client is loaded
    pub fn metrics_text(&self) -> Option<String> {
        if !self.metrics_enabled {
            return None;
        }
        self.client.as_ref().map(|client| client.metrics().gather())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.unload();
    }
}
