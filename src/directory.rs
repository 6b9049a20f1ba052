//! World discovery through a shared key-value directory.
//!
//! ## Key layout
//!
//! | Key                   | Value                           |
//! |-----------------------|---------------------------------|
//! | `world:<id>`          | JSON [`WorldDescriptor`]        |
//! | `world:<id>:<sub>`    | per-world detail (ignored here) |
//!
//! The namespace and separator come from [`DirectoryConfig`].
//!
//! Listing never fails: an unreachable store yields an empty list and a
//! corrupt record is logged and skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use crate::error::{DirectoryError, StoreError};
use crate::types::{DirectoryConfig, WorldDescriptor};

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Minimal key-value surface the directory client needs.
#[allow(async_fn_in_trait)]
pub trait DirectoryStore {
    async fn connect(&mut self) -> Result<(), StoreError>;

    /// Keys matching a glob `pattern` (only a trailing `*` is required).
    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    async fn disconnect(&mut self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A [`DirectoryStore`] backed by a sorted map.
///
/// Used by the CLI (seeded from a JSON file) and by tests, which can make
/// the next N connects fail or make reads of particular keys fail.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectoryStore {
    entries: BTreeMap<String, String>,
    connected: bool,
    failing_connects: u32,
    failing_gets: BTreeSet<String>,
    connect_calls: u32,
}

impl MemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON object of `key → value`.  Object values are stored as
    /// their JSON text; string values are stored verbatim.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unreachable(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, StoreError> {
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)
            .map_err(|e| StoreError::Command(format!("invalid directory file: {}", e)))?;

        let mut store = Self::new();
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            store.insert(key, value);
        }
        Ok(store)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Make the next `n` calls to `connect` fail.
    pub fn fail_next_connects(&mut self, n: u32) {
        self.failing_connects = n;
    }

    /// Make every `get` of `key` fail with a command error.
    pub fn fail_get(&mut self, key: impl Into<String>) {
        self.failing_gets.insert(key.into());
    }

    /// Total calls to `connect`, successful or not.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

impl DirectoryStore for MemoryDirectoryStore {
    async fn connect(&mut self) -> Result<(), StoreError> {
        self.connect_calls += 1;
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            return Err(StoreError::Unreachable("connection refused".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_connected()?;
        let keys = match pattern.strip_suffix('*') {
            Some(prefix) => self
                .entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => self
                .entries
                .keys()
                .filter(|k| k.as_str() == pattern)
                .cloned()
                .collect(),
        };
        Ok(keys)
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_connected()?;
        if self.failing_gets.contains(key) {
            return Err(StoreError::Command(format!("GET {} failed", key)));
        }
        Ok(self.entries.get(key).cloned())
    }

    async fn disconnect(&mut self) -> Result<(), StoreError> {
        self.connected = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WorldDirectoryClient
// ---------------------------------------------------------------------------

pub struct WorldDirectoryClient<S> {
    store: S,
    config: DirectoryConfig,
    connected: bool,
    worlds: Vec<WorldDescriptor>,
    last_fetch: Option<Instant>,
}

impl<S: DirectoryStore> WorldDirectoryClient<S> {
    pub fn new(store: S, config: DirectoryConfig) -> Self {
        Self {
            store,
            config,
            connected: false,
            worlds: Vec::new(),
            last_fetch: None,
        }
    }

    /// Connect to the store, retrying with capped exponential backoff.
    ///
    /// A no-op when already connected.
    pub async fn connect(&mut self) -> Result<(), DirectoryError> {
        if self.connected {
            return Ok(());
        }

        let max_attempts = self.config.max_connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.connect().await {
                Ok(()) => {
                    log::info!("[directory] Connected to {}", self.config.url);
                    self.connected = true;
                    return Ok(());
                }
                Err(e) if attempt >= max_attempts => {
                    log::error!(
                        "[directory] Connection failed after {} attempt(s): {}",
                        attempt,
                        e
                    );
                    return Err(DirectoryError::Unavailable {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    log::warn!(
                        "[directory] Connect attempt {} failed ({}); retrying in {:?}",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        if let Err(e) = self.store.disconnect().await {
            log::warn!("[directory] Disconnect failed: {}", e);
        }
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The configured store address.  Informational: the store itself is
    /// built by the caller, so this only identifies it in logs.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// List every world summary in the directory.
    ///
    /// Always returns a list; see the module docs for the failure policy.
    pub async fn fetch_worlds(&mut self) -> Vec<WorldDescriptor> {
        let worlds = match self.try_fetch_worlds().await {
            Ok(worlds) => worlds,
            Err(e) => {
                log::error!("[directory] World discovery failed: {}", e);
                Vec::new()
            }
        };

        log::info!("[directory] Discovered {} world(s)", worlds.len());
        self.worlds = worlds.clone();
        self.last_fetch = Some(Instant::now());
        worlds
    }

    async fn try_fetch_worlds(&mut self) -> Result<Vec<WorldDescriptor>, DirectoryError> {
        self.connect().await?;

        let mut keys = match self.store.keys(&self.config.key_pattern()).await {
            Ok(keys) => keys,
            Err(e) => {
                // The store likely went away; reconnect on the next fetch.
                self.connected = false;
                return Err(e.into());
            }
        };
        keys.retain(|k| self.is_summary_key(k));
        keys.sort();

        let mut worlds = Vec::new();
        for key in &keys {
            let raw = match self.store.get(key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[directory] Failed to read '{}': {}", key, e);
                    continue;
                }
            };
            match decode_world(key, &raw) {
                Ok(world) => worlds.push(world),
                Err(e) => log::warn!("[directory] Skipping record: {}", e),
            }
        }
        Ok(worlds)
    }

    /// `world:<id>` is a summary; `world:<id>:<sub>` is a detail record.
    fn is_summary_key(&self, key: &str) -> bool {
        key.matches(self.config.separator.as_str()).count() == 1
    }

    /// Worlds from the most recent fetch.
    pub fn cached_worlds(&self) -> &[WorldDescriptor] {
        &self.worlds
    }

    pub fn world(&self, world_id: &str) -> Option<&WorldDescriptor> {
        self.worlds.iter().find(|w| w.world_id == world_id)
    }

    pub fn last_fetch(&self) -> Option<Instant> {
        self.last_fetch
    }

    /// Connection address for a previously fetched world.
    ///
    /// Unknown ids return `None`; there is no fallback to another world.
    pub fn world_url(&self, world_id: &str) -> Option<String> {
        match self.world(world_id) {
            Some(world) => Some(world_address(world)),
            None => {
                log::warn!("[directory] World '{}' not found", world_id);
                None
            }
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const KNOWN_SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];
const DEFAULT_SCHEME: &str = "http://";

fn decode_world(key: &str, raw: &str) -> Result<WorldDescriptor, DirectoryError> {
    serde_json::from_str(raw).map_err(|source| DirectoryError::Decode {
        key: key.to_string(),
        source,
    })
}

/// Normalise a descriptor's host/port into a full address.
pub fn world_address(world: &WorldDescriptor) -> String {
    let host = world.host.trim();
    let mut url = if KNOWN_SCHEMES.iter().any(|s| host.starts_with(s)) {
        host.to_string()
    } else {
        format!("{}{}", DEFAULT_SCHEME, host)
    };

    if let Some(port) = world.port.filter(|p| *p != 0) {
        let authority_start = url.find("//").map(|i| i + 2).unwrap_or(0);
        let authority = url[authority_start..].split('/').next().unwrap_or("");
        if !authority.contains(':') {
            let authority_end = authority_start + authority.len();
            url.insert_str(authority_end, &format!(":{}", port));
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorldStatus;

    fn descriptor(host: &str, port: Option<u16>) -> WorldDescriptor {
        WorldDescriptor {
            world_id: "w1".into(),
            name: "Alpha".into(),
            host: host.into(),
            port,
            current_players: 0,
            max_players: 100,
            status: WorldStatus::Online,
        }
    }

    #[test]
    fn address_adds_scheme_and_port() {
        assert_eq!(
            world_address(&descriptor("host.example", Some(7000))),
            "http://host.example:7000"
        );
    }

    #[test]
    fn address_keeps_existing_scheme() {
        assert_eq!(
            world_address(&descriptor("wss://host.example", Some(443))),
            "wss://host.example:443"
        );
        assert_eq!(
            world_address(&descriptor("https://host.example", None)),
            "https://host.example"
        );
    }

    #[test]
    fn address_does_not_duplicate_embedded_port() {
        assert_eq!(
            world_address(&descriptor("http://host.example:8080", Some(7000))),
            "http://host.example:8080"
        );
        assert_eq!(
            world_address(&descriptor("host.example:8080", Some(7000))),
            "http://host.example:8080"
        );
    }

    #[test]
    fn address_port_goes_before_path() {
        assert_eq!(
            world_address(&descriptor("http://host.example/game", Some(7000))),
            "http://host.example:7000/game"
        );
    }

    #[test]
    fn address_ignores_zero_port() {
        assert_eq!(
            world_address(&descriptor("host.example", Some(0))),
            "http://host.example"
        );
    }

    #[test]
    fn memory_store_loads_objects_and_strings() {
        let store = MemoryDirectoryStore::from_json_str(
            r#"{
                "world:a": {"worldId": "a", "name": "A", "host": "a.example"},
                "world:b": "{\"worldId\":\"b\",\"name\":\"B\",\"host\":\"b.example\"}"
            }"#,
        )
        .unwrap();
        assert_eq!(store.entries.len(), 2);
        let a: WorldDescriptor = serde_json::from_str(&store.entries["world:a"]).unwrap();
        assert_eq!(a.world_id, "a");
    }

    #[test]
    fn memory_store_rejects_non_object_file() {
        assert!(MemoryDirectoryStore::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn summary_key_filter() {
        let client = WorldDirectoryClient::new(MemoryDirectoryStore::new(), DirectoryConfig::default());
        assert!(client.is_summary_key("world:alpha"));
        assert!(!client.is_summary_key("world:alpha:players"));
        assert!(!client.is_summary_key("world"));
    }
}
