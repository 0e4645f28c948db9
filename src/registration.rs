//! The registration DB: a process-local directory of producers keyed by
//! `(category, key, subkey)`, grounded on the gossip layer's `Producer`
//! record shape. The gossip/membership transport itself is out of
//! scope; this module only models the data it would maintain.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::clock::Clock;
use crate::config::RegistrationConfig;

/// One registered endpoint: a lookup node, a broker, or a channel
/// producer, depending on which `(category, key, subkey)` it sits under.
#[derive(Debug, Clone, PartialEq)]
pub struct Producer {
    pub id: String,
    pub remote_address: String,
    pub broadcast_address: String,
    pub hostname: String,
    pub tcp_port: u16,
    pub http_port: u16,
    pub version: String,
    pub last_update_ns: i64,
    /// Set when this producer has been asked to stop advertising but
    /// hasn't yet been swept; `None` means live.
    pub tombstoned_at: Option<i64>,
}

impl Producer {
    pub fn new(id: impl Into<String>, remote_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            remote_address: remote_address.into(),
            broadcast_address: String::new(),
            hostname: String::new(),
            tcp_port: 0,
            http_port: 0,
            version: String::new(),
            last_update_ns: 0,
            tombstoned_at: None,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct RegKey {
    category: String,
    key: String,
    subkey: String,
}

/// `(category, key, subkey)` → producers, with a tombstone sweep.
/// Spec's concurrency contract: a single writer lock, readers take a
/// reader lock.
pub struct RegistrationDb {
    config: RegistrationConfig,
    clock: std::sync::Arc<dyn Clock>,
    entries: RwLock<HashMap<RegKey, HashMap<String, Producer>>>,
}

impl RegistrationDb {
    pub fn new(config: RegistrationConfig, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Adds or replaces `producer` under `(category, key, subkey)`,
    /// clearing any prior tombstone for that id — a re-registration
    /// un-tombstones.
    pub fn register(&self, category: &str, key: &str, subkey: &str, mut producer: Producer) {
        producer.last_update_ns = self.clock.now_ns();
        producer.tombstoned_at = None;
        let mut guard = self.entries.write().expect("registration lock poisoned");
        let reg_key = RegKey {
            category: category.to_string(),
            key: key.to_string(),
            subkey: subkey.to_string(),
        };
        guard
            .entry(reg_key)
            .or_insert_with(HashMap::new)
            .insert(producer.id.clone(), producer);
    }

    /// Removes `producer_id` outright from `(category, key, subkey)`.
    pub fn unregister(&self, category: &str, key: &str, subkey: &str, producer_id: &str) {
        let reg_key = RegKey {
            category: category.to_string(),
            key: key.to_string(),
            subkey: subkey.to_string(),
        };
        let mut guard = self.entries.write().expect("registration lock poisoned");
        if let Some(producers) = guard.get_mut(&reg_key) {
            producers.remove(producer_id);
            if producers.is_empty() {
                guard.remove(&reg_key);
            }
        }
    }

    /// Marks `producer_id` as tombstoned as of now, without removing it.
    /// A no-op if the producer isn't registered.
    pub fn tombstone(&self, category: &str, key: &str, subkey: &str, producer_id: &str) {
        let reg_key = RegKey {
            category: category.to_string(),
            key: key.to_string(),
            subkey: subkey.to_string(),
        };
        let now = self.clock.now_ns();
        let mut guard = self.entries.write().expect("registration lock poisoned");
        if let Some(producers) = guard.get_mut(&reg_key) {
            if let Some(p) = producers.get_mut(producer_id) {
                p.tombstoned_at = Some(now);
            }
        }
    }

    /// Producers currently registered under `(category, key, subkey)`,
    /// excluding those tombstoned within `tombstone_lifetime`. A
    /// tombstoned producer reappears if re-registered before the sweep.
    pub fn lookup(&self, category: &str, key: &str, subkey: &str) -> Vec<Producer> {
        let reg_key = RegKey {
            category: category.to_string(),
            key: key.to_string(),
            subkey: subkey.to_string(),
        };
        let guard = self.entries.read().expect("registration lock poisoned");
        let Some(producers) = guard.get(&reg_key) else {
            return Vec::new();
        };
        let now = self.clock.now_ns();
        let lifetime_ns = self.config.tombstone_lifetime.as_nanos() as i64;
        producers
            .values()
            .filter(|p| match p.tombstoned_at {
                None => true,
                Some(at) => now - at < lifetime_ns,
            })
            .cloned()
            .collect()
    }

    /// Distinct categories currently present, e.g. `"client"`, `"topic"`.
    pub fn categories(&self) -> Vec<String> {
        let guard = self.entries.read().expect("registration lock poisoned");
        let mut seen: Vec<String> = guard
            .keys()
            .map(|k| k.category.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        seen.sort();
        seen
    }

    /// Distinct keys registered under `category`, e.g. topic names.
    pub fn keys(&self, category: &str) -> Vec<String> {
        let guard = self.entries.read().expect("registration lock poisoned");
        let mut seen: Vec<String> = guard
            .keys()
            .filter(|k| k.category == category)
            .map(|k| k.key.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        seen.sort();
        seen
    }

    /// Permanently removes every producer whose tombstone is older than
    /// `tombstone_lifetime`, and any producer that has not updated within
    /// `inactive_producer_timeout`. Intended to be driven by a timer in
    /// production and called directly (with a `TestClock`) in tests.
    pub fn sweep_tombstones(&self) {
        let now = self.clock.now_ns();
        let tombstone_lifetime_ns = self.config.tombstone_lifetime.as_nanos() as i64;
        let inactive_timeout_ns = self.config.inactive_producer_timeout.as_nanos() as i64;
        let mut guard = self.entries.write().expect("registration lock poisoned");
        guard.retain(|_, producers| {
            producers.retain(|_, p| {
                if let Some(at) = p.tombstoned_at {
                    if now - at >= tombstone_lifetime_ns {
                        return false;
                    }
                }
                now - p.last_update_ns < inactive_timeout_ns
            });
            !producers.is_empty()
        });
    }
}
