//! Keyed registry of live connections.
//!
//! Maps a key (a user id for the notification socket) to the set of that
//! key's live connections. A key is present iff its set is non-empty.

use crate::connection::{Connection, ConnectionId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::hash::Hash;

/// Registry of connections grouped by key
#[derive(Debug)]
pub struct ConnectionRegistry<K>
where
    K: Eq + Hash + Clone,
{
    entries: DashMap<K, HashMap<ConnectionId, Connection>>,
}

impl<K> ConnectionRegistry<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add `conn` under `key`. Returns the number of connections now held for `key`.
    pub fn insert(&self, key: K, conn: Connection) -> usize {
        let mut set = self.entries.entry(key).or_default();
        set.insert(conn.id(), conn);
        set.len()
    }

    /// Remove one connection, deleting `key` once its set is empty.
    /// Returns whether the connection was present.
    pub fn remove(&self, key: &K, id: ConnectionId) -> bool {
        let removed = match self.entries.get_mut(key) {
            Some(mut set) => set.remove(&id).is_some(),
            None => false,
        };
        // The shard guard above is released before this relocks.
        self.entries.remove_if(key, |_, set| set.is_empty());
        removed
    }

    /// Remove `key` with all its connections.
    pub fn remove_key(&self, key: &K) -> Vec<Connection> {
        self.entries
            .remove(key)
            .map(|(_, set)| set.into_values().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the connections held for `key`
    pub fn connections_for(&self, key: &K) -> Vec<Connection> {
        self.entries
            .get(key)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every connection with its key
    pub fn all(&self) -> Vec<(K, Connection)> {
        self.entries
            .iter()
            .flat_map(|entry| {
                let key = entry.key().clone();
                entry
                    .value()
                    .values()
                    .map(|conn| (key.clone(), conn.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys with at least one connection
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of connections across all keys
    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }
}

impl<K> Default for ConnectionRegistry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
