//! # Identity & Resource Maps
//!
//! Per-session lookup tables from OS-level identities to vertices. Nothing
//! here is persisted; the maps live in one `BuildSession` and die with it.
//!
//! **Core Types**:
//! - `HandleTable`: raw handle ⇄ vertex, both directions mutated together.
//! - `PathCache`: registry key path (case-insensitive) → Key.
//! - `EntryTables`: per Key, entry name → current KeyEntry and → deleted KeyEntry.
//! - `ResourceMaps`: the bundle a handler works against.

use common::RawHandle;
use std::collections::HashMap;
use substrate::VertexId;

#[derive(Debug, Default)]
pub struct HandleTable {
    by_handle: HashMap<RawHandle, VertexId>,
    by_vertex: HashMap<VertexId, RawHandle>,
}

impl HandleTable {
    pub fn get(&self, handle: &RawHandle) -> Option<VertexId> {
        self.by_handle.get(handle).copied()
    }

    /// Maps `handle` to `vertex`, returning the vertex it used to name.
    pub fn insert(&mut self, handle: RawHandle, vertex: VertexId) -> Option<VertexId> {
        let displaced = self.remove_handle(&handle);
        if let Some(old) = self.by_vertex.remove(&vertex) {
            self.by_handle.remove(&old);
        }
        self.by_vertex.insert(vertex, handle.clone());
        self.by_handle.insert(handle, vertex);
        displaced
    }

    pub fn remove_handle(&mut self, handle: &RawHandle) -> Option<VertexId> {
        let vertex = self.by_handle.remove(handle)?;
        self.by_vertex.remove(&vertex);
        Some(vertex)
    }

    pub fn remove_vertex(&mut self, vertex: VertexId) -> Option<RawHandle> {
        let handle = self.by_vertex.remove(&vertex)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

/// Registry paths are case-insensitive; keys are cached by lowercase path.
#[derive(Debug, Default)]
pub struct PathCache(HashMap<String, VertexId>);

impl PathCache {
    pub fn get(&self, path: &str) -> Option<VertexId> {
        self.0.get(&path.to_lowercase()).copied()
    }

    pub fn insert(&mut self, path: &str, key: VertexId) {
        self.0.insert(path.to_lowercase(), key);
    }

    pub fn remove(&mut self, path: &str) -> Option<VertexId> {
        self.0.remove(&path.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type NameMap = HashMap<String, VertexId>;

#[derive(Debug, Default)]
pub struct EntryTables {
    current: HashMap<VertexId, NameMap>,
    deleted: HashMap<VertexId, NameMap>,
}

impl EntryTables {
    pub fn current(&self, key: VertexId, name: &str) -> Option<VertexId> {
        self.current.get(&key)?.get(name).copied()
    }

    pub fn deleted(&self, key: VertexId, name: &str) -> Option<VertexId> {
        self.deleted.get(&key)?.get(name).copied()
    }

    /// True when `entry` is the one recorded as deleted for `(key, name)`.
    pub fn is_deleted(&self, key: VertexId, name: &str, entry: VertexId) -> bool {
        self.deleted(key, name) == Some(entry)
    }

    pub fn set_current(&mut self, key: VertexId, name: &str, entry: VertexId) {
        self.current
            .entry(key)
            .or_default()
            .insert(name.to_string(), entry);
    }

    pub fn set_deleted(&mut self, key: VertexId, name: &str, entry: VertexId) {
        self.deleted
            .entry(key)
            .or_default()
            .insert(name.to_string(), entry);
    }

    /// Moves every current entry of a deleted key into its deleted map.
    pub fn retire_key(&mut self, key: VertexId) -> usize {
        let Some(entries) = self.current.remove(&key) else {
            return 0;
        };
        let moved = entries.len();
        self.deleted.entry(key).or_default().extend(entries);
        moved
    }
}

#[derive(Debug, Default)]
pub struct ResourceMaps {
    pub sockets: HandleTable,
    pub key_handles: HandleTable,
    /// Socket → its active Connection.
    pub active_connections: HashMap<VertexId, VertexId>,
    pub paths: PathCache,
    pub entries: EntryTables,
}
