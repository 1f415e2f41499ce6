//! # Substrate: Behavioral Graph Storage
//!
//! Typed property-graph primitives the engine emits into.
//!
//! **Core Types**:
//! - `Vertex` / `VertexKind`: the closed vertex vocabulary (hosts, processes,
//!   calls, sockets, connections, data, registry keys/entries/handles, files).
//! - `Relation` / `RelationKind`: typed directed edges, some carrying a socket address.
//! - `Graph`: one petgraph `StableDiGraph` restricted by a `VertexFilter`.
//! - `GraphSet`: the full graph plus filtered views, updated together, with
//!   content-addressed host and process indexes.
//! - `RegData`: registry value model (type tag and value as one sum type).
//! - `fs`: filesystem-vertex index (drive and directory chains under a host).

pub mod fs;
pub mod graph;
pub mod relation;
pub mod set;
pub mod value;
pub mod vertex;

pub use graph::{Graph, VertexFilter};
pub use relation::{Relation, RelationKind};
pub use set::{GraphSet, HostLookup};
pub use value::{RegData, RegType, RegValue, TypeContractError};
pub use vertex::{
    Connection, Data, Directory, File, Host, Invocation, Key, KeyEntry, KeyHandle, Process,
    Socket, SocketAddress, Vertex, VertexKind,
};

use std::fmt;

/// Stable vertex identifier, shared by every graph of a `GraphSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub u64);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Stable edge identifier, shared by every graph of a `GraphSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstrateError {
    #[error("unknown vertex {0}")]
    UnknownVertex(VertexId),
    #[error("unknown vertex kind '{0}'")]
    UnknownKind(String),
    #[error("graph view '{0}' already exists")]
    DuplicateView(String),
    #[error("invalid {what} name {name:?}: {reason}")]
    InvalidName {
        what: &'static str,
        name: String,
        reason: &'static str,
    },
}
