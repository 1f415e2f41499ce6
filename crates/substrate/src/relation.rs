//! Edge vocabulary.

use crate::vertex::SocketAddress;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    SpawnedProcess,
    HasSocket,
    HasConnection,
    Communicates,
    CreatesSocket,
    Binds,
    Connects,
    ListensOn,
    Accepts,
    Closes,
    CloseSocket,
    Shutdown,
    Duplicates,
    Sends,
    Receives,
    Conveys,
    HasSubKey,
    HasEntry,
    UsesKey,
    HasHandle,
    Discovered,
    QueriesEntry,
    SetsEntry,
    DeletesEntry,
    ChangesTowards,
    ReferencesFileSystem,
    HasDrive,
    Contains,
}

impl RelationKind {
    pub fn name(&self) -> &'static str {
        match self {
            RelationKind::SpawnedProcess => "SpawnedProcess",
            RelationKind::HasSocket => "HasSocket",
            RelationKind::HasConnection => "HasConnection",
            RelationKind::Communicates => "Communicates",
            RelationKind::CreatesSocket => "CreatesSocket",
            RelationKind::Binds => "Binds",
            RelationKind::Connects => "Connects",
            RelationKind::ListensOn => "ListensOn",
            RelationKind::Accepts => "Accepts",
            RelationKind::Closes => "Closes",
            RelationKind::CloseSocket => "CloseSocket",
            RelationKind::Shutdown => "Shutdown",
            RelationKind::Duplicates => "Duplicates",
            RelationKind::Sends => "Sends",
            RelationKind::Receives => "Receives",
            RelationKind::Conveys => "Conveys",
            RelationKind::HasSubKey => "HasSubKey",
            RelationKind::HasEntry => "HasEntry",
            RelationKind::UsesKey => "UsesKey",
            RelationKind::HasHandle => "HasHandle",
            RelationKind::Discovered => "Discovered",
            RelationKind::QueriesEntry => "QueriesEntry",
            RelationKind::SetsEntry => "SetsEntry",
            RelationKind::DeletesEntry => "DeletesEntry",
            RelationKind::ChangesTowards => "ChangesTowards",
            RelationKind::ReferencesFileSystem => "ReferencesFileSystem",
            RelationKind::HasDrive => "HasDrive",
            RelationKind::Contains => "Contains",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed edge. `Binds` carries the local address, `Connects` and
/// `Accepts` the remote one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub kind: RelationKind,
    pub address: Option<SocketAddress>,
}

impl Relation {
    pub fn with_address(kind: RelationKind, address: Option<SocketAddress>) -> Self {
        Self { kind, address }
    }
}

impl From<RelationKind> for Relation {
    fn from(kind: RelationKind) -> Self {
        Self {
            kind,
            address: None,
        }
    }
}
