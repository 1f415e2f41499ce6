//! # The Anatomist: Behavioral Graph Engine
//!
//! **Role**: Turns an ordered stream of intercepted socket and registry calls
//! into a de-duplicated behavioral graph, then cross-references registry
//! values with the filesystem once the whole trace has been seen.
//!
//! **Core Types**:
//! - `BuildSession`: owns the graphs, the resource maps and the phase schedule
//!   of one trace. `ingest` → `finish_ingestion` → `run_finalizers`.
//! - `CallKind`: closed set of handled API families, resolved from call names.
//! - `ResourceMaps`: handle tables, path cache and per-key entry tables.
//! - `AnatomistError`: per-call failures. Only type-contract violations are
//!   treated as fatal for the handler that hits them.
//!
//! **Design**:
//! - A handler runs only for successful calls and touches the graph only
//!   through `substrate::GraphSet`, so filtered views never drift.
//! - Unknown handles and structural oddities are logged and skipped, never raised.

pub mod cmdline;
pub mod dispatch;
pub mod finalize;
pub mod labels;
pub mod maps;
pub mod network;
pub mod phase;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{CallKind, Outcome};
pub use maps::ResourceMaps;
pub use phase::{PhaseId, PhaseSchedule};
pub use session::{BuildSession, FinalizeReport, FinalizeToken, IngestStats};

use common::ArgumentError;
use substrate::{SubstrateError, TypeContractError};

/// Errors raised while integrating a call or finalizing a session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnatomistError {
    /// The record lacks data a handler needs (argument, key name, separator).
    #[error("Malformed call record: {0}")]
    MalformedCall(String),

    /// A registry value disagrees with its declared type.
    #[error("Type contract violation: {0}")]
    TypeContract(#[from] TypeContractError),

    #[error("Graph error: {0}")]
    Graph(SubstrateError),

    /// `ingest` after `finish_ingestion`.
    #[error("Ingestion is closed for session {0}")]
    IngestionClosed(uuid::Uuid),

    /// A finalize token minted by another session.
    #[error("Finalize token does not belong to session {0}")]
    ForeignToken(uuid::Uuid),
}

impl From<ArgumentError> for AnatomistError {
    fn from(err: ArgumentError) -> Self {
        AnatomistError::MalformedCall(err.to_string())
    }
}

impl From<SubstrateError> for AnatomistError {
    fn from(err: SubstrateError) -> Self {
        match err {
            SubstrateError::InvalidName { .. } => AnatomistError::MalformedCall(err.to_string()),
            other => AnatomistError::Graph(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: AnatomistError = ArgumentError::Missing("socket".into()).into();
        assert_eq!(
            err,
            AnatomistError::MalformedCall("missing argument 'socket'".into())
        );

        let err: AnatomistError = SubstrateError::InvalidName {
            what: "key",
            name: String::new(),
            reason: "empty",
        }
        .into();
        assert!(matches!(err, AnatomistError::MalformedCall(_)));

        let err: AnatomistError = SubstrateError::UnknownKind("Thread".into()).into();
        assert!(matches!(err, AnatomistError::Graph(_)));
    }
}
