//! # Build Session
//!
//! One session per trace. It owns the active graph set, the resource maps
//! and the finalizing-phase schedule, and enforces the two-phase protocol:
//!
//! 1. **Ingestion**: `ingest` / `ingest_all` / `declare_path`, in trace order.
//! 2. **Finalization**: `finish_ingestion` closes the stream and hands out the
//!    session's only `FinalizeToken`; `run_finalizers` consumes it.

use crate::dispatch::{self, CallKind, Context, Outcome};
use crate::finalize;
use crate::maps::ResourceMaps;
use crate::phase::PhaseSchedule;
use crate::AnatomistError;
use common::{BuildConfig, Call, Limits};
use substrate::fs::{self, FsKind};
use substrate::{Graph, GraphSet, Host, VertexFilter, VertexId};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-session ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub records: usize,
    pub applied: usize,
    pub skipped: usize,
    pub ignored: usize,
    pub errors: usize,
    pub fs_declared: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub phases_run: usize,
    pub edges_added: usize,
}

/// Proof that ingestion is closed. Only the session that minted it accepts it.
#[derive(Debug)]
pub struct FinalizeToken {
    session: Uuid,
}

#[derive(Debug)]
pub struct BuildSession {
    id: Uuid,
    graphs: GraphSet,
    maps: ResourceMaps,
    limits: Limits,
    phases: PhaseSchedule,
    stats: IngestStats,
    ingesting: bool,
}

impl BuildSession {
    /// Creates the full graph (seeded with the current host), the configured
    /// views and the finalizing phases.
    pub fn new(config: &BuildConfig) -> Result<Self, AnatomistError> {
        let host = Host {
            address: config.host.address.clone(),
            domain: config.host.domain.clone(),
            name: config.host.name.clone(),
            platform: config.host.platform.clone(),
        };
        let mut graphs = GraphSet::new(host);
        for view in &config.views {
            graphs.add_view(&view.name, VertexFilter::from_names(&view.kinds)?)?;
        }

        let mut phases = PhaseSchedule::default();
        phases.request_finalizing_phase(
            finalize::PHASE_NAME,
            finalize::find_filesystem_references,
        );

        let id = Uuid::new_v4();
        debug!(session = %id, views = config.views.len(), "Build session created");
        Ok(Self {
            id,
            graphs,
            maps: ResourceMaps::default(),
            limits: config.limits,
            phases,
            stats: IngestStats::default(),
            ingesting: true,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn graphs(&self) -> &GraphSet {
        &self.graphs
    }

    #[cfg(test)]
    pub(crate) fn graphs_mut(&mut self) -> &mut GraphSet {
        &mut self.graphs
    }

    pub fn maps(&self) -> &ResourceMaps {
        &self.maps
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn is_ingesting(&self) -> bool {
        self.ingesting
    }

    /// Integrates one call record.
    pub fn ingest(&mut self, call: &Call) -> Result<Outcome, AnatomistError> {
        if !self.ingesting {
            return Err(AnatomistError::IngestionClosed(self.id));
        }
        self.stats.records += 1;

        let Some(kind) = CallKind::from_name(&call.name) else {
            self.stats.ignored += 1;
            return Ok(Outcome::Ignored);
        };
        if !call.succeeded() {
            self.stats.ignored += 1;
            return Ok(Outcome::Ignored);
        }

        let mut ctx = Context::new(&mut self.graphs, &mut self.maps, &self.limits, call);
        match dispatch::integrate(kind, &mut ctx) {
            Ok(outcome) => {
                match outcome {
                    Outcome::Applied => self.stats.applied += 1,
                    Outcome::Skipped => self.stats.skipped += 1,
                    Outcome::Ignored => self.stats.ignored += 1,
                }
                Ok(outcome)
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    /// Integrates a stream of calls. Per-call errors are logged and counted,
    /// never propagated.
    pub fn ingest_all<'c>(&mut self, calls: impl IntoIterator<Item = &'c Call>) -> IngestStats {
        for call in calls {
            if let Err(e) = self.ingest(call) {
                warn!(call = %call.name, pid = call.process.pid, time = call.time, error = %e, "Dropped call record");
            }
        }
        self.stats
    }

    /// Declares a filesystem object observed during the trace.
    pub fn declare_path(
        &mut self,
        path: &str,
        kind: FsKind,
    ) -> Result<Option<VertexId>, AnatomistError> {
        if !self.ingesting {
            return Err(AnatomistError::IngestionClosed(self.id));
        }
        let id = fs::declare_path(&mut self.graphs, path, kind)?;
        match id {
            Some(_) => self.stats.fs_declared += 1,
            None => warn!(path, "Ignoring filesystem record that is not an absolute path"),
        }
        Ok(id)
    }

    /// Closes ingestion. Can only succeed once per session.
    pub fn finish_ingestion(&mut self) -> Result<FinalizeToken, AnatomistError> {
        if !self.ingesting {
            return Err(AnatomistError::IngestionClosed(self.id));
        }
        self.ingesting = false;
        info!(
            session = %self.id,
            records = self.stats.records,
            applied = self.stats.applied,
            skipped = self.stats.skipped,
            errors = self.stats.errors,
            "Ingestion finished"
        );
        Ok(FinalizeToken { session: self.id })
    }

    /// Runs every finalizing phase, in order.
    pub fn run_finalizers(&mut self, token: FinalizeToken) -> Result<FinalizeReport, AnatomistError> {
        if token.session != self.id {
            return Err(AnatomistError::ForeignToken(self.id));
        }
        let mut report = FinalizeReport::default();
        for phase in self.phases.phases() {
            debug!(phase = phase.name, ordinal = phase.id.ordinal(), "Running finalizing phase");
            report.edges_added += (phase.run)(&mut self.graphs)?;
            report.phases_run += 1;
        }
        Ok(report)
    }

    pub fn into_graphs(self) -> Vec<Graph> {
        self.graphs.into_graphs()
    }
}
