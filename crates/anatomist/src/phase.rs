//! Finalizing-phase schedule.
//!
//! Components ask for a finalizing phase once, at session construction, and
//! get an ordered id back. Phases run in id order, after ingestion is closed.

use crate::AnatomistError;
use std::fmt;
use substrate::GraphSet;

/// Work done by a finalizing phase. Returns the number of edges it added.
pub type Finalizer = fn(&mut GraphSet) -> Result<usize, AnatomistError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhaseId(u32);

impl PhaseId {
    pub fn ordinal(&self) -> u32 {
        self.0
    }
}

#[derive(Clone)]
pub struct Phase {
    pub id: PhaseId,
    pub name: &'static str,
    pub run: Finalizer,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct PhaseSchedule {
    phases: Vec<Phase>,
}

impl PhaseSchedule {
    pub fn request_finalizing_phase(&mut self, name: &'static str, run: Finalizer) -> PhaseId {
        let id = PhaseId(self.phases.len() as u32);
        self.phases.push(Phase { id, name, run });
        id
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}
