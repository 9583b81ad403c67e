//! Pipeline stages and the phased-barrier protocol.

use basis_core::errors::{BasisError, ErrorInfo};
use serde::{Deserialize, Serialize};

use crate::group::Communicator;

/// Stages every worker walks through, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Configuration checks and input loading.
    Startup,
    /// Bias fields constructed on the Lagrangian grid.
    LagrangianFields,
    /// Fields advected and painted onto the Eulerian grid.
    Painting,
    /// Spectra measured and reduced.
    Spectra,
    /// Results handed to the persistence layer.
    Output,
}

impl Stage {
    /// All stages in protocol order.
    pub const ALL: [Stage; 5] = [
        Stage::Startup,
        Stage::LagrangianFields,
        Stage::Painting,
        Stage::Spectra,
        Stage::Output,
    ];

    /// Stable name used in collective tags and logs.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Startup => "startup",
            Stage::LagrangianFields => "lagrangian-fields",
            Stage::Painting => "painting",
            Stage::Spectra => "spectra",
            Stage::Output => "output",
        }
    }

    /// Stage that follows `self`, if any.
    pub fn next(self) -> Option<Stage> {
        let position = Stage::ALL.iter().position(|stage| *stage == self)?;
        Stage::ALL.get(position + 1).copied()
    }
}

/// Tracks the current stage of one worker and only lets it advance in order.
///
/// Each [`StageTracker::complete`] is a collective: the worker announces the
/// stage it finished and blocks until every worker announced the same one.
#[derive(Debug)]
pub struct StageTracker {
    current: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    /// Starts in [`Stage::Startup`].
    pub fn new() -> Self {
        Self {
            current: Stage::Startup,
        }
    }

    /// Stage the worker is currently executing.
    pub fn current(&self) -> Stage {
        self.current
    }

    /// Marks `stage` complete on this worker, waits for all workers and moves
    /// on to the next stage.
    pub fn complete(&mut self, comm: &Communicator, stage: Stage) -> Result<(), BasisError> {
        if stage != self.current {
            let err = BasisError::Protocol(
                ErrorInfo::new("stage-order", "stage completed out of order")
                    .with_context("rank", comm.rank())
                    .with_context("current", self.current.name())
                    .with_context("completed", stage.name()),
            );
            comm.abort(err.clone());
            return Err(err);
        }
        comm.await_all(stage)?;
        if let Some(next) = stage.next() {
            self.current = next;
        }
        Ok(())
    }
}
