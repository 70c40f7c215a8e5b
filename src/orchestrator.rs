//! Public façade: `open` / `new_sub` / `emit` / `end_sub` / `close` (spec
//! §4.7, §6).
//!
//! Grounded in `src/transactor.rs`'s `Transactor<S>`: a thin owned wrapper
//! that sequences calls into the heavier machinery (there, an
//! `Interpreter`; here, a [`SegmentManager`] plus a [`VmHost`]) and exposes
//! the handful of entry points a consumer actually calls.

use tracing::instrument;

use crate::artifact::Artifact;
use crate::config::EmitConfig;
use crate::emit::Emitter;
use crate::error::EmitError;
use crate::fixup;
use crate::instr::{Instruction, Unit};
use crate::segment::SegmentManager;
use crate::vm::VmHost;

/// Owns the process-level emission state: the segment stack and the host
/// VM handle. Per spec §9's design note, this is the owned handle the
/// source's singleton chain of segments becomes; dropping it is the
/// equivalent of the source's on-exit teardown.
pub struct Orchestrator {
    manager: SegmentManager,
    host: Box<dyn VmHost>,
}

impl Orchestrator {
    /// Build an orchestrator around a host VM implementation.
    pub fn new(host: Box<dyn VmHost>) -> Self {
        Self {
            manager: SegmentManager::default(),
            host,
        }
    }

    /// Opens a fresh segment.
    #[instrument(skip(self))]
    pub fn open(&mut self, config: EmitConfig) {
        self.manager.open(config, self.host.as_mut());
    }

    /// Registers a new sub in the currently open segment.
    ///
    /// Callers must bracket every `new_sub` between an `open` and a
    /// matching `close`; calling it with no segment open returns
    /// [`EmitError::NoOpenSegment`] rather than panicking.
    #[instrument(skip(self, unit), fields(sub = %unit.name))]
    pub fn new_sub(&mut self, unit: &Unit) -> Result<Option<usize>, EmitError> {
        let segment = self.manager.current_mut().ok_or(EmitError::NoOpenSegment)?;
        Emitter::new_sub(segment, self.host.as_mut(), unit)
    }

    /// Encodes one instruction into the currently active sub.
    #[instrument(skip(self, unit, instruction))]
    pub fn emit(&mut self, unit: &Unit, instruction: &Instruction) -> Result<(), EmitError> {
        let segment = self.manager.current_mut().ok_or(EmitError::NoOpenSegment)?;
        Emitter::emit(segment, self.host.as_mut(), unit, instruction)
    }

    /// Closes out the currently active sub.
    #[instrument(skip(self, unit), fields(sub = %unit.name))]
    pub fn end_sub(&mut self, unit: &Unit) -> Result<(), EmitError> {
        let segment = self.manager.current_mut().ok_or(EmitError::NoOpenSegment)?;
        Emitter::end_sub(segment, self.host.as_mut(), unit)
    }

    /// Closes the currently open segment: runs the global fixup pass (spec
    /// §4.6) and returns the finished [`Artifact`].
    #[instrument(skip(self))]
    pub fn close(&mut self) -> Result<Artifact, EmitError> {
        let mut segment = self.manager.pop().ok_or(EmitError::NoOpenSegment)?;
        segment.check_alive()?;

        let result = fixup::resolve_all(
            &mut segment.code,
            &mut segment.subs,
            &segment.fixups,
            &mut segment.pool,
            self.host.as_mut(),
        );
        if let Err(err) = result {
            segment.poison();
            return Err(err);
        }

        Ok(Artifact::from_segment(&segment))
    }

    /// Number of segments currently open (for diagnostics/tests).
    pub fn depth(&self) -> usize {
        self.manager.depth()
    }
}
