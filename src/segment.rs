//! Segment and segment-stack ownership.
//!
//! Grounded in `Interpreter<S>` (`src/interpreter.rs`): one struct
//! aggregating every runtime sub-structure, with lifecycle methods that
//! mutate it in place rather than static/global state.

use crate::config::EmitConfig;
use crate::constant::ConstantPool;
use crate::debug::DebugMap;
use crate::error::EmitError;
use crate::fixup::FixupTable;
use crate::label::LabelResolver;
use crate::sub::SubTable;

/// Bookkeeping for the unit currently being emitted into a segment. Moves
/// what the source kept as function-local static state (line counter,
/// write pointer) into the segment struct, per spec §9's design note, so
/// multiple segments could in principle be compiled concurrently even
/// though the orchestrator itself remains single-threaded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveUnit {
    pub sub_index: usize,
    pub start: usize,
    pub cursor: usize,
}

/// One code segment: the unit of artifact production.
///
/// Invariants (spec §3):
/// 1. `code.len()` only grows; label offsets recorded into symbol colors
///    remain valid forever (no compaction).
/// 2. Every constant-pool index stored in the code vector is `< pool.len()`
///    at the moment it is written.
/// 3. For every sub: `start <= end <= code.len()`; sub ranges are disjoint
///    and ordered.
/// 4. `pic_index.len() == code.len() / 2` at all times.
/// 5. A key constant is inserted at most once per segment.
/// 6. Every fixup-needed `set_p_pc` appears in exactly one fixup entry
///    until close, after which none remain unresolved.
#[derive(Debug)]
pub struct Segment {
    pub(crate) config: EmitConfig,
    pub(crate) code: Vec<i64>,
    pub(crate) pic_index: Vec<u32>,
    pub(crate) pool: ConstantPool,
    pub(crate) subs: SubTable,
    pub(crate) fixups: Vec<FixupTable>,
    pub(crate) debug: DebugMap,
    pub(crate) labels: LabelResolver,
    pub(crate) next_pic_id: u32,
    pub(crate) active: Option<ActiveUnit>,
    pub(crate) current_runtime_sub: Option<String>,
    poisoned: bool,
}

impl Segment {
    pub(crate) fn new(config: EmitConfig) -> Self {
        Self {
            config,
            code: Vec::new(),
            pic_index: Vec::new(),
            pool: ConstantPool::default(),
            subs: SubTable::default(),
            fixups: Vec::new(),
            debug: DebugMap::default(),
            labels: LabelResolver::default(),
            next_pic_id: 1,
            active: None,
            current_runtime_sub: None,
            poisoned: false,
        }
    }

    /// Fails with [`EmitError::SegmentPoisoned`] if a prior operation on
    /// this segment already failed.
    pub(crate) fn check_alive(&self) -> Result<(), EmitError> {
        if self.poisoned {
            Err(EmitError::SegmentPoisoned)
        } else {
            Ok(())
        }
    }

    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Grow the code vector (and its PIC-index companion) by `words`,
    /// returning the start offset of the newly reserved range. Invariant 4
    /// is maintained by growing `pic_index` by exactly `words / 2`.
    pub(crate) fn grow_code(&mut self, words: usize) -> usize {
        let start = self.code.len();
        self.code.resize(self.code.len() + words, 0);
        self.pic_index.resize(self.code.len() / 2, 0);
        start
    }

    /// Allocate a fresh, monotonically increasing PIC cache slot id.
    pub(crate) fn fresh_pic_id(&mut self) -> u32 {
        let id = self.next_pic_id;
        self.next_pic_id += 1;
        id
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    pub fn subs(&self) -> &SubTable {
        &self.subs
    }

    pub fn debug_map(&self) -> &DebugMap {
        &self.debug
    }
}

/// Owns the stack of open segments.
///
/// `open` pushes a fresh segment; `close` pops it, runs the global fixup
/// pass, and returns the finished [`crate::artifact::Artifact`].
#[derive(Debug, Default)]
pub struct SegmentManager {
    stack: Vec<Segment>,
    exit_handler_registered: bool,
}

impl SegmentManager {
    /// Push a fresh segment, registering the process-exit handler the
    /// first time only.
    pub fn open(&mut self, config: EmitConfig, host: &mut dyn crate::vm::VmHost) {
        if !self.exit_handler_registered {
            host.register_exit_handler();
            self.exit_handler_registered = true;
        }
        self.stack.push(Segment::new(config));
    }

    /// The currently open (top-of-stack) segment, if any.
    pub fn current_mut(&mut self) -> Option<&mut Segment> {
        self.stack.last_mut()
    }

    /// Pop the current segment. Used internally by `close` once the
    /// global fixup pass has finished mutating it.
    pub(crate) fn pop(&mut self) -> Option<Segment> {
        self.stack.pop()
    }

    /// Number of segments currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}
