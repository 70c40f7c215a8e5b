//! Emitter error variants.

use thiserror::Error;

/// Failure modes of the emission core.
///
/// Per the propagation policy: every error is surfaced synchronously to the
/// caller. There is no local recovery, because the emitter's partial state
/// (code vector, pool indices, fixup table) cannot be rolled back without
/// corrupting symbol colors that point into it. A failing call poisons the
/// enclosing [`crate::segment::Segment`]; subsequent calls on it fail with
/// [`EmitError::SegmentPoisoned`].
#[derive(Debug, Error)]
pub enum EmitError {
    /// Instruction reached the emitter without an assigned opcode.
    #[error("instruction has no opcode assigned")]
    NoOpnum,

    /// A zero-opcode entry declared a nonzero operand size.
    #[error("zero-opcode entry declared opsize {opsize}")]
    SizedNonOp {
        /// The nonzero size that was declared.
        opsize: usize,
    },

    /// A key chain exceeded the 21-part limit.
    #[error("key chain has {len} parts, maximum is {max}")]
    KeyTooComplex {
        /// Number of parts in the offending chain.
        len: usize,
        /// The limit (21).
        max: usize,
    },

    /// A key part's register class was neither int nor string.
    #[error("key part register class is not int or string")]
    KeySetUnknown,

    /// A key part's type flags were unrecognised.
    #[error("unknown key part type flags: {flags:#x}")]
    UnknownKeyPartType {
        /// The raw flag bits that could not be decoded.
        flags: u32,
    },

    /// An integer literal fell outside the platform integer range.
    #[error("integer literal `{text}` overflows i64")]
    ConstOverflow {
        /// The literal text that failed to parse.
        text: String,
    },

    /// A branch target symbol has no offset recorded.
    #[error("branch target `{label}` has no recorded offset")]
    UnresolvedLabel {
        /// The label name.
        label: String,
    },

    /// The encoded displacement came out as the reserved "unset" value.
    #[error("encoded displacement at offset {offset} is the reserved value 1")]
    NoLabelOffsetFound {
        /// The branch-site code offset.
        offset: usize,
    },

    /// A constant argument appeared in `get_params`/`get_results`.
    #[error("constant argument at slot {slot} is not allowed in get_params/get_results")]
    ConstantInGetParam {
        /// The operand slot that held the constant.
        slot: usize,
    },

    /// `:vtable` named a method not present in the vtable table.
    #[error("`{name}` is not a vtable method")]
    NotAVtableMethod {
        /// The offending method name.
        name: String,
    },

    /// `:outer` referenced a sub that is neither already compiled nor the
    /// current runtime sub.
    #[error("outer sub `{name}` is not yet defined")]
    UndefinedOuter {
        /// The outer sub's name.
        name: String,
    },

    /// A lexical declaration named a method not present on the LexInfo
    /// class.
    #[error("lexical declaration method `{method}` is missing")]
    MethodMissing {
        /// The missing method name.
        method: String,
    },

    /// An operation was attempted on a segment that previously failed.
    #[error("segment is poisoned by a prior error and cannot accept further operations")]
    SegmentPoisoned,

    /// `new_sub`/`emit`/`end_sub`/`close` was called with no segment open.
    #[error("no segment is open: call `open` first")]
    NoOpenSegment,

    /// `emit` was called with no sub active in the open segment.
    #[error("emit called without a preceding new_sub")]
    NoActiveSub,

    /// The host VM reported a failure (constant-table append, string
    /// construction, vtable lookup, ...).
    #[error("vm host error: {0}")]
    Host(#[from] crate::vm::VmError),
}
