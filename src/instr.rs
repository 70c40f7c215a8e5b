//! Front-end contract: the instruction shape the [`crate::emit::Emitter`]
//! consumes.

use std::rc::Rc;

use crate::symbol::{RegisterClass, SymRef};

/// One already-resolved actual argument to a call-signature opcode
/// (`set_args`/`get_results`/`get_params`/`set_returns`). Pre-resolved
/// because these are written verbatim as the variadic tail (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct CallArg {
    /// The argument's resolved color (register number or constant index).
    pub color: i64,
    /// Register class the argument's type bits are derived from.
    pub register_class: RegisterClass,
    /// `true` if the argument is itself a constant operand.
    pub is_constant: bool,
}

/// How an operand's symbol color should be interpreted when encoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OperandKind {
    /// Emit the symbol's register color verbatim.
    Register,
    /// Integer-constant pool index.
    Ic,
    /// String-constant pool index.
    Sc,
    /// Number-constant pool index.
    Nc,
    /// PMC-constant pool index.
    Pc,
    /// Key-index-constant pool index (an already-resolved key).
    Kic,
    /// A key operand: encode (interning if necessary) via
    /// [`crate::key::KeyEncoder`].
    Kc,
}

/// One declared operand of an instruction.
#[derive(Debug, Clone)]
pub struct Operand {
    /// The symbol this operand references.
    pub symbol: Rc<SymRef>,
    /// How to encode it.
    pub kind: OperandKind,
    /// `true` if this operand is a branch target (declared with argtype
    /// `Ic` but semantically a label reference: the encoded value is a
    /// displacement, not a pool index).
    pub is_branch_target: bool,
}

/// One opcode to emit, or a label definition (no emission).
#[derive(Debug, Clone)]
pub enum Instruction {
    /// A label definition. Its symbol's color has already been set to its
    /// offset during pre-scan; emitting it is a no-op.
    Label(Rc<SymRef>),
    /// A real opcode with its declared operands.
    Op(OpInstruction),
}

/// A real, non-label instruction.
#[derive(Debug, Clone)]
pub struct OpInstruction {
    /// VM opcode id.
    pub opnum: u32,
    /// Total size in words, opcode included.
    pub opsize: usize,
    /// The mnemonic, used only for call-signature-op dispatch and
    /// diagnostics (`set_p_pc`, `set_args`, ...).
    pub mnemonic: String,
    /// Declared operands, in encoding order.
    pub operands: Vec<Operand>,
    /// Pre-resolved variadic tail appended after the declared operand
    /// count (used by `set_args`/`get_results`/`get_params`/
    /// `set_returns`).
    pub variadic_tail: Vec<CallArg>,
    /// Index into `operands` of the call-signature constant operand, when
    /// `is_call_signature_op()`.
    pub signature_operand_index: Option<usize>,
    /// `true` if this opcode is PIC-cacheable.
    pub pic_cacheable: bool,
    /// `true` if the symbol referenced at operand slot 2 needs global
    /// fixup (a `set_p_pc` whose target isn't resolved at encode time).
    pub fixup_needed: bool,
    /// Source line number.
    pub line: u32,
}

impl OpInstruction {
    /// `true` if this is one of the call-signature verification opcodes
    /// (§4.5).
    pub fn is_call_signature_op(&self) -> bool {
        matches!(
            self.mnemonic.as_str(),
            "set_args" | "get_results" | "get_params" | "set_returns"
        )
    }

    /// `true` if this rejects constant arguments (`get_params`/
    /// `get_results`).
    pub fn rejects_constant_args(&self) -> bool {
        matches!(self.mnemonic.as_str(), "get_results" | "get_params")
    }

    /// `true` if this is a `set_p_pc` opcode (global-symbol call site).
    pub fn is_set_p_pc(&self) -> bool {
        self.mnemonic == "set_p_pc"
    }
}

/// A compilation unit ("sub") as handed to the emitter: a flat instruction
/// stream plus the metadata needed to register its [`crate::sub::SubRecord`].
#[derive(Debug, Clone, Default)]
pub struct Unit {
    /// The sub's declared name.
    pub name: String,
    /// Source file for debug mapping.
    pub file: String,
    /// Instruction stream, in program order.
    pub instructions: Vec<Instruction>,
    /// Register-usage counts, one per class: `[int, num, string, pmc]`.
    pub register_usage: [u32; 4],
    /// Outer sub's name, if this unit is lexically nested.
    pub outer_name: Option<String>,
    /// `true` if the unit's PCC flags include a yield (classifies it as a
    /// coroutine).
    pub has_yield: bool,
    /// Namespace symbol attached to the unit, if any.
    pub namespace: Option<Rc<SymRef>>,
    /// `true` if the unit carries the "needs-lex" flag even with no
    /// lexicals declared.
    pub needs_lex: bool,
    /// `true` if the unit is declared multi.
    pub is_multi: bool,
    /// Multi-dispatch type names/keys, parallel to the declared signature.
    pub multi_types: Vec<String>,
    /// `true` if this unit overrides a vtable method.
    pub is_vtable: bool,
    /// Vtable method name (quoted in source, unquoted here), when
    /// `is_vtable`.
    pub vtable_method_name: Option<String>,
    /// `true` if the unit should run immediately once compiled.
    pub immediate: bool,
    /// HLL identifier active when this unit was compiled.
    pub hll_id: u32,
}

impl Unit {
    /// Total opcode word count, computed by summing `opsize` across all
    /// non-label instructions. Used by the pre-scan to grow the code
    /// vector exactly once per unit.
    pub fn code_size(&self) -> usize {
        self.instructions
            .iter()
            .map(|i| match i {
                Instruction::Label(_) => 0,
                Instruction::Op(op) => op.opsize,
            })
            .sum()
    }
}
