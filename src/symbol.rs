//! Front-end symbol descriptors as observed by the emitter.
//!
//! The source overloads one `color` field to mean a register number, a
//! constant-pool index, or a code offset, disambiguated by [`SymKind`]. Here
//! it is a proper tagged variant: failure to set a color is an absent enum
//! payload rather than a sentinel `-1`.

use std::cell::Cell;
use std::rc::Rc;

/// What a symbol denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SymKind {
    /// An integer-constant reference.
    Integer,
    /// A floating-point constant reference.
    Number,
    /// A string-constant reference.
    String,
    /// A PMC (opaque object) reference.
    Pmc,
    /// A composite key reference.
    Key,
    /// A branch-target label.
    Label,
    /// A sub (callable) label.
    SubLabel,
    /// A namespace reference.
    Namespace,
}

/// Register file a register-class symbol belongs to, or the pseudo-class
/// used for constant-pointer symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RegisterClass {
    /// Integer register file.
    Int,
    /// Numeric (float) register file.
    Num,
    /// String register file.
    Str,
    /// PMC register file.
    Pmc,
    /// Not a register: this symbol addresses the constant pool directly.
    Constant,
}

impl RegisterClass {
    /// Bit position used when building type-bit masks for call-signature
    /// verification (§4.5): `{int, num, string, pmc}`.
    pub const fn type_bit(self) -> u8 {
        match self {
            RegisterClass::Int => 0b0001,
            RegisterClass::Num => 0b0010,
            RegisterClass::Str => 0b0100,
            RegisterClass::Pmc => 0b1000,
            RegisterClass::Constant => 0,
        }
    }
}

/// Marker bit the CONSTANT slot in a call signature uses.
pub const SIG_CONSTANT_BIT: u8 = 0b1_0000;

/// The disambiguated payload of a symbol's dual-use `color` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// A register number within its register class's file.
    Register(i64),
    /// An index into the segment's constant pool.
    ConstIndex(usize),
    /// A code offset (label definition site).
    Offset(usize),
}

/// Usage flags carried by a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymFlags {
    /// A `set_p_pc` reference needing global fixup resolution.
    pub fixup_needed: bool,
    /// Declared lexical (visible to inner closures).
    pub lexical: bool,
    /// Denotes a constant pointer rather than a register.
    pub constant_pointer: bool,
    /// String literal carries an explicit charset prefix (`name:"text"`).
    pub encoded: bool,
}

/// A front-end symbol as observed by the emitter.
///
/// Ownership: symbols belong to the front-end's symbol tables. The emitter
/// treats them as read-mostly and writes only [`SymRef::color`].
#[derive(Debug, Clone)]
pub struct SymRef {
    /// The symbol's source-level name (identifier text, string literal
    /// text, or label name depending on `kind`).
    pub name: String,
    /// What the symbol denotes.
    pub kind: SymKind,
    /// Register file the symbol belongs to (meaningless for pool-only
    /// symbols such as interned constants referenced purely by index).
    pub register_class: RegisterClass,
    /// ASCII/Unicode marker for string symbols.
    pub encoding: Option<StringEncoding>,
    /// Usage flags.
    pub flags: SymFlags,
    /// Key-part chain links, populated when `kind == Key`.
    pub key_chain: Vec<Rc<SymRef>>,
    /// Lexical-name alias chain (walked when building lexical info).
    pub alias_chain: Vec<Rc<SymRef>>,
    /// Slice markers, meaningful when this symbol is itself a key part.
    pub slice: crate::key::SliceMode,
    color: Cell<Option<Color>>,
}

/// String constant encoding marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    /// Plain ASCII/byte string.
    Ascii,
    /// Unicode (UTF-32/wide) string, selected via a charset prefix.
    Unicode,
}

impl SymRef {
    /// Build a new symbol with no color assigned yet.
    pub fn new(name: impl Into<String>, kind: SymKind, register_class: RegisterClass) -> Self {
        Self {
            name: name.into(),
            kind,
            register_class,
            encoding: None,
            flags: SymFlags::default(),
            key_chain: Vec::new(),
            alias_chain: Vec::new(),
            slice: crate::key::SliceMode::None,
            color: Cell::new(None),
        }
    }

    /// Current color, if assigned.
    pub fn color(&self) -> Option<Color> {
        self.color.get()
    }

    /// Assign the color. Per the color invariant this should happen exactly
    /// once; callers that re-assign (e.g. re-running constant folding on an
    /// already-resolved symbol) simply overwrite, matching the source's
    /// "set exactly once" expectation without enforcing it at the type
    /// level, since some pre-scan/fold orderings legitimately revisit a
    /// symbol whose value has not changed.
    pub fn set_color(&self, color: Color) {
        self.color.set(Some(color));
    }

    /// The register number, if this symbol is a register-class symbol with
    /// an assigned color.
    pub fn register_number(&self) -> Option<i64> {
        match self.color() {
            Some(Color::Register(n)) => Some(n),
            _ => None,
        }
    }

    /// The constant-pool index, if assigned.
    pub fn const_index(&self) -> Option<usize> {
        match self.color() {
            Some(Color::ConstIndex(i)) => Some(i),
            _ => None,
        }
    }

    /// The code offset, if this is a resolved label.
    pub fn offset(&self) -> Option<usize> {
        match self.color() {
            Some(Color::Offset(o)) => Some(o),
            _ => None,
        }
    }

    /// Encode a register's color for the wire format of composite keys:
    /// "mapped" (negative) register colors are encoded as `-1 - color`.
    pub fn wire_register_payload(&self) -> Option<i64> {
        self.register_number().map(|n| if n < 0 { -1 - n } else { n })
    }
}
