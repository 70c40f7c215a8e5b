#![allow(clippy::try_err)]
// Wrong clippy convention; check
// https://rust-lang.github.io/api-guidelines/naming.html
#![allow(clippy::wrong_self_convention)]

pub mod artifact;
pub mod config;
pub mod constant;
pub mod debug;
pub mod emit;
pub mod error;
pub mod fixup;
pub mod instr;
pub mod key;
pub mod label;
pub mod orchestrator;
pub mod segment;
pub mod sub;
pub mod symbol;
pub mod vm;

pub mod prelude {
    pub use crate::artifact::{Artifact, ConstEntry, FixupRecord};
    pub use crate::config::EmitConfig;
    pub use crate::error::EmitError;
    pub use crate::instr::{CallArg, Instruction, OpInstruction, Operand, OperandKind, Unit};
    pub use crate::orchestrator::Orchestrator;
    pub use crate::symbol::{Color, RegisterClass, SymKind, SymRef};
    pub use crate::vm::VmHost;
}
