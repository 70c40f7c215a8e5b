//! Spec §8 scenario 6: a forward branch's displacement is computed
//! relative to the branch site. The "reserved displacement value 1 is
//! rejected" half of this scenario is covered at the component level in
//! `src/label.rs`'s `rejects_the_reserved_displacement_value` test, where
//! the exact offsets are easier to control directly against
//! `LabelResolver` than through the full pre-scan/emit pipeline.

use std::rc::Rc;

use subc_emit::config::EmitConfig;
use subc_emit::instr::{Instruction, OpInstruction, Operand, OperandKind, Unit};
use subc_emit::orchestrator::Orchestrator;
use subc_emit::symbol::{RegisterClass, SymKind, SymRef};
use subc_emit::vm::TestHost;

const NOP: u32 = 2;
const BRANCH: u32 = 3;

fn filler(n: usize) -> Vec<Instruction> {
    (0..n)
        .map(|i| {
            Instruction::Op(OpInstruction {
                opnum: NOP,
                opsize: 1,
                mnemonic: "nop".into(),
                operands: vec![],
                variadic_tail: vec![],
                signature_operand_index: None,
                pic_cacheable: false,
                fixup_needed: false,
                line: i as u32,
            })
        })
        .collect()
}

fn branch_to(label: Rc<SymRef>) -> Instruction {
    Instruction::Op(OpInstruction {
        opnum: BRANCH,
        opsize: 2,
        mnemonic: "branch".into(),
        operands: vec![Operand {
            symbol: label,
            kind: OperandKind::Ic,
            is_branch_target: true,
        }],
        variadic_tail: vec![],
        signature_operand_index: None,
        pic_cacheable: false,
        fixup_needed: false,
        line: 99,
    })
}

/// 40 one-word fillers place the branch opcode at offset 40; 58 more
/// fillers after the (2-word) branch place the label at offset 100.
#[test]
fn forward_branch_displacement_is_relative_to_branch_site() {
    let mut orch = Orchestrator::new(Box::new(TestHost::default()));
    orch.open(EmitConfig::default());

    let label = Rc::new(SymRef::new("L1", SymKind::Label, RegisterClass::Constant));
    let mut instructions = filler(40);
    instructions.push(branch_to(label.clone()));
    instructions.extend(filler(58));
    instructions.push(Instruction::Label(label));

    let unit = Unit {
        name: "main".into(),
        instructions,
        ..Unit::default()
    };

    orch.new_sub(&unit).unwrap();
    for instr in &unit.instructions {
        orch.emit(&unit, instr).unwrap();
    }
    orch.end_sub(&unit).unwrap();
    let artifact = orch.close().unwrap();

    // Branch opcode at offset 40, its displacement operand at 41.
    assert_eq!(artifact.code[40], BRANCH as i64);
    assert_eq!(artifact.code[41], 60);
    assert_eq!(artifact.code.len(), 100);
}
