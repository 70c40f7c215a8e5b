//! Spec §8 scenario 1: one unit `main` with a string literal, a print, and
//! an end instruction.

use std::rc::Rc;

use subc_emit::artifact::ConstEntry;
use subc_emit::config::EmitConfig;
use subc_emit::instr::{Instruction, OpInstruction, Operand, OperandKind, Unit};
use subc_emit::orchestrator::Orchestrator;
use subc_emit::symbol::{Color, RegisterClass, SymKind, SymRef};
use subc_emit::vm::TestHost;

const SET_S_SC: u32 = 10;
const PRINT_S: u32 = 20;
const END: u32 = 1;

fn s0() -> Rc<SymRef> {
    let sym = SymRef::new("S0", SymKind::String, RegisterClass::Str);
    sym.set_color(Color::Register(0));
    Rc::new(sym)
}

fn reg_operand(sym: Rc<SymRef>) -> Operand {
    Operand {
        symbol: sym,
        kind: OperandKind::Register,
        is_branch_target: false,
    }
}

#[test]
fn trivial_sub_emits_expected_code_and_constant() {
    let mut orch = Orchestrator::new(Box::new(TestHost::default()));
    orch.open(EmitConfig::default());

    let literal = Rc::new(SymRef::new(r#""hello""#, SymKind::String, RegisterClass::Constant));

    let set_s_sc = Instruction::Op(OpInstruction {
        opnum: SET_S_SC,
        opsize: 3,
        mnemonic: "set_s_sc".into(),
        operands: vec![
            reg_operand(s0()),
            Operand {
                symbol: literal.clone(),
                kind: OperandKind::Sc,
                is_branch_target: false,
            },
        ],
        variadic_tail: vec![],
        signature_operand_index: None,
        pic_cacheable: false,
        fixup_needed: false,
        line: 1,
    });
    let print_s = Instruction::Op(OpInstruction {
        opnum: PRINT_S,
        opsize: 2,
        mnemonic: "print_s".into(),
        operands: vec![reg_operand(s0())],
        variadic_tail: vec![],
        signature_operand_index: None,
        pic_cacheable: false,
        fixup_needed: false,
        line: 2,
    });
    let end = Instruction::Op(OpInstruction {
        opnum: END,
        opsize: 1,
        mnemonic: "end".into(),
        operands: vec![],
        variadic_tail: vec![],
        signature_operand_index: None,
        pic_cacheable: false,
        fixup_needed: false,
        line: 3,
    });

    let unit = Unit {
        name: "main".into(),
        instructions: vec![set_s_sc.clone(), print_s.clone(), end.clone()],
        ..Unit::default()
    };

    orch.new_sub(&unit).unwrap();
    orch.emit(&unit, &set_s_sc).unwrap();
    orch.emit(&unit, &print_s).unwrap();
    orch.emit(&unit, &end).unwrap();
    orch.end_sub(&unit).unwrap();

    let artifact = orch.close().unwrap();

    let k = artifact
        .consts
        .iter()
        .position(|c| matches!(c, ConstEntry::String { bytes, .. } if bytes == b"hello"))
        .expect("\"hello\" must be interned");

    assert_eq!(
        artifact.code,
        vec![SET_S_SC as i64, 0, k as i64, PRINT_S as i64, 0, END as i64]
    );

    assert!(artifact.fixups.iter().any(|f| f.name == "main"));
}
