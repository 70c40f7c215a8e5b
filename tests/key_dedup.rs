//! Composite-key interning is per-segment and content-addressed: emitting
//! the same key shape twice must land on one pool entry.

use std::rc::Rc;

use subc_emit::config::EmitConfig;
use subc_emit::instr::{Instruction, OpInstruction, Operand, OperandKind, Unit};
use subc_emit::orchestrator::Orchestrator;
use subc_emit::symbol::{Color, RegisterClass, SymKind, SymRef};
use subc_emit::vm::TestHost;

fn key_operand() -> Operand {
    let mut x = SymRef::new(r#""x""#, SymKind::String, RegisterClass::Str);
    x.flags.constant_pointer = true;

    let mut three = SymRef::new("3", SymKind::Integer, RegisterClass::Int);
    three.flags.constant_pointer = true;

    let mut key = SymRef::new("key", SymKind::Key, RegisterClass::Constant);
    key.key_chain = vec![Rc::new(x), Rc::new(three)];

    Operand {
        symbol: Rc::new(key),
        kind: OperandKind::Kc,
        is_branch_target: false,
    }
}

fn get_p_key(index: Operand) -> Instruction {
    let dest = Rc::new(SymRef::new("P0", SymKind::Pmc, RegisterClass::Pmc));
    dest.set_color(Color::Register(0));
    Instruction::Op(OpInstruction {
        opnum: 40,
        opsize: 3,
        mnemonic: "get_p_kc".into(),
        operands: vec![
            Operand {
                symbol: dest,
                kind: OperandKind::Register,
                is_branch_target: false,
            },
            index,
        ],
        variadic_tail: Vec::new(),
        signature_operand_index: None,
        pic_cacheable: false,
        fixup_needed: false,
        line: 1,
    })
}

#[test]
fn emitting_the_same_key_twice_interns_one_constant() {
    let mut orch = Orchestrator::new(Box::new(TestHost::default()));
    orch.open(EmitConfig::default());

    let first = get_p_key(key_operand());
    let second = get_p_key(key_operand());
    let unit = Unit {
        name: "main".into(),
        instructions: vec![first.clone(), second.clone()],
        ..Unit::default()
    };

    orch.new_sub(&unit).unwrap();
    orch.emit(&unit, &first).unwrap();
    orch.emit(&unit, &second).unwrap();
    orch.end_sub(&unit).unwrap();

    let artifact = orch.close().unwrap();
    let key_entries = artifact
        .consts
        .iter()
        .filter(|c| matches!(c, subc_emit::artifact::ConstEntry::Key(_)))
        .count();
    assert_eq!(key_entries, 1, "both emissions must dedup to one key constant");

    // code layout per instruction: [opnum, dest_reg, key_const_index]
    assert_eq!(artifact.code[2], artifact.code[5]);
}
