//! Per-instruction encoding driver (spec §4.4–§4.6).
//!
//! Grounded in `src/interpreter/executors/instruction.rs` (the giant
//! per-opcode match dispatch) and `src/interpreter/executors/main.rs`
//! (the outer step loop that owns cursor/pc state): here the outer loop is
//! `Emitter::emit`, called once per front-end instruction rather than once
//! per VM step, and the "pc" is `Segment::active`.

use tracing::{debug, instrument, trace};

use crate::constant::{Constant, ConstantPool};
use crate::error::EmitError;
use crate::fixup::{FixupEntry, FixupKind};
use crate::instr::{CallArg, Instruction, OpInstruction, Operand, OperandKind, Unit};
use crate::key::{KeyChain, KeyEncoder, KeyPart, KeyPartValue};
use crate::segment::{ActiveUnit, Segment};
use crate::symbol::{Color, RegisterClass, StringEncoding, SymKind, SymRef, SIG_CONSTANT_BIT};
use crate::vm::VmHost;

/// Stateless driver for the `new_sub` / `emit` / `end_sub` trio. All actual
/// state lives in the [`Segment`] it is handed; this type exists only to
/// group the associated functions the way the interpreter's executor
/// free functions are grouped under `Interpreter`'s impl blocks.
#[derive(Debug, Default)]
pub struct Emitter;

impl Emitter {
    /// Registers a sub record for `unit` and runs its pre-scan (label
    /// offsets, fixup-entry collection) and constant-folding pass. No-op if
    /// `unit` has no instructions (spec §4.7).
    #[instrument(skip(segment, host, unit), fields(sub = %unit.name))]
    pub fn new_sub(segment: &mut Segment, host: &mut dyn VmHost, unit: &Unit) -> Result<Option<usize>, EmitError> {
        segment.check_alive()?;
        if unit.instructions.is_empty() {
            return Ok(None);
        }
        let result = new_sub_inner(segment, host, unit);
        if result.is_err() {
            segment.poison();
        }
        result.map(Some)
    }

    /// Encodes one instruction into the active sub's code range.
    #[instrument(skip(segment, host, _unit, instruction))]
    pub fn emit(
        segment: &mut Segment,
        host: &mut dyn VmHost,
        _unit: &Unit,
        instruction: &Instruction,
    ) -> Result<(), EmitError> {
        segment.check_alive()?;
        let result = emit_inner(segment, host, instruction);
        if result.is_err() {
            segment.poison();
        }
        result
    }

    /// Closes out the active sub, dispatching it to the VM immediately if
    /// it carries the `immediate` flag.
    #[instrument(skip(segment, host, unit), fields(sub = %unit.name))]
    pub fn end_sub(segment: &mut Segment, host: &mut dyn VmHost, unit: &Unit) -> Result<(), EmitError> {
        segment.check_alive()?;
        let result = end_sub_inner(segment, host, unit);
        if result.is_err() {
            segment.poison();
        }
        result
    }
}

fn new_sub_inner(segment: &mut Segment, host: &mut dyn VmHost, unit: &Unit) -> Result<usize, EmitError> {
    let code_size = unit.code_size();
    let start = segment.grow_code(code_size);
    let end = start + code_size;

    if !unit.file.is_empty() {
        segment.debug.set_filename(unit.file.clone());
    }

    // Pre-scan: assign label offsets before anything is emitted, so a
    // forward branch can resolve its displacement on first sight.
    let mut offset = start;
    for instr in &unit.instructions {
        match instr {
            Instruction::Label(sym) => segment.labels.define(sym, offset),
            Instruction::Op(op) => offset += op.opsize,
        }
    }

    // Constant-folding pass: walk every operand once, interning whatever
    // hasn't already been assigned a color.
    for instr in &unit.instructions {
        if let Instruction::Op(op) = instr {
            for operand in &op.operands {
                fold_symbol(&operand.symbol, &mut segment.pool, host)?;
                if segment.config.traces() {
                    trace!(name = %operand.symbol.name, "const");
                }
            }
        }
    }

    let sub_index = segment.subs.register(
        unit,
        start,
        end,
        &mut segment.pool,
        host,
        &segment.config,
        segment.current_runtime_sub.as_deref(),
    )?;

    while segment.fixups.len() <= sub_index {
        segment.fixups.push(Default::default());
    }

    // Second walk: now that the sub is registered, collect fixup entries
    // for every `set_p_pc` flagged fixup-needed. The target operand is the
    // second declared operand (index 1), landing at code offset+2.
    let namespace_const = unit.namespace.as_ref().and_then(|ns| ns.const_index());
    let mut offset = start;
    for instr in &unit.instructions {
        let Instruction::Op(op) = instr else { continue };
        if op.is_set_p_pc() && op.fixup_needed {
            if let Some(target) = op.operands.get(1) {
                segment.fixups[sub_index].push(FixupEntry {
                    name: target.symbol.name.clone(),
                    offset,
                    operand_slot: 2,
                    encoding: target.symbol.encoding.unwrap_or(StringEncoding::Ascii),
                    kind: FixupKind::SubConstantReference,
                    namespace_const,
                });
                if segment.config.traces() {
                    trace!(offset, name = %target.symbol.name, "fixup");
                }
            }
        }
        offset += op.opsize;
    }

    segment.active = Some(ActiveUnit {
        sub_index,
        start,
        cursor: start,
    });
    Ok(sub_index)
}

fn emit_inner(segment: &mut Segment, host: &mut dyn VmHost, instruction: &Instruction) -> Result<(), EmitError> {
    let mut active = segment.active.ok_or(EmitError::NoActiveSub)?;

    let op: &OpInstruction = match instruction {
        Instruction::Label(_) => return Ok(()),
        Instruction::Op(op) => op,
    };

    if op.opnum == 0 {
        return Err(if op.opsize == 0 {
            EmitError::NoOpnum
        } else {
            EmitError::SizedNonOp { opsize: op.opsize }
        });
    }

    let op_offset = active.cursor;
    segment.code[op_offset] = op.opnum as i64;
    let mut write_pos = op_offset + 1;

    for operand in &op.operands {
        let value = encode_operand(segment, host, operand, op_offset)?;
        segment.code[write_pos] = value;
        write_pos += 1;
    }

    if op.is_call_signature_op() {
        if let Some(sig_idx) = op.signature_operand_index {
            let sig_operand = &op.operands[sig_idx];
            if let Some(current_idx) = sig_operand.symbol.const_index() {
                if let Some(Constant::Signature(bits)) = segment.pool.get(current_idx) {
                    let bits = bits.clone();
                    if let Some(new_idx) = verify_signature(
                        &mut segment.pool,
                        &bits,
                        &op.variadic_tail,
                        op.rejects_constant_args(),
                    )? {
                        segment.code[op_offset + 1 + sig_idx] = new_idx as i64;
                    }
                }
            }
        }
    }

    for arg in &op.variadic_tail {
        segment.code[write_pos] = arg.color;
        write_pos += 1;
    }

    if op.pic_cacheable {
        let id = segment.fresh_pic_id();
        segment.pic_index[op_offset / 2] = id;
    }

    if segment.config.traces() {
        debug!(offset = op_offset, opnum = op.opnum, "emit");
    }
    segment.debug.push_line(op_offset, op.line);

    active.cursor = write_pos;
    segment.active = Some(active);
    Ok(())
}

fn end_sub_inner(segment: &mut Segment, host: &mut dyn VmHost, unit: &Unit) -> Result<(), EmitError> {
    let Some(active) = segment.active.take() else {
        return Ok(());
    };
    if unit.immediate {
        if let Some(record) = segment.subs.iter().nth(active.sub_index) {
            host.execute_immediate(record.pmc_handle).map_err(EmitError::Host)?;
        }
    }
    Ok(())
}

fn encode_operand(
    segment: &mut Segment,
    host: &mut dyn VmHost,
    operand: &Operand,
    branch_offset: usize,
) -> Result<i64, EmitError> {
    if operand.is_branch_target {
        return segment.labels.displacement(&operand.symbol, branch_offset);
    }
    match operand.kind {
        OperandKind::Register => Ok(operand.symbol.wire_register_payload().unwrap_or(0)),
        OperandKind::Ic | OperandKind::Sc | OperandKind::Nc | OperandKind::Pc | OperandKind::Kic => {
            if operand.symbol.const_index().is_none() {
                fold_symbol(&operand.symbol, &mut segment.pool, host)?;
            }
            Ok(operand.symbol.const_index().unwrap_or(0) as i64)
        }
        OperandKind::Kc => {
            if let Some(idx) = operand.symbol.const_index() {
                return Ok(idx as i64);
            }
            let chain = build_key_chain(&operand.symbol, &segment.pool)?;
            let encoded = KeyEncoder::encode(&chain)?;
            let idx = segment.pool.intern_key(&encoded.canonical, encoded.wire);
            operand.symbol.set_color(Color::ConstIndex(idx));
            Ok(idx as i64)
        }
    }
}

/// Interns a constant-kind symbol's value if it hasn't been colored yet,
/// recursing into key-chain parts and lexical aliases (spec §4.4 "constant
/// folding pass").
pub(crate) fn fold_symbol(sym: &SymRef, pool: &mut ConstantPool, host: &mut dyn VmHost) -> Result<(), EmitError> {
    match sym.kind {
        SymKind::Integer => {
            if sym.color().is_none() {
                let idx = pool.intern_integer(&sym.name)?;
                sym.set_color(Color::ConstIndex(idx));
            }
        }
        SymKind::Number => {
            if sym.color().is_none() {
                let value = host.parse_number(&sym.name).map_err(EmitError::Host)?;
                let idx = pool.intern_number(value);
                sym.set_color(Color::ConstIndex(idx));
            }
        }
        SymKind::String => {
            if sym.color().is_none() {
                let (bytes, encoding) = decode_string_literal(sym, host)?;
                let idx = pool.intern_string(bytes, encoding);
                sym.set_color(Color::ConstIndex(idx));
            }
        }
        SymKind::Key => {
            for part in &sym.key_chain {
                fold_symbol(part, pool, host)?;
            }
            if sym.color().is_none() {
                let chain = build_key_chain(sym, pool)?;
                let encoded = KeyEncoder::encode(&chain)?;
                let idx = pool.intern_key(&encoded.canonical, encoded.wire);
                sym.set_color(Color::ConstIndex(idx));
            }
        }
        SymKind::Pmc | SymKind::Label | SymKind::SubLabel | SymKind::Namespace => {}
    }
    for alias in &sym.alias_chain {
        fold_symbol(alias, pool, host)?;
    }
    Ok(())
}

/// Decodes a string symbol's source text into its byte payload and
/// encoding marker (spec §4.1 `intern_string`): double-quoted literals are
/// unescaped through the host, single-quoted literals are raw, bare
/// identifiers are taken verbatim, and an `encoded` symbol splits its
/// charset prefix first.
pub(crate) fn decode_string_literal(
    sym: &SymRef,
    host: &mut dyn VmHost,
) -> Result<(Vec<u8>, StringEncoding), EmitError> {
    let text = sym.name.as_str();
    if sym.flags.encoded {
        if let Some((prefix, quoted)) = crate::vm::split_encoded_literal(text) {
            let encoding = crate::vm::encoding_for_charset(prefix);
            let body = quoted.trim_matches('"');
            let bytes = host.unescape(body).map_err(EmitError::Host)?;
            return Ok((bytes, encoding));
        }
    }
    let encoding = sym.encoding.unwrap_or(StringEncoding::Ascii);
    if let Some(body) = text.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        let bytes = host.unescape(body).map_err(EmitError::Host)?;
        return Ok((bytes, encoding));
    }
    if let Some(body) = text.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Ok((body.as_bytes().to_vec(), encoding));
    }
    Ok((text.as_bytes().to_vec(), encoding))
}

/// Builds the [`KeyChain`] for a `Key`-kind symbol from its already-folded
/// `key_chain` parts.
pub(crate) fn build_key_chain(sym: &SymRef, pool: &ConstantPool) -> Result<KeyChain, EmitError> {
    let mut parts = Vec::with_capacity(sym.key_chain.len());
    for part in &sym.key_chain {
        let value = if part.flags.constant_pointer {
            match part.register_class {
                RegisterClass::Str => KeyPartValue::StringConst(part.const_index().unwrap_or(0)),
                RegisterClass::Int => {
                    let idx = part.const_index().unwrap_or(0);
                    let value = match pool.get(idx) {
                        Some(Constant::Integer(v)) => *v,
                        _ => 0,
                    };
                    KeyPartValue::IntConst(value)
                }
                _ => return Err(EmitError::KeySetUnknown),
            }
        } else {
            match part.register_class {
                RegisterClass::Int => KeyPartValue::IntRegister(part.register_number().unwrap_or(0)),
                RegisterClass::Str => KeyPartValue::StringRegister(part.register_number().unwrap_or(0)),
                _ => return Err(EmitError::KeySetUnknown),
            }
        };
        parts.push(KeyPart { value, slice: part.slice });
    }
    Ok(KeyChain(parts))
}

/// Cross-checks a call signature against its resolved actual arguments
/// (spec §4.5), returning the new constant-pool index if the signature had
/// to be cloned and patched.
pub(crate) fn verify_signature(
    pool: &mut ConstantPool,
    bits: &[u8],
    tail: &[CallArg],
    rejects_constants: bool,
) -> Result<Option<usize>, EmitError> {
    if rejects_constants {
        if let Some((slot, _)) = tail.iter().enumerate().find(|(_, a)| a.is_constant) {
            return Err(EmitError::ConstantInGetParam { slot });
        }
    }

    let mut patched = bits.to_vec();
    let mut changed = false;
    for (i, arg) in tail.iter().enumerate() {
        let Some(byte) = patched.get_mut(i) else { continue };
        let required = arg.register_class.type_bit();
        let existing_type = *byte & 0b0_1111;
        if existing_type != required {
            *byte = required | (*byte & SIG_CONSTANT_BIT);
            changed = true;
        }
        if arg.is_constant && (*byte & SIG_CONSTANT_BIT) == 0 {
            *byte |= SIG_CONSTANT_BIT;
            changed = true;
        }
    }

    if changed {
        Ok(Some(pool.intern_signature(patched)))
    } else {
        Ok(None)
    }
}
