//! Per-sub pending symbolic references, resolved at segment close.

use crate::constant::ConstantPool;
use crate::error::EmitError;
use crate::sub::SubTable;
use crate::symbol::StringEncoding;
use crate::vm::VmHost;

/// Always `SubConstantReference` in the current design (spec §3: "Kind is
/// always 'sub-constant-reference' in the current design"); kept as a field
/// rather than collapsed away because the fixup wire format (§6, artifact
/// layout) names it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// A `set_p_pc` reference to another sub's constant-pool slot.
    SubConstantReference,
}

/// A pending patch into the code vector.
#[derive(Debug, Clone)]
pub struct FixupEntry {
    /// The referenced sub's name.
    pub name: String,
    /// Code-vector offset of the `set_p_pc` opcode.
    pub offset: usize,
    /// Operand slot to patch.
    pub operand_slot: usize,
    /// Encoding to use if the name must be interned as a string constant
    /// (unresolved-name fallback).
    pub encoding: StringEncoding,
    /// Always [`FixupKind::SubConstantReference`] today.
    pub kind: FixupKind,
    /// Namespace constant index in scope at the fixup site, used to match
    /// the same-namespace rule in spec §4.6 step 1.
    pub namespace_const: Option<usize>,
}

/// Per-sub table of pending fixups.
#[derive(Debug, Default)]
pub struct FixupTable {
    entries: Vec<FixupEntry>,
}

impl FixupTable {
    /// Record a new pending fixup.
    pub fn push(&mut self, entry: FixupEntry) {
        self.entries.push(entry);
    }

    /// Pending entries, in recording order.
    pub fn entries(&self) -> &[FixupEntry] {
        &self.entries
    }

    /// `true` if no fixups are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve every fixup table recorded for a segment (spec §4.6), patching
/// `code` in place. `fixups` holds one [`FixupTable`] per sub, aligned by
/// index with `subs`.
pub fn resolve_all(
    code: &mut [i64],
    subs: &mut SubTable,
    fixups: &[FixupTable],
    pool: &mut ConstantPool,
    host: &mut dyn VmHost,
) -> Result<(), EmitError> {
    // Snapshot sub-constant slots up front: resolution only reads sub
    // metadata and never mutates it, so borrowing `subs` immutably for the
    // lookup and only touching `code`/`pool` is safe without aliasing.
    for table in fixups {
        for entry in table.entries() {
            resolve_one(code, subs, entry, pool, host)?;
        }
    }
    Ok(())
}

fn resolve_one(
    code: &mut [i64],
    subs: &SubTable,
    entry: &FixupEntry,
    pool: &mut ConstantPool,
    host: &mut dyn VmHost,
) -> Result<(), EmitError> {
    // Step 1: search by name within the same namespace scope. Step 2: a
    // multi sub with a nonzero multi-count is treated as "not found" even
    // if the name matches.
    let found = subs
        .find_by_name(&entry.name, entry.namespace_const)
        .filter(|s| s.multi_count() == 0);

    match found {
        None => {
            // Step 3: rewrite to find_name_p_sc, interning the name.
            code[entry.offset] = host.opnum_for_find_name_p_sc() as i64;
            let name_const = pool.intern_string(entry.name.as_bytes().to_vec(), entry.encoding);
            code[entry.offset + 2] = name_const as i64;
        }
        Some(target) => {
            // Step 4: patch the direct sub-constant index. `pmc_const` is a
            // non-optional field always set by `SubTable::register`, so
            // there is no "matched but no slot" state to report here; the
            // spec's corresponding error case is unreachable at the type
            // level.
            code[entry.offset + entry.operand_slot] = target.pmc_const as i64;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::Unit;
    use crate::vm::TestHost;

    fn register_sub(subs: &mut SubTable, pool: &mut ConstantPool, host: &mut TestHost, name: &str, multi: bool) -> usize {
        let unit = Unit {
            name: name.to_string(),
            is_multi: multi,
            ..Unit::default()
        };
        subs.register(&unit, 0, 0, pool, host, &Default::default(), None).unwrap()
    }

    #[test]
    fn resolves_direct_when_target_found() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::default();
        let mut subs = SubTable::default();
        register_sub(&mut subs, &mut pool, &mut host, "a", false);
        let a_pmc = subs.iter().next().unwrap().pmc_const;

        let mut code = vec![0i64; 4];
        let table = {
            let mut t = FixupTable::default();
            t.push(FixupEntry {
                name: "a".to_string(),
                offset: 0,
                operand_slot: 2,
                encoding: StringEncoding::Ascii,
                kind: FixupKind::SubConstantReference,
                namespace_const: None,
            });
            t
        };
        resolve_all(&mut code, &mut subs, &[table], &mut pool, &mut host).unwrap();
        assert_eq!(code[2], a_pmc as i64);
    }

    #[test]
    fn degrades_to_find_name_when_target_is_multi() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::default();
        let mut subs = SubTable::default();
        register_sub(&mut subs, &mut pool, &mut host, "a", true);

        let mut code = vec![0i64; 4];
        let table = {
            let mut t = FixupTable::default();
            t.push(FixupEntry {
                name: "a".to_string(),
                offset: 0,
                operand_slot: 2,
                encoding: StringEncoding::Ascii,
                kind: FixupKind::SubConstantReference,
                namespace_const: None,
            });
            t
        };
        resolve_all(&mut code, &mut subs, &[table], &mut pool, &mut host).unwrap();
        assert_eq!(code[0], host.opnum_for_find_name_p_sc() as i64);
        assert!(matches!(pool.get(code[2] as usize), Some(crate::constant::Constant::String(_, _))));
    }
}
