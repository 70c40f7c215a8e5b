//! Per-segment sub records: one entry per compiled unit.

use bitflags::bitflags;

use crate::config::EmitConfig;
use crate::constant::ConstantPool;
use crate::error::EmitError;
use crate::instr::Unit;
use crate::vm::VmHost;

bitflags! {
    /// Sub metadata flags (spec §3 "Sub record").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubFlags: u32 {
        /// A method on some class.
        const METHOD   = 1 << 0;
        /// Runs once, at load, as class/module init.
        const INIT     = 1 << 1;
        /// Runs at load time.
        const LOAD     = 1 << 2;
        /// The segment's entry point.
        const MAIN     = 1 << 3;
        /// Anonymous (unnamed) sub.
        const ANON     = 1 << 4;
        /// Generated post-compilation.
        const POSTCOMP = 1 << 5;
        /// Should run immediately once compiled.
        const IMMEDIATE = 1 << 6;
        /// Overrides a vtable method.
        const VTABLE   = 1 << 7;
        /// Declares or needs lexical variables.
        const LEX      = 1 << 8;
        /// Declared multi-dispatch.
        const MULTI    = 1 << 9;
        /// Is the outer sub of at least one closure already emitted.
        const IS_OUTER = 1 << 10;
    }
}

/// Derived classification of a sub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKind {
    /// A plain sub.
    Sub,
    /// Has a resolved outer-sub link.
    Closure,
    /// PCC flags include a yield.
    Coroutine,
}

impl SubKind {
    fn classify(unit: &Unit) -> Self {
        if unit.has_yield {
            SubKind::Coroutine
        } else if unit.outer_name.is_some() {
            SubKind::Closure
        } else {
            SubKind::Sub
        }
    }
}

/// Per-sub lexical-name → register-number table.
#[derive(Debug, Clone, Default)]
pub struct LexInfo {
    /// `(name constant index, register number)` pairs, in declaration
    /// order.
    pub entries: Vec<(usize, i64)>,
}

/// One element of a multi-dispatch signature.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiSigElem {
    /// A string PMC wrapping a type name.
    TypeName(usize),
    /// A key constant, cloned from the pool.
    Key(Vec<i64>),
}

/// A compiled unit's metadata, as stored in the segment's [`SubTable`].
#[derive(Debug, Clone)]
pub struct SubRecord {
    /// The sub's own name (namespace prefix already stripped).
    pub name: String,
    /// Constant-pool index of the name string.
    pub name_const: usize,
    /// Constant-pool slot reserved for this sub's PMC.
    pub pmc_const: usize,
    /// Opaque handle returned by the host when the sub PMC was created.
    pub pmc_handle: u64,
    /// `[start, end)` code range within the segment.
    pub start: usize,
    /// `[start, end)` code range within the segment.
    pub end: usize,
    /// Register-usage counts `[int, num, string, pmc]`.
    pub register_usage: [u32; 4],
    /// Metadata flags.
    pub flags: SubFlags,
    /// Derived classification.
    pub kind: SubKind,
    /// Constant-pool index of the namespace value, if any.
    pub namespace_const: Option<usize>,
    /// Name of the lexically enclosing sub, if resolved.
    pub outer_name: Option<String>,
    /// Lexical-variable table, if the unit declares or needs lexicals.
    pub lex_info: Option<LexInfo>,
    /// Multi-dispatch signature, if declared multi.
    pub multi_signature: Option<Vec<MultiSigElem>>,
    /// Resolved vtable method index, if this overrides one.
    pub vtable_index: Option<u32>,
    /// HLL type identifier active when this unit was compiled.
    pub hll_id: u32,
}

impl SubRecord {
    /// Number of multi-dispatch signature entries (0 if not multi).
    pub fn multi_count(&self) -> usize {
        self.multi_signature.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Per-segment list of sub records, in insertion order.
#[derive(Debug, Default)]
pub struct SubTable {
    subs: Vec<SubRecord>,
}

impl SubTable {
    /// All subs, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SubRecord> {
        self.subs.iter()
    }

    /// Mutable access to all subs, in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubRecord> {
        self.subs.iter_mut()
    }

    /// Number of subs registered so far.
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    /// `true` if no subs have been registered yet.
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Find a sub by name within the same namespace scope (both `None`, or
    /// both carrying the same namespace constant), per spec §4.6 step 1.
    pub fn find_by_name(&self, name: &str, namespace_const: Option<usize>) -> Option<&SubRecord> {
        self.subs
            .iter()
            .find(|s| s.name == name && s.namespace_const == namespace_const)
    }

    /// Find the most recently registered sub by bare name only, ignoring
    /// namespace — used for `:outer` resolution (spec §9 Open Question:
    /// the source only checks name equality there, not namespace).
    pub fn find_by_bare_name(&self, name: &str) -> Option<usize> {
        self.subs.iter().position(|s| s.name == name)
    }

    pub(crate) fn mark_outer(&mut self, index: usize) {
        if let Some(s) = self.subs.get_mut(index) {
            s.flags.insert(SubFlags::IS_OUTER);
        }
    }

    /// Register a new sub record for `unit`, performing steps 1–11 of spec
    /// §4.3. `start`/`end` are the code range already computed by the
    /// caller (the pre-scan phase); `current_sub_name` is the name of the
    /// runtime sub currently executing, consulted only as the final
    /// fallback for `:outer` resolution.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        unit: &Unit,
        start: usize,
        end: usize,
        pool: &mut ConstantPool,
        host: &mut dyn VmHost,
        config: &EmitConfig,
        current_sub_name: Option<&str>,
    ) -> Result<usize, EmitError> {
        // Step 1: namespace + name-prefix stripping.
        let namespace_const = match &unit.namespace {
            Some(ns) => ns.const_index(),
            None => None,
        };
        let mut name = unit.name.clone();
        if let Some(stripped) = name.strip_prefix("namespace@") {
            name = stripped.to_string();
        }

        // Step 2: reserve a constant-pool slot for the sub PMC.
        let pmc_const = pool.reserve_sub_slot();

        // Step 3: classify, with HLL remap delegated to the host.
        let kind = SubKind::classify(unit);
        let hll_id = host.hll_remap(unit.hll_id);

        // Step 4: intern the name.
        let name_const = pool.intern_string(name.as_bytes().to_vec(), crate::symbol::StringEncoding::Ascii);

        // Step 6: start/end, honoring `pasm_file` (second-and-later subs
        // collapse to zero length).
        let (start, end) = if config.pasm_file && !self.subs.is_empty() {
            (start, start)
        } else {
            (start, end)
        };

        let mut flags = SubFlags::empty();
        if unit.is_multi {
            flags.insert(SubFlags::MULTI);
        }
        if unit.is_vtable {
            flags.insert(SubFlags::VTABLE);
        }
        if unit.immediate {
            flags.insert(SubFlags::IMMEDIATE);
        }
        if unit.needs_lex || unit.outer_name.is_some() {
            flags.insert(SubFlags::LEX);
        }

        // Step 7: lexical info. Walk the unit's instructions for pmc
        // registers flagged lexical; for each, walk its alias chain (or
        // just its own name, if it has none) and declare it on the host.
        let mut lex_info = if unit.needs_lex || unit.outer_name.is_some() {
            Some(LexInfo::default())
        } else {
            None
        };
        for instr in &unit.instructions {
            let crate::instr::Instruction::Op(op) = instr else {
                continue;
            };
            for operand in &op.operands {
                let sym = &operand.symbol;
                if !sym.flags.lexical || sym.register_class != crate::symbol::RegisterClass::Pmc {
                    continue;
                }
                let register = sym.register_number().unwrap_or(0);
                let names: Vec<&str> = if sym.alias_chain.is_empty() {
                    vec![sym.name.as_str()]
                } else {
                    sym.alias_chain.iter().map(|a| a.name.as_str()).collect()
                };
                for alias_name in names {
                    let name_const =
                        pool.intern_string(alias_name.as_bytes().to_vec(), crate::symbol::StringEncoding::Ascii);
                    host.declare_lex_preg(name_const, register)?;
                    lex_info.get_or_insert_with(LexInfo::default).entries.push((name_const, register));
                }
            }
        }

        // Step 8: outer-sub resolution.
        let outer_name = match &unit.outer_name {
            Some(outer) => {
                if let Some(idx) = self.find_by_bare_name(outer) {
                    self.mark_outer(idx);
                    Some(outer.clone())
                } else if current_sub_name == Some(outer.as_str()) {
                    // TODO(open question, spec §9): the source only checks
                    // name equality here, not namespace scope. Preserved
                    // as-is rather than tightened silently.
                    Some(outer.clone())
                } else {
                    return Err(EmitError::UndefinedOuter { name: outer.clone() });
                }
            }
            None => None,
        };

        // Step 9: multi signature.
        let multi_signature = if unit.is_multi {
            if unit.multi_types.is_empty() {
                let void_const =
                    pool.intern_string(b"__VOID".to_vec(), crate::symbol::StringEncoding::Ascii);
                Some(vec![MultiSigElem::TypeName(void_const)])
            } else {
                Some(
                    unit.multi_types
                        .iter()
                        .map(|t| {
                            let idx =
                                pool.intern_string(t.as_bytes().to_vec(), crate::symbol::StringEncoding::Ascii);
                            MultiSigElem::TypeName(idx)
                        })
                        .collect(),
                )
            }
        } else {
            None
        };

        // Step 10: vtable binding.
        let vtable_index = if unit.is_vtable {
            let raw = unit.vtable_method_name.as_deref().unwrap_or("");
            let method = raw.trim_matches('"');
            Some(
                host.vtable_index(method)
                    .ok_or_else(|| EmitError::NotAVtableMethod { name: method.to_string() })?,
            )
        } else {
            None
        };

        // Step 11: create the sub PMC, fill its reserved slot, publish it.
        let kind_name = match kind {
            SubKind::Sub => "Sub",
            SubKind::Closure => "Closure",
            SubKind::Coroutine => "Coroutine",
        };
        let pmc_handle = host
            .create_pmc(kind_name)
            .map_err(EmitError::Host)?;
        pool.fill_pmc(pmc_const, pmc_handle);
        host.namespace_store(&name, pmc_handle);
        // Step 12 (a fixup-table entry `name -> constant-index` so other
        // subs can reference this one symbolically) is satisfied by
        // `SubTable::find_by_name`/`find_by_bare_name` directly: keeping a
        // second name->index map here would just duplicate that lookup.

        let record = SubRecord {
            name,
            name_const,
            pmc_const,
            pmc_handle,
            start,
            end,
            register_usage: unit.register_usage,
            flags,
            kind,
            namespace_const,
            outer_name,
            lex_info,
            multi_signature,
            vtable_index,
            hll_id,
        };
        self.subs.push(record);
        Ok(self.subs.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::TestHost;

    #[test]
    fn classifies_plain_outer_and_coroutine_subs() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::default();
        let mut subs = SubTable::default();

        let plain = Unit {
            name: "foo".into(),
            ..Unit::default()
        };
        let idx = subs.register(&plain, 0, 4, &mut pool, &mut host, &EmitConfig::default(), None).unwrap();
        assert_eq!(subs.iter().nth(idx).unwrap().kind, SubKind::Sub);

        let coroutine = Unit {
            name: "gen".into(),
            has_yield: true,
            ..Unit::default()
        };
        let idx = subs
            .register(&coroutine, 4, 8, &mut pool, &mut host, &EmitConfig::default(), None)
            .unwrap();
        assert_eq!(subs.iter().nth(idx).unwrap().kind, SubKind::Coroutine);

        let closure = Unit {
            name: "inner".into(),
            outer_name: Some("foo".into()),
            ..Unit::default()
        };
        let idx = subs
            .register(&closure, 8, 10, &mut pool, &mut host, &EmitConfig::default(), None)
            .unwrap();
        assert_eq!(subs.iter().nth(idx).unwrap().kind, SubKind::Closure);
        assert!(subs.iter().next().unwrap().flags.contains(SubFlags::IS_OUTER));
    }

    #[test]
    fn undefined_outer_fails_without_a_runtime_fallback() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::default();
        let mut subs = SubTable::default();
        let unit = Unit {
            name: "inner".into(),
            outer_name: Some("missing".into()),
            ..Unit::default()
        };
        let err = subs
            .register(&unit, 0, 0, &mut pool, &mut host, &EmitConfig::default(), None)
            .unwrap_err();
        assert!(matches!(err, EmitError::UndefinedOuter { .. }));
    }

    #[test]
    fn outer_resolves_to_current_runtime_sub_as_fallback() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::default();
        let mut subs = SubTable::default();
        let unit = Unit {
            name: "inner".into(),
            outer_name: Some("running_now".into()),
            ..Unit::default()
        };
        subs.register(&unit, 0, 0, &mut pool, &mut host, &EmitConfig::default(), Some("running_now"))
            .unwrap();
    }

    #[test]
    fn multi_with_no_types_emits_void_sentinel() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::default();
        let mut subs = SubTable::default();
        let unit = Unit {
            name: "dispatch".into(),
            is_multi: true,
            ..Unit::default()
        };
        let idx = subs.register(&unit, 0, 0, &mut pool, &mut host, &EmitConfig::default(), None).unwrap();
        let record = subs.iter().nth(idx).unwrap();
        let sig = record.multi_signature.as_ref().unwrap();
        assert_eq!(sig.len(), 1);
        match &sig[0] {
            MultiSigElem::TypeName(idx) => {
                assert_eq!(pool.get(*idx), Some(&crate::constant::Constant::String(b"__VOID".to_vec(), crate::symbol::StringEncoding::Ascii)));
            }
            _ => panic!("expected a type-name sentinel"),
        }
    }

    #[test]
    fn unknown_vtable_method_is_rejected() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::with_vtable_methods([("get_string", 3)]);
        let mut subs = SubTable::default();
        let unit = Unit {
            name: "nonesuch".into(),
            is_vtable: true,
            vtable_method_name: Some("\"nonesuch\"".into()),
            ..Unit::default()
        };
        let err = subs
            .register(&unit, 0, 0, &mut pool, &mut host, &EmitConfig::default(), None)
            .unwrap_err();
        assert!(matches!(err, EmitError::NotAVtableMethod { .. }));
    }

    #[test]
    fn known_vtable_method_resolves_its_index() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::with_vtable_methods([("get_string", 3)]);
        let mut subs = SubTable::default();
        let unit = Unit {
            name: "get_string".into(),
            is_vtable: true,
            vtable_method_name: Some("\"get_string\"".into()),
            ..Unit::default()
        };
        let idx = subs.register(&unit, 0, 0, &mut pool, &mut host, &EmitConfig::default(), None).unwrap();
        assert_eq!(subs.iter().nth(idx).unwrap().vtable_index, Some(3));
    }

    #[test]
    fn pasm_file_collapses_subsequent_subs_to_zero_length() {
        let mut pool = ConstantPool::default();
        let mut host = TestHost::default();
        let mut subs = SubTable::default();
        let config = EmitConfig {
            pasm_file: true,
            ..EmitConfig::default()
        };
        let first = Unit {
            name: "a".into(),
            ..Unit::default()
        };
        let second = Unit {
            name: "b".into(),
            ..Unit::default()
        };
        subs.register(&first, 0, 10, &mut pool, &mut host, &config, None).unwrap();
        subs.register(&second, 10, 20, &mut pool, &mut host, &config, None).unwrap();
        let recs: Vec<_> = subs.iter().collect();
        assert_eq!((recs[0].start, recs[0].end), (0, 10));
        assert_eq!((recs[1].start, recs[1].end), (10, 10));
    }
}
