//! Packfile segment layout (spec §6): written, not read.
//!
//! This is explicitly **not** the packfile container format — §1 places
//! that out of scope. It exists so the crate's own tests, and any caller
//! wanting a directly inspectable view of what [`crate::orchestrator::Orchestrator::close`]
//! produced, can do so without reaching into segment internals.

use std::io::{self, Write};

use crate::constant::Constant;
use crate::debug::DebugMap;
use crate::fixup::FixupKind;
use crate::symbol::StringEncoding;

/// One exported constant-pool entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstEntry {
    /// `Constant::Integer`.
    Integer(i64),
    /// `Constant::Number`.
    Number(f64),
    /// `Constant::String`, with an `is_unicode` marker in place of the
    /// internal [`StringEncoding`] enum (serde-friendly).
    String {
        /// Raw bytes.
        bytes: Vec<u8>,
        /// `true` if the encoding marker was `Unicode`.
        is_unicode: bool,
    },
    /// `Constant::Key`, as its packed wire words.
    Key(Vec<i64>),
    /// `Constant::PmcRef`.
    PmcRef(u64),
    /// `Constant::Signature`.
    Signature(Vec<u8>),
}

impl From<&Constant> for ConstEntry {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Integer(v) => ConstEntry::Integer(*v),
            Constant::Number(v) => ConstEntry::Number(*v),
            Constant::String(bytes, enc) => ConstEntry::String {
                bytes: bytes.clone(),
                is_unicode: matches!(enc, StringEncoding::Unicode),
            },
            Constant::Key(wire) => ConstEntry::Key(wire.clone()),
            Constant::PmcRef(handle) => ConstEntry::PmcRef(*handle),
            Constant::Signature(bits) => ConstEntry::Signature(bits.clone()),
        }
    }
}

/// One fixup-segment entry: one per sub constant, recording how a loader
/// should resolve a symbolic reference to it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixupRecord {
    /// The sub's name.
    pub name: String,
    /// Always `sub-constant-reference` today; kept named for wire-format
    /// fidelity with spec §3/§6.
    pub kind: &'static str,
    /// The sub's constant-pool index.
    pub index: usize,
}

impl FixupRecord {
    pub(crate) fn new(name: String, _kind: FixupKind, index: usize) -> Self {
        Self {
            name,
            kind: "sub-constant-reference",
            index,
        }
    }
}

/// The finished packfile segments for one closed [`crate::segment::Segment`].
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Artifact {
    /// Packed opcode vector.
    pub code: Vec<i64>,
    /// Constant-pool entries, in pool order.
    pub consts: Vec<ConstEntry>,
    /// One record per sub constant.
    pub fixups: Vec<FixupRecord>,
    /// `(filename, line entries)`, omitted when `optimizer_level != 0`.
    pub debug: Option<(String, Vec<(usize, u32)>)>,
    /// Half-size companion to `code`: nonzero cells mark PIC-cacheable
    /// two-opcode windows.
    pub pic_index: Vec<u32>,
}

impl Artifact {
    /// Build the exported view of a closed (fixups already resolved)
    /// segment.
    pub(crate) fn from_segment(segment: &crate::segment::Segment) -> Self {
        let consts = segment.pool().iter().map(ConstEntry::from).collect();
        let fixups = segment
            .subs()
            .iter()
            .map(|sub| FixupRecord::new(sub.name.clone(), FixupKind::SubConstantReference, sub.pmc_const))
            .collect();
        let debug = if segment.config.emits_debug_segment() {
            Self::from_debug_map(segment.debug_map())
        } else {
            None
        };
        Self {
            code: segment.code.clone(),
            consts,
            fixups,
            debug,
            pic_index: segment.pic_index.clone(),
        }
    }

    pub(crate) fn from_debug_map(map: &DebugMap) -> Option<(String, Vec<(usize, u32)>)> {
        map.filename()
            .map(|name| (name.to_string(), map.code_lines().collect()))
    }

    /// Read-only accessor pairing code offsets with their debug line
    /// numbers, regardless of whether the debug segment was included
    /// in export.
    pub fn code_lines(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.debug.iter().flat_map(|(_, lines)| lines.iter().copied())
    }

    /// Write the five packfile segments to `w` in a simple
    /// length-prefixed, host-endian form. Explicitly non-normative: no
    /// claim is made that this matches any real packfile container.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_i64_seq(w, &self.code)?;
        write_usize(w, self.consts.len())?;
        for entry in &self.consts {
            write_const_entry(w, entry)?;
        }
        write_usize(w, self.fixups.len())?;
        for fixup in &self.fixups {
            write_usize(w, fixup.name.len())?;
            w.write_all(fixup.name.as_bytes())?;
            write_usize(w, fixup.index)?;
        }
        match &self.debug {
            Some((name, lines)) => {
                w.write_all(&[1u8])?;
                write_usize(w, name.len())?;
                w.write_all(name.as_bytes())?;
                write_usize(w, lines.len())?;
                for (offset, line) in lines {
                    write_usize(w, *offset)?;
                    w.write_all(&line.to_ne_bytes())?;
                }
            }
            None => w.write_all(&[0u8])?,
        }
        write_u32_seq(w, &self.pic_index)?;
        Ok(())
    }
}

fn write_usize<W: Write>(w: &mut W, v: usize) -> io::Result<()> {
    w.write_all(&(v as u64).to_ne_bytes())
}

fn write_i64_seq<W: Write>(w: &mut W, values: &[i64]) -> io::Result<()> {
    write_usize(w, values.len())?;
    for v in values {
        w.write_all(&v.to_ne_bytes())?;
    }
    Ok(())
}

fn write_u32_seq<W: Write>(w: &mut W, values: &[u32]) -> io::Result<()> {
    write_usize(w, values.len())?;
    for v in values {
        w.write_all(&v.to_ne_bytes())?;
    }
    Ok(())
}

fn write_const_entry<W: Write>(w: &mut W, entry: &ConstEntry) -> io::Result<()> {
    match entry {
        ConstEntry::Integer(v) => {
            w.write_all(&[0u8])?;
            w.write_all(&v.to_ne_bytes())
        }
        ConstEntry::Number(v) => {
            w.write_all(&[1u8])?;
            w.write_all(&v.to_ne_bytes())
        }
        ConstEntry::String { bytes, is_unicode } => {
            w.write_all(&[2u8, *is_unicode as u8])?;
            write_usize(w, bytes.len())?;
            w.write_all(bytes)
        }
        ConstEntry::Key(wire) => {
            w.write_all(&[3u8])?;
            write_i64_seq(w, wire)
        }
        ConstEntry::PmcRef(handle) => {
            w.write_all(&[4u8])?;
            w.write_all(&handle.to_ne_bytes())
        }
        ConstEntry::Signature(bits) => {
            w.write_all(&[5u8])?;
            write_usize(w, bits.len())?;
            w.write_all(bits)
        }
    }
}
