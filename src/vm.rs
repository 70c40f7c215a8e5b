//! The host VM's contract as consumed by the emitter (spec §6).
//!
//! Grounded in `InterpreterStorage`/`MemoryStorage`: a trait the core is
//! generic over, with an in-memory implementation used by tests so they
//! don't need a real VM.

#[cfg(any(test, feature = "test-helpers"))]
use std::collections::HashMap;

use thiserror::Error;

use crate::error::EmitError;
use crate::symbol::StringEncoding;

/// Failures reported by the host VM.
#[derive(Debug, Error)]
pub enum VmError {
    /// The host could not construct a string with the requested encoding.
    #[error("host failed to construct string: {0}")]
    StringConstruction(String),
    /// The host could not create a PMC of the requested kind.
    #[error("host failed to create pmc `{kind}`")]
    PmcCreation {
        /// The PMC kind/class name requested.
        kind: String,
    },
}

/// Operations the emitter needs from the host VM. Implemented once by the
/// real VM embedding this crate, and by [`TestHost`] for tests.
pub trait VmHost {
    /// Construct a PMC of the given class, returning an opaque handle.
    fn create_pmc(&mut self, kind: &str) -> Result<u64, VmError>;

    /// Unescape a C-style double-quoted string literal body (without the
    /// surrounding quotes) into its byte representation.
    fn unescape(&self, body: &str) -> Result<Vec<u8>, VmError>;

    /// Convert a numeric literal's source text through the host's
    /// string→number path, preserving exact runtime-conversion semantics.
    fn parse_number(&self, text: &str) -> Result<f64, VmError>;

    /// Look up the vtable method index for `name`, or `None` if unknown.
    fn vtable_index(&self, name: &str) -> Option<u32>;

    /// Remap an HLL-local type identifier to the VM's canonical id.
    fn hll_remap(&self, hll_id: u32) -> u32;

    /// Store `sub_handle` under `name` in the current namespace.
    fn namespace_store(&mut self, name: &str, sub_handle: u64);

    /// Look up a previously stored sub handle by name.
    fn namespace_lookup(&self, name: &str) -> Option<u64>;

    /// Declare a lexical register on the unit's LexInfo PMC. Fails with
    /// [`EmitError::MethodMissing`] if the host's LexInfo class doesn't
    /// support the declaration method.
    fn declare_lex_preg(&mut self, name_const: usize, register: i64) -> Result<(), EmitError>;

    /// Register the process-exit teardown handler. Called at most once,
    /// the first time a segment is opened.
    fn register_exit_handler(&mut self) {}

    /// Request the VM to fix up and execute `sub_handle` immediately
    /// (`end_sub` under the `immediate` flag).
    fn execute_immediate(&mut self, sub_handle: u64) -> Result<(), VmError>;

    /// The opcode id for `find_name_p_sc`, used to rewrite an unresolved
    /// `set_p_pc` call site at global fixup time (spec §4.6 step 3).
    fn opnum_for_find_name_p_sc(&self) -> u32;
}

/// Deterministic, in-memory [`VmHost`] for tests.
///
/// Gated behind `cfg(test)` or the `test-helpers` feature:
/// the crate's own unit tests compile it for free via `cfg(test)`, while
/// `tests/*.rs` integration tests (a separate crate that links against the
/// public API) need the `test-helpers` feature enabled, which the
/// `[dev-dependencies]` self-reference in `Cargo.toml` provides.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Default)]
pub struct TestHost {
    next_pmc: u64,
    vtable_methods: HashMap<String, u32>,
    namespace: HashMap<String, u64>,
    lex_method_present: bool,
    exit_handler_registered: bool,
    executed_immediately: Vec<u64>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl TestHost {
    /// Build a host with a fixed vtable method table (name → index).
    pub fn with_vtable_methods(methods: impl IntoIterator<Item = (&'static str, u32)>) -> Self {
        Self {
            lex_method_present: true,
            vtable_methods: methods.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ..Self::default()
        }
    }

    /// Subs that were requested to run immediately, in request order.
    pub fn executed_immediately(&self) -> &[u64] {
        &self.executed_immediately
    }

    /// `true` once [`VmHost::register_exit_handler`] has been called.
    pub fn exit_handler_registered(&self) -> bool {
        self.exit_handler_registered
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl VmHost for TestHost {
    fn create_pmc(&mut self, _kind: &str) -> Result<u64, VmError> {
        self.next_pmc += 1;
        Ok(self.next_pmc)
    }

    fn unescape(&self, body: &str) -> Result<Vec<u8>, VmError> {
        let mut out = Vec::with_capacity(body.len());
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c as u8);
                continue;
            }
            match chars.next() {
                Some('n') => out.push(b'\n'),
                Some('t') => out.push(b'\t'),
                Some('r') => out.push(b'\r'),
                Some('0') => out.push(0),
                Some('\\') => out.push(b'\\'),
                Some('"') => out.push(b'"'),
                Some(other) => {
                    return Err(VmError::StringConstruction(format!(
                        "unknown escape `\\{other}`"
                    )))
                }
                None => return Err(VmError::StringConstruction("trailing backslash".into())),
            }
        }
        Ok(out)
    }

    fn parse_number(&self, text: &str) -> Result<f64, VmError> {
        text.parse::<f64>()
            .map_err(|_| VmError::StringConstruction(format!("`{text}` is not a number")))
    }

    fn vtable_index(&self, name: &str) -> Option<u32> {
        self.vtable_methods.get(name).copied()
    }

    fn hll_remap(&self, hll_id: u32) -> u32 {
        hll_id
    }

    fn namespace_store(&mut self, name: &str, sub_handle: u64) {
        self.namespace.insert(name.to_string(), sub_handle);
    }

    fn namespace_lookup(&self, name: &str) -> Option<u64> {
        self.namespace.get(name).copied()
    }

    fn declare_lex_preg(&mut self, _name_const: usize, _register: i64) -> Result<(), EmitError> {
        if self.lex_method_present {
            Ok(())
        } else {
            Err(EmitError::MethodMissing {
                method: "declare_lex_preg".to_string(),
            })
        }
    }

    fn register_exit_handler(&mut self) {
        self.exit_handler_registered = true;
    }

    fn execute_immediate(&mut self, sub_handle: u64) -> Result<(), VmError> {
        self.executed_immediately.push(sub_handle);
        Ok(())
    }

    fn opnum_for_find_name_p_sc(&self) -> u32 {
        FIND_NAME_P_SC_OPNUM
    }
}

/// Test-only fixed opcode id standing in for the real VM's
/// `find_name_p_sc` opnum.
#[cfg(any(test, feature = "test-helpers"))]
pub const FIND_NAME_P_SC_OPNUM: u32 = 0xF1AD;

/// Encoding marker helper: split a `name:"text"` encoded-string literal at
/// the first `"` (the preceding character must be `:`), returning the
/// charset prefix and the quoted body.
pub fn split_encoded_literal(text: &str) -> Option<(&str, &str)> {
    let quote_pos = text.find('"')?;
    if quote_pos == 0 || text.as_bytes()[quote_pos - 1] != b':' {
        return None;
    }
    let prefix = &text[..quote_pos - 1];
    let body = &text[quote_pos..];
    Some((prefix, body))
}

/// Resolve a charset prefix name to a [`StringEncoding`]. Unknown prefixes
/// fall back to ASCII, matching the source's lenient default.
pub fn encoding_for_charset(name: &str) -> StringEncoding {
    match name.to_ascii_lowercase().as_str() {
        "unicode" | "utf8" | "utf-8" => StringEncoding::Unicode,
        _ => StringEncoding::Ascii,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_encoded_literal_prefix() {
        assert_eq!(split_encoded_literal(r#"unicode:"hi""#), Some(("unicode", r#""hi""#)));
        assert_eq!(split_encoded_literal(r#""hi""#), None);
    }

    #[test]
    fn unescapes_common_sequences() {
        let host = TestHost::default();
        assert_eq!(host.unescape(r"a\nb").unwrap(), b"a\nb".to_vec());
    }
}
