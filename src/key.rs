//! Composite-key encoding.
//!
//! Encodes a chain of key parts into the packed wire form described in spec
//! §4.2, and produces the canonical interning string two keys are compared
//! by. Endianness is explicitly not normalised here: the artifact is
//! produced and consumed on the same host.

use crate::error::EmitError;

/// Maximum number of parts a key chain may contain.
pub const MAX_KEY_PARTS: usize = 21;

/// Optional slice markers a key part may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceMode {
    /// No slicing: a plain index/key part.
    None,
    /// `start` only.
    Start,
    /// `end` only.
    End,
    /// `start` and `end` both given.
    StartEnd,
    /// `..end` (implicit start).
    ToEnd,
    /// `start..` (implicit end).
    FromStart,
}

impl SliceMode {
    fn bits(self) -> u32 {
        match self {
            SliceMode::None => 0,
            SliceMode::Start => 1,
            SliceMode::End => 2,
            SliceMode::StartEnd => 3,
            SliceMode::ToEnd => 4,
            SliceMode::FromStart => 5,
        }
    }

    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(SliceMode::None),
            1 => Some(SliceMode::Start),
            2 => Some(SliceMode::End),
            3 => Some(SliceMode::StartEnd),
            4 => Some(SliceMode::ToEnd),
            5 => Some(SliceMode::FromStart),
            _ => None,
        }
    }
}

/// A single key part: either a register reference or a constant, plus its
/// optional slice marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPartValue {
    /// An integer register, holding the part's value at runtime.
    IntRegister(i64),
    /// A string register.
    StringRegister(i64),
    /// An integer constant; the wire payload is the literal value itself.
    IntConst(i64),
    /// A string constant; the wire payload is its constant-pool index.
    StringConst(usize),
}

impl KeyPartValue {
    fn argtype_bits(self) -> u32 {
        match self {
            KeyPartValue::IntRegister(_) => 0,
            KeyPartValue::StringRegister(_) => 1,
            KeyPartValue::IntConst(_) => 2,
            KeyPartValue::StringConst(_) => 3,
        }
    }

    fn from_argtype(bits: u32, payload: i64) -> Option<Self> {
        match bits {
            0 => Some(KeyPartValue::IntRegister(payload)),
            1 => Some(KeyPartValue::StringRegister(payload)),
            2 => Some(KeyPartValue::IntConst(payload)),
            3 => Some(KeyPartValue::StringConst(payload as usize)),
            _ => None,
        }
    }

    fn wire_payload(self) -> i64 {
        match self {
            KeyPartValue::IntRegister(c) | KeyPartValue::StringRegister(c) => {
                if c < 0 {
                    -1 - c
                } else {
                    c
                }
            }
            KeyPartValue::IntConst(v) => v,
            KeyPartValue::StringConst(idx) => idx as i64,
        }
    }

    fn canonical_token(self) -> String {
        match self {
            KeyPartValue::IntRegister(c) => format!("I{c}"),
            KeyPartValue::StringRegister(c) => format!("S{c}"),
            KeyPartValue::IntConst(v) => format!("Ic{v}"),
            KeyPartValue::StringConst(idx) => format!("Sc{idx}"),
        }
    }
}

/// One element of a key chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPart {
    /// The part's register/constant value.
    pub value: KeyPartValue,
    /// Slice markers attached to this part.
    pub slice: SliceMode,
}

impl KeyPart {
    /// Build a part with no slice marker.
    pub fn plain(value: KeyPartValue) -> Self {
        Self {
            value,
            slice: SliceMode::None,
        }
    }
}

/// A chain of key parts awaiting encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyChain(pub Vec<KeyPart>);

/// The result of encoding a key chain: the packed wire words plus the
/// canonical string used for interning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedKey {
    /// `[n, flag_0, payload_0, flag_1, payload_1, ...]`.
    pub wire: Vec<i64>,
    /// Canonical per-part token concatenation, used as the interning key.
    pub canonical: String,
}

/// Stateless encoder for composite keys.
#[derive(Debug, Default)]
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode a key chain into its wire form and canonical string.
    pub fn encode(chain: &KeyChain) -> Result<EncodedKey, EmitError> {
        if chain.0.len() > MAX_KEY_PARTS {
            return Err(EmitError::KeyTooComplex {
                len: chain.0.len(),
                max: MAX_KEY_PARTS,
            });
        }

        let mut wire = Vec::with_capacity(1 + chain.0.len() * 2);
        wire.push(chain.0.len() as i64);
        let mut canonical = String::new();

        for part in &chain.0 {
            let flag = (part.value.argtype_bits() << 3) | part.slice.bits();
            wire.push(flag as i64);
            wire.push(part.value.wire_payload());

            canonical.push_str(&part.value.canonical_token());
        }

        Ok(EncodedKey { wire, canonical })
    }

    /// Decode a previously encoded wire form back into a key chain. Used by
    /// the round-trip property tests; slice bits normalise through
    /// [`SliceMode`] so decoding is exact modulo that representation.
    ///
    /// Mapped (negative-color) registers are lossy: `wire_payload` folds a
    /// negative color `c` and the non-negative color `-1 - c` onto the same
    /// non-negative wire value, so decoding a mapped register's payload
    /// always yields the non-negative color. This mirrors the source wire
    /// format, which carries no separate "was mapped" bit either.
    pub fn decode(wire: &[i64]) -> Result<KeyChain, EmitError> {
        let n = *wire.first().unwrap_or(&0) as usize;
        let mut parts = Vec::with_capacity(n);
        for i in 0..n {
            let flag = wire[1 + i * 2] as u32;
            let payload = wire[2 + i * 2];
            let argtype = flag >> 3;
            let slice_bits = flag & 0b111;
            let value = KeyPartValue::from_argtype(argtype, payload)
                .ok_or(EmitError::UnknownKeyPartType { flags: flag })?;
            let slice = SliceMode::from_bits(slice_bits).ok_or(EmitError::UnknownKeyPartType { flags: flag })?;
            parts.push(KeyPart { value, slice });
        }
        Ok(KeyChain(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_chains_over_the_limit() {
        let chain = KeyChain(vec![KeyPart::plain(KeyPartValue::IntConst(1)); MAX_KEY_PARTS + 1]);
        assert!(matches!(
            KeyEncoder::encode(&chain),
            Err(EmitError::KeyTooComplex { .. })
        ));
    }

    #[test]
    fn equal_chains_produce_equal_canonical_strings() {
        let chain_a = KeyChain(vec![
            KeyPart::plain(KeyPartValue::StringConst(4)),
            KeyPart::plain(KeyPartValue::IntConst(3)),
        ]);
        let chain_b = chain_a.clone();
        let enc_a = KeyEncoder::encode(&chain_a).unwrap();
        let enc_b = KeyEncoder::encode(&chain_b).unwrap();
        assert_eq!(enc_a.canonical, enc_b.canonical);
    }

    #[test]
    fn slice_markers_do_not_affect_the_canonical_string() {
        // Per spec §4.2, the canonical string is built purely from
        // `<set-char><color-or-value>` tokens; slice bits live only in the
        // packed wire form. Two chains differing only in slice marker must
        // still dedup to one constant-pool entry.
        let plain = KeyChain(vec![KeyPart::plain(KeyPartValue::StringConst(4))]);
        let sliced = KeyChain(vec![KeyPart {
            value: KeyPartValue::StringConst(4),
            slice: SliceMode::FromStart,
        }]);
        let enc_plain = KeyEncoder::encode(&plain).unwrap();
        let enc_sliced = KeyEncoder::encode(&sliced).unwrap();
        assert_eq!(enc_plain.canonical, enc_sliced.canonical);
        assert_ne!(enc_plain.wire, enc_sliced.wire);
    }

    #[test]
    fn different_chains_produce_different_canonical_strings() {
        let a = KeyChain(vec![KeyPart::plain(KeyPartValue::IntConst(3))]);
        let b = KeyChain(vec![KeyPart::plain(KeyPartValue::IntConst(4))]);
        let enc_a = KeyEncoder::encode(&a).unwrap();
        let enc_b = KeyEncoder::encode(&b).unwrap();
        assert_ne!(enc_a.canonical, enc_b.canonical);
    }

    #[test]
    fn round_trips_mixed_chains() {
        // Unmapped (non-negative) register colors only: mapped colors are
        // wire-lossy by design, see `decode`'s doc comment.
        let chain = KeyChain(vec![
            KeyPart::plain(KeyPartValue::IntRegister(2)),
            KeyPart {
                value: KeyPartValue::StringRegister(3),
                slice: SliceMode::FromStart,
            },
            KeyPart::plain(KeyPartValue::StringConst(7)),
        ]);
        let encoded = KeyEncoder::encode(&chain).unwrap();
        let decoded = KeyEncoder::decode(&encoded.wire).unwrap();
        assert_eq!(decoded, chain);
    }

    #[test]
    fn mapped_registers_encode_as_negative_one_minus_color() {
        let chain = KeyChain(vec![KeyPart::plain(KeyPartValue::IntRegister(-5))]);
        let encoded = KeyEncoder::encode(&chain).unwrap();
        // payload at index 2 (after the count and the flag word).
        assert_eq!(encoded.wire[2], 4);
    }
}
