//! Glyph envelope detection (spec §4.2): v1 scriptSig, v2 Style A OP_RETURN,
//! v2 Style B scriptSig.

use super::pushes::{parse_script, Op, OP_3, OP_RETURN};

const GLY_MARKER: &[u8] = b"gly";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Reveal,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeForm {
    V1,
    V2StyleA,
    V2StyleB,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub form: EnvelopeForm,
    pub version: u8,
    pub kind: EnvelopeKind,
    pub raw_metadata: Vec<u8>,
}

fn looks_like_cbor_map(bytes: &[u8]) -> bool {
    match bytes.first() {
        Some(b) => matches!(b >> 5, 5) || matches!(*b, 0xa0..=0xbb),
        None => false,
    }
}

/// Attempts a structural CBOR decode just to classify reveal vs commit
/// (§4.2 disambiguation rule); the typed decode into `TokenDescriptor`
/// happens in `crate::glyph`.
fn decodes_as_map(bytes: &[u8]) -> bool {
    if !looks_like_cbor_map(bytes) {
        return false;
    }
    matches!(
        ciborium::de::from_reader::<ciborium::value::Value, _>(bytes),
        Ok(ciborium::value::Value::Map(_))
    )
}

/// Scans a scriptSig for v1 (standalone "gly" push) or v2 Style B
/// (OP_3, "gly" push, payload push) Glyph envelopes.
pub fn detect_in_script_sig(script_sig: &[u8]) -> Option<Envelope> {
    let ops = parse_script(script_sig);

    for (idx, op) in ops.iter().enumerate() {
        let is_marker = matches!(op.as_push(), Some(data) if data == GLY_MARKER);
        if !is_marker {
            continue;
        }

        let is_style_b = idx >= 1 && matches!(ops[idx - 1], Op::Opcode(OP_3));
        let payload = ops.get(idx + 1).and_then(Op::as_push)?;

        if decodes_as_map(payload) {
            return Some(Envelope {
                form: if is_style_b { EnvelopeForm::V2StyleB } else { EnvelopeForm::V1 },
                version: if is_style_b { payload.first().copied().unwrap_or(0) } else { 1 },
                kind: EnvelopeKind::Reveal,
                raw_metadata: payload.to_vec(),
            });
        } else if is_style_b && payload.len() >= 2 {
            return Some(Envelope {
                form: EnvelopeForm::V2StyleB,
                version: payload[0],
                kind: EnvelopeKind::Commit,
                raw_metadata: payload[2..].to_vec(),
            });
        }
    }
    None
}

/// Scans an output script for a v2 Style A OP_RETURN envelope.
pub fn detect_in_output_script(script: &[u8]) -> Option<Envelope> {
    let ops = parse_script(script);
    if !matches!(ops.first(), Some(Op::Opcode(OP_RETURN))) {
        return None;
    }

    for op in ops.iter().skip(1) {
        let data = op.as_push()?;
        if data.len() < 5 || &data[0..3] != GLY_MARKER {
            continue;
        }
        let version = data[3];
        let flags = data[4];
        let is_reveal = flags & 0x80 != 0;
        let trailing = &data[5..];

        return Some(Envelope {
            form: EnvelopeForm::V2StyleA,
            version,
            kind: if is_reveal { EnvelopeKind::Reveal } else { EnvelopeKind::Commit },
            raw_metadata: trailing.to_vec(),
        });
    }
    None
}
