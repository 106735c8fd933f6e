//! Script byte stream to push-sequence parser.
//!
//! Handles standard push encodings (direct 1-75 byte pushes, PUSHDATA1/2/4)
//! and Radiant's inline-ref opcodes (0xD0-0xD3, 0xD8) which embed a fixed
//! 36-byte ref payload directly after the opcode, with no length prefix.

pub const OP_RETURN: u8 = 0x6a;
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_3: u8 = 0x53;

const REF_PAYLOAD_LEN: usize = 36;
const REF_OPCODES: [u8; 5] = [0xd0, 0xd1, 0xd2, 0xd3, 0xd8];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// A data push (direct push or PUSHDATA1/2/4).
    Push(Vec<u8>),
    /// One of Radiant's inline-ref opcodes, carrying a fixed 36-byte payload.
    RefPush { opcode: u8, data: [u8; REF_PAYLOAD_LEN] },
    /// Any other single-byte opcode, including OP_RETURN and small-int pushes.
    Opcode(u8),
}

impl Op {
    pub fn as_push(&self) -> Option<&[u8]> {
        match self {
            Op::Push(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_ref_push(&self) -> bool {
        matches!(self, Op::RefPush { .. })
    }
}

/// Parses a script into a sequence of ops. Stops (returning what was parsed
/// so far) at the first truncated or malformed push — scripts in the wild
/// occasionally carry trailing garbage and callers only look for markers
/// near the front.
pub fn parse_script(script: &[u8]) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut i = 0usize;

    while i < script.len() {
        let opcode = script[i];

        if REF_OPCODES.contains(&opcode) {
            if i + 1 + REF_PAYLOAD_LEN > script.len() {
                break;
            }
            let mut data = [0u8; REF_PAYLOAD_LEN];
            data.copy_from_slice(&script[i + 1..i + 1 + REF_PAYLOAD_LEN]);
            ops.push(Op::RefPush { opcode, data });
            i += 1 + REF_PAYLOAD_LEN;
            continue;
        }

        match opcode {
            0x01..=0x4b => {
                let len = opcode as usize;
                if i + 1 + len > script.len() {
                    break;
                }
                ops.push(Op::Push(script[i + 1..i + 1 + len].to_vec()));
                i += 1 + len;
            }
            OP_PUSHDATA1 => {
                if i + 2 > script.len() {
                    break;
                }
                let len = script[i + 1] as usize;
                if i + 2 + len > script.len() {
                    break;
                }
                ops.push(Op::Push(script[i + 2..i + 2 + len].to_vec()));
                i += 2 + len;
            }
            OP_PUSHDATA2 => {
                if i + 3 > script.len() {
                    break;
                }
                let len = u16::from_le_bytes([script[i + 1], script[i + 2]]) as usize;
                if i + 3 + len > script.len() {
                    break;
                }
                ops.push(Op::Push(script[i + 3..i + 3 + len].to_vec()));
                i += 3 + len;
            }
            OP_PUSHDATA4 => {
                if i + 5 > script.len() {
                    break;
                }
                let len = u32::from_le_bytes([
                    script[i + 1],
                    script[i + 2],
                    script[i + 3],
                    script[i + 4],
                ]) as usize;
                if i + 5 + len > script.len() {
                    break;
                }
                ops.push(Op::Push(script[i + 5..i + 5 + len].to_vec()));
                i += 5 + len;
            }
            OP_0 => {
                ops.push(Op::Push(Vec::new()));
                i += 1;
            }
            other => {
                ops.push(Op::Opcode(other));
                i += 1;
            }
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_push() {
        let script = [0x03, b'g', b'l', b'y'];
        let ops = parse_script(&script);
        assert_eq!(ops, vec![Op::Push(b"gly".to_vec())]);
    }

    #[test]
    fn parses_pushdata1() {
        let mut script = vec![OP_PUSHDATA1, 4];
        script.extend_from_slice(b"abcd");
        let ops = parse_script(&script);
        assert_eq!(ops, vec![Op::Push(b"abcd".to_vec())]);
    }

    #[test]
    fn parses_ref_opcode() {
        let mut script = vec![0xd0];
        script.extend(std::iter::repeat(0xab).take(36));
        let ops = parse_script(&script);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_ref_push());
    }

    #[test]
    fn stops_on_truncated_push() {
        let script = [0x05, 1, 2];
        let ops = parse_script(&script);
        assert!(ops.is_empty());
    }

    #[test]
    fn op_return_is_plain_opcode() {
        let ops = parse_script(&[OP_RETURN]);
        assert_eq!(ops, vec![Op::Opcode(OP_RETURN)]);
    }
}
