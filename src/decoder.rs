//! z/Architecture instruction decoder.
//!
//! A pure function from `(bytes, offset, address)` to a decoded
//! [`Instruction`] or `None`. Instruction length is a function of the
//! opcode's first byte alone (the extended RRE/RXY/RSY/RIL families are
//! carved out explicitly; everything else falls back to a lookup table).
//! Decoding never panics and never fails on a well-formed but unrecognized
//! opcode — an unmapped opcode still consumes its full length and decodes
//! to mnemonic `"UNKNOWN"`.

use crate::types::{Confidence, Instruction, InstructionFormat};

/// Opcodes known to be RRE format (4 bytes: `op(2) R1R2`, high nibbles of
/// the last byte reserved).
const RRE_OPCODES: [u8; 3] = [0xB2, 0xB3, 0xB9];
/// Opcodes known to be RXY/RSY format (6 bytes).
const RXY_RSY_OPCODES: [u8; 4] = [0xE3, 0xEB, 0xEC, 0xED];
/// Opcodes known to be RIL format (6 bytes, relative-addressing capable).
const RIL_OPCODES: [u8; 5] = [0xC0, 0xC2, 0xC4, 0xC6, 0xC8];

/// Instruction byte-length lookup, keyed by first opcode byte. Opcodes
/// absent here default to length 2.
fn opcode_length(opcode: u8) -> usize {
    if RRE_OPCODES.contains(&opcode) {
        return 4;
    }
    if RXY_RSY_OPCODES.contains(&opcode) {
        return 6;
    }
    if RIL_OPCODES.contains(&opcode) {
        return 6;
    }
    match opcode {
        0x00..=0x1F => 2,
        0x40..=0x5F => 4,
        0x86..=0x9B => 4,
        0xA5 | 0xA7 => 4,
        0xD0..=0xDF => 6,
        0xF0..=0xFD => 6,
        _ => 2,
    }
}

/// Mnemonic lookup, keyed by first opcode byte.
fn mnemonic_for(opcode: u8) -> Option<&'static str> {
    Some(match opcode {
        0x05 => "BALR",
        0x0D => "BASR",
        0x07 => "BCR",
        0x47 => "BC",
        0x18 => "LR",
        0x58 => "L",
        0x50 => "ST",
        0x90 => "STM",
        0x98 => "LM",
        0x41 => "LA",
        0x1A => "AR",
        0x5A => "A",
        0x1B => "SR",
        0x5B => "S",
        0x12 => "LTR",
        0x55 => "CL",
        0x95 => "CLI",
        0x15 => "CLR",
        0x19 => "CR",
        0x59 => "C",
        0x89 => "SLL",
        0x88 => "SRL",
        0x13 => "LCR",
        0x11 => "LNR",
        0x10 => "LPR",
        0x14 => "NR",
        0x16 => "OR",
        0x17 => "XR",
        0x54 => "N",
        0x56 => "O",
        0x57 => "X",
        0x96 => "OI",
        0x94 => "NI",
        0x97 => "XI",
        0x92 => "MVI",
        0x43 => "IC",
        0x42 => "STC",
        0x44 => "EX",
        0x45 => "BAL",
        0x4D => "BAS",
        0x46 => "BCT",
        0x06 => "BCTR",
        0x8E => "SRDA",
        0x8C => "SRDL",
        0x8D => "SLDA",
        0x86 => "BXH",
        0x87 => "BXLE",
        0xD2 => "MVC",
        0xD5 => "CLC",
        0xDC => "TR",
        0xDD => "TRT",
        0xD1 => "MVN",
        0xD3 => "MVZ",
        0xF1 => "MVO",
        0xF2 => "PACK",
        0xF3 => "UNPK",
        0xD7 => "XC",
        0xD6 => "OC",
        0xD4 => "NC",
        0xD9 => "MVCK",
        0xDA => "MVCP",
        0xDB => "MVCS",
        0xDE => "ED",
        0xDF => "EDMK",
        0xFA => "AP",
        0xFB => "SP",
        0xF8 => "ZAP",
        0xF9 => "CP",
        0xFC => "MP",
        0xFD => "DP",
        _ => return None,
    })
}

const BRANCH_MNEMONICS: [&str; 10] = [
    "BC", "BCR", "BAL", "BALR", "BASR", "BAS", "BXH", "BXLE", "BCT", "BCTR",
];
const CALL_MNEMONICS: [&str; 4] = ["BALR", "BASR", "BAL", "BAS"];

/// Decode the instruction at `data[offset..]`, if possible.
///
/// Returns `None` when fewer bytes remain than the opcode's length
/// requires; the caller should treat this as an undecodable byte and
/// advance by one.
pub fn decode_instruction(data: &[u8], offset: usize, address: u32) -> Option<Instruction> {
    let opcode = *data.get(offset)?;
    let length = opcode_length(opcode);
    if offset + length > data.len() {
        return None;
    }
    let inst_bytes = data[offset..offset + length].to_vec();
    let (mnemonic, operands, format) = decode_details(&inst_bytes);

    let is_branch = BRANCH_MNEMONICS.contains(&mnemonic.as_str());
    let is_call = CALL_MNEMONICS.contains(&mnemonic.as_str());
    let is_return = (mnemonic == "BCR" && operands.first().map(String::as_str) == Some("15"))
        || (mnemonic == "BR" && operands.first().map(String::as_str) == Some("14"));

    let branch_target = if is_branch && length >= 4 {
        calculate_branch_target(&inst_bytes, address, format)
    } else {
        None
    };

    let confidence = if mnemonic == "UNKNOWN" {
        Confidence::Low
    } else {
        Confidence::High
    };

    Some(Instruction {
        address,
        bytes: inst_bytes,
        mnemonic,
        operands,
        format,
        label: None,
        is_branch,
        is_call,
        is_return,
        branch_target,
        annotation: None,
        confidence,
    })
}

fn decode_details(inst_bytes: &[u8]) -> (String, Vec<String>, InstructionFormat) {
    let opcode = inst_bytes[0];
    let mnemonic = mnemonic_for(opcode).unwrap_or("UNKNOWN").to_string();

    match inst_bytes.len() {
        2 => {
            let r1 = (inst_bytes[1] >> 4) & 0xF;
            let r2 = inst_bytes[1] & 0xF;
            (
                mnemonic,
                vec![r1.to_string(), r2.to_string()],
                InstructionFormat::Rr,
            )
        }
        4 => {
            if opcode == 0x90 || opcode == 0x98 || (0x88..=0x8F).contains(&opcode) {
                // STM/LM (0x90/0x98) are RS, not SI, despite falling inside the
                // 0x90..=0x9B byte range: their R1/R3 nibble is the save/load
                // register pair, not an immediate.
                let r1 = (inst_bytes[1] >> 4) & 0xF;
                let r3 = inst_bytes[1] & 0xF;
                let b2 = (inst_bytes[2] >> 4) & 0xF;
                let d2 = (((inst_bytes[2] & 0xF) as u32) << 8) | inst_bytes[3] as u32;
                (
                    mnemonic,
                    vec![r1.to_string(), r3.to_string(), format!("{}({})", d2, b2)],
                    InstructionFormat::Rs,
                )
            } else if (0x90..=0x9B).contains(&opcode) {
                let i2 = inst_bytes[1];
                let b1 = (inst_bytes[2] >> 4) & 0xF;
                let d1 = (((inst_bytes[2] & 0xF) as u32) << 8) | inst_bytes[3] as u32;
                (
                    mnemonic,
                    vec![format!("X'{:02X}'", i2), format!("{}({})", d1, b1)],
                    InstructionFormat::Si,
                )
            } else {
                let r1 = (inst_bytes[1] >> 4) & 0xF;
                let x2 = inst_bytes[1] & 0xF;
                let b2 = (inst_bytes[2] >> 4) & 0xF;
                let d2 = (((inst_bytes[2] & 0xF) as u32) << 8) | inst_bytes[3] as u32;
                let operand2 = if x2 != 0 {
                    format!("{}({},{})", d2, x2, b2)
                } else {
                    format!("{}({})", d2, b2)
                };
                (
                    mnemonic,
                    vec![r1.to_string(), operand2],
                    InstructionFormat::Rx,
                )
            }
        }
        6 => {
            if (0xD0..=0xDF).contains(&opcode) {
                let l = inst_bytes[1];
                let b1 = (inst_bytes[2] >> 4) & 0xF;
                let d1 = (((inst_bytes[2] & 0xF) as u32) << 8) | inst_bytes[3] as u32;
                let b2 = (inst_bytes[4] >> 4) & 0xF;
                let d2 = (((inst_bytes[4] & 0xF) as u32) << 8) | inst_bytes[5] as u32;
                (
                    mnemonic,
                    vec![format!("{}({},{})", d1, l, b1), format!("{}({})", d2, b2)],
                    InstructionFormat::Ss,
                )
            } else if RIL_OPCODES.contains(&opcode) {
                let r1 = (inst_bytes[1] >> 4) & 0xF;
                let i2 = u32::from_be_bytes([
                    inst_bytes[2],
                    inst_bytes[3],
                    inst_bytes[4],
                    inst_bytes[5],
                ]);
                (
                    mnemonic,
                    vec![r1.to_string(), format!("X'{:08X}'", i2)],
                    InstructionFormat::Ril,
                )
            } else {
                (mnemonic, vec![], InstructionFormat::Unknown)
            }
        }
        _ => (mnemonic, vec![], InstructionFormat::Unknown),
    }
}

fn calculate_branch_target(inst_bytes: &[u8], address: u32, format: InstructionFormat) -> Option<u32> {
    match format {
        InstructionFormat::Rx if inst_bytes.len() >= 4 => {
            let b2 = (inst_bytes[2] >> 4) & 0xF;
            let d2 = (((inst_bytes[2] & 0xF) as u32) << 8) | inst_bytes[3] as u32;
            if b2 == 0 {
                Some(d2)
            } else {
                None
            }
        }
        InstructionFormat::Ril if inst_bytes.len() >= 6 => {
            let offset = i32::from_be_bytes([
                inst_bytes[2],
                inst_bytes[3],
                inst_bytes[4],
                inst_bytes[5],
            ]);
            Some((address as i64 + (offset as i64) * 2) as u32)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_balr() {
        let data = [0x05, 0xEF];
        let inst = decode_instruction(&data, 0, 0x1000).unwrap();
        assert_eq!(inst.mnemonic, "BALR");
        assert_eq!(inst.operands, vec!["14", "15"]);
        assert!(inst.is_call);
        assert!(inst.is_branch);
        assert!(!inst.is_return);
        assert_eq!(inst.format, InstructionFormat::Rr);
    }

    #[test]
    fn test_decode_bc_absolute() {
        let data = [0x47, 0xF0, 0x10, 0x00];
        let inst = decode_instruction(&data, 0, 0).unwrap();
        assert_eq!(inst.mnemonic, "BC");
        assert_eq!(inst.operands, vec!["15", "4096(0)"]);
        assert!(inst.is_branch);
        assert_eq!(inst.branch_target, Some(0x1000));
    }

    #[test]
    fn test_decode_bc_unresolved_base() {
        let data = [0x47, 0x80, 0xD0, 0x20];
        let inst = decode_instruction(&data, 0, 0).unwrap();
        assert!(inst.is_branch);
        assert_eq!(inst.branch_target, None);
    }

    #[test]
    fn test_decode_si_format() {
        let data = [0x95, 0xC1, 0xD0, 0x0C]; // CLI D'0C'(13),C1
        let inst = decode_instruction(&data, 0, 0).unwrap();
        assert_eq!(inst.mnemonic, "CLI");
        assert_eq!(inst.format, InstructionFormat::Si);
        assert_eq!(inst.operands[0], "X'C1'");
    }

    #[test]
    fn test_decode_ss_format() {
        let data = [0xD2, 0x02, 0xD0, 0x0C, 0x30, 0x00]; // MVC
        let inst = decode_instruction(&data, 0, 0).unwrap();
        assert_eq!(inst.mnemonic, "MVC");
        assert_eq!(inst.format, InstructionFormat::Ss);
    }

    #[test]
    fn test_decode_unknown_opcode_consumes_length() {
        // 0xF5 has no mnemonic mapping but falls in the SS six-byte range.
        let data = [0xF5, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let inst = decode_instruction(&data, 0, 0).unwrap();
        assert_eq!(inst.mnemonic, "UNKNOWN");
        assert_eq!(inst.confidence, Confidence::Low);
        assert_eq!(inst.bytes.len(), 6);
    }

    #[test]
    fn test_decode_unknown_opcode_short_fallback() {
        // 0xFF is outside every known-length range; falls back to length 2.
        let data = [0xFF, 0xFF];
        let inst = decode_instruction(&data, 0, 0).unwrap();
        assert_eq!(inst.mnemonic, "UNKNOWN");
        assert_eq!(inst.bytes.len(), 2);
    }

    #[test]
    fn test_decode_insufficient_bytes() {
        let data = [0x47, 0xF0]; // BC needs 4 bytes
        assert!(decode_instruction(&data, 0, 0).is_none());
    }

    #[test]
    fn test_decode_return() {
        let data = [0x07, 0xFE]; // BCR 15,14
        let inst = decode_instruction(&data, 0, 0).unwrap();
        assert_eq!(inst.mnemonic, "BCR");
        assert!(inst.is_return);
    }

    #[test]
    fn test_rre_length() {
        assert_eq!(opcode_length(0xB9), 4);
        assert_eq!(opcode_length(0xE3), 6);
        assert_eq!(opcode_length(0xC0), 6);
    }
}
