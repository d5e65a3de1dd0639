//! HLASM-like assembly listing reconstruction.
//!
//! Renders a [`DisassemblyResult`] as a readable listing: a header, the
//! extracted metadata, one section per detected procedure (each instruction
//! rendered via [`Instruction::to_asm_line`]), any orphan instructions not
//! claimed by a procedure, the undecodable byte regions, and a statistics
//! footer.

use crate::types::{DisassemblyResult, Procedure};

const RULE: &str = "********************************************************************************";

/// Render a complete assembly listing for `result`.
pub fn reconstruct(result: &DisassemblyResult) -> String {
    let mut lines: Vec<String> = Vec::new();

    add_header(&mut lines, result);
    add_metadata_section(&mut lines, result);

    if result.cfg.procedures.is_empty() {
        add_linear_listing(&mut lines, result);
    } else {
        add_procedures_section(&mut lines, result);
    }

    if !result.unknown_regions.is_empty() {
        add_unknown_regions(&mut lines, result);
    }

    add_statistics(&mut lines, result);

    lines.join("\n")
}

fn add_header(lines: &mut Vec<String>, result: &DisassemblyResult) {
    lines.push(RULE.to_string());
    lines.push("* z/OS Binary Reverse Engineering - Reconstructed Assembly".to_string());
    lines.push(format!(
        "* Module: {}",
        result.metadata.name.as_deref().unwrap_or("UNKNOWN")
    ));
    lines.push(format!(
        "* Format: {}",
        result
            .metadata
            .format_type
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    ));
    lines.push("* Note: This is reconstructed code with synthetic labels".to_string());
    lines.push(RULE.to_string());
    lines.push(String::new());
}

fn add_metadata_section(lines: &mut Vec<String>, result: &DisassemblyResult) {
    let metadata = &result.metadata;
    lines.push("* Metadata:".to_string());
    lines.push(match metadata.entry_point {
        Some(ep) => format!("*   Entry Point: 0x{:08X}", ep),
        None => "*   Entry Point: unknown".to_string(),
    });
    lines.push(match metadata.amode {
        Some(amode) => format!("*   AMODE: {}", amode),
        None => "*   AMODE: unknown".to_string(),
    });
    lines.push(match &metadata.rmode {
        Some(rmode) => format!("*   RMODE: {}", rmode),
        None => "*   RMODE: unknown".to_string(),
    });

    if !metadata.external_symbols.is_empty() {
        lines.push("*   External Symbols:".to_string());
        for sym in &metadata.external_symbols {
            lines.push(format!("*     - {}", sym));
        }
    }
    lines.push(String::new());
}

fn add_procedures_section(lines: &mut Vec<String>, result: &DisassemblyResult) {
    let mut inst_to_proc: std::collections::HashMap<u32, String> = std::collections::HashMap::new();
    for proc in result.cfg.procedures.values() {
        for block_id in &proc.block_ids {
            if let Some(block) = result.cfg.basic_blocks.get(block_id) {
                for inst in &block.instructions {
                    inst_to_proc.insert(inst.address, proc.id.clone());
                }
            }
        }
    }

    let mut procedures: Vec<&Procedure> = result.cfg.procedures.values().collect();
    procedures.sort_by_key(|p| p.entry_address);
    for proc in procedures {
        add_procedure(lines, proc, result);
    }

    let orphans: Vec<&crate::types::Instruction> = result
        .instructions
        .iter()
        .filter(|i| !inst_to_proc.contains_key(&i.address))
        .collect();

    if !orphans.is_empty() {
        lines.push(String::new());
        lines.push(RULE.to_string());
        lines.push("* Orphan Instructions (not in any detected procedure)".to_string());
        lines.push(RULE.to_string());
        add_instruction_list(lines, &orphans);
    }
}

fn add_procedure(lines: &mut Vec<String>, proc: &Procedure, result: &DisassemblyResult) {
    lines.push(String::new());
    lines.push(RULE.to_string());
    lines.push(format!("* Procedure: {}", proc.name));
    lines.push(format!("* Entry: 0x{:08X}", proc.entry_address));
    lines.push(format!(
        "* Detection: {} (confidence: {:.2})",
        proc.detection_method,
        proc.confidence.as_score()
    ));

    if !proc.calls_to.is_empty() {
        let mut names: Vec<&str> = proc
            .calls_to
            .iter()
            .filter_map(|pid| result.cfg.procedures.get(pid))
            .map(|p| p.name.as_str())
            .collect();
        names.sort_unstable();
        lines.push(format!("* Calls: {}", names.join(", ")));
    }

    lines.push(RULE.to_string());
    lines.push(String::new());

    let mut proc_instructions: Vec<&crate::types::Instruction> = Vec::new();
    let multi_block = proc.block_ids.len() > 1;
    for block_id in &proc.block_ids {
        if let Some(block) = result.cfg.basic_blocks.get(block_id) {
            if multi_block {
                lines.push(format!(
                    "* Basic Block: {} (type: {:?})",
                    block_id, block.block_type
                ));
            }
            proc_instructions.extend(block.instructions.iter());
        }
    }
    proc_instructions.sort_by_key(|i| i.address);
    add_instruction_list(lines, &proc_instructions);
}

fn add_linear_listing(lines: &mut Vec<String>, result: &DisassemblyResult) {
    lines.push(String::new());
    lines.push("* Instructions (linear listing):".to_string());
    lines.push(String::new());
    let refs: Vec<&crate::types::Instruction> = result.instructions.iter().collect();
    add_instruction_list(lines, &refs);
}

fn add_instruction_list(lines: &mut Vec<String>, instructions: &[&crate::types::Instruction]) {
    for inst in instructions {
        let mut line = inst.to_asm_line();
        if inst.confidence.as_score() < 0.8 {
            line.push_str(&format!("  [conf: {:.2}]", inst.confidence.as_score()));
        }
        lines.push(line);
    }
}

fn add_unknown_regions(lines: &mut Vec<String>, result: &DisassemblyResult) {
    lines.push(String::new());
    lines.push(RULE.to_string());
    lines.push("* Unknown/Undecodable Regions".to_string());
    lines.push(RULE.to_string());

    for (start, end, data) in &result.unknown_regions {
        let size = end - start + 1;
        lines.push(format!("* Region: 0x{:08X} - 0x{:08X} ({} bytes)", start, end, size));
        let preview_len = data.len().min(16);
        let mut hex_preview = hex::encode_upper(&data[..preview_len]);
        if data.len() > 16 {
            hex_preview.push_str("...");
        }
        lines.push(format!("*   Data: {}", hex_preview));
    }
    lines.push(String::new());
}

fn add_statistics(lines: &mut Vec<String>, result: &DisassemblyResult) {
    use crate::types::StatValue;

    let get_count = |key: &str| match result.statistics.get(key) {
        Some(StatValue::Count(c)) => *c,
        _ => 0,
    };
    let decode_rate = match result.statistics.get("decode_rate") {
        Some(StatValue::Rate(r)) => *r,
        _ => 0.0,
    };

    lines.push(String::new());
    lines.push(RULE.to_string());
    lines.push("* Statistics".to_string());
    lines.push(RULE.to_string());
    lines.push(format!("* Instructions decoded: {}", get_count("instruction_count")));
    lines.push(format!("* Bytes decoded: {}", get_count("decoded_bytes")));
    lines.push(format!("* Unknown bytes: {}", get_count("unknown_bytes")));
    lines.push(format!("* Decode rate: {:.1}%", decode_rate * 100.0));
    lines.push(format!("* Branches: {}", get_count("branch_count")));
    lines.push(format!("* Calls: {}", get_count("call_count")));
    lines.push(format!("* Returns: {}", get_count("return_count")));

    if let Some(StatValue::Ranked(top)) = result.statistics.get("top_mnemonics") {
        lines.push("* Top mnemonics:".to_string());
        for (mnem, count) in top.iter().take(5) {
            lines.push(format!("*   {:<6} : {}", mnem, count));
        }
    }
    lines.push(RULE.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EngineOptions;

    fn program_object(code: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data[0] = 0x00;
        data[1] = 0x03;
        data[8..12].copy_from_slice(&(code.len() as u32).to_be_bytes());
        data[12..16].copy_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(code);
        data
    }

    #[test]
    fn test_reconstruct_contains_header_and_procedure() {
        let code = [0x05, 0xEF, 0x07, 0xFE];
        let data = program_object(&code);
        let result = crate::pipeline::analyze(&data, Some("MOD1".into()), &EngineOptions::new()).unwrap();
        let listing = reconstruct(&result);
        assert!(listing.contains("Module: MOD1"));
        assert!(listing.contains("Procedure: ENTRY_00000020"));
        assert!(listing.contains("BALR"));
    }

    #[test]
    fn test_reconstruct_lists_unknown_region() {
        let mut code = vec![0x18, 0x0F];
        code.extend_from_slice(&[0x47, 0xF0, 0x00]); // truncated BC -> unknown region
        let data = program_object(&code);
        let result = crate::pipeline::analyze(&data, None, &EngineOptions::new()).unwrap();
        let listing = reconstruct(&result);
        assert!(listing.contains("Unknown/Undecodable Regions"));
    }
}
