//! Structured pseudocode generation from a control-flow graph.
//!
//! Walks each procedure's entry block and renders instruction sequences,
//! conditional branches (`IF`/`ELSE`/`END IF`), back-edge loops
//! (`LOOP`/`END LOOP`), calls, and returns as high-level statements, each
//! carrying its source address range and a confidence annotation.

use std::collections::HashSet;

use crate::types::{BasicBlock, Confidence, ControlFlowGraph, Instruction, Procedure};

struct Statement {
    text: String,
    indent_level: usize,
    address_range: (u32, u32),
    confidence: f64,
}

impl Statement {
    fn render(&self) -> String {
        if self.text.is_empty() {
            return String::new();
        }
        let indent = "  ".repeat(self.indent_level);
        let addr = format!(
            "[0x{:08X}-0x{:08X}]",
            self.address_range.0, self.address_range.1
        );
        let mut line = format!("{}{}  // {}", indent, self.text, addr);
        if self.confidence < 0.8 {
            line.push_str(&format!(" (conf: {})", self.confidence));
        }
        line.trim_end().to_string()
    }
}

/// Generator state for one [`generate`] call.
struct Generator {
    statements: Vec<Statement>,
    visited_blocks: HashSet<String>,
    loop_headers: HashSet<String>,
}

/// Generate pseudocode for an entire control-flow graph.
pub fn generate(cfg: &ControlFlowGraph) -> String {
    let mut gen = Generator {
        statements: Vec::new(),
        visited_blocks: HashSet::new(),
        loop_headers: HashSet::new(),
    };

    gen.add_header(cfg);

    if !cfg.procedures.is_empty() {
        let mut procedures: Vec<&Procedure> = cfg.procedures.values().collect();
        procedures.sort_by_key(|p| p.entry_address);
        for proc in procedures {
            gen.generate_procedure(proc, cfg);
        }
    } else {
        for entry_point in &cfg.entry_points {
            if let Some(block) = find_block_by_address(cfg, *entry_point) {
                gen.add_statement("// Main entry point", (*entry_point, *entry_point), 1.0, 0);
                gen.visited_blocks.clear();
                gen.generate_block_sequence(block, cfg, 0);
            }
        }
    }

    gen.statements
        .iter()
        .map(Statement::render)
        .collect::<Vec<_>>()
        .join("\n")
}

impl Generator {
    fn add_statement(&mut self, text: &str, addr_range: (u32, u32), confidence: f64, indent: usize) {
        self.statements.push(Statement {
            text: text.to_string(),
            indent_level: indent,
            address_range: addr_range,
            confidence,
        });
    }

    fn add_header(&mut self, cfg: &ControlFlowGraph) {
        self.add_statement(
            &format!("// Module: {}", cfg.module_name.as_deref().unwrap_or("UNKNOWN")),
            (0, 0),
            1.0,
            0,
        );
        self.add_statement("// Pseudocode generated from binary analysis", (0, 0), 1.0, 0);
        self.add_statement(
            "// Note: Control flow inferred from branch patterns",
            (0, 0),
            1.0,
            0,
        );
        self.add_statement("", (0, 0), 1.0, 0);
    }

    fn generate_procedure(&mut self, proc: &Procedure, cfg: &ControlFlowGraph) {
        self.add_statement("", (0, 0), 1.0, 0);
        let conf = proc.confidence.as_score();
        self.add_statement(
            &format!("PROCEDURE {}()", proc.name),
            (proc.entry_address, proc.entry_address),
            conf,
            0,
        );
        self.add_statement(
            &format!("// Detection: {}", proc.detection_method),
            (proc.entry_address, proc.entry_address),
            conf,
            0,
        );

        let entry_block = proc
            .block_ids
            .iter()
            .filter_map(|id| cfg.basic_blocks.get(id))
            .find(|b| b.start_address <= proc.entry_address && proc.entry_address <= b.end_address);

        if let Some(block) = entry_block {
            self.visited_blocks.clear();
            self.loop_headers = find_loop_headers(proc, cfg);
            self.generate_block_sequence(block, cfg, 1);
        } else {
            self.add_statement(
                "  // Unable to find entry block",
                (proc.entry_address, proc.entry_address),
                0.3,
                0,
            );
        }

        self.add_statement(
            "END PROCEDURE",
            (proc.entry_address, proc.entry_address),
            conf,
            0,
        );
    }

    fn generate_block_sequence(&mut self, block: &BasicBlock, cfg: &ControlFlowGraph, indent: usize) {
        if self.visited_blocks.contains(&block.id) {
            if self.loop_headers.contains(&block.id) {
                self.add_statement(
                    "CONTINUE to loop_start",
                    (block.start_address, block.end_address),
                    0.7,
                    indent,
                );
            }
            return;
        }
        self.visited_blocks.insert(block.id.clone());

        if self.loop_headers.contains(&block.id) {
            self.generate_loop(block, cfg, indent);
            return;
        }

        self.generate_block_statements(block, indent);

        let last_inst = match block.instructions.last() {
            Some(inst) => inst,
            None => return,
        };

        if last_inst.is_return {
            self.add_statement("RETURN", (last_inst.address, last_inst.address), 0.9, indent);
        } else if last_inst.is_call {
            let target_name = get_call_target_name(last_inst, cfg);
            self.add_statement(
                &format!("CALL {}", target_name),
                (last_inst.address, last_inst.address),
                0.85,
                indent,
            );
            if let Some(ft) = &block.fall_through {
                if let Some(next_block) = cfg.basic_blocks.get(ft) {
                    let next_block = next_block.clone();
                    self.generate_block_sequence(&next_block, cfg, indent);
                }
            }
        } else if last_inst.is_branch {
            self.generate_branch_structure(block, cfg, indent);
        } else if let Some(ft) = &block.fall_through {
            if let Some(next_block) = cfg.basic_blocks.get(ft) {
                let next_block = next_block.clone();
                self.generate_block_sequence(&next_block, cfg, indent);
            }
        }
    }

    fn generate_block_statements(&mut self, block: &BasicBlock, indent: usize) {
        for inst in &block.instructions {
            if inst.is_branch || inst.is_call || inst.is_return {
                continue;
            }
            let stmt = instruction_to_statement(inst);
            self.add_statement(&stmt, (inst.address, inst.address), inst.confidence.as_score(), indent);
        }
    }

    fn generate_branch_structure(&mut self, block: &BasicBlock, cfg: &ControlFlowGraph, indent: usize) {
        let last_inst = match block.instructions.last() {
            Some(inst) => inst,
            None => return,
        };

        if is_unconditional_branch(last_inst) {
            if let Some(target_id) = block.branch_targets.first() {
                if let Some(target_block) = cfg.basic_blocks.get(target_id) {
                    let target_block = target_block.clone();
                    self.add_statement("GOTO", (last_inst.address, last_inst.address), 0.8, indent);
                    self.generate_block_sequence(&target_block, cfg, indent);
                }
            }
            return;
        }

        let condition = get_branch_condition(last_inst);
        self.add_statement(
            &format!("IF {} THEN", condition),
            (last_inst.address, last_inst.address),
            0.75,
            indent,
        );

        if let Some(target_id) = block.branch_targets.first() {
            if let Some(target_block) = cfg.basic_blocks.get(target_id) {
                let target_block = target_block.clone();
                self.generate_block_sequence(&target_block, cfg, indent + 1);
            }
        }

        if let Some(ft) = &block.fall_through {
            self.add_statement(
                "ELSE",
                (last_inst.address, last_inst.address),
                0.75,
                indent,
            );
            if let Some(fall_block) = cfg.basic_blocks.get(ft) {
                let fall_block = fall_block.clone();
                self.generate_block_sequence(&fall_block, cfg, indent + 1);
            }
        }

        self.add_statement(
            "END IF",
            (last_inst.address, last_inst.address),
            0.75,
            indent,
        );
    }

    fn generate_loop(&mut self, header: &BasicBlock, cfg: &ControlFlowGraph, indent: usize) {
        self.add_statement(
            "LOOP loop_start:",
            (header.start_address, header.end_address),
            0.7,
            indent,
        );
        self.generate_block_statements(header, indent + 1);

        for succ_id in header.successors() {
            if succ_id != header.id && !self.visited_blocks.contains(&succ_id) {
                if let Some(succ_block) = cfg.basic_blocks.get(&succ_id) {
                    let succ_block = succ_block.clone();
                    self.generate_block_sequence(&succ_block, cfg, indent + 1);
                }
            }
        }

        self.add_statement(
            "END LOOP",
            (header.start_address, header.end_address),
            0.7,
            indent,
        );
    }
}

fn instruction_to_statement(inst: &Instruction) -> String {
    let m = inst.mnemonic.as_str();
    let ops = &inst.operands;

    if matches!(m, "L" | "LR" | "LH" | "LG") {
        return if ops.len() >= 2 {
            format!("R{} = LOAD({})", ops[0], ops[1])
        } else {
            format!("LOAD {}", ops.join(", "))
        };
    }
    if matches!(m, "ST" | "STH" | "STG" | "STM") {
        return if ops.len() >= 2 {
            format!("STORE R{} to {}", ops[0], ops[1])
        } else {
            format!("STORE {}", ops.join(", "))
        };
    }
    if matches!(m, "A" | "AR" | "AH" | "AG") {
        return if ops.len() >= 2 {
            format!("R{} = R{} + {}", ops[0], ops[0], ops[1])
        } else {
            format!("ADD {}", ops.join(", "))
        };
    }
    if matches!(m, "S" | "SR" | "SH" | "SG") {
        return if ops.len() >= 2 {
            format!("R{} = R{} - {}", ops[0], ops[0], ops[1])
        } else {
            format!("SUB {}", ops.join(", "))
        };
    }
    if matches!(m, "M" | "MR" | "MH" | "MSG") {
        return if ops.len() >= 2 {
            format!("R{} = R{} * {}", ops[0], ops[0], ops[1])
        } else {
            format!("MUL {}", ops.join(", "))
        };
    }
    if matches!(m, "C" | "CR" | "CH" | "CG" | "CL" | "CLR") {
        return if ops.len() >= 2 {
            format!("COMPARE R{} with {}", ops[0], ops[1])
        } else {
            format!("COMPARE {}", ops.join(", "))
        };
    }
    if m == "MVC" {
        return if ops.len() >= 2 {
            format!("MOVE {} to {}", ops[1], ops[0])
        } else {
            format!("MOVE {}", ops.join(", "))
        };
    }
    if m == "LA" {
        return if ops.len() >= 2 {
            format!("R{} = ADDRESS_OF({})", ops[0], ops[1])
        } else {
            format!("LOAD_ADDRESS {}", ops.join(", "))
        };
    }

    if inst.confidence == Confidence::Low {
        let hex = hex::encode_upper(&inst.bytes);
        return format!("UNKNOWN: {}", hex);
    }
    format!("{} {}", m, ops.join(", "))
}

fn get_branch_condition(inst: &Instruction) -> String {
    if matches!(inst.mnemonic.as_str(), "BC" | "BCR") {
        if let Some(mask) = inst.operands.first() {
            return match mask.as_str() {
                "15" => "always",
                "8" => "equal",
                "7" | "6" => "not_equal",
                "4" => "less_than",
                "2" => "greater_than",
                "11" => "less_or_equal",
                "13" => "greater_or_equal",
                "1" => "overflow",
                "14" => "no_overflow",
                other => return format!("condition_mask_{}", other),
            }
            .to_string();
        }
    }
    match inst.mnemonic.as_str() {
        "BZ" => "zero".to_string(),
        "BNZ" => "not_zero".to_string(),
        "BP" => "positive".to_string(),
        "BM" => "negative".to_string(),
        _ => "condition".to_string(),
    }
}

fn get_call_target_name(inst: &Instruction, cfg: &ControlFlowGraph) -> String {
    if let Some(target) = inst.branch_target {
        if let Some(proc) = cfg.procedures.values().find(|p| p.entry_address == target) {
            return proc.name.clone();
        }
        return format!("SUB_{:08X}", target);
    }
    if let Some(first) = inst.operands.first() {
        return format!("[R{}]", first);
    }
    "UNKNOWN".to_string()
}

fn is_unconditional_branch(inst: &Instruction) -> bool {
    if inst.mnemonic == "BC" && inst.operands.first().map(String::as_str) == Some("15") {
        return true;
    }
    if inst.mnemonic == "BCR" && inst.operands.first().map(String::as_str) == Some("15") {
        return true;
    }
    inst.mnemonic == "B" || inst.mnemonic == "BR"
}

fn find_loop_headers(proc: &Procedure, cfg: &ControlFlowGraph) -> HashSet<String> {
    let mut headers = HashSet::new();
    let block_set: HashSet<&String> = proc.block_ids.iter().collect();

    for block_id in &proc.block_ids {
        if let Some(block) = cfg.basic_blocks.get(block_id) {
            for succ_id in block.successors() {
                if block_set.contains(&succ_id) {
                    if let Some(succ_block) = cfg.basic_blocks.get(&succ_id) {
                        if succ_block.start_address <= block.start_address {
                            headers.insert(succ_id);
                        }
                    }
                }
            }
        }
    }
    headers
}

fn find_block_by_address(cfg: &ControlFlowGraph, address: u32) -> Option<&BasicBlock> {
    cfg.basic_blocks
        .values()
        .find(|b| b.start_address <= address && address <= b.end_address)
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
    fn test_generate_simple_procedure() {
        let code = [0x05, 0xEF, 0x07, 0xFE]; // BALR 14,15 ; BCR 15,14 (return)
        let data = program_object(&code);
        let result = crate::pipeline::analyze(&data, Some("MOD1".into()), &EngineOptions::new()).unwrap();
        let out = generate(&result.cfg);
        assert!(out.contains("PROCEDURE ENTRY_00000020()"));
        assert!(out.contains("RETURN"));
        assert!(out.contains("END PROCEDURE"));
    }

    #[test]
    fn test_generate_conditional_branch_produces_if_else() {
        let mut code = vec![0x47, 0x80, 0x00, 0x10]; // BC 8,16 -> target 0x10
        code.extend_from_slice(&[0x18, 0x0F]); // fallthrough: LR 0,15
        while code.len() < 0x10 {
            code.push(0x00);
        }
        code.extend_from_slice(&[0x07, 0xFE]); // target: return
        let data = program_object(&code);
        let result = crate::pipeline::analyze(&data, None, &EngineOptions::new()).unwrap();
        let out = generate(&result.cfg);
        assert!(out.contains("IF "));
        assert!(out.contains("ELSE"));
        assert!(out.contains("END IF"));
    }

    #[test]
    fn test_instruction_to_statement_load() {
        let inst = Instruction {
            address: 0,
            bytes: vec![0x58, 0x20, 0x10, 0x00],
            mnemonic: "L".into(),
            operands: vec!["2".into(), "0(1)".into()],
            format: crate::types::InstructionFormat::Rx,
            label: None,
            is_branch: false,
            is_call: false,
            is_return: false,
            branch_target: None,
            annotation: None,
            confidence: Confidence::High,
        };
        assert_eq!(instruction_to_statement(&inst), "R2 = LOAD(0(1))");
    }
}
