//! Procedure (function) boundary detection and call-graph construction.
//!
//! Runs three independent heuristics in a fixed order — entry points, call
//! targets, then prologue patterns — each skipping any address already
//! claimed by an earlier pass. Each procedure's block set is the reachable
//! closure over successor edges from its entry block, stopping at call
//! edges (a call's fall-through is followed; its target is not, since that
//! target belongs to its own procedure).

use std::collections::HashSet;

use crate::types::{BasicBlock, Confidence, ControlFlowGraph, Procedure};

/// Run all three detection passes and populate `cfg.procedures` and
/// `cfg.call_graph`.
pub fn detect_procedures(cfg: &mut ControlFlowGraph) {
    let mut procedures = Vec::new();
    let mut claimed: HashSet<u32> = HashSet::new();

    // Method 1: entry points.
    let entry_points = cfg.entry_points.clone();
    for ep in entry_points {
        if claimed.contains(&ep) {
            continue;
        }
        if let Some(proc) = build_procedure(cfg, ep, "ENTRY", "entry_point", Confidence::High) {
            claimed.insert(ep);
            procedures.push(proc);
        }
    }

    // Method 2: call targets.
    let call_targets = collect_call_targets(cfg);
    for target in call_targets {
        if claimed.contains(&target) {
            continue;
        }
        if let Some(proc) = build_procedure(cfg, target, "SUB", "call_target", Confidence::Medium)
        {
            claimed.insert(target);
            procedures.push(proc);
        }
    }

    // Method 3: prologue pattern (STM 14,...).
    let prologue_starts = collect_prologue_starts(cfg);
    for start in prologue_starts {
        if claimed.contains(&start) {
            continue;
        }
        if let Some(proc) = build_procedure(cfg, start, "FUNC", "prologue_pattern", Confidence::Medium) {
            claimed.insert(start);
            procedures.push(proc);
        }
    }

    let procedures_by_id: std::collections::HashMap<String, Procedure> = procedures
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();
    cfg.procedures = procedures_by_id;

    build_call_graph(cfg);
}

fn find_block_start_by_address(cfg: &ControlFlowGraph, address: u32) -> Option<String> {
    cfg.basic_blocks
        .values()
        .find(|b| b.start_address <= address && address <= b.end_address)
        .map(|b| b.id.clone())
}

fn build_procedure(
    cfg: &ControlFlowGraph,
    entry_addr: u32,
    name_prefix: &str,
    method: &str,
    confidence: Confidence,
) -> Option<Procedure> {
    let start_id = find_block_start_by_address(cfg, entry_addr)?;

    let name = if name_prefix == "ENTRY" {
        format!("ENTRY_{:08X}", entry_addr)
    } else if name_prefix == "SUB" {
        format!("SUB_{:08X}", entry_addr)
    } else {
        format!("FUNC_{:08X}", entry_addr)
    };

    let mut proc = Procedure {
        id: ControlFlowGraph::proc_id(entry_addr),
        name,
        entry_address: entry_addr,
        exit_addresses: Vec::new(),
        block_ids: Vec::new(),
        calls_to: HashSet::new(),
        called_by: HashSet::new(),
        confidence,
        detection_method: method.to_string(),
    };

    let mut visited = HashSet::new();
    collect_procedure_blocks(cfg, &start_id, &mut proc, &mut visited);
    Some(proc)
}

fn collect_procedure_blocks(
    cfg: &ControlFlowGraph,
    block_id: &str,
    proc: &mut Procedure,
    visited: &mut HashSet<String>,
) {
    if visited.contains(block_id) {
        return;
    }
    visited.insert(block_id.to_string());

    let block = match cfg.basic_blocks.get(block_id) {
        Some(b) => b,
        None => return,
    };
    proc.block_ids.push(block_id.to_string());

    if let Some(last) = block.instructions.last() {
        if last.is_return {
            proc.exit_addresses.push(last.address);
        }
    }

    for succ_id in block.successors() {
        if visited.contains(&succ_id) {
            continue;
        }
        if let Some(succ_block) = cfg.basic_blocks.get(&succ_id) {
            if !is_call_edge(block, succ_block) {
                collect_procedure_blocks(cfg, &succ_id, proc, visited);
            }
        }
    }
}

fn is_call_edge(from_block: &BasicBlock, to_block: &BasicBlock) -> bool {
    if let Some(last) = from_block.instructions.last() {
        return last.is_call && last.branch_target == Some(to_block.start_address);
    }
    false
}

fn collect_call_targets(cfg: &ControlFlowGraph) -> Vec<u32> {
    let mut targets = Vec::new();
    let mut seen = HashSet::new();
    let mut block_starts: Vec<u32> = cfg.basic_blocks.values().map(|b| b.start_address).collect();
    block_starts.sort_unstable();
    for start in block_starts {
        let block = cfg
            .basic_blocks
            .values()
            .find(|b| b.start_address == start)
            .unwrap();
        for inst in &block.instructions {
            if inst.is_call {
                if let Some(target) = inst.branch_target {
                    if seen.insert(target) {
                        targets.push(target);
                    }
                }
            }
        }
    }
    targets
}

fn collect_prologue_starts(cfg: &ControlFlowGraph) -> Vec<u32> {
    let mut starts: Vec<u32> = cfg
        .basic_blocks
        .values()
        .filter(|b| {
            b.instructions
                .first()
                .map(|i| i.mnemonic == "STM" && i.operands.first().map(String::as_str) == Some("14"))
                .unwrap_or(false)
        })
        .map(|b| b.start_address)
        .collect();
    starts.sort_unstable();
    starts
}

fn build_call_graph(cfg: &mut ControlFlowGraph) {
    let proc_ids: Vec<String> = cfg.procedures.keys().cloned().collect();
    let mut edges: Vec<(String, String)> = Vec::new();

    for proc_id in &proc_ids {
        let block_ids = cfg.procedures.get(proc_id).unwrap().block_ids.clone();
        for block_id in block_ids {
            let block = match cfg.basic_blocks.get(&block_id) {
                Some(b) => b,
                None => continue,
            };
            for inst in &block.instructions {
                if inst.is_call {
                    if let Some(target_addr) = inst.branch_target {
                        if let Some(target_proc_id) = cfg
                            .procedures
                            .values()
                            .find(|p| p.entry_address == target_addr)
                            .map(|p| p.id.clone())
                        {
                            edges.push((proc_id.clone(), target_proc_id));
                        }
                    }
                }
            }
        }
    }

    for (caller, callee) in edges {
        cfg.call_graph
            .entry(caller.clone())
            .or_insert_with(HashSet::new)
            .insert(callee.clone());
        if let Some(caller_proc) = cfg.procedures.get_mut(&caller) {
            caller_proc.calls_to.insert(callee.clone());
        }
        if let Some(callee_proc) = cfg.procedures.get_mut(&callee) {
            callee_proc.called_by.insert(caller);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg;
    use crate::decoder::decode_instruction;
    use crate::types::Instruction;

    fn decode_all(code: &[u8], base: u32) -> Vec<Instruction> {
        let mut out = Vec::new();
        let mut offset = 0;
        let mut addr = base;
        while offset < code.len() {
            if let Some(inst) = decode_instruction(code, offset, addr) {
                offset += inst.bytes.len();
                addr += inst.bytes.len() as u32;
                out.push(inst);
            } else {
                offset += 1;
                addr += 1;
            }
        }
        out
    }

    #[test]
    fn test_prologue_detection() {
        let code = [
            0x90, 0xEC, 0xD0, 0x0C, // STM 14,12,12(13)
            0x41, 0x10, 0x01, 0x00, // LA 1,0(1)
            0x98, 0xEC, 0xD0, 0x0C, // LM 14,12,12(13)
            0x07, 0xFE, // BCR 15,14 (return)
        ];
        let mut instructions = decode_all(&code, 0);
        let mut cfg_graph = ControlFlowGraph::new(None, vec![]);
        cfg::build(&mut cfg_graph, &mut instructions);
        detect_procedures(&mut cfg_graph);
        assert_eq!(cfg_graph.procedures.len(), 1);
        let proc = cfg_graph.procedures.values().next().unwrap();
        assert_eq!(proc.detection_method, "prologue_pattern");
        assert_eq!(proc.confidence, Confidence::Medium);
        assert!(proc.name.starts_with("FUNC_"));
    }

    #[test]
    fn test_entry_point_procedure() {
        let code = [0x05, 0xEF, 0x07, 0xFE]; // BALR 14,15 ; BCR 15,14
        let mut instructions = decode_all(&code, 0x1000);
        let mut cfg_graph = ControlFlowGraph::new(None, vec![0x1000]);
        cfg::build(&mut cfg_graph, &mut instructions);
        detect_procedures(&mut cfg_graph);
        assert_eq!(cfg_graph.procedures.len(), 1);
        let proc = cfg_graph.procedures.values().next().unwrap();
        assert_eq!(proc.confidence, Confidence::High);
        assert_eq!(proc.name, "ENTRY_00001000");
    }

    #[test]
    fn test_call_graph_edge() {
        // entry: BAL 1,8 (call to 8) then return; target @8: return
        let mut code = vec![0x45, 0x10, 0x00, 0x08]; // BAL 1,8(0)
        code.extend_from_slice(&[0x07, 0xFE]); // return
        code.extend_from_slice(&[0x00, 0x00]); // padding to reach addr 8
        code.extend_from_slice(&[0x07, 0xFE]); // @8: return
        let mut instructions = decode_all(&code, 0);
        let mut cfg_graph = ControlFlowGraph::new(None, vec![0]);
        cfg::build(&mut cfg_graph, &mut instructions);
        detect_procedures(&mut cfg_graph);
        assert!(cfg_graph.procedures.len() >= 2);
        let entry_proc = cfg_graph
            .procedures
            .values()
            .find(|p| p.entry_address == 0)
            .unwrap();
        assert_eq!(entry_proc.calls_to.len(), 1);
    }
}
