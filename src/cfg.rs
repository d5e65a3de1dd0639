//! Control-flow graph construction.
//!
//! Two passes over the address-ordered instruction stream: [`find_leaders`]
//! computes the set of basic-block leaders, and [`build`] materializes
//! blocks, wires successor/predecessor edges, and assigns synthetic labels.
//!
//! Blocks and their cross-references use stable string ids
//! (`ControlFlowGraph::block_id`) throughout, never list indices or integer
//! addresses — this avoids the back-pointer bookkeeping a pointer-based
//! graph would need to survive Rust's ownership rules, and sidesteps a
//! class of id-type inconsistency bugs entirely.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{BasicBlock, BlockType, ControlFlowGraph, Instruction};

fn is_unconditional_branch(inst: &Instruction) -> bool {
    if inst.mnemonic == "BC" && inst.operands.first().map(String::as_str) == Some("15") {
        return true;
    }
    if inst.mnemonic == "BCR" && inst.operands.first().map(String::as_str) == Some("15") {
        return true;
    }
    inst.mnemonic == "B" || inst.mnemonic == "BR"
}

/// Compute the set of basic-block leader addresses.
pub fn find_leaders(instructions: &[Instruction], entry_points: &[u32]) -> HashSet<u32> {
    let instruction_map: HashMap<u32, &Instruction> =
        instructions.iter().map(|i| (i.address, i)).collect();
    let mut leaders = HashSet::new();

    for ep in entry_points {
        if instruction_map.contains_key(ep) {
            leaders.insert(*ep);
        }
    }
    if leaders.is_empty() {
        if let Some(first) = instructions.first() {
            leaders.insert(first.address);
        }
    }

    for (i, inst) in instructions.iter().enumerate() {
        if inst.is_branch {
            if let Some(target) = inst.branch_target {
                if instruction_map.contains_key(&target) {
                    leaders.insert(target);
                }
            }
            if !is_unconditional_branch(inst) {
                if let Some(next) = instructions.get(i + 1) {
                    leaders.insert(next.address);
                }
            }
        } else if inst.is_call || inst.is_return {
            if let Some(next) = instructions.get(i + 1) {
                leaders.insert(next.address);
            }
        }
    }

    leaders
}

/// Build basic blocks from a sorted leader set and an instruction stream.
fn create_basic_blocks(
    instructions: &[Instruction],
    leaders: &HashSet<u32>,
) -> BTreeMap<u32, BasicBlock> {
    let mut sorted_leaders: Vec<u32> = leaders.iter().copied().collect();
    sorted_leaders.sort_unstable();

    let mut blocks = BTreeMap::new();
    for (i, &leader) in sorted_leaders.iter().enumerate() {
        let end_addr = if i + 1 < sorted_leaders.len() {
            sorted_leaders[i + 1] - 1
        } else if let Some(last) = instructions.last() {
            last.address + last.bytes.len() as u32 - 1
        } else {
            leader
        };

        let block_instructions: Vec<Instruction> = instructions
            .iter()
            .filter(|inst| inst.address >= leader && inst.address <= end_addr)
            .cloned()
            .collect();

        if block_instructions.is_empty() {
            continue;
        }

        let block_type = determine_block_type(&block_instructions);
        let end_address = block_instructions.last().unwrap().address;
        let id = ControlFlowGraph::block_id(leader);
        blocks.insert(
            leader,
            BasicBlock {
                id,
                start_address: leader,
                end_address,
                instructions: block_instructions,
                block_type,
                predecessors: HashSet::new(),
                branch_targets: Vec::new(),
                fall_through: None,
            },
        );
    }
    blocks
}

fn determine_block_type(instructions: &[Instruction]) -> BlockType {
    let last = instructions.last().expect("non-empty block");
    if instructions.iter().any(|i| i.is_call) {
        return BlockType::Call;
    }
    if last.is_return {
        return BlockType::Return;
    }
    if last.is_branch {
        return BlockType::Branch;
    }
    BlockType::Normal
}

fn find_block_start_by_address(blocks: &BTreeMap<u32, BasicBlock>, address: u32) -> Option<u32> {
    blocks
        .values()
        .find(|b| b.start_address <= address && address <= b.end_address)
        .map(|b| b.start_address)
}

fn find_next_block_start(blocks: &BTreeMap<u32, BasicBlock>, after_end: u32) -> Option<u32> {
    blocks
        .keys()
        .copied()
        .filter(|&start| start > after_end)
        .min()
}

/// Wire successor/predecessor edges; returns the addresses of branch
/// instructions whose target could not be resolved to a block.
fn add_control_flow_edges(blocks: &mut BTreeMap<u32, BasicBlock>) -> Vec<u32> {
    let mut unresolved = Vec::new();
    let starts: Vec<u32> = blocks.keys().copied().collect();

    for start in starts {
        let (last_inst, block_end, is_unconditional) = {
            let block = blocks.get(&start).unwrap();
            let last = block.instructions.last().unwrap().clone();
            (last.clone(), block.end_address, is_unconditional_branch(&last))
        };

        if last_inst.is_call {
            // Calls never add an edge to their target here; the call target
            // belongs to its own procedure and is followed only by the
            // procedure detector. A call's fall-through is its only CFG
            // successor, and an unresolved call target is not logged as an
            // unresolved branch (register-indirect calls are routine, not
            // an anomaly).
            if let Some(next_start) = find_next_block_start(blocks, block_end) {
                let next_id = ControlFlowGraph::block_id(next_start);
                let this_id = ControlFlowGraph::block_id(start);
                blocks.get_mut(&start).unwrap().fall_through = Some(next_id);
                blocks.get_mut(&next_start).unwrap().predecessors.insert(this_id);
            }
        } else if last_inst.is_branch {
            if let Some(target) = last_inst.branch_target {
                if let Some(target_start) = find_block_start_by_address(blocks, target) {
                    let target_id = ControlFlowGraph::block_id(target_start);
                    let this_id = ControlFlowGraph::block_id(start);
                    blocks
                        .get_mut(&start)
                        .unwrap()
                        .branch_targets
                        .push(target_id.clone());
                    blocks
                        .get_mut(&target_start)
                        .unwrap()
                        .predecessors
                        .insert(this_id);
                } else {
                    unresolved.push(last_inst.address);
                    blocks.get_mut(&start).unwrap().instructions.last_mut().unwrap().annotation =
                        Some("UNRESOLVED_TARGET".to_string());
                }
            } else {
                unresolved.push(last_inst.address);
                blocks.get_mut(&start).unwrap().instructions.last_mut().unwrap().annotation =
                    Some("UNRESOLVED_TARGET (indirect)".to_string());
            }

            if !is_unconditional {
                if let Some(next_start) = find_next_block_start(blocks, block_end) {
                    let next_id = ControlFlowGraph::block_id(next_start);
                    let this_id = ControlFlowGraph::block_id(start);
                    blocks.get_mut(&start).unwrap().fall_through = Some(next_id);
                    blocks.get_mut(&next_start).unwrap().predecessors.insert(this_id);
                }
            }
        } else if last_inst.is_return {
            // no successors
        } else if let Some(next_start) = find_next_block_start(blocks, block_end) {
            let next_id = ControlFlowGraph::block_id(next_start);
            let this_id = ControlFlowGraph::block_id(start);
            blocks.get_mut(&start).unwrap().fall_through = Some(next_id);
            blocks.get_mut(&next_start).unwrap().predecessors.insert(this_id);
        }
    }

    unresolved
}

/// Assign synthetic labels (`ENTRY`, `PROC_NNN`, `L_NNNNN`) to instructions
/// that begin a targeted or entry block, and to unlabeled call targets.
fn assign_synthetic_labels(
    blocks: &mut BTreeMap<u32, BasicBlock>,
    instructions: &mut [Instruction],
    entry_points: &HashSet<u32>,
) {
    let mut counter = 1u32;
    let starts: Vec<u32> = blocks.keys().copied().collect();

    for start in &starts {
        let block = blocks.get(start).unwrap();
        let is_entry = entry_points.contains(start);
        if block.predecessors.is_empty() && !is_entry {
            continue;
        }
        let label = if is_entry {
            "ENTRY".to_string()
        } else if block.block_type == BlockType::Call {
            let l = format!("PROC_{:03}", counter);
            counter += 1;
            l
        } else {
            let l = format!("L_{:05}", counter);
            counter += 1;
            l
        };
        if let Some(first) = blocks.get_mut(start).unwrap().instructions.first_mut() {
            if first.label.is_none() {
                first.label = Some(label.clone());
            }
        }
        if let Some(inst) = instructions.iter_mut().find(|i| i.address == *start) {
            if inst.label.is_none() {
                inst.label = Some(label);
            }
        }
    }

    let call_targets: Vec<u32> = instructions
        .iter()
        .filter(|i| i.is_call)
        .filter_map(|i| i.branch_target)
        .collect();
    for target in call_targets {
        if let Some(inst) = instructions.iter_mut().find(|i| i.address == target) {
            if inst.label.is_none() {
                inst.label = Some(format!("PROC_{:03}", counter));
                counter += 1;
            }
        }
        if let Some(start) = find_block_start_by_address(blocks, target) {
            if let Some(first) = blocks.get_mut(&start).unwrap().instructions.first_mut() {
                if first.label.is_none() {
                    first.label = first
                        .label
                        .clone()
                        .or_else(|| Some(format!("PROC_{:03}", counter)));
                }
            }
        }
    }
}

/// Build the complete CFG (leaders -> blocks -> edges -> labels) from a
/// disassembled instruction stream, populating `cfg.basic_blocks` and
/// `cfg.unresolved_branches` in place.
pub fn build(cfg: &mut ControlFlowGraph, instructions: &mut Vec<Instruction>) {
    let entry_points: HashSet<u32> = cfg.entry_points.iter().copied().collect();
    let leaders = find_leaders(instructions, &cfg.entry_points);
    let mut blocks = create_basic_blocks(instructions, &leaders);
    let unresolved = add_control_flow_edges(&mut blocks);
    assign_synthetic_labels(&mut blocks, instructions, &entry_points);

    // Re-sync instructions inside blocks with the labels/annotations just
    // assigned on the flat instruction stream.
    let labeled: HashMap<u32, Instruction> =
        instructions.iter().map(|i| (i.address, i.clone())).collect();
    for block in blocks.values_mut() {
        for inst in block.instructions.iter_mut() {
            if let Some(updated) = labeled.get(&inst.address) {
                *inst = updated.clone();
            }
        }
    }

    cfg.unresolved_branches.extend(unresolved);
    cfg.basic_blocks = blocks
        .into_values()
        .map(|b| (b.id.clone(), b))
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_instruction;

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
    fn test_prologue_single_block() {
        let code = [
            0x90, 0xEC, 0xD0, 0x0C, 0x41, 0x10, 0x01, 0x00, 0x58, 0x20, 0x10, 0x00, 0x50, 0x20,
            0x10, 0x00, 0x98, 0xEC, 0xD0, 0x0C, 0x07, 0xFE,
        ];
        let mut instructions = decode_all(&code, 0);
        let mut cfg = ControlFlowGraph::new(None, vec![0]);
        build(&mut cfg, &mut instructions);
        assert!(!cfg.basic_blocks.is_empty());
        let entry = cfg.basic_blocks.get(&ControlFlowGraph::block_id(0)).unwrap();
        assert_eq!(entry.instructions.len(), 6);
    }

    #[test]
    fn test_conditional_branch_creates_two_successors() {
        // BC 8,X'0010' (conditional, target absolute 0x10) ; LR 0,15 (fallthrough) ; ... target: BR 14
        let mut code = vec![0x47, 0x80, 0x00, 0x10]; // BC 8,16 -> target addr 0x10
        code.extend_from_slice(&[0x18, 0x0F]); // fallthrough: LR 0,15 @ 4
        while code.len() < 0x10 {
            code.push(0x00); // padding, decodes as SPM/UNKNOWN 2-byte instrs
        }
        code.extend_from_slice(&[0x07, 0xFE]); // target @0x10: BCR 15,14 (return)
        let mut instructions = decode_all(&code, 0);
        let mut cfg = ControlFlowGraph::new(None, vec![0]);
        build(&mut cfg, &mut instructions);
        let entry = cfg.basic_blocks.get(&ControlFlowGraph::block_id(0)).unwrap();
        assert!(entry.fall_through.is_some());
        assert_eq!(entry.branch_targets.len(), 1);
    }

    #[test]
    fn test_unresolved_conditional_branch() {
        let code = [0x47, 0x80, 0xD0, 0x20]; // BC 8,X (base reg D, nonzero) -> unresolved
        let mut instructions = decode_all(&code, 0);
        let mut cfg = ControlFlowGraph::new(None, vec![0]);
        build(&mut cfg, &mut instructions);
        assert_eq!(cfg.unresolved_branches, vec![0]);
    }

    #[test]
    fn test_edge_symmetry() {
        let mut code = vec![0x47, 0xF0, 0x00, 0x08]; // BC 15,8 unconditional -> target 8
        code.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // dead padding (unreachable)
        code.extend_from_slice(&[0x07, 0xFE]); // target @8: return
        let mut instructions = decode_all(&code, 0);
        let mut cfg = ControlFlowGraph::new(None, vec![0]);
        build(&mut cfg, &mut instructions);
        for block in cfg.basic_blocks.values() {
            for succ in block.successors() {
                let succ_block = cfg.basic_blocks.get(&succ).unwrap();
                assert!(succ_block.predecessors.contains(&block.id));
            }
        }
    }
}
