//! Core intermediate representation for the reverse-engineering engine.
//!
//! This module defines every entity the pipeline produces: decoded
//! instructions, basic blocks, procedures, the control-flow graph, data
//! regions, and module metadata. Inter-entity references use stable string
//! ids rather than owning pointers, so the predecessor/successor and
//! caller/callee relations can hold cycles (loops, recursion) without any
//! back-pointer bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Three-valued confidence ordinal.
///
/// Kept as an ordinal rather than a float throughout the intermediate
/// representation so thresholds and comparisons stay unambiguous; convert
/// to a numeric score only at rendering time via [`Confidence::as_score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Low confidence: heuristic or fallback classification.
    Low,
    /// Medium confidence: a single corroborating heuristic.
    Medium,
    /// High confidence: direct evidence (an entry point, a resolved call).
    High,
}

impl Confidence {
    /// Convert to a numeric score for rendering.
    pub fn as_score(self) -> f64 {
        match self {
            Confidence::High => 0.95,
            Confidence::Medium => 0.75,
            Confidence::Low => 0.30,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// Instruction encoding format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstructionFormat {
    /// Register-Register (2 bytes).
    Rr,
    /// Register-Register-Extended (4 bytes).
    Rre,
    /// Register-Indexed-storage (4 bytes).
    Rx,
    /// Register-Indexed-storage long displacement (6 bytes).
    Rxy,
    /// Register-storage (4 bytes).
    Rs,
    /// Register-storage long displacement (6 bytes).
    Rsy,
    /// Storage-Immediate (4 bytes).
    Si,
    /// Storage-Storage (6 bytes).
    Ss,
    /// Register-Immediate (4 bytes).
    Ri,
    /// Register-Immediate long (6 bytes).
    Ril,
    /// Undecodable bytes consumed as an opaque placeholder.
    Unknown,
}

/// Classification of a basic block by its role in control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Block begins at a module entry point.
    Entry,
    /// Straight-line block with no special role.
    Normal,
    /// Block whose terminator is a call.
    Call,
    /// Block whose terminator is a return.
    Return,
    /// Block whose terminator is a (conditional or unconditional) branch.
    Branch,
    /// Block built from bytes that failed to decode.
    Unknown,
}

/// A single decoded (or undecodable) instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Absolute address of the first byte.
    pub address: u32,
    /// Raw encoded bytes.
    pub bytes: Vec<u8>,
    /// Mnemonic, or `"UNKNOWN"` when the opcode could not be decoded.
    pub mnemonic: String,
    /// Rendered operand strings, in HLASM order.
    pub operands: Vec<String>,
    /// Encoding format.
    pub format: InstructionFormat,
    /// Synthetic label assigned by the CFG builder, if this address is a
    /// block leader.
    pub label: Option<String>,
    /// True if this instruction is any branch (conditional, unconditional,
    /// call, or return).
    pub is_branch: bool,
    /// True if this instruction is a call (a branch subtype for leader
    /// purposes: every call is also a branch).
    pub is_call: bool,
    /// True if this instruction is a return.
    pub is_return: bool,
    /// Statically resolved branch target, when computable.
    pub branch_target: Option<u32>,
    /// Free-form annotation (e.g. `"UNRESOLVED_TARGET"`).
    pub annotation: Option<String>,
    /// Confidence in this instruction's decoding.
    pub confidence: Confidence,
}

impl Instruction {
    /// Length in bytes of the encoded instruction.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if this instruction decoded to zero bytes (never constructed by
    /// the decoder, but kept so `len`/`is_empty` form a matched pair).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Address immediately following this instruction.
    pub fn next_address(&self) -> u32 {
        self.address + self.bytes.len() as u32
    }

    /// Render one HLASM-style listing line, ignoring any annotation.
    ///
    /// `AAAAAAAA BBBBBBBBBBBBBBBB LABEL     MNEM   OPERANDS [* annotation]`
    pub fn to_asm_line(&self) -> String {
        let hex_bytes = hex::encode_upper(&self.bytes);
        let label = self.label.clone().unwrap_or_default();
        let operands = self.operands.join(",");
        let mut line = format!(
            "{:08X} {:<16} {:<9} {:<6} {}",
            self.address, hex_bytes, label, self.mnemonic, operands
        );
        if let Some(ann) = &self.annotation {
            line.push_str(&format!(" * {}", ann));
        }
        line
    }
}

/// A maximal straight-line run of instructions with a single entry and a
/// single exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Stable id, `block_<start address in hex>`.
    pub id: String,
    /// Address of the first instruction.
    pub start_address: u32,
    /// Address of the last instruction.
    pub end_address: u32,
    /// Ordered instructions belonging to this block.
    pub instructions: Vec<Instruction>,
    /// Role of this block in control flow.
    pub block_type: BlockType,
    /// Ids of blocks that can transfer control into this block.
    pub predecessors: HashSet<String>,
    /// Ids of blocks this block can transfer control to via an explicit
    /// (non-fall-through) branch target.
    pub branch_targets: Vec<String>,
    /// Id of the fall-through successor block, if control can fall off the
    /// end of this block.
    pub fall_through: Option<String>,
}

impl BasicBlock {
    /// All successor block ids (fall-through plus explicit targets).
    pub fn successors(&self) -> Vec<String> {
        let mut out = self.branch_targets.clone();
        if let Some(ft) = &self.fall_through {
            if !out.contains(ft) {
                out.push(ft.clone());
            }
        }
        out
    }
}

/// An inferred procedure (function) boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    /// Stable id, `proc_<entry address in hex>`.
    pub id: String,
    /// Display name, e.g. `ENTRY_00001000`, `SUB_00001040`, `FUNC_00001080`.
    pub name: String,
    /// Entry address (start of the procedure's entry block).
    pub entry_address: u32,
    /// Addresses of return instructions found in the procedure's blocks.
    pub exit_addresses: Vec<u32>,
    /// Ids of blocks belonging to this procedure.
    pub block_ids: Vec<String>,
    /// Ids of procedures this procedure calls.
    pub calls_to: HashSet<String>,
    /// Ids of procedures that call this procedure.
    pub called_by: HashSet<String>,
    /// Confidence of the detection.
    pub confidence: Confidence,
    /// Which heuristic found this procedure: `"entry_point"`,
    /// `"call_target"`, or `"prologue_pattern"`.
    pub detection_method: String,
}

/// A classified address range within the code region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    /// Densely decodable: very likely executable code.
    Code,
    /// Sparsely decodable: very likely data.
    Data,
    /// Ambiguous decode density.
    Unknown,
}

/// A contiguous, classified address range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Inclusive start address.
    pub start: u32,
    /// Inclusive end address.
    pub end: u32,
    /// Classification.
    pub region_type: RegionType,
    /// Confidence of the classification.
    pub confidence: Confidence,
    /// Free-form evidence string, e.g. `"decode_density=0.91"` or
    /// `"constant_pool_pattern"`.
    pub evidence: String,
    /// Fraction of bytes in this range that decoded successfully.
    pub decode_rate: f64,
}

/// The control-flow graph and every entity derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    /// Module name, if known.
    pub module_name: Option<String>,
    /// Addresses considered entry points.
    pub entry_points: Vec<u32>,
    /// Basic blocks keyed by id.
    pub basic_blocks: HashMap<String, BasicBlock>,
    /// Detected procedures keyed by id.
    pub procedures: HashMap<String, Procedure>,
    /// Caller procedure id -> set of callee procedure ids.
    pub call_graph: HashMap<String, HashSet<String>>,
    /// Source addresses of branches whose target could not be resolved.
    pub unresolved_branches: Vec<u32>,
    /// Classified data/code/unknown regions.
    pub data_regions: Vec<Region>,
}

impl ControlFlowGraph {
    /// Construct an empty CFG seeded with a module name and entry points.
    pub fn new(module_name: Option<String>, entry_points: Vec<u32>) -> Self {
        Self {
            module_name,
            entry_points,
            basic_blocks: HashMap::new(),
            procedures: HashMap::new(),
            call_graph: HashMap::new(),
            unresolved_branches: Vec::new(),
            data_regions: Vec::new(),
        }
    }

    /// Canonical block id for a start address.
    pub fn block_id(address: u32) -> String {
        format!("block_{:08X}", address)
    }

    /// Canonical procedure id for an entry address.
    pub fn proc_id(address: u32) -> String {
        format!("proc_{:08X}", address)
    }
}

/// Format of the ingested artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Classic MVS/z/OS load module.
    LoadModule,
    /// Binder-produced program object.
    ProgramObject,
    /// Format could not be determined; heuristics were applied.
    Unknown,
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactFormat::LoadModule => write!(f, "load_module"),
            ArtifactFormat::ProgramObject => write!(f, "program_object"),
            ArtifactFormat::Unknown => write!(f, "unknown"),
        }
    }
}

/// A section/CSECT descriptor extracted from a program object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionInfo {
    /// Offset within the artifact.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
    /// Section kind (currently always `"text"`; the format distinguishes no
    /// others).
    pub kind: String,
}

/// Metadata describing the ingested module, independent of its contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// Module name (typically the input file stem).
    pub name: Option<String>,
    /// Detected artifact format.
    pub format_type: Option<ArtifactFormat>,
    /// Entry point address, if determined.
    pub entry_point: Option<u32>,
    /// External symbol names (program objects only).
    pub external_symbols: Vec<String>,
    /// Section/CSECT descriptors (program objects only).
    pub csect_info: Vec<SectionInfo>,
    /// Addressing mode: 24, 31, or 64.
    pub amode: Option<u8>,
    /// Residency mode: `"24"` or `"ANY"`.
    pub rmode: Option<String>,
    /// Free-form extracted attributes (e.g. `pds_member`).
    pub attributes: HashMap<String, String>,
}

/// The immutable, complete output of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisassemblyResult {
    /// Module metadata.
    pub metadata: ModuleMetadata,
    /// Address-ordered decoded instructions.
    pub instructions: Vec<Instruction>,
    /// Control-flow graph, procedures, and regions.
    pub cfg: ControlFlowGraph,
    /// Undecodable byte runs: `(start, end inclusive, raw bytes)`.
    pub unknown_regions: Vec<(u32, u32, Vec<u8>)>,
    /// Non-fatal warnings accumulated during analysis.
    pub warnings: Vec<String>,
    /// Summary statistics, keyed by name.
    pub statistics: HashMap<String, StatValue>,
}

/// A statistics value: either a count, a rate, or a small ranked list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    /// An integer count.
    Count(u64),
    /// A rate in `[0, 1]`.
    Rate(f64),
    /// A string (e.g. a file path).
    Text(String),
    /// Ranked `(name, count)` pairs, e.g. top mnemonics.
    Ranked(Vec<(String, u64)>),
}

/// Tunable thresholds and limits for one analysis run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Decode-rate threshold above which a region is classified CODE.
    pub code_density_threshold: f64,
    /// Decode-rate threshold below which a region is classified DATA.
    pub data_density_threshold: f64,
    /// Maximum unknown-region size eligible for constant-pool reclassification.
    pub constant_pool_max_size: u32,
    /// Minimum confidence a procedure detection must meet to be kept.
    pub min_confidence: Confidence,
    /// Maximum bytes to scan when searching for a heuristic entry point.
    pub max_scan_bytes: usize,
}

impl EngineOptions {
    /// Default thresholds (0.70 / 0.30, matching the region classifier's
    /// documented defaults).
    pub fn new() -> Self {
        Self {
            code_density_threshold: 0.70,
            data_density_threshold: 0.30,
            constant_pool_max_size: 256,
            min_confidence: Confidence::Low,
            max_scan_bytes: 256,
        }
    }

    /// Thorough analysis: widen the heuristic entry-point search and accept
    /// lower-confidence procedures.
    pub fn thorough() -> Self {
        Self {
            max_scan_bytes: 4096,
            min_confidence: Confidence::Low,
            ..Self::new()
        }
    }

    /// Fast analysis: narrow scanning and only keep high-confidence
    /// procedures.
    pub fn fast() -> Self {
        Self {
            max_scan_bytes: 64,
            min_confidence: Confidence::High,
            ..Self::new()
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn test_confidence_score() {
        assert_eq!(Confidence::High.as_score(), 0.95);
        assert_eq!(Confidence::Low.as_score(), 0.30);
    }

    #[test]
    fn test_instruction_next_address() {
        let inst = Instruction {
            address: 0x1000,
            bytes: vec![0x05, 0xEF],
            mnemonic: "BALR".into(),
            operands: vec!["14".into(), "15".into()],
            format: InstructionFormat::Rr,
            label: None,
            is_branch: true,
            is_call: true,
            is_return: false,
            branch_target: None,
            annotation: None,
            confidence: Confidence::High,
        };
        assert_eq!(inst.next_address(), 0x1002);
        assert_eq!(inst.len(), 2);
    }

    #[test]
    fn test_asm_line_format() {
        let inst = Instruction {
            address: 0x1000,
            bytes: vec![0x05, 0xEF],
            mnemonic: "BALR".into(),
            operands: vec!["14".into(), "15".into()],
            format: InstructionFormat::Rr,
            label: Some("ENTRY".into()),
            is_branch: true,
            is_call: true,
            is_return: false,
            branch_target: None,
            annotation: None,
            confidence: Confidence::High,
        };
        let line = inst.to_asm_line();
        assert!(line.starts_with("00001000 05EF"));
        assert!(line.contains("ENTRY"));
        assert!(line.contains("BALR"));
        assert!(line.contains("14,15"));
    }

    #[test]
    fn test_block_successors_dedup_fallthrough() {
        let mut block = BasicBlock {
            id: "block_00001000".into(),
            start_address: 0x1000,
            end_address: 0x1002,
            instructions: vec![],
            block_type: BlockType::Branch,
            predecessors: HashSet::new(),
            branch_targets: vec!["block_00002000".into()],
            fall_through: Some("block_00002000".into()),
        };
        assert_eq!(block.successors(), vec!["block_00002000".to_string()]);
        block.fall_through = Some("block_00001002".into());
        let mut succ = block.successors();
        succ.sort();
        assert_eq!(
            succ,
            vec!["block_00001002".to_string(), "block_00002000".to_string()]
        );
    }

    #[test]
    fn test_canonical_ids() {
        assert_eq!(ControlFlowGraph::block_id(0x1000), "block_00001000");
        assert_eq!(ControlFlowGraph::proc_id(0x1000), "proc_00001000");
    }

    #[test]
    fn test_engine_options_presets() {
        let default = EngineOptions::new();
        let thorough = EngineOptions::thorough();
        let fast = EngineOptions::fast();
        assert!(thorough.max_scan_bytes > default.max_scan_bytes);
        assert!(fast.max_scan_bytes < default.max_scan_bytes);
        assert!(fast.min_confidence > default.min_confidence);
    }
}
