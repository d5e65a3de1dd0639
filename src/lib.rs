//! zarch-revng - Static reverse engineering for z/Architecture binaries
//!
//! This library performs static analysis of mainframe load modules and
//! binder program objects: it disassembles the code region, builds a
//! control-flow graph, infers procedure boundaries and a call graph, and
//! classifies the remaining address space into code/data/unknown regions.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use zarch_revng::analyze_file;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let result = analyze_file("path/to/module")?;
//!     println!("format: {}", result.metadata.format_type.unwrap());
//!     println!("instructions: {}", result.instructions.len());
//!     println!("procedures: {}", result.cfg.procedures.len());
//!     Ok(())
//! }
//! ```
//!
//! # Scope
//!
//! The engine performs static analysis only: no target code is ever
//! executed or emulated. See [`pipeline::analyze`] for the full stage
//! sequence and [`types::EngineOptions`] for the tunable thresholds.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod cfg;
pub mod decoder;
pub mod disassembler;
pub mod error;
pub mod formatter;
pub mod ingestor;
pub mod pipeline;
pub mod procedures;
pub mod pseudocode;
pub mod reconstructor;
pub mod regions;
pub mod types;

#[cfg(feature = "batch")]
pub mod batch;

pub use error::{EngineError, Result};
pub use pipeline::{validate_result, ValidationReport};
pub use types::{
    ArtifactFormat, BasicBlock, BlockType, Confidence, ControlFlowGraph, DisassemblyResult,
    EngineOptions, Instruction, InstructionFormat, ModuleMetadata, Procedure, Region, RegionType,
};

use std::path::Path;

/// Analyze a binary artifact by path.
///
/// Reads the file and runs the full pipeline (ingest, disassemble, build the
/// CFG, detect procedures, classify regions) with default options.
///
/// # Errors
///
/// Returns an error if the file cannot be read, or if ingestion cannot
/// locate a usable code region (too small, malformed program-object header,
/// or an empty code region).
pub fn analyze_file<P: AsRef<Path>>(path: P) -> Result<DisassemblyResult> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let module_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string);
    analyze_bytes(&data, module_name)
}

/// Analyze raw binary data with a module name hint and default options.
///
/// # Errors
///
/// See [`analyze_file`].
pub fn analyze_bytes(data: &[u8], module_name: Option<String>) -> Result<DisassemblyResult> {
    analyze_bytes_with_options(data, module_name, &EngineOptions::new())
}

/// Analyze raw binary data with explicit [`EngineOptions`].
///
/// This is the most flexible entry point; [`analyze_file`] and
/// [`analyze_bytes`] are thin convenience wrappers around it.
///
/// # Errors
///
/// See [`analyze_file`].
pub fn analyze_bytes_with_options(
    data: &[u8],
    module_name: Option<String>,
    options: &EngineOptions,
) -> Result<DisassemblyResult> {
    pipeline::analyze(data, module_name, options)
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_analyze_bytes_end_to_end() {
        let code = [0x05, 0xEF, 0x07, 0xFE]; // BALR 14,15 ; BCR 15,14
        let data = program_object(&code);
        let result = analyze_bytes(&data, Some("MOD1".to_string())).unwrap();
        assert_eq!(result.metadata.format_type, Some(ArtifactFormat::ProgramObject));
        assert!(!result.cfg.procedures.is_empty());
    }

    #[test]
    fn test_analyze_bytes_with_options_respects_min_confidence() {
        let code = [
            0x90, 0xEC, 0xD0, 0x0C, // STM 14,12,12(13) - prologue, MEDIUM confidence
            0x07, 0xFE, // BR 14
        ];
        let data = program_object(&code);
        let strict = analyze_bytes_with_options(&data, None, &EngineOptions::fast()).unwrap();
        for proc in strict.cfg.procedures.values() {
            assert!(proc.confidence >= Confidence::High);
        }
    }
}
