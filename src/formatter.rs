//! Report generation: text, YAML, and JSON analysis reports plus the
//! assembly-listing and pseudocode renderers' file-writing entry points.
//!
//! Each writer is a pure render function (`render_*`) paired with a thin
//! `write_*` wrapper that creates the output directory and writes the file;
//! callers that only need the string (e.g. to stream to stdout) can call the
//! render functions directly.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::types::{DisassemblyResult, StatValue};
use crate::{pseudocode, reconstructor};

/// One of the report formats this module can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human-readable plain-text report.
    Text,
    /// Structured YAML report.
    Yaml,
    /// Structured JSON report (instructions capped at 1000 entries).
    Json,
    /// Reconstructed HLASM-like assembly listing.
    Asm,
    /// Structured pseudocode.
    Pseudocode,
}

impl FromStr for ReportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "yaml" | "yml" => Ok(ReportFormat::Yaml),
            "json" => Ok(ReportFormat::Json),
            "asm" => Ok(ReportFormat::Asm),
            "pseudocode" | "pseudo" => Ok(ReportFormat::Pseudocode),
            other => Err(EngineError::UnknownReportFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportFormat::Text => "text",
            ReportFormat::Yaml => "yaml",
            ReportFormat::Json => "json",
            ReportFormat::Asm => "asm",
            ReportFormat::Pseudocode => "pseudocode",
        };
        write!(f, "{}", s)
    }
}

/// The default format set used when a caller doesn't request specific ones.
pub const DEFAULT_FORMATS: [ReportFormat; 3] = [ReportFormat::Text, ReportFormat::Yaml, ReportFormat::Json];

/// Render and write one report per requested format under `output_dir`,
/// named `<base_name>_report.txt`, `<base_name>_analysis.yaml`, etc.
///
/// Returns the path written for each format, keyed by its display name.
pub fn write_reports(
    result: &DisassemblyResult,
    output_dir: &Path,
    base_name: Option<&str>,
    formats: &[ReportFormat],
) -> Result<HashMap<String, PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let base_name = base_name
        .map(str::to_string)
        .or_else(|| result.metadata.name.clone())
        .unwrap_or_else(|| "output".to_string());

    let mut written = HashMap::new();
    for format in formats {
        let (file_name, contents) = match format {
            ReportFormat::Text => (format!("{}_report.txt", base_name), render_text_report(result)),
            ReportFormat::Yaml => (format!("{}_analysis.yaml", base_name), render_yaml_report(result)?),
            ReportFormat::Json => (format!("{}_analysis.json", base_name), render_json_report(result)?),
            ReportFormat::Asm => (format!("{}.asm", base_name), reconstructor::reconstruct(result)),
            ReportFormat::Pseudocode => (
                format!("{}_pseudocode.txt", base_name),
                pseudocode::generate(&result.cfg),
            ),
        };
        let path = output_dir.join(&file_name);
        std::fs::write(&path, contents)?;
        written.insert(format.to_string(), path);
    }
    Ok(written)
}

/// Render the human-readable text report.
pub fn render_text_report(result: &DisassemblyResult) -> String {
    let mut out = String::new();
    let rule = "=".repeat(80);
    let sub_rule = "-".repeat(40);

    out.push_str(&rule);
    out.push_str("\nz/OS BINARY REVERSE ENGINEERING REPORT\n");
    out.push_str(&rule);
    out.push_str("\n\n");

    out.push_str(&format!("Generated: {}\n\n", chrono::Utc::now().to_rfc3339()));

    out.push_str("MODULE INFORMATION\n");
    out.push_str(&sub_rule);
    out.push('\n');
    let metadata = &result.metadata;
    out.push_str(&format!("Name: {}\n", metadata.name.as_deref().unwrap_or("Unknown")));
    out.push_str(&format!(
        "Format: {}\n",
        metadata
            .format_type
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    ));
    out.push_str(&match metadata.entry_point {
        Some(ep) => format!("Entry Point: 0x{:08X}\n", ep),
        None => "Entry Point: Unknown\n".to_string(),
    });
    if let Some(amode) = metadata.amode {
        out.push_str(&format!("AMODE: {}\n", amode));
    }
    if let Some(rmode) = &metadata.rmode {
        out.push_str(&format!("RMODE: {}\n", rmode));
    }
    if !metadata.external_symbols.is_empty() {
        out.push_str("\nExternal Symbols:\n");
        for sym in &metadata.external_symbols {
            out.push_str(&format!("  - {}\n", sym));
        }
    }
    out.push('\n');

    out.push_str("DISASSEMBLY STATISTICS\n");
    out.push_str(&sub_rule);
    out.push('\n');
    let stats = &result.statistics;
    out.push_str(&format!("Instructions decoded: {}\n", count(stats, "instruction_count")));
    out.push_str(&format!("Bytes decoded: {}\n", count(stats, "decoded_bytes")));
    out.push_str(&format!("Unknown bytes: {}\n", count(stats, "unknown_bytes")));
    out.push_str(&format!("Decode rate: {:.1}%\n", rate(stats, "decode_rate") * 100.0));
    out.push_str(&format!("Branch instructions: {}\n", count(stats, "branch_count")));
    out.push_str(&format!("Call instructions: {}\n", count(stats, "call_count")));
    out.push_str(&format!("Return instructions: {}\n", count(stats, "return_count")));
    out.push('\n');

    out.push_str("CONTROL FLOW ANALYSIS\n");
    out.push_str(&sub_rule);
    out.push('\n');
    let cfg = &result.cfg;
    out.push_str(&format!("Basic blocks: {}\n", cfg.basic_blocks.len()));
    out.push_str(&format!("Procedures detected: {}\n", cfg.procedures.len()));
    out.push_str(&format!("Unresolved branches: {}\n", cfg.unresolved_branches.len()));

    if !cfg.procedures.is_empty() {
        out.push_str("\nDetected Procedures:\n");
        let mut procs: Vec<_> = cfg.procedures.values().collect();
        procs.sort_by_key(|p| p.entry_address);
        for proc in procs {
            out.push_str(&format!(
                "  - {} @ 0x{:08X} (confidence: {}, method: {})\n",
                proc.name, proc.entry_address, proc.confidence, proc.detection_method
            ));
            if !proc.calls_to.is_empty() {
                let mut names: Vec<&str> = proc
                    .calls_to
                    .iter()
                    .filter_map(|pid| cfg.procedures.get(pid))
                    .map(|p| p.name.as_str())
                    .collect();
                names.sort_unstable();
                out.push_str(&format!("    Calls: {}\n", names.join(", ")));
            }
        }
    }
    out.push('\n');

    if !cfg.call_graph.is_empty() {
        out.push_str("CALL GRAPH\n");
        out.push_str(&sub_rule);
        out.push('\n');
        let mut callers: Vec<&String> = cfg.call_graph.keys().collect();
        callers.sort();
        for caller in callers {
            let caller_name = cfg
                .procedures
                .get(caller)
                .map(|p| p.name.as_str())
                .unwrap_or(caller.as_str());
            out.push_str(&format!("{}:\n", caller_name));
            let mut callees: Vec<&String> = cfg.call_graph[caller].iter().collect();
            callees.sort();
            for callee in callees {
                let callee_name = cfg
                    .procedures
                    .get(callee)
                    .map(|p| p.name.as_str())
                    .unwrap_or(callee.as_str());
                out.push_str(&format!("  -> {}\n", callee_name));
            }
        }
        out.push('\n');
    }

    if !result.unknown_regions.is_empty() {
        out.push_str("UNKNOWN REGIONS\n");
        out.push_str(&sub_rule);
        out.push('\n');
        out.push_str(&format!("Total regions: {}\n", result.unknown_regions.len()));
        let total_unknown: u64 = result
            .unknown_regions
            .iter()
            .map(|(s, e, _)| (e - s + 1) as u64)
            .sum();
        out.push_str(&format!("Total bytes: {}\n", total_unknown));
        out.push_str("\nRegions:\n");
        for (start, end, _) in result.unknown_regions.iter().take(10) {
            out.push_str(&format!("  0x{:08X} - 0x{:08X} ({} bytes)\n", start, end, end - start + 1));
        }
        if result.unknown_regions.len() > 10 {
            out.push_str(&format!("  ... and {} more\n", result.unknown_regions.len() - 10));
        }
        out.push('\n');
    }

    if !result.warnings.is_empty() {
        out.push_str("WARNINGS\n");
        out.push_str(&sub_rule);
        out.push('\n');
        for warning in &result.warnings {
            out.push_str(&format!("  - {}\n", warning));
        }
        out.push('\n');
    }

    if let Some(StatValue::Ranked(top)) = stats.get("top_mnemonics") {
        out.push_str("TOP INSTRUCTION MNEMONICS\n");
        out.push_str(&sub_rule);
        out.push('\n');
        for (mnem, n) in top {
            out.push_str(&format!("  {:<10} : {:>5} occurrences\n", mnem, n));
        }
    }

    out
}

fn count(stats: &HashMap<String, StatValue>, key: &str) -> u64 {
    match stats.get(key) {
        Some(StatValue::Count(c)) => *c,
        _ => 0,
    }
}

fn rate(stats: &HashMap<String, StatValue>, key: &str) -> f64 {
    match stats.get(key) {
        Some(StatValue::Rate(r)) => *r,
        _ => 0.0,
    }
}

/// A serializable unknown-region summary, shared by the YAML/JSON writers.
#[derive(serde::Serialize)]
struct UnknownRegionSummary {
    start: String,
    end: String,
    size: u32,
}

fn unknown_region_summaries(result: &DisassemblyResult) -> Vec<UnknownRegionSummary> {
    result
        .unknown_regions
        .iter()
        .map(|(s, e, _)| UnknownRegionSummary {
            start: format!("0x{:08X}", s),
            end: format!("0x{:08X}", e),
            size: e - s + 1,
        })
        .collect()
}

#[derive(serde::Serialize)]
struct AnalysisReport<'a> {
    metadata: &'a crate::types::ModuleMetadata,
    statistics: &'a HashMap<String, StatValue>,
    cfg: &'a crate::types::ControlFlowGraph,
    unknown_regions: Vec<UnknownRegionSummary>,
    warnings: &'a [String],
    timestamp: String,
}

#[derive(serde::Serialize)]
struct AnalysisReportWithInstructions<'a> {
    metadata: &'a crate::types::ModuleMetadata,
    statistics: &'a HashMap<String, StatValue>,
    cfg: &'a crate::types::ControlFlowGraph,
    instructions: &'a [crate::types::Instruction],
    unknown_regions: Vec<UnknownRegionSummary>,
    warnings: &'a [String],
    timestamp: String,
}

/// Render the YAML analysis report.
pub fn render_yaml_report(result: &DisassemblyResult) -> Result<String> {
    let report = AnalysisReport {
        metadata: &result.metadata,
        statistics: &result.statistics,
        cfg: &result.cfg,
        unknown_regions: unknown_region_summaries(result),
        warnings: &result.warnings,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    serde_yaml::to_string(&report).map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Render the JSON analysis report. Instructions are capped at the first
/// 1000 entries to keep the report bounded for very large modules.
pub fn render_json_report(result: &DisassemblyResult) -> Result<String> {
    let limit = result.instructions.len().min(1000);
    let report = AnalysisReportWithInstructions {
        metadata: &result.metadata,
        statistics: &result.statistics,
        cfg: &result.cfg,
        instructions: &result.instructions[..limit],
        unknown_regions: unknown_region_summaries(result),
        warnings: &result.warnings,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    serde_json::to_string_pretty(&report).map_err(|e| EngineError::Serialization(e.to_string()))
}

#[derive(serde::Serialize)]
struct ModuleSummary {
    name: String,
    format: Option<String>,
    instructions: u64,
    procedures: usize,
    decode_rate: f64,
    entry_point: Option<String>,
}

#[derive(serde::Serialize)]
struct PortfolioSummary {
    total_instructions: u64,
    total_procedures: usize,
    total_unknown_bytes: u64,
    average_decode_rate: f64,
}

#[derive(serde::Serialize)]
struct PortfolioIndex {
    modules: Vec<ModuleSummary>,
    total_modules: usize,
    timestamp: String,
    summary: PortfolioSummary,
}

/// Render the batch portfolio index: one summary row per analyzed module
/// plus aggregate totals, as YAML.
pub fn render_portfolio_index(results: &[(String, DisassemblyResult)]) -> Result<String> {
    let mut modules = Vec::with_capacity(results.len());
    let mut total_instructions = 0u64;
    let mut total_procedures = 0usize;
    let mut total_unknown_bytes = 0u64;

    for (name, result) in results {
        let instructions = count(&result.statistics, "instruction_count");
        let decode_rate = rate(&result.statistics, "decode_rate");
        modules.push(ModuleSummary {
            name: name.clone(),
            format: result.metadata.format_type.map(|f| f.to_string()),
            instructions,
            procedures: result.cfg.procedures.len(),
            decode_rate,
            entry_point: result.metadata.entry_point.map(|ep| format!("0x{:08X}", ep)),
        });
        total_instructions += instructions;
        total_procedures += result.cfg.procedures.len();
        total_unknown_bytes += count(&result.statistics, "unknown_bytes");
    }

    let average_decode_rate = if modules.is_empty() {
        0.0
    } else {
        modules.iter().map(|m| m.decode_rate).sum::<f64>() / modules.len() as f64
    };

    let index = PortfolioIndex {
        total_modules: modules.len(),
        modules,
        timestamp: chrono::Utc::now().to_rfc3339(),
        summary: PortfolioSummary {
            total_instructions,
            total_procedures,
            total_unknown_bytes,
            average_decode_rate,
        },
    };

    serde_yaml::to_string(&index).map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Render and write the batch portfolio index under `output_dir` as
/// `portfolio_index.yaml`.
pub fn write_portfolio_index(output_dir: &Path, results: &[(String, DisassemblyResult)]) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let contents = render_portfolio_index(results)?;
    let path = output_dir.join("portfolio_index.yaml");
    std::fs::write(&path, contents)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EngineOptions;
    use tempfile::tempdir;

    fn program_object(code: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data[0] = 0x00;
        data[1] = 0x03;
        data[8..12].copy_from_slice(&(code.len() as u32).to_be_bytes());
        data[12..16].copy_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(code);
        data
    }

    fn sample_result() -> DisassemblyResult {
        let code = [0x05, 0xEF, 0x07, 0xFE];
        let data = program_object(&code);
        crate::pipeline::analyze(&data, Some("MOD1".into()), &EngineOptions::new()).unwrap()
    }

    #[test]
    fn test_report_format_parsing() {
        assert_eq!("yaml".parse::<ReportFormat>().unwrap(), ReportFormat::Yaml);
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("bogus".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_render_text_report_contains_sections() {
        let result = sample_result();
        let text = render_text_report(&result);
        assert!(text.contains("MODULE INFORMATION"));
        assert!(text.contains("DISASSEMBLY STATISTICS"));
        assert!(text.contains("CONTROL FLOW ANALYSIS"));
        assert!(text.contains("Name: MOD1"));
    }

    #[test]
    fn test_render_yaml_report_round_trips() {
        let result = sample_result();
        let yaml = render_yaml_report(&result).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(value.get("metadata").is_some());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_render_json_report_caps_instructions() {
        let result = sample_result();
        let json = render_json_report(&result).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["instructions"].as_array().unwrap().len() <= 1000);
    }

    #[test]
    fn test_write_reports_creates_files() {
        let result = sample_result();
        let dir = tempdir().unwrap();
        let written = write_reports(&result, dir.path(), None, &DEFAULT_FORMATS).unwrap();
        assert_eq!(written.len(), 3);
        for path in written.values() {
            assert!(path.exists());
        }
    }

    #[test]
    fn test_portfolio_index_aggregates() {
        let r1 = sample_result();
        let r2 = sample_result();
        let yaml = render_portfolio_index(&[("MOD1".to_string(), r1), ("MOD2".to_string(), r2)]).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["total_modules"].as_u64().unwrap(), 2);
    }
}
