//! zarch-revng CLI
//!
//! Command-line driver for the static reverse-engineering engine: analyze a
//! single artifact, batch-process a directory of them, or print build/engine
//! info. This binary is peripheral to the core (see `zarch_revng::pipeline`)
//! — it owns file I/O, progress reporting, and report-format selection only.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use zarch_revng::formatter::{self, ReportFormat, DEFAULT_FORMATS};
use zarch_revng::types::{EngineOptions, StatValue};

/// Static reverse-engineering engine for z/Architecture load modules and
/// program objects.
#[derive(Parser, Debug)]
#[command(name = "zarch-revng")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Emit `tracing` span/event output for each pipeline stage.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a single artifact and write the requested report formats.
    Analyze {
        /// Path to the binary artifact.
        file: PathBuf,

        /// Directory to write reports into (created if missing).
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Report formats to emit: text, yaml, json, asm, pseudocode.
        #[arg(short = 'f', long = "format", value_delimiter = ',')]
        formats: Vec<String>,

        /// Analysis mode: normal, fast, or thorough.
        #[arg(short, long, default_value = "normal")]
        mode: AnalysisMode,

        /// Print the text report to stdout instead of (or in addition to)
        /// writing files.
        #[arg(long)]
        stdout: bool,
    },

    /// Analyze every artifact under a directory matching a glob pattern.
    #[cfg(feature = "batch")]
    Batch {
        /// Root directory to scan.
        dir: PathBuf,

        /// Filename glob pattern (e.g. `*.load`).
        #[arg(short, long, default_value = "*")]
        pattern: String,

        /// Directory to write per-module reports and the portfolio index
        /// into.
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Report formats to emit per module.
        #[arg(short = 'f', long = "format", value_delimiter = ',')]
        formats: Vec<String>,

        /// Analysis mode: normal, fast, or thorough.
        #[arg(short, long, default_value = "normal")]
        mode: AnalysisMode,

        /// Suppress the live progress display.
        #[arg(long)]
        no_progress: bool,
    },

    /// Print engine build information and the recognized mnemonic/format
    /// tables.
    Info,
}

/// Analysis mode options, mapped to [`EngineOptions`] presets.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum AnalysisMode {
    /// Balanced thresholds (the default).
    Normal,
    /// Narrow heuristic scan, only high-confidence procedures kept.
    Fast,
    /// Wide heuristic scan, low-confidence procedures kept.
    Thorough,
}

impl AnalysisMode {
    fn to_options(self) -> EngineOptions {
        match self {
            AnalysisMode::Normal => EngineOptions::new(),
            AnalysisMode::Fast => EngineOptions::fast(),
            AnalysisMode::Thorough => EngineOptions::thorough(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("zarch_revng=debug")
            .init();
    }

    let result = match cli.command {
        Command::Analyze {
            file,
            output,
            formats,
            mode,
            stdout,
        } => run_analyze(&file, &output, &formats, mode, stdout),
        #[cfg(feature = "batch")]
        Command::Batch {
            dir,
            pattern,
            output,
            formats,
            mode,
            no_progress,
        } => run_batch(&dir, &pattern, &output, &formats, mode, no_progress),
        Command::Info => run_info(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn parse_formats(requested: &[String]) -> Result<Vec<ReportFormat>> {
    if requested.is_empty() {
        return Ok(DEFAULT_FORMATS.to_vec());
    }
    requested
        .iter()
        .map(|f| f.parse::<ReportFormat>().map_err(anyhow::Error::from))
        .collect()
}

fn run_analyze(
    file: &PathBuf,
    output: &PathBuf,
    formats: &[String],
    mode: AnalysisMode,
    print_stdout: bool,
) -> Result<()> {
    let formats = parse_formats(formats)?;
    let options = mode.to_options();

    let started = Instant::now();
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let module_name = file.file_stem().and_then(|s| s.to_str()).map(str::to_string);
    let mut result = zarch_revng::analyze_bytes_with_options(&data, module_name, &options)
        .with_context(|| format!("analyzing {}", file.display()))?;

    let elapsed = started.elapsed();
    result.statistics.insert(
        "processing_time".to_string(),
        StatValue::Rate(elapsed.as_secs_f64()),
    );
    result.statistics.insert(
        "file_path".to_string(),
        StatValue::Text(file.display().to_string()),
    );

    if print_stdout {
        println!("{}", formatter::render_text_report(&result));
    }

    let written = formatter::write_reports(&result, output, None, &formats)?;
    for (fmt, path) in &written {
        println!("wrote {fmt} report to {}", path.display());
    }

    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }

    Ok(())
}

#[cfg(feature = "batch")]
fn run_batch(
    dir: &PathBuf,
    pattern: &str,
    output: &PathBuf,
    formats: &[String],
    mode: AnalysisMode,
    no_progress: bool,
) -> Result<()> {
    use zarch_revng::batch::{self, BatchOutcome};

    let formats = parse_formats(formats)?;
    let options = mode.to_options();

    let files = batch::discover_files(dir, pattern)
        .with_context(|| format!("scanning {} for '{}'", dir.display(), pattern))?;
    if files.is_empty() {
        println!("no files matched '{}' under {}", pattern, dir.display());
        return Ok(());
    }

    let entries = batch::run_batch(&files, &options, !no_progress);

    let mut portfolio = Vec::new();
    let mut failures = 0usize;
    for entry in entries {
        let name = entry
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
            .to_string();
        match entry.outcome {
            BatchOutcome::Analyzed(result) => {
                let module_dir = output.join(&name);
                formatter::write_reports(&result, &module_dir, Some(name.as_str()), &formats)?;
                portfolio.push((name, *result));
            }
            BatchOutcome::Failed(message) => {
                failures += 1;
                eprintln!("error analyzing {}: {message}", entry.path.display());
            }
        }
    }

    let index_path = formatter::write_portfolio_index(output, &portfolio)?;
    println!(
        "analyzed {} of {} files ({} failed); portfolio index at {}",
        portfolio.len(),
        files.len(),
        failures,
        index_path.display()
    );

    Ok(())
}

fn run_info() -> Result<()> {
    println!("zarch-revng {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Supported artifact formats: program_object, load_module, unknown (heuristic)");
    println!("Instruction formats: RR, RX, RS, SI, SS, RI, RIL, RRE, RXY, RSY");
    println!(
        "Default region thresholds: code > {:.2}, data < {:.2}",
        EngineOptions::new().code_density_threshold,
        EngineOptions::new().data_density_threshold
    );
    println!(
        "Analysis is single-threaded and synchronous per artifact; {} does not execute or emulate target code.",
        env!("CARGO_PKG_NAME")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing_analyze() {
        let cli = Cli::try_parse_from(["zarch-revng", "analyze", "test.load"]).unwrap();
        assert!(matches!(cli.command, Command::Analyze { .. }));
    }

    #[test]
    fn test_args_parsing_info() {
        let cli = Cli::try_parse_from(["zarch-revng", "info"]).unwrap();
        assert!(matches!(cli.command, Command::Info));
    }

    #[test]
    fn test_format_list_parsing() {
        let cli = Cli::try_parse_from([
            "zarch-revng",
            "analyze",
            "test.load",
            "-f",
            "text,json",
        ])
        .unwrap();
        match cli.command {
            Command::Analyze { formats, .. } => assert_eq!(formats, vec!["text", "json"]),
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_parse_formats_defaults_when_empty() {
        let formats = parse_formats(&[]).unwrap();
        assert_eq!(formats.len(), DEFAULT_FORMATS.len());
    }

    #[test]
    fn test_parse_formats_rejects_unknown() {
        assert!(parse_formats(&["bogus".to_string()]).is_err());
    }
}
