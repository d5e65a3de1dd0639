//! Parallel batch processing over a directory of artifacts.
//!
//! Mirrors the single-threaded-core / parallel-caller split from §5: each
//! discovered file is analyzed by an independent [`crate::pipeline::analyze`]
//! call that owns its own byte buffer and derived state, so the `rayon`
//! parallel iterator below shares nothing mutable between files beyond the
//! final collection point. Worker threads report progress over a
//! `crossbeam-channel`; only the calling thread ever touches the terminal.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::Result;
use crate::types::{DisassemblyResult, EngineOptions};

/// Outcome of analyzing one file within a batch run.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Analysis completed; the boxed result avoids bloating the common case
    /// where most files succeed.
    Analyzed(Box<DisassemblyResult>),
    /// Analysis failed outright (ingestion error, unreadable file).
    Failed(String),
}

/// One file's position and outcome within a batch run.
#[derive(Debug)]
pub struct BatchEntry {
    /// Path to the analyzed file.
    pub path: PathBuf,
    /// What happened when it was analyzed.
    pub outcome: BatchOutcome,
}

/// A progress update emitted by a worker as it finishes one file.
struct ProgressEvent {
    path: PathBuf,
    index: usize,
    ok: bool,
}

/// Recursively discover files under `root` whose file name matches `pattern`
/// (a shell glob, e.g. `*.load` or `*`). Directories and unreadable entries
/// are silently skipped — a batch run degrades, it does not abort, on a
/// single bad directory entry.
pub fn discover_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob::Pattern::new(pattern).map_err(|e| crate::error::EngineError::Config {
        message: format!("invalid pattern '{}': {}", pattern, e),
    })?;

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| matcher.matches(name))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    Ok(files)
}

/// Analyze every file in `files` in parallel, optionally rendering a live
/// progress table. Results are returned in input order, not completion
/// order: the parallel iterator preserves index alignment even though
/// workers finish out of sequence.
pub fn run_batch(files: &[PathBuf], options: &EngineOptions, show_progress: bool) -> Vec<BatchEntry> {
    let total = files.len();
    let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();

    let renderer = if show_progress {
        Some(std::thread::spawn(move || drain_progress(rx, total)))
    } else {
        None
    };

    let results: Vec<BatchEntry> = files
        .par_iter()
        .enumerate()
        .map(|(index, path)| {
            let outcome = analyze_one(path, options);
            let ok = !matches!(outcome, BatchOutcome::Failed(_));
            let _ = tx.send(ProgressEvent {
                path: path.clone(),
                index,
                ok,
            });
            BatchEntry {
                path: path.clone(),
                outcome,
            }
        })
        .collect();

    drop(tx);
    if let Some(handle) = renderer {
        let _ = handle.join();
    }

    results
}

fn analyze_one(path: &Path, options: &EngineOptions) -> BatchOutcome {
    match std::fs::read(path) {
        Ok(data) => {
            let module_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
            match crate::pipeline::analyze(&data, module_name, options) {
                Ok(result) => BatchOutcome::Analyzed(Box::new(result)),
                Err(e) => BatchOutcome::Failed(e.to_string()),
            }
        }
        Err(e) => BatchOutcome::Failed(format!("read error: {e}")),
    }
}

/// Render a live progress bar on the calling thread until the channel
/// closes. Falls back to plain line-by-line logging if the terminal cannot
/// be initialized (e.g. stdout is not a tty).
fn drain_progress(rx: crossbeam_channel::Receiver<ProgressEvent>, total: usize) {
    match init_terminal() {
        Ok(mut terminal) => {
            let started = Instant::now();
            let mut completed = 0usize;
            let mut failed = 0usize;
            let mut last_path = String::new();

            while let Ok(event) = rx.recv() {
                completed += 1;
                if !event.ok {
                    failed += 1;
                }
                last_path = event.path.display().to_string();
                let _ = draw_frame(&mut terminal, total, completed, failed, &last_path, started.elapsed());
            }
            let _ = restore_terminal(&mut terminal);
        }
        Err(_) => {
            while let Ok(event) = rx.recv() {
                let status = if event.ok { "ok" } else { "FAILED" };
                println!("[{}/{}] {} ({status})", event.index + 1, total, event.path.display());
            }
        }
    }
}

type Terminal = ratatui::Terminal<ratatui::backend::CrosstermBackend<io::Stdout>>;

fn init_terminal() -> io::Result<Terminal> {
    crossterm::terminal::enable_raw_mode()?;
    let backend = ratatui::backend::CrosstermBackend::new(io::stdout());
    ratatui::Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Terminal) -> io::Result<()> {
    crossterm::terminal::disable_raw_mode()?;
    terminal.show_cursor()
}

fn draw_frame(
    terminal: &mut Terminal,
    total: usize,
    completed: usize,
    failed: usize,
    last_path: &str,
    elapsed: std::time::Duration,
) -> io::Result<()> {
    use ratatui::layout::{Constraint, Direction, Layout};
    use ratatui::style::{Color, Style};
    use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

    terminal.draw(|frame| {
        let ratio = if total == 0 { 1.0 } else { completed as f64 / total as f64 };
        let area = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(2)])
            .split(area);

        let label = format!(
            "{}/{} ({} failed, {:.1}s)",
            completed,
            total,
            failed,
            elapsed.as_secs_f64()
        );
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("zarch-revng batch"))
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(ratio.clamp(0.0, 1.0))
            .label(label);
        frame.render_widget(gauge, chunks[0]);

        let status = Paragraph::new(format!("analyzing: {last_path}"));
        frame.render_widget(status, chunks[1]);
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_discover_files_matches_pattern() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("mod1.load"), b"ignored").unwrap();
        std::fs::write(dir.path().join("mod2.txt"), b"ignored").unwrap();
        let files = discover_files(dir.path(), "*.load").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("mod1.load"));
    }

    #[test]
    fn test_discover_files_invalid_pattern() {
        let dir = tempdir().unwrap();
        assert!(discover_files(dir.path(), "[").is_err());
    }

    #[test]
    fn test_run_batch_analyzes_every_file_independently() {
        let dir = tempdir().unwrap();
        let code = [0x05, 0xEF, 0x07, 0xFE]; // BALR 14,15 ; BCR 15,14
        std::fs::write(dir.path().join("a.load"), program_object(&code)).unwrap();
        std::fs::write(dir.path().join("b.load"), program_object(&code)).unwrap();
        std::fs::write(dir.path().join("c.load"), b"\x00").unwrap(); // too small

        let files = discover_files(dir.path(), "*.load").unwrap();
        assert_eq!(files.len(), 3);

        let results = run_batch(&files, &EngineOptions::new(), false);
        assert_eq!(results.len(), 3);
        let failures = results
            .iter()
            .filter(|e| matches!(e.outcome, BatchOutcome::Failed(_)))
            .count();
        assert_eq!(failures, 1);
    }
}
