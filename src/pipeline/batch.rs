use std::path::{Path, PathBuf};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::ingest::scanner::scan_directory;
use crate::pipeline::orchestrator::SearchOrchestrator;

#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    /// Fatal per-file errors and per-match errors, tagged with the file.
    pub errors: Vec<(PathBuf, Error)>,
}

/// Runs every file through the orchestrator in order. With `abort_on_error`
/// the first fatal failure ends the batch as [`Error::Item`]; otherwise it is
/// collected and the next file is processed.
pub fn run_batch(
    orchestrator: &SearchOrchestrator<'_>,
    files: &[PathBuf],
    abort_on_error: bool,
    progress: &ProgressBar,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    for (idx, path) in files.iter().enumerate() {
        debug!(file = %path.display(), idx, total = files.len(), "file");
        progress.set_message(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());

        match orchestrator.run(path) {
            Ok(outcome) => {
                report.processed += 1;
                report
                    .errors
                    .extend(outcome.errors.into_iter().map(|e| (path.clone(), e)));
            }
            Err(e) if abort_on_error => {
                progress.abandon();
                return Err(Error::Item {
                    path: path.clone(),
                    source: Box::new(e),
                });
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "skipping file");
                report.errors.push((path.clone(), e));
            }
        }
        progress.inc(1);
    }

    progress.finish_and_clear();
    info!(processed = report.processed, errors = report.errors.len(), "batch finished");
    Ok(report)
}

/// Processes every file directly inside `folder`.
pub fn run_folder(orchestrator: &SearchOrchestrator<'_>, folder: &Path) -> Result<BatchReport> {
    let files = scan_directory(folder)?;
    if files.is_empty() {
        info!(folder = %folder.display(), "No files found.");
        return Ok(BatchReport::default());
    }

    let progress = ProgressBar::new(files.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
        progress.set_style(style);
    }
    run_batch(orchestrator, &files, orchestrator.config().abort_on_error, &progress)
}
