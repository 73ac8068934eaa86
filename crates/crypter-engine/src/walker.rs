//! Best-effort batches over the regular files of one directory.
//!
//! Not recursive. A failure on one file is recorded in its [`FileOutcome`]
//! and the batch moves on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crypter_store::KeyStoreBackend;
use tracing::{debug, info, warn};

use crate::engine::{Completed, Crypter};
use crate::error::EngineError;

/// Progress callback type (files_done, files_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Outcome of one file in a batch.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<Completed, EngineError>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-file outcomes of a directory batch, in processing order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Files decrypted from the stored ciphertext.
    pub fn recovered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(Completed::Recovered { .. })))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

impl<'s, B: KeyStoreBackend> Crypter<'s, B> {
    /// Encrypt every regular file directly inside `dir`.
    ///
    /// Only listing the directory can fail the whole call.
    pub fn encrypt_directory(
        &mut self,
        dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<BatchReport, EngineError> {
        let files = collect_files(dir, self.backend().file_path())?;
        Ok(run_batch(&files, progress, "encrypt", |path| {
            self.encrypt_path(path)
        }))
    }

    /// Decrypt every regular file directly inside `dir`.
    pub fn decrypt_directory(
        &self,
        dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<BatchReport, EngineError> {
        let files = collect_files(dir, self.backend().file_path())?;
        Ok(run_batch(&files, progress, "decrypt", |path| {
            self.decrypt_path(path)
        }))
    }
}

fn run_batch(
    files: &[PathBuf],
    progress: Option<&ProgressFn>,
    verb: &str,
    mut op: impl FnMut(&Path) -> Result<Completed, EngineError>,
) -> BatchReport {
    let total = files.len();
    let mut report = BatchReport::default();

    for (i, path) in files.iter().enumerate() {
        let name = path.file_name().map(Path::new).unwrap_or(path.as_path());
        let msg = format!("[{}/{}] {}", i + 1, total, name.display());
        if let Some(cb) = progress {
            cb(i as u64, total as u64, &msg);
        }

        let result = op(path);
        if let Err(e) = &result {
            warn!(path = %path.display(), "{verb} failed: {e}");
        }
        report.outcomes.push(FileOutcome {
            path: path.clone(),
            result,
        });
    }

    if let Some(cb) = progress {
        cb(total as u64, total as u64, "done");
    }
    info!(
        total,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "{verb} batch finished"
    );
    report
}

/// Regular files directly inside `dir`, sorted by name.
///
/// `skip` (the key store file, if it lives here) is left out. Entries naming
/// the same file (a symlink next to its target) are kept once, under the
/// first name in sorted order, so no file is processed twice in one batch.
pub fn collect_files(dir: &Path, skip: Option<&Path>) -> Result<Vec<PathBuf>, EngineError> {
    let skip = skip.map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));

    let entries = std::fs::read_dir(dir).map_err(|e| EngineError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            debug!(path = %path.display(), "skipping non-file entry");
            continue;
        }
        let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if skip.as_ref() == Some(&canonical) {
            debug!(path = %path.display(), "skipping key store file");
            continue;
        }
        files.push((path, canonical));
    }
    files.sort();

    let mut seen = HashSet::new();
    Ok(files
        .into_iter()
        .filter_map(|(path, canonical)| {
            if seen.insert(canonical) {
                Some(path)
            } else {
                debug!(path = %path.display(), "skipping second name of an already listed file");
                None
            }
        })
        .collect())
}
