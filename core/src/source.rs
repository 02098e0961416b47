//! Source catalog, file discovery, and concurrent CSV ingestion.
//!
//! Each monthly source lives in its own folder under the data root:
//!   <data_root>/<source>/<source>_<YYYYMM>.csv
//!
//! File loads for one source run on a bounded rayon pool (one task per
//! file, pool sized to available parallelism but never larger than the
//! file count). A failed individual file is logged and excluded; it
//! never aborts the source. An entirely absent source folder degrades
//! to an empty row set.

use crate::error::{PipelineError, PipelineResult};
use crate::types::Month;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Explicit per-source file lists, overriding folder discovery.
/// Sources without an entry fall back to discovery.
#[derive(Debug, Clone, Default)]
pub struct FileSelection {
    overrides: HashMap<SourceId, Vec<PathBuf>>,
}

impl FileSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, source: SourceId, files: Vec<PathBuf>) {
        self.overrides.insert(source, files);
    }

    pub fn files_for(&self, source: SourceId) -> Option<&[PathBuf]> {
        self.overrides.get(&source).map(Vec::as_slice)
    }
}

/// The monthly data sources the merge stage knows how to ingest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Subscriber registry, the merge anchor.
    Subscriber,
    Arpu,
    Advance,
    Topup,
    Package,
    Usage,
}

impl SourceId {
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Subscriber => "subscriber",
            Self::Arpu => "arpu",
            Self::Advance => "advance",
            Self::Topup => "topup",
            Self::Package => "package",
            Self::Usage => "usage",
        }
    }
}

/// A source row tagged with the month extracted from its file name.
/// `None` marks rows from files carrying no recognizable month token.
pub struct Tagged<T> {
    pub month: Option<Month>,
    pub row: T,
}

/// Extract the first 6-digit token from a file name, if it parses as a
/// valid `YYYYMM`.
pub fn month_from_filename(path: &Path) -> Option<Month> {
    let name = path.file_name()?.to_str()?;
    let bytes = name.as_bytes();
    let mut start = None;
    let mut run = 0usize;
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            run += 1;
            if run == 6 {
                start = Some(i + 1 - 6);
                break;
            }
        } else {
            run = 0;
        }
    }
    let s = start?;
    Month::parse(&name[s..s + 6])
}

/// Discover a source's files under the data root, optionally restricted
/// to a month filter. An empty filter means "all months".
pub fn discover_files(data_dir: &Path, source: SourceId, months: &[Month]) -> Vec<PathBuf> {
    let dir = data_dir.join(source.folder());
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!(
                "source={} folder missing ({err}), continuing with defaults",
                source.folder()
            );
            return Vec::new();
        }
    };

    let prefix = format!("{}_", source.folder());
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .filter(|p| {
            months.is_empty()
                || month_from_filename(p).map(|m| months.contains(&m)).unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Load all files of a source concurrently, tagging rows with the month
/// from each file name. Pool size = min(available parallelism, files).
pub fn load_tagged<T>(source: SourceId, files: &[PathBuf]) -> PipelineResult<Vec<Tagged<T>>>
where
    T: DeserializeOwned + Send,
{
    if files.is_empty() {
        log::warn!("source={} has no files to load", source.folder());
        return Ok(Vec::new());
    }

    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = parallelism.min(files.len()).max(1);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| PipelineError::Other(anyhow::Error::new(e)))?;

    // Each task produces an independent partial table; concatenation at
    // the end keeps per-file order stable within the sorted file list.
    let partials: Vec<Vec<Tagged<T>>> = pool.install(|| {
        files
            .par_iter()
            .map(|path| load_one_file::<T>(source, path))
            .collect()
    });

    let total: usize = partials.iter().map(|p| p.len()).sum();
    log::info!(
        "source={} loaded {} rows from {} files ({} workers)",
        source.folder(),
        total,
        files.len(),
        workers
    );

    Ok(partials.into_iter().flatten().collect())
}

/// Load one CSV file. Open failures and malformed records are logged
/// and skipped; a bad file or row never aborts the source.
fn load_one_file<T: DeserializeOwned>(source: SourceId, path: &Path) -> Vec<Tagged<T>> {
    let month = month_from_filename(path);
    if month.is_none() {
        log::warn!(
            "source={} file {:?} has no month token, tagging rows as unknown",
            source.folder(),
            path.file_name().unwrap_or_default()
        );
    }

    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(err) => {
            log::warn!("source={} failed to open {path:?}: {err}", source.folder());
            return Vec::new();
        }
    };

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in reader.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(Tagged { month, row }),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!(
            "source={} skipped {skipped} malformed records in {:?}",
            source.folder(),
            path.file_name().unwrap_or_default()
        );
    }
    rows
}
