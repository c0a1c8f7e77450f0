//! Collection sessions
//!
//! Drives a whole run: group requested files by volume, acquire each volume
//! once, read every file through the best available strategy into the
//! output directory, and record what happened to each one.

pub mod report;
pub mod resolve;
pub mod source;
pub mod targets;

pub use report::{FileRecord, JsonlWriter, Status};
pub use resolve::{ExtentResolver, Manifest, ManifestEntry, ManifestResolver, ResolvedFile};
pub use source::{choose_strategy, FileSource, Method, Strategy};
pub use targets::{requests_from_paths, volumes_of_interest, FileRequest};

#[cfg(windows)]
pub use resolve::RetrievalPointerResolver;

use crate::error::{RawGrabError, Result};
use crate::logging;
use crate::ntfs::{BlockDevice, RawVolume};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// Collection Configuration
// ============================================================================

/// Configuration for a collection session
#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// Bytes requested from a reader per pull
    pub buffer_size: usize,
    /// Read files straight off the raw volume
    pub use_raw: bool,
    /// Open files through the filesystem when raw access fails
    pub allow_api_fallback: bool,
    /// Mirror each file's source path under the output directory
    pub preserve_paths: bool,
    /// Show a progress bar
    pub show_progress: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32 * 1024,
            use_raw: true,
            allow_api_fallback: true,
            preserve_paths: true,
            show_progress: true,
        }
    }
}

/// Totals for a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectSummary {
    pub requested: usize,
    pub collected_raw: usize,
    pub collected_api: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl CollectSummary {
    fn tally(&mut self, record: &FileRecord) {
        match (record.status, record.method) {
            (Status::Collected, Some(Method::Raw)) => self.collected_raw += 1,
            (Status::Collected, _) => self.collected_api += 1,
            (Status::Failed, _) => self.failed += 1,
        }
        self.bytes += record.bytes;
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Copies requested files out of their volumes
pub struct Collector<R: ExtentResolver> {
    config: CollectConfig,
    resolver: R,
    output_dir: PathBuf,
    report: Option<JsonlWriter<BufWriter<File>>>,
    records: Vec<FileRecord>,
    /// Output paths handed out this session
    claimed: HashSet<PathBuf>,
}

impl<R: ExtentResolver> Collector<R> {
    pub fn new(resolver: R, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: CollectConfig::default(),
            resolver,
            output_dir: output_dir.into(),
            report: None,
            records: Vec::new(),
            claimed: HashSet::new(),
        }
    }

    pub fn with_config(mut self, config: CollectConfig) -> Self {
        self.config = config;
        self
    }

    /// Also write every file record as a JSON line to `path`
    pub fn with_report(mut self, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.report = Some(JsonlWriter::new(BufWriter::new(File::create(path)?)));
        Ok(self)
    }

    /// Records for every file processed so far
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Collect `requests`, acquiring volumes with [`RawVolume::acquire`]
    pub fn run(&mut self, requests: &[FileRequest]) -> Result<CollectSummary> {
        self.run_with(requests, RawVolume::acquire)
    }

    /// Collect `requests`, acquiring each volume through `acquire`.
    ///
    /// A file that cannot be collected is recorded and skipped. Only output
    /// problems (the directory or the report cannot be written) end the run.
    pub fn run_with<D, F>(&mut self, requests: &[FileRequest], mut acquire: F) -> Result<CollectSummary>
    where
        D: BlockDevice,
        F: FnMut(&str) -> Result<RawVolume<D>>,
    {
        fs::create_dir_all(&self.output_dir)?;
        logging::separator(&format!("COLLECTION START: {} files", requests.len()));

        let progress = if self.config.show_progress {
            let pb = ProgressBar::new(requests.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut summary = CollectSummary {
            requested: requests.len(),
            ..Default::default()
        };

        for volume_id in volumes_of_interest(requests) {
            let on_volume: Vec<&FileRequest> = requests
                .iter()
                .filter(|r| r.volume.eq_ignore_ascii_case(&volume_id))
                .collect();

            let mut acquire_failure = None;
            let mut volume = None;
            if self.config.use_raw {
                match acquire(&volume_id) {
                    Ok(v) => volume = Some(v),
                    Err(e) if self.config.allow_api_fallback => {
                        logging::warn(
                            "COLLECT",
                            &format!("Raw access to {} failed, using the filesystem: {}", volume_id, e),
                        );
                        acquire_failure = Some(e.to_string());
                    }
                    Err(e) => {
                        logging::error("COLLECT", &format!("Cannot acquire {}: {}", volume_id, e));
                        for request in on_volume {
                            let record = FileRecord::failed(&request.volume, &request.path, &e);
                            summary.tally(&record);
                            self.write_record(record)?;
                            progress.inc(1);
                        }
                        continue;
                    }
                }
            }

            for request in on_volume {
                progress.set_message(request.path.clone());
                let record = self.collect_one(volume.as_mut(), request, acquire_failure.as_deref());
                summary.tally(&record);
                self.write_record(record)?;
                progress.inc(1);
            }

            if let Some(volume) = volume {
                volume.close();
            }
        }

        progress.finish_and_clear();
        if let Some(report) = self.report.as_mut() {
            report.flush()?;
        }

        logging::info(
            "COLLECT",
            &format!(
                "Done: {} raw, {} api, {} failed, {} bytes",
                summary.collected_raw, summary.collected_api, summary.failed, summary.bytes
            ),
        );
        logging::flush();
        Ok(summary)
    }

    fn collect_one<D: BlockDevice>(
        &mut self,
        volume: Option<&mut RawVolume<D>>,
        request: &FileRequest,
        acquire_failure: Option<&str>,
    ) -> FileRecord {
        let failed = |e: &RawGrabError, reason: Option<String>| {
            logging::warn("COLLECT", &format!("Skipping '{}': {}", request.path, e));
            let mut record = FileRecord::failed(&request.volume, &request.path, e);
            record.fallback_reason = reason;
            record
        };

        let output = match output_path(&self.output_dir, request, self.config.preserve_paths) {
            Ok(path) => self.claim_output(path),
            Err(e) => return failed(&e, None),
        };

        let attempt = volume
            .as_ref()
            .map(|v| self.resolver.resolve(&request.volume, v.geometry(), &request.path));
        let strategy = match choose_strategy(&self.config, attempt) {
            Ok(strategy) => strategy,
            Err(e) => return failed(&e, None),
        };

        let mut fallback_reason = acquire_failure.map(str::to_string);
        let mut expected = None;
        match (strategy, volume) {
            (Strategy::Raw(file), Some(volume)) => {
                expected = Some(file.size.unwrap_or_else(|| file.extents.total_length()));
                let source = FileSource::raw(volume, &file);
                match self.copy_to(source, &request.path, &output) {
                    Ok(bytes) => {
                        let mut record = FileRecord::collected(
                            &request.volume,
                            &request.path,
                            output.display().to_string(),
                            Method::Raw,
                            bytes,
                        );
                        record.expected = expected;
                        return record;
                    }
                    Err(e) if self.config.allow_api_fallback && e.is_recoverable() => {
                        logging::warn(
                            "COLLECT",
                            &format!("Raw read of '{}' failed, retrying via filesystem: {}", request.path, e),
                        );
                        fallback_reason = Some(e.to_string());
                    }
                    Err(e) => {
                        let mut record = failed(&e, None);
                        record.expected = expected;
                        return record;
                    }
                }
            }
            (Strategy::Api { reason: Some(reason) }, _) => fallback_reason = Some(reason),
            _ => {}
        }

        let copied = FileSource::<D>::api(&request.path)
            .and_then(|source| self.copy_to(source, &request.path, &output));
        match copied {
            Ok(bytes) => {
                let mut record = FileRecord::collected(
                    &request.volume,
                    &request.path,
                    output.display().to_string(),
                    Method::Api,
                    bytes,
                );
                record.expected = expected;
                record.fallback_reason = fallback_reason;
                record
            }
            Err(e) => {
                let mut record = failed(&e, fallback_reason);
                record.expected = expected;
                record
            }
        }
    }

    fn copy_to<D: BlockDevice>(&self, source: FileSource<'_, D>, path: &str, output: &Path) -> Result<u64> {
        logging::debug(
            "COLLECT",
            &format!("Reading '{}' via {}", path, source.method().as_str()),
        );
        copy_source(source, output, self.config.buffer_size)
    }

    /// Reserve `wanted` for one file, or `<stem>_<n>.<ext>` beside it when
    /// another file of this session or an earlier run already has it.
    fn claim_output(&mut self, wanted: PathBuf) -> PathBuf {
        let mut candidate = wanted.clone();
        let mut n = 1u32;
        while self.claimed.contains(&candidate) || candidate.exists() {
            candidate = numbered(&wanted, n);
            n += 1;
        }
        if candidate != wanted {
            logging::warn(
                "COLLECT",
                &format!("{} is taken, writing {}", wanted.display(), candidate.display()),
            );
        }
        self.claimed.insert(candidate.clone());
        candidate
    }

    fn write_record(&mut self, record: FileRecord) -> Result<()> {
        if let Some(report) = self.report.as_mut() {
            report.write(&record)?;
        }
        self.records.push(record);
        Ok(())
    }
}

fn numbered(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{}", stem, n),
    };
    path.with_file_name(name)
}

/// Stream `source` into a new file at `output`, pulling `buffer_size` bytes at a time.
///
/// An existing file at `output` is never touched: opening fails instead. A
/// partially written file is removed on failure.
pub fn copy_source<S: Read>(mut source: S, output: &Path, buffer_size: usize) -> Result<u64> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().write(true).create_new(true).open(output)?;
    let result = (|| {
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; buffer_size.max(1)];
        let mut total: u64 = 0;
        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RawGrabError::from_io(e)),
            };
            writer.write_all(&buffer[..n])?;
            total += n as u64;
        }
        writer.flush()?;
        Ok(total)
    })();

    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

/// Where a requested file lands under `output_dir`.
///
/// With `preserve_paths` the layout is `<output_dir>/<volume>/<path without
/// drive>`, otherwise just `<output_dir>/<file name>`. `.` and `..` segments
/// are dropped so nothing escapes the output directory.
pub fn output_path(output_dir: &Path, request: &FileRequest, preserve_paths: bool) -> Result<PathBuf> {
    let segments: Vec<String> = request
        .path
        .split(['\\', '/'])
        .enumerate()
        .filter(|(i, s)| !(*i == 0 && s.ends_with(':')))
        .map(|(_, s)| s)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(sanitize_segment)
        .collect();

    let file_name = segments
        .last()
        .ok_or_else(|| RawGrabError::InvalidPath(request.path.clone()))?;

    let mut path = output_dir.to_path_buf();
    if preserve_paths {
        path.push(sanitize_volume(&request.volume));
        path.extend(&segments);
    } else {
        path.push(file_name);
    }
    Ok(path)
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn sanitize_volume(volume: &str) -> String {
    let cleaned: String = volume
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "volume".to_string()
    } else {
        trimmed.to_string()
    }
}
