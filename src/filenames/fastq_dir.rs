//! Scan a directory of FASTQ files and group them into samples.

use super::read_file::{is_fastq_filename, MateStyle, ReadFile};
use super::FindSamples;
use crate::manifest::SampleRecord;
use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A directory holding the FASTQ files of a sequencing run, one or two
/// files per sample. Only the immediate contents are scanned.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct FastqDir {
    /// The directory to scan
    pub fastq_path: PathBuf,

    /// Only consider filenames matching this regex
    pub pattern: Option<String>,
}

impl FastqDir {
    pub fn new(fastq_path: impl AsRef<Path>) -> FastqDir {
        FastqDir {
            fastq_path: fastq_path.as_ref().to_path_buf(),
            pattern: None,
        }
    }

    pub fn with_pattern(mut self, pattern: Option<String>) -> FastqDir {
        self.pattern = pattern;
        self
    }
}

impl FindSamples for FastqDir {
    fn find_samples(&self) -> Result<Vec<SampleRecord>> {
        let pattern = self
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid filename pattern")?;

        let files = get_read_files(&self.fastq_path, pattern.as_ref())?;
        info!(
            "found {} FASTQ files in {}",
            files.len(),
            self.fastq_path.display()
        );
        Ok(group_read_files(files))
    }
}

/// Find all the FASTQ files directly inside `path`.
fn get_read_files(path: &Path, pattern: Option<&Regex>) -> Result<Vec<ReadFile>> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }

    let mut res = Vec::new();
    let dir_files = std::fs::read_dir(path).with_context(|| path.display().to_string())?;

    for f in dir_files {
        let path = f?.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name() else {
            continue;
        };
        let Some(filename) = filename.to_str() else {
            if is_fastq_filename(&filename.to_string_lossy()) {
                bail!(
                    "FASTQ file {} does not have a valid UTF-8 name",
                    path.display()
                );
            }
            warn!("skipping {}: name is not valid UTF-8", path.display());
            continue;
        };

        let keep = match pattern {
            Some(re) => re.is_match(filename),
            None => true,
        };
        if !keep {
            continue;
        }

        if let Some(parsed) = ReadFile::new(&path) {
            debug!("{} -> sample {}", path.display(), parsed.sample);
            res.push(parsed);
        }
    }

    Ok(res)
}

/// Group read files by (sample, marker convention) and assign mates. The
/// result is sorted by sample identifier.
pub fn group_read_files(mut files: Vec<ReadFile>) -> Vec<SampleRecord> {
    files.sort();

    let mut res = Vec::new();
    for ((sample, style), group) in &files
        .into_iter()
        .group_by(|f| (f.sample.clone(), f.style))
    {
        res.push(pair_files(sample, style, group.collect()));
    }
    res
}

/// Build the candidate record for one group. Files that don't fit a mate
/// slot are kept in `unmatched` so that validation can report them.
///
/// A lone first mate, e.g. `B_R1_001.fastq.gz` from a single-end run, is a
/// single-end sample `B`. A lone second mate leaves `fastq_1` empty and fails
/// validation (see "Lone mates" in DESIGN.md).
fn pair_files(sample: String, style: MateStyle, files: Vec<ReadFile>) -> SampleRecord {
    let mut record = SampleRecord::single_end(sample, String::new());

    if style == MateStyle::Unmarked {
        let mut paths = files.iter().map(ReadFile::path_string);
        record.fastq_1 = paths.next().unwrap_or_default();
        record.unmatched = paths.collect();
        return record;
    }

    for f in files {
        match f.mate {
            Some(1) if record.fastq_1.is_empty() => record.fastq_1 = f.path_string(),
            Some(2) if record.fastq_2.is_empty() => record.fastq_2 = f.path_string(),
            _ => record.unmatched.push(f.path_string()),
        }
    }
    record
}
