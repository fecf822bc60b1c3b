//! The samplesheet consumed by nf-core/rnaseq: one row per sample, with
//! the read files and library strandedness.

use crate::strandedness::Strandedness;
use crate::utils;
use anyhow::{bail, ensure, Context, Result};
use itertools::Itertools;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use url::Url;

/// The fixed header row of the samplesheet.
pub const HEADER: [&str; 4] = ["sample", "fastq_1", "fastq_2", "strandedness"];

/// Object storage URL schemes accepted for remote read files.
pub const REMOTE_SCHEMES: [&str; 3] = ["s3", "gs", "az"];

/// One sample of the samplesheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleRecord {
    pub sample: String,
    pub fastq_1: String,
    /// Empty for single-end samples
    pub fastq_2: String,
    pub strandedness: Strandedness,
    /// Files grouped under this sample that don't fit a mate slot.
    /// Never written out; validation rejects records where this is non-empty.
    pub unmatched: Vec<String>,
}

impl SampleRecord {
    pub fn single_end(sample: impl Into<String>, fastq_1: impl Into<String>) -> SampleRecord {
        SampleRecord {
            sample: sample.into(),
            fastq_1: fastq_1.into(),
            fastq_2: String::new(),
            strandedness: Strandedness::default(),
            unmatched: Vec::new(),
        }
    }

    pub fn paired_end(
        sample: impl Into<String>,
        fastq_1: impl Into<String>,
        fastq_2: impl Into<String>,
    ) -> SampleRecord {
        SampleRecord {
            fastq_2: fastq_2.into(),
            ..SampleRecord::single_end(sample, fastq_1)
        }
    }

    pub fn is_paired(&self) -> bool {
        !self.fastq_2.is_empty()
    }

    /// The non-empty read paths of this record.
    pub fn read_paths(&self) -> impl Iterator<Item = &str> {
        [self.fastq_1.as_str(), self.fastq_2.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
    }
}

#[derive(Serialize)]
struct ManifestRow<'a> {
    sample: &'a str,
    fastq_1: &'a str,
    fastq_2: &'a str,
    strandedness: Strandedness,
}

impl<'a> From<&'a SampleRecord> for ManifestRow<'a> {
    fn from(r: &'a SampleRecord) -> Self {
        ManifestRow {
            sample: &r.sample,
            fastq_1: &r.fastq_1,
            fastq_2: &r.fastq_2,
            strandedness: r.strandedness,
        }
    }
}

/// A samplesheet problem attributable to one sample, or to the sheet as a whole.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SamplesheetError {
    #[error(
        "No samples were found. Make sure the input directory contains files ending in \
         .fastq.gz, .fq.gz, .fastq or .fq"
    )]
    NoSamples,

    #[error(
        "Invalid sample name {sample:?}: sample names must be non-empty and must not \
         contain whitespace, commas or double quotes"
    )]
    InvalidSampleName { sample: String },

    #[error(
        "Sample {sample}: could not pair these read files with a first/second mate: {}",
        .files.join(", ")
    )]
    AmbiguousGrouping { sample: String, files: Vec<String> },

    #[error("Sample {sample}: no first-mate read file (fastq_1 is empty)")]
    MissingRead1 { sample: String },

    #[error("Sample {sample}: the path {value:?} contains a comma, a double quote or a line break")]
    UnsafeField { sample: String, value: String },

    #[error("Sample {sample} appears more than once in the samplesheet")]
    DuplicateSample { sample: String },

    #[error("Sample {sample}: read file {path} does not exist")]
    MissingFile { sample: String, path: String },

    #[error(
        "Sample {sample}: {uri} is not a valid object storage URI \
         (expected s3://, gs:// or az:// followed by a bucket and key)"
    )]
    InvalidUri { sample: String, uri: String },

    #[error("Sample {sample}: {path} is not a readable FASTQ file: {reason}")]
    UnreadableFastq {
        sample: String,
        path: String,
        reason: String,
    },
}

/// Where the read files of a samplesheet are expected to live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every path must be an existing file. With `check_format`, the first
    /// record of each file is also parsed.
    Local { check_format: bool },
    /// Every path must be an object storage URI. Existence isn't checked.
    Remote,
    /// Paths with a URL scheme are checked as URIs, the rest as local files.
    /// Used for hand-edited samplesheets.
    Inferred,
}

impl ValidationMode {
    pub fn local() -> ValidationMode {
        ValidationMode::Local {
            check_format: false,
        }
    }
}

/// Characters that would make the csv writer quote a field.
const UNSAFE_PATH_CHARS: [char; 4] = [',', '"', '\n', '\r'];

fn is_valid_sample_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c == ',' || c == '"')
}

/// Check that `uri` names an object in a bucket, e.g. `s3://bucket/reads.fq.gz`.
pub fn is_object_storage_uri(uri: &str) -> bool {
    match Url::parse(uri) {
        Ok(url) => {
            REMOTE_SCHEMES.contains(&url.scheme())
                && url.host_str().map_or(false, |h| !h.is_empty())
                && url.path().len() > 1
        }
        Err(_) => false,
    }
}

/// Validate a set of records, stopping at the first problem found.
pub fn validate(records: &[SampleRecord], mode: &ValidationMode) -> Result<(), SamplesheetError> {
    if records.is_empty() {
        return Err(SamplesheetError::NoSamples);
    }

    for r in records {
        let sample = || r.sample.clone();

        if !is_valid_sample_name(&r.sample) {
            return Err(SamplesheetError::InvalidSampleName { sample: sample() });
        }
        if !r.unmatched.is_empty() {
            return Err(SamplesheetError::AmbiguousGrouping {
                sample: sample(),
                files: r.unmatched.clone(),
            });
        }
        if r.fastq_1.is_empty() {
            return Err(SamplesheetError::MissingRead1 { sample: sample() });
        }
        if let Some(p) = r.read_paths().find(|p| p.contains(UNSAFE_PATH_CHARS)) {
            return Err(SamplesheetError::UnsafeField {
                sample: sample(),
                value: p.to_string(),
            });
        }
    }

    if let Some(dup) = records.iter().map(|r| &r.sample).duplicates().next() {
        return Err(SamplesheetError::DuplicateSample {
            sample: dup.clone(),
        });
    }

    for r in records {
        for p in r.read_paths() {
            check_read_path(&r.sample, p, mode)?;
        }
    }

    Ok(())
}

fn check_read_path(sample: &str, path: &str, mode: &ValidationMode) -> Result<(), SamplesheetError> {
    match *mode {
        ValidationMode::Remote => check_remote_path(sample, path),
        ValidationMode::Local { check_format } => check_local_path(sample, path, check_format),
        ValidationMode::Inferred if path.contains("://") => check_remote_path(sample, path),
        ValidationMode::Inferred => check_local_path(sample, path, false),
    }
}

fn check_remote_path(sample: &str, path: &str) -> Result<(), SamplesheetError> {
    if !is_object_storage_uri(path) {
        return Err(SamplesheetError::InvalidUri {
            sample: sample.to_string(),
            uri: path.to_string(),
        });
    }
    Ok(())
}

fn check_local_path(sample: &str, path: &str, check_format: bool) -> Result<(), SamplesheetError> {
    if !Path::new(path).is_file() {
        return Err(SamplesheetError::MissingFile {
            sample: sample.to_string(),
            path: path.to_string(),
        });
    }
    if check_format {
        utils::check_fastq_head(path).map_err(|e| SamplesheetError::UnreadableFastq {
            sample: sample.to_string(),
            path: path.to_string(),
            reason: format!("{e:#}"),
        })?;
    }
    Ok(())
}

fn rewrite_prefix(path: &str, local_prefix: &str, remote_prefix: &str) -> String {
    match path.strip_prefix(local_prefix) {
        Some(rest) if !path.is_empty() => format!("{remote_prefix}{rest}"),
        _ => path.to_string(),
    }
}

/// Replace `local_prefix` with `remote_prefix` at the start of every read path.
/// Paths that don't start with `local_prefix` are left as they are.
pub fn rewrite_paths(
    records: Vec<SampleRecord>,
    local_prefix: &str,
    remote_prefix: &str,
) -> Vec<SampleRecord> {
    let rw = |p: &str| rewrite_prefix(p, local_prefix, remote_prefix);

    records
        .into_iter()
        .map(|r| SampleRecord {
            fastq_1: rw(&r.fastq_1),
            fastq_2: rw(&r.fastq_2),
            unmatched: r.unmatched.iter().map(|p| rw(p)).collect(),
            ..r
        })
        .collect()
}

/// Write the samplesheet to `output`, replacing any existing file.
pub fn emit(records: &[SampleRecord], output: impl AsRef<Path>) -> Result<()> {
    let output = output.as_ref();
    let writer = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    wtr.write_record(HEADER)?;
    for r in records {
        wtr.serialize(ManifestRow::from(r))?;
    }
    wtr.flush()
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

/// Read a samplesheet written by `emit` or by hand.
pub fn read_samplesheet(path: impl AsRef<Path>) -> Result<Vec<SampleRecord>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| path.display().to_string())?;

    let headers = reader.headers()?.clone();
    ensure!(
        headers.iter().eq(HEADER.iter().copied()),
        "{}: the samplesheet header must be \"{}\", found \"{}\"",
        path.display(),
        HEADER.join(","),
        headers.iter().join(",")
    );

    let mut records = Vec::new();
    for rec in reader.records() {
        let rec = rec.with_context(|| format!("{}: malformed row", path.display()))?;
        let line = rec.position().map_or(0, |p| p.line());
        if rec.len() != HEADER.len() {
            bail!(
                "{}: line {line} has {} fields, expected {}",
                path.display(),
                rec.len(),
                HEADER.len()
            );
        }

        let strandedness: Strandedness = rec[3]
            .parse()
            .with_context(|| format!("{}: line {line}", path.display()))?;
        records.push(SampleRecord {
            strandedness,
            ..SampleRecord::paired_end(&rec[0], &rec[1], &rec[2])
        });
    }

    Ok(records)
}
