//! Utilities for finding groups of FASTQ files on disk.

pub mod fastq_dir;
pub mod read_file;

use crate::manifest::SampleRecord;
use anyhow::Result;

pub use fastq_dir::FastqDir;
pub use read_file::{MateStyle, ReadFile};

/// A method to find a set of candidate `SampleRecord`s based on
/// some configuration information held by `self`,
/// and the filename conventions encoded in the implementing
/// type. Records are returned sorted by sample name and are not yet
/// validated.
pub trait FindSamples {
    fn find_samples(&self) -> Result<Vec<SampleRecord>>;
}
