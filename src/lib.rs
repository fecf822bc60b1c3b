//! Build nf-core/rnaseq samplesheets from directories of FASTQ files, and
//! launch the pipeline on them.
//!
//! The core is the samplesheet builder: [`filenames`] finds mate files by
//! their filename conventions and groups them into samples, [`strandedness`]
//! assigns library strandedness, and [`manifest`] validates and writes the
//! four-column CSV the pipeline reads. [`pipeline`] and [`cloud`] are thin
//! wrappers around the `nextflow` and `aws` command line tools.

pub mod builder;
pub mod cloud;
pub mod config;
pub mod filenames;
pub mod manifest;
pub mod pipeline;
pub mod strandedness;
pub mod synthetic;
pub mod utils;

pub use builder::{BuildSummary, SamplesheetBuilder};
pub use config::Config;
pub use manifest::{SampleRecord, SamplesheetError, ValidationMode};
pub use strandedness::Strandedness;
