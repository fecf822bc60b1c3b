//! Turn a directory of FASTQ files into a validated samplesheet:
//! discover, rewrite paths, assign strandedness, validate, emit.

use crate::config::SamplesheetConfig;
use crate::filenames::{FastqDir, FindSamples};
use crate::manifest::{self, SampleRecord, ValidationMode};
use crate::strandedness::{assign_strandedness, StrandednessRule};
use anyhow::{bail, Result};
use log::info;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Counts reported after a samplesheet is written.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildSummary {
    pub total: usize,
    pub paired_end: usize,
    pub single_end: usize,
}

impl BuildSummary {
    pub fn of(records: &[SampleRecord]) -> BuildSummary {
        let paired_end = records.iter().filter(|r| r.is_paired()).count();
        BuildSummary {
            total: records.len(),
            paired_end,
            single_end: records.len() - paired_end,
        }
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples ({} paired-end, {} single-end)",
            self.total, self.paired_end, self.single_end
        )
    }
}

pub struct SamplesheetBuilder {
    input_dir: PathBuf,
    config: SamplesheetConfig,
}

impl SamplesheetBuilder {
    pub fn new(input_dir: impl AsRef<Path>, config: SamplesheetConfig) -> SamplesheetBuilder {
        SamplesheetBuilder {
            input_dir: input_dir.as_ref().to_path_buf(),
            config,
        }
    }

    /// The (local, remote) prefix pair, when paths are rewritten to object storage.
    fn prefixes(&self) -> Result<Option<(&str, &str)>> {
        match (&self.config.local_prefix, &self.config.remote_prefix) {
            (Some(local), Some(remote)) => Ok(Some((local.as_str(), remote.as_str()))),
            (None, None) => Ok(None),
            (None, Some(_)) => bail!("a remote prefix requires a local prefix to replace"),
            (Some(_), None) => bail!("a local prefix requires a remote prefix to replace it with"),
        }
    }

    pub fn validation_mode(&self) -> ValidationMode {
        if self.config.remote_prefix.is_some() {
            ValidationMode::Remote
        } else {
            ValidationMode::Local {
                check_format: self.config.check_format,
            }
        }
    }

    pub fn strandedness_rule(&self) -> Result<StrandednessRule> {
        match &self.config.strandedness_csv {
            Some(csv) => StrandednessRule::from_csv(self.config.default_strandedness, csv),
            None => Ok(self.config.default_strandedness.into()),
        }
    }

    /// Discover and validate the samples, without writing anything.
    pub fn build(&self) -> Result<Vec<SampleRecord>> {
        let prefixes = self.prefixes()?;
        let rule = self.strandedness_rule()?;

        info!("scanning {}", self.input_dir.display());
        let mut records = FastqDir::new(&self.input_dir)
            .with_pattern(self.config.pattern.clone())
            .find_samples()?;

        if let Some((local, remote)) = prefixes {
            info!("rewriting {local} to {remote}");
            records = manifest::rewrite_paths(records, local, remote);
        }

        let records = assign_strandedness(records, &rule);
        manifest::validate(&records, &self.validation_mode())?;
        Ok(records)
    }

    /// Build the samplesheet and write it to `output`. Nothing is written if
    /// any step fails.
    pub fn write(&self, output: impl AsRef<Path>) -> Result<BuildSummary> {
        let records = self.build()?;
        manifest::emit(&records, &output)?;

        let summary = BuildSummary::of(&records);
        info!(
            "samplesheet written to {}: {summary}",
            output.as_ref().display()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifest::{read_samplesheet, SamplesheetError};
    use crate::strandedness::Strandedness;
    use pretty_assertions::assert_eq;
    use std::fs::File;

    #[test]
    fn test_ctrl_scenario() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("samplesheet.csv");

        let builder =
            SamplesheetBuilder::new("test/filenames/ctrl_paired", SamplesheetConfig::default());
        let summary = builder.write(&out)?;
        assert_eq!(
            summary,
            BuildSummary {
                total: 2,
                paired_end: 2,
                single_end: 0
            }
        );
        assert!(file_diff::diff(
            out.to_str().unwrap(),
            "test/manifests/ctrl_paired.csv"
        ));
        Ok(())
    }

    #[test]
    fn test_default_reverse() -> Result<()> {
        let config = SamplesheetConfig {
            default_strandedness: Strandedness::Reverse,
            ..Default::default()
        };
        let records = SamplesheetBuilder::new("test/filenames/mixed", config).build()?;
        assert_eq!(records.len(), 4);
        assert!(records
            .iter()
            .all(|r| r.strandedness == Strandedness::Reverse));
        Ok(())
    }

    #[test]
    fn test_remote_rewrite() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("samplesheet.csv");
        let config = SamplesheetConfig {
            local_prefix: Some("test/filenames/mixed".to_string()),
            remote_prefix: Some("s3://lab-data/run7".to_string()),
            ..Default::default()
        };
        let summary = SamplesheetBuilder::new("test/filenames/mixed", config).write(&out)?;
        assert_eq!(summary.single_end, 1);

        let records = read_samplesheet(&out)?;
        let lung = records.iter().find(|r| r.sample == "lung").unwrap();
        assert_eq!(lung.fastq_1, "s3://lab-data/run7/lung.fq.gz");
        assert_eq!(lung.fastq_2, "");
        Ok(())
    }

    #[test]
    fn test_remote_requires_local_prefix() {
        let config = SamplesheetConfig {
            remote_prefix: Some("s3://lab-data/run7".to_string()),
            ..Default::default()
        };
        assert!(SamplesheetBuilder::new("test/filenames/mixed", config)
            .build()
            .is_err());
    }

    #[test]
    fn test_failure_writes_nothing() -> Result<()> {
        let input = tempfile::tempdir()?;
        for f in ["A_1.fq.gz", "A_2.fq.gz", "A_3.fq.gz"] {
            File::create(input.path().join(f))?;
        }
        let out_dir = tempfile::tempdir()?;
        let out = out_dir.path().join("samplesheet.csv");

        let err = SamplesheetBuilder::new(input.path(), SamplesheetConfig::default())
            .write(&out)
            .unwrap_err();
        match err.downcast_ref::<SamplesheetError>() {
            Some(SamplesheetError::AmbiguousGrouping { sample, .. }) => assert_eq!(sample, "A"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn test_empty_dir() -> Result<()> {
        let input = tempfile::tempdir()?;
        let err = SamplesheetBuilder::new(input.path(), SamplesheetConfig::default())
            .build()
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SamplesheetError>(),
            Some(&SamplesheetError::NoSamples)
        );
        Ok(())
    }

    #[test]
    fn test_strandedness_overrides() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let csv = dir.path().join("strand.csv");
        std::fs::write(&csv, "sample,strandedness\nCTRL_2,forward\n")?;
        let config = SamplesheetConfig {
            default_strandedness: Strandedness::Unstranded,
            strandedness_csv: Some(csv),
            ..Default::default()
        };

        let records = SamplesheetBuilder::new("test/filenames/ctrl_paired", config).build()?;
        assert_eq!(records[0].strandedness, Strandedness::Unstranded);
        assert_eq!(records[1].strandedness, Strandedness::Forward);
        Ok(())
    }
}
