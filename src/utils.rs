// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Utility methods.

use anyhow::{bail, Context, Result};
use fastq::Record;
use flate2::read::MultiGzDecoder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const GZ_BUF_SIZE: usize = 1 << 22;

/// Open a (possibly gzipped or lz4-compressed) file into a BufReader.
pub fn open_with_gz<P: AsRef<Path>>(p: P) -> Result<Box<dyn BufRead>> {
    let path = p.as_ref();
    let r = File::open(path).with_context(|| path.display().to_string())?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => {
            let gz = MultiGzDecoder::new(r);
            Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, gz)))
        }
        Some("lz4") => {
            let lz = lz4::Decoder::new(r)?;
            Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, lz)))
        }
        _ => Ok(Box::new(BufReader::with_capacity(32 * 1024, r))),
    }
}

/// Parse the first record of a FASTQ file. Fails if the file is empty, isn't
/// FASTQ, or the first record's sequence and quality lengths differ.
pub fn check_fastq_head<P: AsRef<Path>>(p: P) -> Result<()> {
    let rdr = open_with_gz(&p)?;
    let mut iter = fastq::Parser::new(rdr).ref_iter();
    iter.advance()
        .with_context(|| format!("parsing {}", p.as_ref().display()))?;

    match iter.get() {
        None => bail!("no FASTQ records found"),
        Some(rec) => {
            if rec.seq().len() != rec.qual().len() {
                bail!(
                    "record {} has {} bases but {} quality scores",
                    String::from_utf8_lossy(rec.head()),
                    rec.seq().len(),
                    rec.qual().len()
                );
            }
        }
    }
    Ok(())
}

/// Print an error and everything that caused it, one cause per line.
pub fn print_error_chain(err: &anyhow::Error) {
    eprintln!("ERROR: {}", err.chain().join("\n\tCaused by: "));
}

/// A command line path that must exist, canonicalized to an absolute path
/// when parsed.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct CliPath {
    path: PathBuf,
}

impl From<PathBuf> for CliPath {
    fn from(path: PathBuf) -> Self {
        CliPath { path }
    }
}

impl FromStr for CliPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<CliPath> {
        let path = Path::new(s)
            .canonicalize()
            .with_context(|| format!("{s} is not an accessible path"))?;
        Ok(CliPath { path })
    }
}

impl fmt::Display for CliPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.path.display(), f)
    }
}

impl fmt::Debug for CliPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.path, f)
    }
}

impl From<CliPath> for PathBuf {
    fn from(obj: CliPath) -> PathBuf {
        obj.path
    }
}

impl AsRef<Path> for CliPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Deref for CliPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const RECORD: &[u8] = b"@r1 1/1\nACGT\n+\nIIII\n";

    #[test]
    fn test_plain_fastq() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("a.fastq");
        std::fs::write(&p, RECORD)?;
        check_fastq_head(&p)
    }

    #[test]
    fn test_gz_fastq() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("a.fastq.gz");
        let mut enc = GzEncoder::new(File::create(&p)?, Compression::default());
        enc.write_all(RECORD)?;
        enc.finish()?;
        check_fastq_head(&p)
    }

    #[test]
    fn test_lz4_fastq() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("a.fastq.lz4");
        let mut enc = lz4::EncoderBuilder::new().build(File::create(&p)?)?;
        enc.write_all(RECORD)?;
        let (_, res) = enc.finish();
        res?;
        check_fastq_head(&p)
    }

    #[test]
    fn test_empty_fastq() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("a.fq");
        File::create(&p)?;
        assert!(check_fastq_head(&p).is_err());
        Ok(())
    }

    #[test]
    fn test_not_fastq() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("a.fq");
        std::fs::write(&p, b">chr1\nACGT\n")?;
        assert!(check_fastq_head(&p).is_err());

        let p = dir.path().join("b.fq");
        std::fs::write(&p, b"@r1\nACGT\n+\nII\n")?;
        assert!(check_fastq_head(&p).is_err());
        Ok(())
    }

    #[test]
    fn test_cli_path() -> Result<()> {
        let p: CliPath = "test/filenames/../filenames/ctrl_paired".parse()?;
        assert!(p.is_absolute());
        assert!(p.ends_with("test/filenames/ctrl_paired"));
        assert!("test/filenames/nonexistent".parse::<CliPath>().is_err());
        Ok(())
    }
}
