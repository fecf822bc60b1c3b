//! Parse sequencing read filenames into a sample identifier and a mate number.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Filename suffixes recognized as FASTQ data.
pub const FASTQ_SUFFIXES: [&str; 4] = [".fastq.gz", ".fq.gz", ".fastq", ".fq"];

lazy_static! {
    static ref UNDERSCORE_R_REGEX: Regex =
        Regex::new(r"^(.+)_R([1-9])(?:_001)?\.f(?:ast)?q(?:\.gz)?$").unwrap();
    static ref DOT_R_REGEX: Regex = Regex::new(r"^(.+)\.R([1-9])\.f(?:ast)?q(?:\.gz)?$").unwrap();
    static ref UNDERSCORE_REGEX: Regex = Regex::new(r"^(.+)_([1-9])\.f(?:ast)?q(?:\.gz)?$").unwrap();
    static ref DOT_REGEX: Regex = Regex::new(r"^(.+)\.([1-9])\.f(?:ast)?q(?:\.gz)?$").unwrap();
    static ref UNMARKED_REGEX: Regex = Regex::new(r"^(.+)\.f(?:ast)?q(?:\.gz)?$").unwrap();
}

/// The mate-pair marker convention found in a filename. Files only pair
/// up with files that use the same convention.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum MateStyle {
    /// `<id>_R1.fastq.gz`, `<id>_R1_001.fastq.gz`
    UnderscoreR,
    /// `<id>.R1.fastq.gz`
    DotR,
    /// `<id>_1.fastq.gz`
    Underscore,
    /// `<id>.1.fastq.gz`
    Dot,
    /// `<id>.fastq.gz`
    Unmarked,
}

/// Checked in order; the first match wins.
fn marker_patterns() -> [(&'static Regex, MateStyle); 4] {
    [
        (&*UNDERSCORE_R_REGEX, MateStyle::UnderscoreR),
        (&*DOT_R_REGEX, MateStyle::DotR),
        (&*UNDERSCORE_REGEX, MateStyle::Underscore),
        (&*DOT_REGEX, MateStyle::Dot),
    ]
}

/// Returns true if `filename` ends with one of the `FASTQ_SUFFIXES`.
pub fn is_fastq_filename(filename: &str) -> bool {
    FASTQ_SUFFIXES.iter().any(|ext| filename.ends_with(ext))
}

/// A parsed representation of one read file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadFile {
    pub sample: String,
    pub style: MateStyle,
    /// Mate number taken from the marker, `None` for unmarked files
    pub mate: Option<u8>,
    pub path: PathBuf,
}

impl ReadFile {
    /// Attempt to parse `path` as a FASTQ read file. Returns `None` if the
    /// filename doesn't carry a recognized FASTQ suffix.
    pub fn new(path: impl AsRef<Path>) -> Option<ReadFile> {
        let filename = path.as_ref().file_name()?.to_str()?;
        if !is_fastq_filename(filename) {
            return None;
        }

        for (regex, style) in marker_patterns() {
            if let Some(cap) = regex.captures(filename) {
                let sample = cap.get(1).unwrap().as_str().to_string();
                let mate: u8 = cap.get(2).unwrap().as_str().parse().unwrap();

                return Some(ReadFile {
                    sample,
                    style,
                    mate: Some(mate),
                    path: path.as_ref().into(),
                });
            }
        }

        let cap = UNMARKED_REGEX.captures(filename)?;
        Some(ReadFile {
            sample: cap.get(1).unwrap().as_str().to_string(),
            style: MateStyle::Unmarked,
            mate: None,
            path: path.as_ref().into(),
        })
    }

    /// The path as a string, as it will appear in the samplesheet.
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(f: &str) -> (String, MateStyle, Option<u8>) {
        let r = ReadFile::new(f).unwrap();
        (r.sample, r.style, r.mate)
    }

    #[test]
    fn test_parse_underscore_r() {
        assert_eq!(
            parse("CTRL_1_R1.fastq.gz"),
            ("CTRL_1".to_string(), MateStyle::UnderscoreR, Some(1))
        );
        assert_eq!(
            parse("data/heart_S1_L002_R2_001.fastq.gz"),
            ("heart_S1_L002".to_string(), MateStyle::UnderscoreR, Some(2))
        );
    }

    #[test]
    fn test_parse_dot_r() {
        assert_eq!(
            parse("liver.R2.fq"),
            ("liver".to_string(), MateStyle::DotR, Some(2))
        );
    }

    #[test]
    fn test_parse_underscore() {
        assert_eq!(
            parse("SRR123_2.fq.gz"),
            ("SRR123".to_string(), MateStyle::Underscore, Some(2))
        );
        assert_eq!(
            parse("A_3.fastq"),
            ("A".to_string(), MateStyle::Underscore, Some(3))
        );
    }

    #[test]
    fn test_parse_dot() {
        assert_eq!(
            parse("kidney.1.fastq.gz"),
            ("kidney".to_string(), MateStyle::Dot, Some(1))
        );
    }

    #[test]
    fn test_parse_unmarked() {
        assert_eq!(
            parse("brain-rep.fastq.gz"),
            ("brain-rep".to_string(), MateStyle::Unmarked, None)
        );
        assert_eq!(
            parse("A_R.fq"),
            ("A_R".to_string(), MateStyle::Unmarked, None)
        );
        // a multi-digit suffix is part of the identifier
        assert_eq!(
            parse("SRR_12.fq"),
            ("SRR_12".to_string(), MateStyle::Unmarked, None)
        );
    }

    #[test]
    fn test_bad() {
        assert!(ReadFile::new("notes.txt").is_none());
        assert!(ReadFile::new("reads.fastq.bz2").is_none());
        assert!(ReadFile::new(".fastq.gz").is_none());
        assert!(ReadFile::new("sample.bam").is_none());
    }
}
