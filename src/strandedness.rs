//! Library strandedness values and the rule used to assign them to samples.

use crate::manifest::SampleRecord;
use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which strand of the cDNA was sequenced. `Auto` asks the pipeline
/// to infer it from a subsample of reads.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strandedness {
    #[default]
    Auto,
    Unstranded,
    Forward,
    Reverse,
}

impl Strandedness {
    pub const ALL: [Strandedness; 4] = [
        Strandedness::Auto,
        Strandedness::Unstranded,
        Strandedness::Forward,
        Strandedness::Reverse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strandedness::Auto => "auto",
            Strandedness::Unstranded => "unstranded",
            Strandedness::Forward => "forward",
            Strandedness::Reverse => "reverse",
        }
    }
}

impl fmt::Display for Strandedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strandedness {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Strandedness> {
        Strandedness::ALL
            .iter()
            .find(|v| v.as_str() == s)
            .copied()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid strandedness '{s}', expected one of: auto, unstranded, forward, reverse"
                )
            })
    }
}

#[derive(Deserialize)]
struct OverrideRow {
    sample: String,
    strandedness: Strandedness,
}

/// A default strandedness plus optional per-sample overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StrandednessRule {
    pub default: Strandedness,
    pub overrides: HashMap<String, Strandedness>,
}

impl From<Strandedness> for StrandednessRule {
    fn from(default: Strandedness) -> Self {
        StrandednessRule {
            default,
            overrides: HashMap::new(),
        }
    }
}

impl StrandednessRule {
    /// Load per-sample overrides from a `sample,strandedness` CSV.
    pub fn from_csv(default: Strandedness, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)
            .with_context(|| path.display().to_string())?;

        let mut overrides = HashMap::new();
        for (idx, row) in reader.deserialize::<OverrideRow>().enumerate() {
            // header is line 1
            let row = row.with_context(|| {
                format!("{}: invalid override on line {}", path.display(), idx + 2)
            })?;
            if let Some(prev) = overrides.insert(row.sample.clone(), row.strandedness) {
                if prev != row.strandedness {
                    bail!(
                        "{}: sample '{}' has conflicting strandedness overrides ({} and {})",
                        path.display(),
                        row.sample,
                        prev,
                        row.strandedness
                    );
                }
            }
        }

        Ok(StrandednessRule { default, overrides })
    }

    pub fn lookup(&self, sample: &str) -> Strandedness {
        self.overrides.get(sample).copied().unwrap_or(self.default)
    }
}

/// Set the strandedness of every record from `rule`.
pub fn assign_strandedness(
    records: Vec<SampleRecord>,
    rule: &StrandednessRule,
) -> Vec<SampleRecord> {
    for sample in rule.overrides.keys() {
        if !records.iter().any(|r| &r.sample == sample) {
            warn!("strandedness override for unknown sample '{sample}' ignored");
        }
    }

    records
        .into_iter()
        .map(|mut r| {
            r.strandedness = rule.lookup(&r.sample);
            r
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn record(sample: &str) -> SampleRecord {
        SampleRecord::single_end(sample, format!("/data/{sample}.fastq.gz"))
    }

    #[test]
    fn test_parse_display() {
        for s in Strandedness::ALL {
            assert_eq!(s.to_string().parse::<Strandedness>().unwrap(), s);
        }
        assert!("Reverse".parse::<Strandedness>().is_err());
        assert!("".parse::<Strandedness>().is_err());
        assert_eq!(Strandedness::default(), Strandedness::Auto);
    }

    #[test]
    fn test_default_applies_everywhere() {
        let records = vec![record("A"), record("B"), record("C")];
        let out = assign_strandedness(records, &Strandedness::Reverse.into());
        assert!(out.iter().all(|r| r.strandedness == Strandedness::Reverse));
    }

    #[test]
    fn test_overrides() {
        let mut rule = StrandednessRule::from(Strandedness::Unstranded);
        rule.overrides.insert("B".to_string(), Strandedness::Forward);
        rule.overrides.insert("Z".to_string(), Strandedness::Reverse);

        let out = assign_strandedness(vec![record("A"), record("B")], &rule);
        assert_eq!(out[0].strandedness, Strandedness::Unstranded);
        assert_eq!(out[1].strandedness, Strandedness::Forward);
    }

    #[test]
    fn test_from_csv() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "sample,strandedness")?;
        writeln!(f, "# comment")?;
        writeln!(f, "CTRL_1, reverse")?;
        writeln!(f, "CTRL_2,forward")?;
        f.flush()?;

        let rule = StrandednessRule::from_csv(Strandedness::Auto, f.path())?;
        assert_eq!(rule.lookup("CTRL_1"), Strandedness::Reverse);
        assert_eq!(rule.lookup("CTRL_2"), Strandedness::Forward);
        assert_eq!(rule.lookup("CTRL_3"), Strandedness::Auto);
        Ok(())
    }

    #[test]
    fn test_from_csv_bad_value() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "sample,strandedness")?;
        writeln!(f, "CTRL_1,sideways")?;
        f.flush()?;

        let err = StrandednessRule::from_csv(Strandedness::Auto, f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        Ok(())
    }

    #[test]
    fn test_from_csv_conflict() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "sample,strandedness")?;
        writeln!(f, "A,forward")?;
        writeln!(f, "A,reverse")?;
        f.flush()?;

        assert!(StrandednessRule::from_csv(Strandedness::Auto, f.path()).is_err());
        Ok(())
    }
}
