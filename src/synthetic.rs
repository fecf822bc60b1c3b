//! Generate small synthetic paired-end FASTQ datasets for smoke-testing a
//! pipeline launch without real sequencing data.

use crate::manifest::SampleRecord;
use anyhow::{ensure, Context, Result};
use bio::io::fastq;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

const BASES: &[u8] = b"ACGT";

/// Mostly Q40, with some lower-quality calls mixed in.
const QUALITIES: &[u8] = b"IIIIIIIIIIHHHHHGGGGGFFFFF";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SyntheticReads {
    /// Read pairs per sample
    pub num_reads: usize,
    pub read_length: usize,
    pub seed: u64,
}

impl Default for SyntheticReads {
    fn default() -> Self {
        SyntheticReads {
            num_reads: 10_000,
            read_length: 75,
            seed: 0,
        }
    }
}

fn random_bytes(rng: &mut impl Rng, alphabet: &[u8], len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect()
}

impl SyntheticReads {
    /// Write `<sample>_1.fastq.gz` and `<sample>_2.fastq.gz` for each sample into
    /// `output_dir`, and return the matching samplesheet records.
    pub fn generate(
        &self,
        output_dir: impl AsRef<Path>,
        samples: &[String],
    ) -> Result<Vec<SampleRecord>> {
        let output_dir = output_dir.as_ref();
        ensure!(self.read_length > 0, "read length must be at least 1");
        std::fs::create_dir_all(output_dir)
            .with_context(|| output_dir.display().to_string())?;

        let mut rng = XorShiftRng::seed_from_u64(self.seed);
        let mut records = Vec::with_capacity(samples.len());

        for sample in samples {
            info!("generating {sample} ({} read pairs)", self.num_reads);
            let r1 = output_dir.join(format!("{sample}_1.fastq.gz"));
            let r2 = output_dir.join(format!("{sample}_2.fastq.gz"));
            self.write_mate(&mut rng, sample, 1, &r1)?;
            self.write_mate(&mut rng, sample, 2, &r2)?;

            records.push(SampleRecord::paired_end(
                sample.as_str(),
                r1.to_string_lossy(),
                r2.to_string_lossy(),
            ));
        }

        Ok(records)
    }

    fn write_mate(
        &self,
        rng: &mut XorShiftRng,
        sample: &str,
        mate: u8,
        path: &Path,
    ) -> Result<()> {
        let mut enc = GzEncoder::new(
            File::create(path).with_context(|| path.display().to_string())?,
            Compression::fast(),
        );

        {
            let mut writer = fastq::Writer::new(&mut enc);
            for n in 1..=self.num_reads {
                let id = format!("{sample}.{n}");
                let desc = format!("{n}/{mate}");
                let seq = random_bytes(rng, BASES, self.read_length);
                let qual = random_bytes(rng, QUALITIES, self.read_length);
                writer
                    .write(&id, Some(desc.as_str()), &seq, &qual)
                    .with_context(|| path.display().to_string())?;
            }
            writer.flush()?;
        }

        enc.finish()
            .with_context(|| format!("finishing {}", path.display()))?;
        Ok(())
    }
}
