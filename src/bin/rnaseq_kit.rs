//! rnaseq-kit
#![deny(missing_docs)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use rnaseq_kit::cloud::{resolve_account_id, AwsCli, BootstrapPlan};
use rnaseq_kit::config::Config;
use rnaseq_kit::manifest;
use rnaseq_kit::pipeline::{PipelineLauncher, Reference, RunRequest};
use rnaseq_kit::synthetic::SyntheticReads;
use rnaseq_kit::utils::{print_error_chain, CliPath};
use rnaseq_kit::{SamplesheetBuilder, Strandedness};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Build nf-core/rnaseq samplesheets and run the pipeline
#[derive(Parser, Debug)]
#[clap(name = "rnaseq-kit", version)]
struct RnaseqKit {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Scan a directory of FASTQ files and write a samplesheet.
    #[clap(name = "samplesheet")]
    Samplesheet(Samplesheet),

    /// Run nf-core/rnaseq on a samplesheet.
    #[clap(name = "run")]
    Run(Run),

    /// Create the AWS resources needed to run on AWS Batch.
    #[clap(name = "bootstrap")]
    Bootstrap(Bootstrap),

    /// Write small synthetic paired-end FASTQ files for testing.
    #[clap(name = "synth")]
    Synth(Synth),
}

#[derive(Parser, Debug)]
struct Samplesheet {
    /// Directory containing the FASTQ files. Subdirectories are not searched.
    /// Read paths are written relative to it as given, so --local-prefix
    /// should be spelled the same way.
    #[clap(long, value_name = "PATH")]
    input_dir: PathBuf,

    /// Samplesheet CSV to write.
    #[clap(long, value_name = "CSV")]
    output: PathBuf,

    /// Strandedness for samples without an override
    /// [default: auto, or the config file value].
    #[clap(long, value_name = "auto|unstranded|forward|reverse")]
    strandedness: Option<Strandedness>,

    /// Replace --local-prefix with this object storage prefix in every read path.
    #[clap(long, value_name = "URI", requires = "local_prefix")]
    remote_prefix: Option<String>,

    /// Path prefix replaced by --remote-prefix.
    #[clap(long, value_name = "PATH", requires = "remote_prefix")]
    local_prefix: Option<String>,

    /// Only use FASTQ files whose names match this regular expression.
    #[clap(long, value_name = "REGEX")]
    pattern: Option<String>,

    /// CSV with `sample,strandedness` columns of per-sample overrides.
    #[clap(long, value_name = "CSV")]
    strandedness_csv: Option<CliPath>,

    /// Parse the first record of every FASTQ file.
    #[clap(long)]
    check_format: bool,

    /// TOML config file.
    #[clap(long, value_name = "TOML")]
    config: Option<CliPath>,
}

impl Samplesheet {
    fn execute(self) -> Result<ExitCode> {
        let mut config = Config::load_or_default(self.config.as_deref())?.samplesheet;
        if let Some(s) = self.strandedness {
            config.default_strandedness = s;
        }
        if self.remote_prefix.is_some() {
            config.remote_prefix = self.remote_prefix;
            config.local_prefix = self.local_prefix;
        }
        if self.pattern.is_some() {
            config.pattern = self.pattern;
        }
        if let Some(csv) = self.strandedness_csv {
            config.strandedness_csv = Some(csv.into());
        }
        config.check_format |= self.check_format;

        let summary = SamplesheetBuilder::new(&self.input_dir, config).write(&self.output)?;
        println!("Wrote {}: {summary}", self.output.display());
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Parser, Debug)]
struct Run {
    /// Samplesheet CSV.
    #[clap(long, value_name = "CSV")]
    input: PathBuf,

    /// Output directory or object storage URI.
    #[clap(long, value_name = "PATH|URI")]
    outdir: String,

    /// iGenomes reference identifier, e.g. GRCh38.
    #[clap(long, value_name = "ID", conflicts_with_all = ["fasta", "gtf"])]
    genome: Option<String>,

    /// Genome FASTA. Requires --gtf.
    #[clap(long, value_name = "PATH|URI", requires = "gtf")]
    fasta: Option<String>,

    /// Gene annotation GTF. Requires --fasta.
    #[clap(long, value_name = "PATH|URI", requires = "fasta")]
    gtf: Option<String>,

    /// Override the strandedness of every sample in the samplesheet.
    #[clap(long, value_name = "auto|unstranded|forward|reverse")]
    strandedness: Option<Strandedness>,

    /// Execution profile [default: docker, or the config file value].
    #[clap(long)]
    profile: Option<String>,

    /// Resume a previous run from its cached results.
    #[clap(long)]
    resume: bool,

    /// Check the inputs and print the pipeline command line. Nothing is
    /// written and the pipeline is not run.
    #[clap(long)]
    dry_run: bool,

    /// TOML config file.
    #[clap(long, value_name = "TOML")]
    config: Option<CliPath>,
}

impl Run {
    fn execute(self) -> Result<ExitCode> {
        let config = Config::load_or_default(self.config.as_deref())?.pipeline;
        let request = RunRequest {
            input: self.input,
            outdir: self.outdir,
            reference: Reference::from_args(self.genome, self.fasta, self.gtf)?,
            strandedness: self.strandedness,
            profile: self.profile,
            resume: self.resume,
        };

        let launcher = PipelineLauncher::new(config, std::env::var_os("PATH"));
        if self.dry_run {
            let planned = launcher.plan(&request)?;
            println!("{}", planned.command_line());
            return Ok(ExitCode::SUCCESS);
        }
        launcher.prepare(&request)?.execute()
    }
}

#[derive(Parser, Debug)]
struct Bootstrap {
    /// Do not ask for confirmation.
    #[clap(long)]
    yes: bool,

    /// Skip the steps before this one, e.g. after fixing a failed step.
    #[clap(long, value_name = "STEP")]
    from_step: Option<String>,

    /// Path to the aws executable.
    #[clap(long, default_value = "aws", value_name = "PATH")]
    aws: PathBuf,

    /// TOML config file.
    #[clap(long, value_name = "TOML")]
    config: Option<CliPath>,
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

impl Bootstrap {
    fn execute(self) -> Result<ExitCode> {
        let config = Config::load_or_default(self.config.as_deref())?.cloud;
        let cli = AwsCli::new(&self.aws, config.region.clone());
        let account_id = resolve_account_id(&config, &cli)?;
        let plan = BootstrapPlan::new(&config, &account_id)?;

        println!("AWS account {account_id}. The following resources will be created if missing:");
        print!("{plan}");
        if !self.yes && !confirm("Continue?")? {
            bail!("bootstrap cancelled");
        }

        let outcomes = plan.run(&cli, self.from_step.as_deref())?;
        info!("bootstrap finished, {} steps run", outcomes.len());
        println!(
            "Job queue {} is ready. Use it with the awsbatch profile.",
            plan.names.job_queue
        );
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Parser, Debug)]
struct Synth {
    /// Directory to write the FASTQ files into.
    #[clap(long, value_name = "PATH")]
    output_dir: PathBuf,

    /// Sample names.
    #[clap(long, num_args = 1.., required = true, value_name = "NAME")]
    samples: Vec<String>,

    /// Read pairs per sample.
    #[clap(long, default_value_t = 10_000)]
    num_reads: usize,

    /// Read length in bases.
    #[clap(long, default_value_t = 75)]
    read_length: usize,

    /// Random seed.
    #[clap(long, default_value_t = 0)]
    seed: u64,

    /// Also write a samplesheet for the generated files.
    #[clap(long, value_name = "CSV")]
    samplesheet: Option<PathBuf>,
}

impl Synth {
    fn execute(self) -> Result<ExitCode> {
        let reads = SyntheticReads {
            num_reads: self.num_reads,
            read_length: self.read_length,
            seed: self.seed,
        };
        let records = reads.generate(&self.output_dir, &self.samples)?;
        if let Some(path) = &self.samplesheet {
            write_samplesheet(&records, path)?;
        }
        println!(
            "Wrote {} samples to {}",
            records.len(),
            self.output_dir.display()
        );
        Ok(ExitCode::SUCCESS)
    }
}

fn write_samplesheet(records: &[manifest::SampleRecord], path: &Path) -> Result<()> {
    manifest::validate(records, &manifest::ValidationMode::local())?;
    manifest::emit(records, path).with_context(|| format!("writing {}", path.display()))
}

fn inner_main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    match RnaseqKit::parse().subcmd {
        SubCommand::Samplesheet(c) => c.execute(),
        SubCommand::Run(c) => c.execute(),
        SubCommand::Bootstrap(c) => c.execute(),
        SubCommand::Synth(c) => c.execute(),
    }
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
