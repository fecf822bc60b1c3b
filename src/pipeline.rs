//! Launch nf-core/rnaseq on a samplesheet. Arguments are checked up front,
//! the pipeline parameters are written to a JSON params file, and the workflow
//! engine is run once as a blocking child process whose exit code is passed
//! back to the caller.

use crate::config::PipelineConfig;
use crate::manifest::{self, is_object_storage_uri, SampleRecord, ValidationMode};
use crate::strandedness::Strandedness;
use anyhow::{bail, ensure, Context, Result};
use log::info;
use serde_json::{json, Map, Value};
use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, ExitStatus};

/// Convert something to an ExitCode.
pub trait IntoExitCode {
    fn into_exit_code(self) -> ExitCode;
}

impl IntoExitCode for ExitStatus {
    /// Convert an ExitStatus to an ExitCode.
    fn into_exit_code(self) -> ExitCode {
        ExitCode::from(exit_byte(self.code()))
    }
}

/// The process exit byte for a child's exit code. Codes that don't fit in
/// 1..=255, and deaths by signal, become 1 so that failure is never reported
/// as success.
fn exit_byte(code: Option<i32>) -> u8 {
    match code {
        Some(0) => 0,
        Some(c) => u8::try_from(c).ok().filter(|&b| b != 0).unwrap_or(1),
        None => 1,
    }
}

/// The reference genome to align against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    /// An iGenomes identifier such as `GRCh38`
    Genome(String),
    /// Explicit genome FASTA and annotation GTF, local paths or object storage URIs
    Files { fasta: String, gtf: String },
}

impl Reference {
    /// Build from command line arguments: either a genome id, or both a FASTA and a GTF.
    pub fn from_args(
        genome: Option<String>,
        fasta: Option<String>,
        gtf: Option<String>,
    ) -> Result<Reference> {
        match (genome, fasta, gtf) {
            (Some(g), None, None) => {
                ensure!(!g.trim().is_empty(), "the genome identifier is empty");
                Ok(Reference::Genome(g))
            }
            (None, Some(fasta), Some(gtf)) => Ok(Reference::Files { fasta, gtf }),
            (Some(_), _, _) => bail!("specify either a genome identifier or FASTA and GTF files, not both"),
            (None, None, None) => bail!("a reference is required: specify a genome identifier, or FASTA and GTF files"),
            (None, _, _) => bail!("both a FASTA and a GTF file are required when no genome identifier is given"),
        }
    }

    fn check(&self) -> Result<()> {
        if let Reference::Files { fasta, gtf } = self {
            for (kind, p) in [("FASTA", fasta), ("GTF", gtf)] {
                if p.contains("://") {
                    ensure!(is_object_storage_uri(p), "{kind} {p} is not a valid object storage URI");
                } else {
                    ensure!(Path::new(p).is_file(), "{kind} file {p} does not exist");
                }
            }
        }
        Ok(())
    }

    fn params(&self) -> Vec<(&'static str, Value)> {
        match self {
            Reference::Genome(g) => vec![("genome", json!(g))],
            Reference::Files { fasta, gtf } => {
                vec![("fasta", json!(absolute(fasta))), ("gtf", json!(absolute(gtf)))]
            }
        }
    }
}

/// Canonicalize local paths; URIs are left as they are.
fn absolute(p: &str) -> String {
    if p.contains("://") {
        return p.to_string();
    }
    Path::new(p)
        .canonicalize()
        .map(|c| c.to_string_lossy().into_owned())
        .unwrap_or_else(|_| p.to_string())
}

fn absolute_path(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        Ok(p.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(p))
    }
}

/// One requested pipeline run.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub input: PathBuf,
    /// Local directory or object storage URI
    pub outdir: String,
    pub reference: Reference,
    /// Replace the strandedness of every sample in the samplesheet
    pub strandedness: Option<Strandedness>,
    /// Execution profile, overriding the configured one
    pub profile: Option<String>,
    pub resume: bool,
}

/// A fully checked invocation. The params file, and the rewritten
/// samplesheet when strandedness is overridden, exist only after
/// `write_inputs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedRun {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub params_file: PathBuf,
    pub samplesheet: PathBuf,
    pub params: Map<String, Value>,
    /// Records to write to `samplesheet`, if it is a rewritten copy
    pub rewritten: Option<Vec<SampleRecord>>,
}

impl PreparedRun {
    /// Write the params file and the rewritten samplesheet, if any.
    pub fn write_inputs(&self) -> Result<()> {
        if let Some(dir) = self.params_file.parent() {
            std::fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;
        }
        if let Some(records) = &self.rewritten {
            manifest::emit(records, &self.samplesheet)?;
            info!("rewritten samplesheet written to {}", self.samplesheet.display());
        }

        let writer = BufWriter::new(
            File::create(&self.params_file)
                .with_context(|| self.params_file.display().to_string())?,
        );
        serde_json::to_writer_pretty(writer, &self.params)
            .with_context(|| format!("writing {}", self.params_file.display()))?;
        Ok(())
    }

    /// The command line, for logging and dry runs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the workflow engine and wait for it to finish.
    pub fn execute_to_status(&self) -> Result<ExitStatus> {
        info!("running {}", self.command_line());
        Command::new(&self.program)
            .args(&self.args)
            .status()
            .with_context(|| format!("running {}", self.command_line()))
    }

    /// Run the workflow engine and return its exit code.
    pub fn execute(&self) -> Result<ExitCode> {
        Ok(self.execute_to_status()?.into_exit_code())
    }
}

/// Find `exe` in the directories of `search_path` (a PATH-style list). Names
/// containing a path separator are checked directly.
pub fn find_executable(exe: &str, search_path: Option<&OsString>) -> Option<PathBuf> {
    let p = Path::new(exe);
    if p.components().count() > 1 {
        return p.is_file().then(|| p.to_path_buf());
    }
    std::env::split_paths(search_path?)
        .map(|dir| dir.join(exe))
        .find(|candidate| candidate.is_file())
}

pub struct PipelineLauncher {
    config: PipelineConfig,
    search_path: Option<OsString>,
}

impl PipelineLauncher {
    /// `search_path` is the PATH used to find the workflow engine.
    pub fn new(config: PipelineConfig, search_path: Option<OsString>) -> PipelineLauncher {
        PipelineLauncher {
            config,
            search_path,
        }
    }

    fn check_outdir(outdir: &str) -> Result<()> {
        ensure!(!outdir.trim().is_empty(), "the output directory is empty");
        if outdir.contains("://") {
            ensure!(
                is_object_storage_uri(outdir),
                "output directory {outdir} is not a valid object storage URI"
            );
        } else {
            let p = Path::new(outdir);
            ensure!(
                !p.is_file(),
                "output directory {outdir} exists and is a file"
            );
        }
        Ok(())
    }

    /// Check the samplesheet and return the path the pipeline should read.
    /// When the strandedness is overridden this is a copy in the work
    /// directory, returned with the records to write there.
    fn prepare_samplesheet(
        &self,
        req: &RunRequest,
    ) -> Result<(PathBuf, Option<Vec<SampleRecord>>)> {
        ensure!(
            req.input.is_file(),
            "samplesheet {} does not exist",
            req.input.display()
        );
        let mut records = manifest::read_samplesheet(&req.input)?;
        manifest::validate(&records, &ValidationMode::Inferred)
            .with_context(|| format!("checking samplesheet {}", req.input.display()))?;

        let Some(strandedness) = req.strandedness else {
            return Ok((req.input.canonicalize()?, None));
        };

        for r in &mut records {
            r.strandedness = strandedness;
        }
        let out = absolute_path(&self.config.work_dir)?
            .join(format!("samplesheet.{strandedness}.csv"));
        info!("strandedness set to {strandedness} for all samples");
        Ok((out, Some(records)))
    }

    fn params(&self, req: &RunRequest, samplesheet: &Path) -> Map<String, Value> {
        let mut params: Map<String, Value> = self
            .config
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        params.insert(
            "input".to_string(),
            json!(samplesheet.to_string_lossy()),
        );
        params.insert("outdir".to_string(), json!(absolute(&req.outdir)));
        for (k, v) in req.reference.params() {
            params.insert(k.to_string(), v);
        }
        params
    }

    /// Check every input and build the command line, without writing
    /// anything. Used for dry runs.
    pub fn plan(&self, req: &RunRequest) -> Result<PreparedRun> {
        Self::check_outdir(&req.outdir)?;
        req.reference.check()?;

        let program = find_executable(&self.config.executable, self.search_path.as_ref())
            .with_context(|| {
                format!(
                    "{} was not found on PATH. Install it, or set pipeline.executable in the config file",
                    self.config.executable
                )
            })?;

        let (samplesheet, rewritten) = self.prepare_samplesheet(req)?;
        let params_file = self.config.work_dir.join("params.json");
        let params = self.params(req, &samplesheet);

        let profile = req.profile.as_deref().unwrap_or(&self.config.profile);
        let mut args = vec![
            "run".to_string(),
            self.config.pipeline.clone(),
            "-r".to_string(),
            self.config.revision.clone(),
            "-profile".to_string(),
            profile.to_string(),
            "-params-file".to_string(),
            params_file.to_string_lossy().into_owned(),
        ];
        if req.resume {
            args.push("-resume".to_string());
        }

        Ok(PreparedRun {
            program,
            args,
            params_file,
            samplesheet,
            params,
            rewritten,
        })
    }

    /// Check every input, write the params file and build the command line.
    /// Nothing is executed.
    pub fn prepare(&self, req: &RunRequest) -> Result<PreparedRun> {
        let run = self.plan(req)?;
        run.write_inputs()?;
        Ok(run)
    }
}
