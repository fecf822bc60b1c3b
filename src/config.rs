//! Settings shared by the samplesheet builder, the pipeline launcher and the
//! cloud bootstrap. Loaded from a TOML file; every field has a default, and
//! command line flags override what the file says.

use crate::strandedness::Strandedness;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub samplesheet: SamplesheetConfig,
    pub pipeline: PipelineConfig,
    pub cloud: CloudConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SamplesheetConfig {
    /// Strandedness given to samples without an override
    pub default_strandedness: Strandedness,
    /// Object storage prefix that replaces `local_prefix` in read paths
    pub remote_prefix: Option<String>,
    pub local_prefix: Option<String>,
    /// Only consider FASTQ filenames matching this regex
    pub pattern: Option<String>,
    /// `sample,strandedness` CSV of per-sample overrides
    pub strandedness_csv: Option<PathBuf>,
    /// Parse the first record of every local read file
    pub check_format: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Workflow engine executable, looked up on PATH
    pub executable: String,
    pub pipeline: String,
    pub revision: String,
    pub profile: String,
    /// Where params.json and rewritten samplesheets are written
    pub work_dir: PathBuf,
    /// Extra pipeline parameters merged into params.json
    pub params: BTreeMap<String, serde_json::Value>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            executable: "nextflow".to_string(),
            pipeline: "nf-core/rnaseq".to_string(),
            revision: "3.14.0".to_string(),
            profile: "docker".to_string(),
            work_dir: PathBuf::from("."),
            params: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CloudConfig {
    pub region: Option<String>,
    /// Looked up with the cloud CLI when unset
    pub account_id: Option<String>,
    /// Prefix of every resource name created by the bootstrap
    pub resource_prefix: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub instance_types: Vec<String>,
    pub max_vcpus: u32,
}

impl Default for CloudConfig {
    fn default() -> Self {
        CloudConfig {
            region: None,
            account_id: None,
            resource_prefix: "nfcore-rnaseq".to_string(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            instance_types: vec!["optimal".to_string()],
            max_vcpus: 256,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Config> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let config = Config::from_toml_str(&s).with_context(|| path.display().to_string())?;
        debug!("loaded config from {}: {config:?}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Config::load(p),
            None => Ok(Config::default()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_is_default() -> Result<()> {
        assert_eq!(Config::from_toml_str("")?, Config::default());
        Ok(())
    }

    #[test]
    fn test_full_config() -> Result<()> {
        let config = Config::load("test/config/full.toml")?;
        assert_eq!(
            config.samplesheet.default_strandedness,
            Strandedness::Reverse
        );
        assert_eq!(
            config.samplesheet.remote_prefix.as_deref(),
            Some("s3://lab-data/fastq")
        );
        assert_eq!(config.pipeline.profile, "awsbatch");
        assert_eq!(config.pipeline.executable, "nextflow");
        assert_eq!(
            config.pipeline.params.get("skip_qc"),
            Some(&serde_json::Value::Bool(true))
        );
        assert_eq!(config.cloud.region.as_deref(), Some("us-east-1"));
        assert_eq!(config.cloud.subnets, vec!["subnet-1", "subnet-2"]);
        assert_eq!(config.cloud.max_vcpus, 256);
        Ok(())
    }

    #[test]
    fn test_unknown_field() {
        assert!(Config::from_toml_str("[pipeline]\nprofle = \"docker\"\n").is_err());
        assert!(Config::from_toml_str("[samplesheet]\ndefault_strandedness = \"up\"\n").is_err());
    }
}
