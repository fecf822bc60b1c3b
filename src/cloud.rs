//! One-time AWS setup for running the pipeline on AWS Batch.
//!
//! The setup is a fixed `BootstrapPlan` of ensure-exists steps. Every step is
//! one call to the cloud CLI, and a step whose resource is already there
//! counts as done, so a failed bootstrap can be rerun from the failing step.
//! Nothing is rolled back.

use crate::config::CloudConfig;
use anyhow::{bail, ensure, Context, Result};
use log::{info, warn};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

const BATCH_SERVICE_POLICY: &str = "arn:aws:iam::aws:policy/service-role/AWSBatchServiceRole";
const ECS_INSTANCE_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonEC2ContainerServiceforEC2Role";

/// Result of one CLI invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CliOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// The boundary to the cloud provider's command line tool.
pub trait CloudCli {
    fn call(&self, args: &[String]) -> Result<CliOutput>;
}

/// Runs the `aws` executable.
pub struct AwsCli {
    program: PathBuf,
    region: Option<String>,
}

impl AwsCli {
    pub fn new(program: impl Into<PathBuf>, region: Option<String>) -> AwsCli {
        AwsCli {
            program: program.into(),
            region,
        }
    }
}

impl CloudCli for AwsCli {
    fn call(&self, args: &[String]) -> Result<CliOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(region) = &self.region {
            cmd.args(["--region", region]);
        }
        let out = cmd
            .output()
            .with_context(|| format!("running {} {}", self.program.display(), args.join(" ")))?;
        Ok(CliOutput {
            success: out.status.success(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// Use the configured account id, or ask the CLI who we are.
pub fn resolve_account_id(config: &CloudConfig, cli: &dyn CloudCli) -> Result<String> {
    let account = match &config.account_id {
        Some(a) => a.trim().to_string(),
        None => {
            let args: Vec<String> = ["sts", "get-caller-identity", "--query", "Account", "--output", "text"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            let out = cli.call(&args)?;
            ensure!(
                out.success,
                "could not determine the AWS account id: {}",
                out.stderr.trim()
            );
            out.stdout.trim().to_string()
        }
    };
    ensure!(
        account.len() == 12 && account.bytes().all(|b| b.is_ascii_digit()),
        "invalid AWS account id '{account}'"
    );
    Ok(account)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Created,
    AlreadyExists,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepOutcome::Created => "created",
            StepOutcome::AlreadyExists => "already exists",
        })
    }
}

/// A single ensure-exists step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapStep {
    /// Short name used with `--from-step`
    pub name: &'static str,
    /// The resource this step creates
    pub resource: String,
    pub args: Vec<String>,
    /// Error text meaning the resource is already in place
    already_exists: &'static [&'static str],
}

impl BootstrapStep {
    fn new(name: &'static str, resource: impl Into<String>, args: &[&str]) -> BootstrapStep {
        BootstrapStep {
            name,
            resource: resource.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            already_exists: &["already exists", "AlreadyExists", "AlreadyOwnedByYou"],
        }
    }

    fn is_already_exists(&self, stderr: &str) -> bool {
        self.already_exists.iter().any(|m| stderr.contains(m))
    }

    fn run(&self, cli: &dyn CloudCli) -> Result<StepOutcome> {
        let out = cli.call(&self.args)?;
        if out.success {
            Ok(StepOutcome::Created)
        } else if self.is_already_exists(&out.stderr) {
            Ok(StepOutcome::AlreadyExists)
        } else {
            bail!("{}", out.stderr.trim())
        }
    }
}

fn trust_policy(service: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

/// The resource names, derived from the resource prefix and account id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNames {
    pub bucket: String,
    pub batch_service_role: String,
    pub ecs_instance_role: String,
    pub instance_profile: String,
    pub compute_environment: String,
    pub job_queue: String,
}

impl ResourceNames {
    pub fn new(prefix: &str, account_id: &str) -> ResourceNames {
        ResourceNames {
            bucket: format!("{prefix}-{account_id}"),
            batch_service_role: format!("{prefix}-batch-service-role"),
            ecs_instance_role: format!("{prefix}-ecs-instance-role"),
            instance_profile: format!("{prefix}-ecs-instance-profile"),
            compute_environment: format!("{prefix}-ce"),
            job_queue: format!("{prefix}-queue"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BootstrapPlan {
    pub names: ResourceNames,
    pub steps: Vec<BootstrapStep>,
}

impl BootstrapPlan {
    pub fn new(config: &CloudConfig, account_id: &str) -> Result<BootstrapPlan> {
        ensure!(
            !config.subnets.is_empty(),
            "cloud.subnets must list at least one subnet for the compute environment"
        );
        ensure!(
            !config.security_groups.is_empty(),
            "cloud.security_groups must list at least one security group for the compute environment"
        );
        ensure!(config.max_vcpus > 0, "cloud.max_vcpus must be positive");

        let names = ResourceNames::new(&config.resource_prefix, account_id);
        let mut steps = Vec::new();

        // us-east-1 rejects an explicit location constraint
        let location = config
            .region
            .as_deref()
            .filter(|r| *r != "us-east-1")
            .map(|r| format!("LocationConstraint={r}"));
        let mut bucket = vec!["s3api", "create-bucket", "--bucket", names.bucket.as_str()];
        if let Some(location) = &location {
            bucket.extend(["--create-bucket-configuration", location.as_str()]);
        }
        steps.push(BootstrapStep::new("bucket", &names.bucket, &bucket));

        let batch_trust = trust_policy("batch.amazonaws.com");
        steps.push(BootstrapStep::new(
            "batch-service-role",
            &names.batch_service_role,
            &[
                "iam",
                "create-role",
                "--role-name",
                &names.batch_service_role,
                "--assume-role-policy-document",
                &batch_trust,
            ],
        ));
        steps.push(BootstrapStep::new(
            "batch-service-policy",
            &names.batch_service_role,
            &[
                "iam",
                "attach-role-policy",
                "--role-name",
                &names.batch_service_role,
                "--policy-arn",
                BATCH_SERVICE_POLICY,
            ],
        ));

        let ec2_trust = trust_policy("ec2.amazonaws.com");
        steps.push(BootstrapStep::new(
            "ecs-instance-role",
            &names.ecs_instance_role,
            &[
                "iam",
                "create-role",
                "--role-name",
                &names.ecs_instance_role,
                "--assume-role-policy-document",
                &ec2_trust,
            ],
        ));
        steps.push(BootstrapStep::new(
            "ecs-instance-policy",
            &names.ecs_instance_role,
            &[
                "iam",
                "attach-role-policy",
                "--role-name",
                &names.ecs_instance_role,
                "--policy-arn",
                ECS_INSTANCE_POLICY,
            ],
        ));
        steps.push(BootstrapStep::new(
            "instance-profile",
            &names.instance_profile,
            &[
                "iam",
                "create-instance-profile",
                "--instance-profile-name",
                &names.instance_profile,
            ],
        ));
        let mut add_role = BootstrapStep::new(
            "instance-profile-role",
            &names.instance_profile,
            &[
                "iam",
                "add-role-to-instance-profile",
                "--instance-profile-name",
                &names.instance_profile,
                "--role-name",
                &names.ecs_instance_role,
            ],
        );
        // an instance profile holds one role; adding it twice hits the quota
        add_role.already_exists = &["InstanceSessionsPerInstanceProfile"];
        steps.push(add_role);

        let service_role = format!("arn:aws:iam::{account_id}:role/{}", names.batch_service_role);
        let instance_profile = format!(
            "arn:aws:iam::{account_id}:instance-profile/{}",
            names.instance_profile
        );
        let resources = json!({
            "type": "EC2",
            "minvCpus": 0,
            "maxvCpus": config.max_vcpus,
            "instanceTypes": config.instance_types,
            "subnets": config.subnets,
            "securityGroupIds": config.security_groups,
            "instanceRole": instance_profile,
        })
        .to_string();
        steps.push(BootstrapStep::new(
            "compute-environment",
            &names.compute_environment,
            &[
                "batch",
                "create-compute-environment",
                "--compute-environment-name",
                &names.compute_environment,
                "--type",
                "MANAGED",
                "--service-role",
                &service_role,
                "--compute-resources",
                &resources,
            ],
        ));

        let order = format!("order=1,computeEnvironment={}", names.compute_environment);
        steps.push(BootstrapStep::new(
            "job-queue",
            &names.job_queue,
            &[
                "batch",
                "create-job-queue",
                "--job-queue-name",
                &names.job_queue,
                "--priority",
                "1",
                "--compute-environment-order",
                &order,
            ],
        ));

        Ok(BootstrapPlan { names, steps })
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    /// Run the steps in order, starting at `from_step` if given. Stops at the
    /// first step that fails.
    pub fn run(
        &self,
        cli: &dyn CloudCli,
        from_step: Option<&str>,
    ) -> Result<Vec<(&'static str, StepOutcome)>> {
        let start = match from_step {
            Some(name) => match self.steps.iter().position(|s| s.name == name) {
                Some(i) => i,
                None => bail!(
                    "unknown step '{name}', expected one of: {}",
                    self.step_names().join(", ")
                ),
            },
            None => 0,
        };

        let mut outcomes = Vec::new();
        for step in &self.steps[start..] {
            let outcome = step.run(cli).with_context(|| {
                format!(
                    "bootstrap step '{}' ({}) failed. Fix the problem and rerun with --from-step {}",
                    step.name, step.resource, step.name
                )
            })?;
            match outcome {
                StepOutcome::Created => info!("{}: created {}", step.name, step.resource),
                StepOutcome::AlreadyExists => {
                    warn!("{}: {} already exists, skipping", step.name, step.resource)
                }
            }
            outcomes.push((step.name, outcome));
        }
        Ok(outcomes)
    }
}

impl fmt::Display for BootstrapPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "{:>2}. {:<22} {}", i + 1, step.name, step.resource)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Fails calls whose argument list contains a key from `failures`.
    #[derive(Default)]
    struct FakeCli {
        calls: RefCell<Vec<Vec<String>>>,
        failures: Vec<(&'static str, &'static str)>,
        stdout: String,
    }

    impl CloudCli for FakeCli {
        fn call(&self, args: &[String]) -> Result<CliOutput> {
            self.calls.borrow_mut().push(args.to_vec());
            for (key, stderr) in &self.failures {
                if args.iter().any(|a| a == key) {
                    return Ok(CliOutput {
                        success: false,
                        stdout: String::new(),
                        stderr: stderr.to_string(),
                    });
                }
            }
            Ok(CliOutput {
                success: true,
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    fn config() -> CloudConfig {
        CloudConfig {
            region: Some("eu-west-1".to_string()),
            subnets: vec!["subnet-1".to_string()],
            security_groups: vec!["sg-1".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_names() {
        let names = ResourceNames::new("nfcore-rnaseq", "123456789012");
        assert_eq!(names.bucket, "nfcore-rnaseq-123456789012");
        assert_eq!(names.batch_service_role, "nfcore-rnaseq-batch-service-role");
        assert_eq!(names.ecs_instance_role, "nfcore-rnaseq-ecs-instance-role");
        assert_eq!(names.instance_profile, "nfcore-rnaseq-ecs-instance-profile");
        assert_eq!(names.compute_environment, "nfcore-rnaseq-ce");
        assert_eq!(names.job_queue, "nfcore-rnaseq-queue");
    }

    #[test]
    fn test_plan() -> Result<()> {
        let plan = BootstrapPlan::new(&config(), "123456789012")?;
        assert_eq!(
            plan.step_names(),
            vec![
                "bucket",
                "batch-service-role",
                "batch-service-policy",
                "ecs-instance-role",
                "ecs-instance-policy",
                "instance-profile",
                "instance-profile-role",
                "compute-environment",
                "job-queue",
            ]
        );
        assert!(plan.steps[0]
            .args
            .contains(&"LocationConstraint=eu-west-1".to_string()));

        let ce = &plan.steps[7].args;
        assert!(ce.contains(
            &"arn:aws:iam::123456789012:role/nfcore-rnaseq-batch-service-role".to_string()
        ));
        let resources: serde_json::Value = serde_json::from_str(ce.last().unwrap())?;
        assert_eq!(resources["maxvCpus"], 256);
        assert_eq!(resources["subnets"], json!(["subnet-1"]));
        assert_eq!(
            resources["instanceRole"],
            "arn:aws:iam::123456789012:instance-profile/nfcore-rnaseq-ecs-instance-profile"
        );
        Ok(())
    }

    #[test]
    fn test_us_east_1_bucket() -> Result<()> {
        let config = CloudConfig {
            region: Some("us-east-1".to_string()),
            ..config()
        };
        let plan = BootstrapPlan::new(&config, "123456789012")?;
        assert_eq!(plan.steps[0].args.len(), 4);
        Ok(())
    }

    #[test]
    fn test_plan_requires_network() {
        let config = CloudConfig {
            subnets: vec![],
            ..config()
        };
        assert!(BootstrapPlan::new(&config, "123456789012").is_err());
    }

    #[test]
    fn test_run_all() -> Result<()> {
        let plan = BootstrapPlan::new(&config(), "123456789012")?;
        let cli = FakeCli::default();
        let outcomes = plan.run(&cli, None)?;
        assert_eq!(outcomes.len(), plan.steps.len());
        assert!(outcomes.iter().all(|(_, o)| *o == StepOutcome::Created));
        assert_eq!(cli.calls.borrow().len(), plan.steps.len());
        Ok(())
    }

    #[test]
    fn test_already_exists_is_success() -> Result<()> {
        let plan = BootstrapPlan::new(&config(), "123456789012")?;
        let cli = FakeCli {
            failures: vec![
                ("create-bucket", "An error occurred (BucketAlreadyOwnedByYou)"),
                ("create-role", "An error occurred (EntityAlreadyExists) when calling the CreateRole operation"),
                (
                    "add-role-to-instance-profile",
                    "Cannot exceed quota for InstanceSessionsPerInstanceProfile: 1",
                ),
                ("create-job-queue", "ClientException: Object already exists"),
            ],
            ..Default::default()
        };
        let outcomes = plan.run(&cli, None)?;
        let existing: Vec<_> = outcomes
            .iter()
            .filter(|(_, o)| *o == StepOutcome::AlreadyExists)
            .map(|(n, _)| *n)
            .collect();
        assert_eq!(
            existing,
            vec![
                "bucket",
                "batch-service-role",
                "ecs-instance-role",
                "instance-profile-role",
                "job-queue"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_failure_stops_and_names_step() -> Result<()> {
        let plan = BootstrapPlan::new(&config(), "123456789012")?;
        let cli = FakeCli {
            failures: vec![("create-instance-profile", "AccessDenied")],
            ..Default::default()
        };
        let err = plan.run(&cli, None).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("'instance-profile'"));
        assert!(msg.contains("--from-step instance-profile"));
        assert!(msg.contains("AccessDenied"));
        // nothing after the failing step ran
        assert_eq!(cli.calls.borrow().len(), 6);
        Ok(())
    }

    #[test]
    fn test_from_step() -> Result<()> {
        let plan = BootstrapPlan::new(&config(), "123456789012")?;
        let cli = FakeCli::default();
        let outcomes = plan.run(&cli, Some("compute-environment"))?;
        assert_eq!(
            outcomes.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec!["compute-environment", "job-queue"]
        );
        assert!(plan.run(&cli, Some("nope")).is_err());
        Ok(())
    }

    #[test]
    fn test_resolve_account_id() -> Result<()> {
        let cli = FakeCli {
            stdout: "123456789012\n".to_string(),
            ..Default::default()
        };
        assert_eq!(resolve_account_id(&config(), &cli)?, "123456789012");
        assert_eq!(cli.calls.borrow()[0][..2], ["sts", "get-caller-identity"]);

        let configured = CloudConfig {
            account_id: Some("210987654321".to_string()),
            ..config()
        };
        assert_eq!(resolve_account_id(&configured, &cli)?, "210987654321");
        assert_eq!(cli.calls.borrow().len(), 1);

        let bad = FakeCli {
            stdout: "None\n".to_string(),
            ..Default::default()
        };
        assert!(resolve_account_id(&config(), &bad).is_err());
        Ok(())
    }
}
