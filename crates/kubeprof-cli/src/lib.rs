//! kubeprof CLI library

pub mod error;
pub mod job_file;
pub mod output;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubeprof_common::config::{DEFAULT_CONCURRENCY, DEFAULT_NAMESPACE, DEFAULT_STAGE_DIR};
use kubeprof_common::kube_utils::create_client;
use kubeprof_common::{ConnectivityPolicy, ProfileConfig, ProfilingTool, StageMountMode};
use kubeprof_job::{DockerImageResolver, KubeGateway, Orchestrator, RunSummary, SshChannel};

/// Tools the workspace ships wrapping support for
pub const SUPPORTED_TOOLS: &[&str] = &["perf"];

/// Default private key used for node access
const DEFAULT_SSH_KEY: &str = ".ssh/google_compute_engine";

/// kubeprof - run a Kubernetes Job under a profiler and collect the results
#[derive(Parser, Debug)]
#[command(name = "kubeprof")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Profiling tool to run the workload under
    #[arg(long)]
    pub tool: Option<String>,

    /// Kubernetes Job description (JSON or YAML)
    #[arg(short = 'f', long)]
    pub job_file: Option<PathBuf>,

    /// Path to the kubeconfig (defaults to ~/.kube/config, then in-cluster)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Private key for ssh/scp to nodes (defaults to ~/.ssh/google_compute_engine)
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,

    /// Remote user for ssh/scp
    #[arg(long, env = "KUBEPROF_SSH_USER")]
    pub ssh_user: Option<String>,

    /// Directory on each node holding the binary and the artifacts
    #[arg(long, default_value = DEFAULT_STAGE_DIR)]
    pub stage_dir: String,

    /// Mount only the staged binary instead of the whole stage directory
    #[arg(long)]
    pub mount_binary_only: bool,

    /// Local directory for results (defaults to the current directory)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Namespace the job is created in
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Skip checking and uploading the binary on nodes
    #[arg(long)]
    pub skip_checking: bool,

    /// Delete the job and its pods after collecting results
    #[arg(long)]
    pub rm: bool,

    /// Local profiling binary uploaded to nodes that lack it (defaults to ./bin/<tool>)
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// What to do with nodes that fail provisioning: abort or skip
    #[arg(long, default_value = "abort")]
    pub on_unreachable: ConnectivityPolicy,

    /// Maximum number of nodes or pods handled at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Give up waiting for the job after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Don't try to expose kernel symbols on nodes
    #[arg(long)]
    pub no_kernel_symbols: bool,
}

impl Cli {
    /// Build the run configuration, rejecting missing or invalid inputs
    pub fn profile_config(&self) -> Result<ProfileConfig> {
        let tool = match self.tool.as_deref() {
            Some(name) if !name.is_empty() => ProfilingTool::new(name)?,
            _ => {
                return Err(Error::validation(format!(
                    "--tool is required. Choose from {:?}",
                    SUPPORTED_TOOLS
                )))
            }
        };
        if !SUPPORTED_TOOLS.contains(&tool.name()) {
            warn!(tool = %tool, "profiling tool is not one of {:?}, wrapping it like perf", SUPPORTED_TOOLS);
        }

        let mut config = ProfileConfig::new(tool);
        config.stage.dir = self.stage_dir.clone();
        if self.mount_binary_only {
            config.stage.mount = StageMountMode::File;
        }
        if let Some(binary) = &self.binary {
            config.binary_path = binary.clone();
        }
        config.namespace = self.namespace.clone();
        config.output_dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        config.skip_provisioning = self.skip_checking;
        config.delete_after = self.rm;
        config.enable_kernel_symbols = !self.no_kernel_symbols;
        config.connectivity = self.on_unreachable;
        config.concurrency = self.concurrency;
        config.completion_timeout = self.timeout_secs.map(Duration::from_secs);
        config.validate()?;
        Ok(config)
    }

    fn job_path(&self) -> Result<&PathBuf> {
        self.job_file
            .as_ref()
            .ok_or_else(|| Error::validation("--job-file is required"))
    }

    fn ssh_key_path(&self) -> Result<PathBuf> {
        match &self.ssh_key {
            Some(key) => Ok(key.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(DEFAULT_SSH_KEY))
                .ok_or_else(|| Error::validation("cannot locate home directory, pass --ssh-key")),
        }
    }

    fn kubeconfig_path(&self) -> Option<PathBuf> {
        self.kubeconfig.clone().or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".kube").join("config"))
                .filter(|path| path.exists())
        })
    }

    /// Run the profiling job end to end
    pub async fn run(self) -> Result<()> {
        let config = self.profile_config()?;
        let template = job_file::load_job(self.job_path()?)?;
        let ssh_key = self.ssh_key_path()?;

        let client = create_client(self.kubeconfig_path().as_deref()).await?;
        let gateway = Arc::new(KubeGateway::new(client, &config.namespace));
        let remote = Arc::new(SshChannel::new(ssh_key).with_user(self.ssh_user.clone()));
        let images = Arc::new(DockerImageResolver);

        let run_dir = output::create_run_dir(&config.output_dir, &chrono::Local::now())?;
        info!(path = %run_dir.display(), "writing results");

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

        let orchestrator = Orchestrator::new(gateway, remote, images, config);
        let result = orchestrator.run(&template, &run_dir, &cancel).await;
        watcher.abort();

        let summary = result?;
        report(&summary);
        Ok(())
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, stopping the run");
        cancel.cancel();
    }
}

fn report(summary: &RunSummary) {
    for pod in &summary.collections {
        for artifact in &pod.artifacts {
            println!("{}", artifact.display());
        }
    }
    let unreachable = summary.unreachable_count();
    if unreachable > 0 {
        warn!(
            unreachable,
            "some hosts could not be reached, check the node external addresses and the ssh key"
        );
    }
}
