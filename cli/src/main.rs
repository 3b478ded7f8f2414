/*!

This is the command line interface for bootstrapping a single node RKE2 or k3d cluster and
deploying the RapidFort Runtime into it.

!*/

mod deploy_rapidfort;
mod install;
mod status;
mod uninstall;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use rfstack_model::{
    BootstrapConfig, ClusterKind, ClusterTarget, EnvOverrides, Orchestrator, SystemRunner,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Bootstrap a single node Kubernetes cluster with a local registry and the RapidFort Runtime.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    /// Path to a YAML configuration file. Every setting has a default.
    #[clap(long = "config")]
    config: Option<PathBuf>,
    /// The kind of cluster to manage [rke2|k3d-uds].
    #[clap(long = "cluster", default_value = "rke2")]
    cluster: ClusterKind,
    /// Name of the cluster. Defaults to the name configured for the cluster kind.
    #[clap(long = "name")]
    name: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Install the cluster, the local registry and, when credentials are present, the runtime.
    Install(install::Install),
    /// Remove the runtime and the cluster, and restore the previous kubeconfig.
    Uninstall(uninstall::Uninstall),
    /// Show the state of the cluster, the local registry, the runtime and the ingress.
    Status(status::Status),
    /// Deploy or upgrade the RapidFort Runtime in a running cluster.
    DeployRapidfort(deploy_rapidfort::DeployRapidfort),
}

/// Everything a subcommand needs, resolved once from the global arguments.
pub(crate) struct Session {
    kind: ClusterKind,
    name: Option<String>,
    env: EnvOverrides,
    orchestrator: Orchestrator,
}

impl Session {
    /// The target for this invocation, with the subcommand's own overrides applied.
    pub(crate) fn target(
        &self,
        registry_ip: Option<IpAddr>,
        version: Option<String>,
    ) -> ClusterTarget {
        ClusterTarget::resolve(
            self.kind,
            self.name.clone(),
            registry_ip,
            version,
            &self.env,
            self.orchestrator.config(),
        )
    }

    pub(crate) fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => BootstrapConfig::from_file(path)
            .context(format!("Unable to load configuration from '{}'", path.display()))?,
        None => BootstrapConfig::default(),
    };
    let env = EnvOverrides::from_env().context("Unable to read environment overrides")?;
    let runner = Arc::new(SystemRunner::new(config.timeouts.command()));
    let session = Session {
        kind: args.cluster,
        name: args.name,
        env: env.clone(),
        orchestrator: Orchestrator::new(config, env, runner),
    };
    match args.command {
        Command::Install(install) => install.run(&session).await,
        Command::Uninstall(uninstall) => uninstall.run(&session).await,
        Command::Status(status) => status.run(&session).await,
        Command::DeployRapidfort(deploy) => deploy.run(&session).await,
    }
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate and the library.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("rfstack_model"), level)
                .init();
        }
    }
}
