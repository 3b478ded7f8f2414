use super::error::{self, Result};
use super::host_files::{configure_sysctl, remove_dir, remove_file, write_if_changed};
use super::kubeconfig::KubeconfigManager;
use super::{
    live_nodes, wait_for_ingress, wait_for_nodes, ClusterProvisioner, ClusterStatus, HostNetwork,
    ProvisionState, RegistriesConfig, StateTracker,
};
use crate::command::{CommandRunner, Invocation};
use crate::config::BootstrapConfig;
use crate::constants::{ENV_INSTALL_RKE2_VERSION, RKE2_INSTALL_URL, RKE2_SERVICE};
use crate::kubectl::Kubectl;
use crate::readiness::wait_for;
use crate::target::{ClusterKind, ClusterTarget};
use crate::teardown::TeardownReport;
use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use snafu::ResultExt;
use std::sync::Arc;

/// `/etc/rancher/rke2/config.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Rke2Config {
    write_kubeconfig_mode: String,
    tls_san: Vec<String>,
    node_ip: String,
}

impl Rke2Config {
    fn new(network: &HostNetwork) -> Self {
        Self {
            write_kubeconfig_mode: "0644".to_string(),
            tls_san: vec![network.host_ip.to_string()],
            node_ip: network.host_ip.to_string(),
        }
    }
}

/// RKE2 installed on the host and run as the `rke2-server` systemd service.
pub struct Rke2Provisioner {
    runner: Arc<dyn CommandRunner>,
    config: BootstrapConfig,
    kubectl: Kubectl,
    kubeconfig: KubeconfigManager,
}

impl Rke2Provisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &BootstrapConfig, kubectl: Kubectl) -> Self {
        Self {
            runner,
            config: config.clone(),
            kubectl,
            kubeconfig: KubeconfigManager::new(&config.paths),
        }
    }

    async fn systemctl(&self, verb: &str) -> Result<()> {
        let invocation = Invocation::new("systemctl").args([verb, RKE2_SERVICE]);
        self.runner
            .run_checked(&invocation)
            .await
            .context(error::CommandSnafu {
                action: format!("{} {}", verb, RKE2_SERVICE),
            })?;
        Ok(())
    }

    /// The first word `systemctl <query>` prints, e.g. `active` or `enabled`.
    async fn systemctl_query(&self, query: &str) -> Result<String> {
        let invocation = Invocation::new("systemctl").args([query, RKE2_SERVICE]);
        // Both queries exit non-zero for inactive or disabled units.
        let output = self
            .runner
            .run(&invocation)
            .await
            .context(error::CommandSnafu {
                action: format!("query {}", RKE2_SERVICE),
            })?;
        Ok(output.stdout.trim().to_string())
    }

    /// Write the distribution config files. Returns `true` when any of them changed.
    fn write_config(&self, network: &HostNetwork) -> Result<bool> {
        let dir = &self.config.paths.rke2_config_dir;
        let config = serde_yaml::to_string(&Rke2Config::new(network)).context(
            error::SerializeSnafu {
                what: "rke2 config",
            },
        )?;
        let registries = RegistriesConfig::local_mirror(network).to_yaml()?;
        let config_changed = write_if_changed(&dir.join("config.yaml"), &config)?;
        let registries_changed = write_if_changed(&dir.join("registries.yaml"), &registries)?;
        Ok(config_changed || registries_changed)
    }

    /// Download the installer into a temporary directory and run it.
    async fn run_installer(&self, target: &ClusterTarget) -> Result<()> {
        let dir = tempfile::TempDir::new().context(error::WriteSnafu {
            path: std::env::temp_dir(),
        })?;
        let script = dir.path().join("install.sh");
        let download = Invocation::new("curl")
            .args(["-sfL", RKE2_INSTALL_URL, "-o"])
            .arg(script.display().to_string());
        self.runner
            .run_checked(&download)
            .await
            .context(error::CommandSnafu {
                action: "download the rke2 installer",
            })?;

        let mut install = Invocation::new("sh")
            .arg(script.display().to_string())
            .timeout(self.config.timeouts.install());
        if let Some(version) = &target.version {
            install = install.env(ENV_INSTALL_RKE2_VERSION, version);
        }
        info!(
            "Installing rke2 {}",
            target.version.as_deref().unwrap_or("(latest stable)")
        );
        self.runner
            .run_checked(&install)
            .await
            .context(error::CommandSnafu {
                action: "run the rke2 installer",
            })?;
        Ok(())
    }

    async fn wait_for_kubeconfig(&self) -> Result<String> {
        let path = self.config.paths.rke2_kubeconfig();
        let policy = self.config.retry.kubeconfig;
        let source = path.as_path();
        let outcome = wait_for("rke2 kubeconfig", policy.check(), move || async move {
            std::fs::read_to_string(source)
                .map(|contents| !contents.trim().is_empty())
                .unwrap_or(false)
        })
        .await;
        if !outcome.is_ready() {
            return error::KubeconfigTimeoutSnafu {
                attempts: policy.attempts,
            }
            .fail();
        }
        std::fs::read_to_string(&path).context(error::KubeconfigFileSnafu {
            action: "read",
            path: &path,
        })
    }

    async fn bring_up(
        &self,
        target: &ClusterTarget,
        network: &HostNetwork,
        current: &ClusterStatus,
        tracker: &mut StateTracker,
    ) -> Result<ClusterStatus> {
        tracker.advance(ProvisionState::Installing);
        configure_sysctl(self.runner.as_ref(), &self.config.paths.sysctl_conf).await;
        let config_changed = self.write_config(network)?;

        if current.is_installed() {
            debug!("rke2 is already installed, skipping the installer");
        } else {
            self.run_installer(target).await?;
        }

        self.systemctl("enable").await?;
        match current {
            ClusterStatus::Running { .. } if config_changed => self.systemctl("restart").await?,
            ClusterStatus::Running { .. } => {}
            _ => self.systemctl("start").await?,
        }

        tracker.advance(ProvisionState::WaitingReady);
        let contents = self.wait_for_kubeconfig().await?;
        let origin = self.config.paths.rke2_kubeconfig().display().to_string();
        self.kubeconfig.install(&contents, &origin)?;
        wait_for_nodes(&self.kubectl, &target.name, self.config.retry.node_ready).await?;
        wait_for_ingress(&self.kubectl, self.kind(), self.config.retry.ingress_ready).await;
        tracker.advance(ProvisionState::Ready);
        self.status(target).await
    }
}

#[async_trait]
impl ClusterProvisioner for Rke2Provisioner {
    fn kind(&self) -> ClusterKind {
        ClusterKind::Rke2
    }

    async fn install(
        &self,
        target: &ClusterTarget,
        network: &HostNetwork,
    ) -> Result<ClusterStatus> {
        let current = self.status(target).await?;
        if current.is_ready() {
            info!("rke2 cluster is already running and ready");
            return Ok(current);
        }
        let mut tracker = StateTracker::new(&target.name);
        let result = self.bring_up(target, network, &current, &mut tracker).await;
        let result = tracker.settle(result);
        debug!("rke2 provisioning ended in state {}", tracker.state());
        result
    }

    async fn status(&self, _target: &ClusterTarget) -> Result<ClusterStatus> {
        let invocation = Invocation::new(self.config.tools.rke2.as_str()).arg("--version");
        let version = match self.runner.run(&invocation).await {
            Err(e) if e.is_not_found() => return Ok(ClusterStatus::NotInstalled),
            Err(e) => {
                return Err(e).context(error::CommandSnafu {
                    action: "query the rke2 version",
                })
            }
            Ok(output) => parse_version(&output.stdout),
        };

        let active = self.systemctl_query("is-active").await? == "active";
        let enabled = self.systemctl_query("is-enabled").await? == "enabled";
        debug!("{}: active={}, enabled={}", RKE2_SERVICE, active, enabled);

        Ok(match (active, enabled) {
            (true, _) => ClusterStatus::Running {
                version,
                nodes: live_nodes(&self.kubectl).await,
            },
            (false, true) => ClusterStatus::Stopped { version },
            (false, false) => ClusterStatus::Installed { version },
        })
    }

    async fn uninstall(&self, _target: &ClusterTarget) -> TeardownReport {
        let paths = &self.config.paths;
        let mut report = TeardownReport::new();
        report
            .attempt("stop rke2-server", self.systemctl("stop"))
            .await;
        report
            .attempt("disable rke2-server", self.systemctl("disable"))
            .await;

        match paths.rke2_uninstall_scripts.iter().find(|p| p.is_file()) {
            Some(script) => {
                let invocation = Invocation::new("sh")
                    .arg(script.display().to_string())
                    .timeout(self.config.timeouts.install());
                let result = self.runner.run_checked(&invocation).await.map(|_| ());
                report.record("run rke2 uninstall script", result);
            }
            None => report.record(
                "run rke2 uninstall script",
                Err("no rke2 uninstall script found"),
            ),
        }

        report.record(
            "remove rke2 config",
            remove_dir(&paths.rke2_config_dir),
        );
        report.record("remove rke2 data", remove_dir(&paths.rke2_data_dir));
        report.record("remove sysctl settings", remove_file(&paths.sysctl_conf));
        report
    }
}

/// `rke2 version v1.28.3+rke2r1 (2c7ab7b)` -> `v1.28.3+rke2r1`
fn parse_version(output: &str) -> Option<String> {
    let mut words = output.lines().next()?.split_whitespace();
    words.find(|word| *word == "version")?;
    words.next().map(str::to_string)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_output() {
        let output = "rke2 version v1.28.3+rke2r1 (2c7ab7b)\ngo version go1.20.10 X:boringcrypto\n";
        assert_eq!(parse_version(output).as_deref(), Some("v1.28.3+rke2r1"));
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn config_file() {
        let network = HostNetwork {
            host_ip: "10.0.0.5".parse().unwrap(),
            registry_ip: "10.0.0.5".parse().unwrap(),
        };
        let yaml = serde_yaml::to_string(&Rke2Config::new(&network)).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["write-kubeconfig-mode"].as_str(), Some("0644"));
        assert_eq!(value["node-ip"].as_str(), Some("10.0.0.5"));
        assert_eq!(value["tls-san"][0].as_str(), Some("10.0.0.5"));
    }
}
