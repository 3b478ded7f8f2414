use super::error::{self, Result};
use super::host_files::{configure_sysctl, remove_file, write_if_changed};
use super::kubeconfig::KubeconfigManager;
use super::{
    live_nodes, wait_for_ingress, wait_for_nodes, ClusterProvisioner, ClusterStatus, HostNetwork,
    ProvisionState, RegistriesConfig, StateTracker,
};
use crate::command::{CommandRunner, Invocation};
use crate::config::BootstrapConfig;
use crate::kubectl::Kubectl;
use crate::readiness::wait_for;
use crate::target::{ClusterKind, ClusterTarget};
use crate::teardown::TeardownReport;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const K3D_API_VERSION: &str = "k3d.io/v1alpha5";
const K3S_IMAGE: &str = "rancher/k3s";

/// A k3d `Simple` cluster config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleConfig {
    api_version: String,
    kind: String,
    metadata: SimpleMetadata,
    servers: u32,
    agents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    ports: Vec<PortMapping>,
    options: SimpleOptions,
    registries: SimpleRegistries,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct SimpleMetadata {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortMapping {
    port: String,
    node_filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleOptions {
    k3s: K3sOptions,
    kubeconfig: KubeconfigOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct K3sOptions {
    extra_args: Vec<ExtraArg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtraArg {
    arg: String,
    node_filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct KubeconfigOptions {
    update_default_kubeconfig: bool,
    switch_current_context: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct SimpleRegistries {
    /// An embedded `registries.yaml`.
    config: String,
}

impl SimpleConfig {
    fn new(target: &ClusterTarget, network: &HostNetwork) -> Result<Self> {
        let load_balancer = || vec!["loadbalancer".to_string()];
        Ok(Self {
            api_version: K3D_API_VERSION.to_string(),
            kind: "Simple".to_string(),
            metadata: SimpleMetadata {
                name: target.name.clone(),
            },
            servers: 1,
            agents: 0,
            image: target
                .version
                .as_ref()
                .map(|tag| format!("{}:{}", K3S_IMAGE, tag)),
            ports: vec![
                PortMapping {
                    port: "80:80".to_string(),
                    node_filters: load_balancer(),
                },
                PortMapping {
                    port: "443:443".to_string(),
                    node_filters: load_balancer(),
                },
            ],
            options: SimpleOptions {
                k3s: K3sOptions {
                    extra_args: vec![ExtraArg {
                        arg: "--disable=traefik".to_string(),
                        node_filters: vec!["server:*".to_string()],
                    }],
                },
                // The kubeconfig is installed by us, with a backup of what was there.
                kubeconfig: KubeconfigOptions {
                    update_default_kubeconfig: false,
                    switch_current_context: false,
                },
            },
            registries: SimpleRegistries {
                config: RegistriesConfig::local_mirror(network).to_yaml()?,
            },
        })
    }
}

/// One entry of `k3d cluster list -o json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedCluster {
    name: String,
    #[serde(default)]
    servers_running: u32,
}

/// A k3d (k3s in docker) cluster laid out for the UDS stack.
pub struct K3dProvisioner {
    runner: Arc<dyn CommandRunner>,
    config: BootstrapConfig,
    kubectl: Kubectl,
    kubeconfig: KubeconfigManager,
}

impl K3dProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &BootstrapConfig, kubectl: Kubectl) -> Self {
        Self {
            runner,
            config: config.clone(),
            kubectl,
            kubeconfig: KubeconfigManager::new(&config.paths),
        }
    }

    fn k3d(&self) -> Invocation {
        Invocation::new(self.config.tools.k3d.as_str())
    }

    fn config_path(&self, target: &ClusterTarget) -> PathBuf {
        self.config
            .paths
            .work_dir
            .join(format!("k3d-{}.yaml", target.name))
    }

    async fn k3d_checked(&self, action: &str, invocation: Invocation) -> Result<String> {
        Ok(self
            .runner
            .run_checked(&invocation)
            .await
            .context(error::CommandSnafu { action })?
            .stdout)
    }

    async fn fetch_kubeconfig(&self, target: &ClusterTarget) -> Option<String> {
        let invocation = self.k3d().args(["kubeconfig", "get", target.name.as_str()]);
        match self.runner.run_checked(&invocation).await {
            Ok(output) if !output.stdout.trim().is_empty() => Some(output.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!("Kubeconfig not available yet: {}", e);
                None
            }
        }
    }

    async fn wait_for_kubeconfig(&self, target: &ClusterTarget) -> Result<String> {
        let policy = self.config.retry.kubeconfig;
        let fetched = Mutex::new(None);
        let slot = &fetched;
        let outcome = wait_for("k3d kubeconfig", policy.check(), move || async move {
            match self.fetch_kubeconfig(target).await {
                Some(contents) => {
                    *slot.lock().await = Some(contents);
                    true
                }
                None => false,
            }
        })
        .await;
        match fetched.into_inner() {
            Some(contents) if outcome.is_ready() => Ok(contents),
            _ => error::KubeconfigTimeoutSnafu {
                attempts: policy.attempts,
            }
            .fail(),
        }
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

        let config = SimpleConfig::new(target, network)?;
        let yaml = serde_yaml::to_string(&config).context(error::SerializeSnafu {
            what: "k3d config",
        })?;
        let config_path = self.config_path(target);
        write_if_changed(&config_path, &yaml)?;

        match current {
            ClusterStatus::NotInstalled => {
                info!("Creating k3d cluster '{}'", target.name);
                let create = self
                    .k3d()
                    .args(["cluster", "create", "--config"])
                    .arg(config_path.display().to_string())
                    .timeout(self.config.timeouts.install());
                self.k3d_checked("create the k3d cluster", create).await?;
            }
            ClusterStatus::Running { .. } => {
                debug!("k3d cluster '{}' is already running", target.name);
            }
            ClusterStatus::Installed { .. } | ClusterStatus::Stopped { .. } => {
                info!("Starting k3d cluster '{}'", target.name);
                let start = self
                    .k3d()
                    .args(["cluster", "start", target.name.as_str()])
                    .timeout(self.config.timeouts.install());
                self.k3d_checked("start the k3d cluster", start).await?;
            }
        }

        tracker.advance(ProvisionState::WaitingReady);
        let contents = self.wait_for_kubeconfig(target).await?;
        self.kubeconfig
            .install(&contents, &format!("k3d cluster '{}'", target.name))?;
        wait_for_nodes(&self.kubectl, &target.name, self.config.retry.node_ready).await?;
        wait_for_ingress(&self.kubectl, self.kind(), self.config.retry.ingress_ready).await;
        tracker.advance(ProvisionState::Ready);
        self.status(target).await
    }
}

#[async_trait]
impl ClusterProvisioner for K3dProvisioner {
    fn kind(&self) -> ClusterKind {
        ClusterKind::K3dUds
    }

    async fn install(
        &self,
        target: &ClusterTarget,
        network: &HostNetwork,
    ) -> Result<ClusterStatus> {
        let current = self.status(target).await?;
        if current.is_ready() {
            info!("k3d cluster '{}' is already running and ready", target.name);
            return Ok(current);
        }
        let mut tracker = StateTracker::new(&target.name);
        let result = self.bring_up(target, network, &current, &mut tracker).await;
        let result = tracker.settle(result);
        debug!("k3d provisioning ended in state {}", tracker.state());
        result
    }

    async fn status(&self, target: &ClusterTarget) -> Result<ClusterStatus> {
        let list = self.k3d().args(["cluster", "list", "-o", "json"]);
        let stdout = match self.runner.run_checked(&list).await {
            Err(e) if e.is_not_found() => return Ok(ClusterStatus::NotInstalled),
            result => {
                result
                    .context(error::CommandSnafu {
                        action: "list k3d clusters",
                    })?
                    .stdout
            }
        };
        let clusters: Vec<ListedCluster> =
            serde_json::from_str(&stdout).context(error::ParseSnafu {
                what: "k3d cluster list",
            })?;
        let cluster = match clusters.into_iter().find(|c| c.name == target.name) {
            Some(cluster) => cluster,
            None => return Ok(ClusterStatus::NotInstalled),
        };

        let version = self
            .k3d_checked("query the k3d version", self.k3d().arg("version"))
            .await
            .ok()
            .and_then(|stdout| parse_version(&stdout));

        Ok(if cluster.servers_running > 0 {
            ClusterStatus::Running {
                version,
                nodes: live_nodes(&self.kubectl).await,
            }
        } else {
            ClusterStatus::Stopped { version }
        })
    }

    async fn uninstall(&self, target: &ClusterTarget) -> TeardownReport {
        let mut report = TeardownReport::new();
        let delete = self
            .k3d()
            .args(["cluster", "delete", target.name.as_str()])
            .timeout(self.config.timeouts.install());
        report
            .attempt("delete k3d cluster", async {
                self.k3d_checked("delete the k3d cluster", delete)
                    .await
                    .map(|_| ())
            })
            .await;
        report.record(
            "remove k3d config",
            remove_file(&self.config_path(target)),
        );
        report.record(
            "remove sysctl settings",
            remove_file(&self.config.paths.sysctl_conf),
        );
        report
    }
}

/// `k3d version v5.6.0` on the first line -> `v5.6.0`
fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("k3d version "))
        .map(|version| version.trim().to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    fn target(version: Option<&str>) -> ClusterTarget {
        ClusterTarget {
            kind: ClusterKind::K3dUds,
            name: "uds".to_string(),
            kubeconfig: PathBuf::from("/home/ops/.kube/config"),
            registry_ip: None,
            version: version.map(str::to_string),
        }
    }

    fn network() -> HostNetwork {
        HostNetwork {
            host_ip: "10.0.0.5".parse().unwrap(),
            registry_ip: "10.0.0.5".parse().unwrap(),
        }
    }

    #[test]
    fn simple_config() {
        let config = SimpleConfig::new(&target(Some("v1.28.3-k3s2")), &network()).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["apiVersion"].as_str(), Some("k3d.io/v1alpha5"));
        assert_eq!(value["kind"].as_str(), Some("Simple"));
        assert_eq!(value["metadata"]["name"].as_str(), Some("uds"));
        assert_eq!(value["servers"].as_u64(), Some(1));
        assert_eq!(value["image"].as_str(), Some("rancher/k3s:v1.28.3-k3s2"));
        assert_eq!(value["ports"][0]["port"].as_str(), Some("80:80"));
        assert_eq!(
            value["ports"][1]["nodeFilters"][0].as_str(),
            Some("loadbalancer")
        );
        assert_eq!(
            value["options"]["k3s"]["extraArgs"][0]["arg"].as_str(),
            Some("--disable=traefik")
        );
        assert_eq!(
            value["options"]["kubeconfig"]["updateDefaultKubeconfig"].as_bool(),
            Some(false)
        );
        assert!(value["registries"]["config"]
            .as_str()
            .unwrap()
            .contains("http://10.0.0.5:5000"));
    }

    #[test]
    fn default_image_is_omitted() {
        let config = SimpleConfig::new(&target(None), &network()).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("image:"));
    }

    #[test]
    fn cluster_list() {
        let clusters: Vec<ListedCluster> = serde_json::from_str(
            r#"[{"name":"uds","nodes":[],"serversCount":1,"serversRunning":0,
                 "agentsCount":0,"agentsRunning":0,"hasLoadbalancer":true}]"#,
        )
        .unwrap();
        assert_eq!(clusters[0].name, "uds");
        assert_eq!(clusters[0].servers_running, 0);
    }

    #[test]
    fn version_output() {
        let output = "k3d version v5.6.0\nk3s version v1.27.4-k3s1 (default)\n";
        assert_eq!(parse_version(output).as_deref(), Some("v5.6.0"));
        assert_eq!(parse_version("nope"), None);
    }
}
