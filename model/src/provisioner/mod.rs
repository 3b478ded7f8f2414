/*!

A [`ClusterProvisioner`] brings a single-node Kubernetes distribution to a running, ready state,
reports on it, and removes it again. Two distributions are supported: RKE2 installed on the host
([`Rke2Provisioner`]) and a k3d cluster shaped for the UDS stack ([`K3dProvisioner`]).

Every `install` starts by probing the live cluster. A cluster that is already running with all
nodes ready is left untouched, so running `install` again is safe.

!*/

mod error;
mod host_files;
mod k3d;
mod kubeconfig;
mod rke2;

pub use error::{Error, Result};
pub use k3d::K3dProvisioner;
pub use kubeconfig::{KubeconfigManager, Restored};
pub use rke2::Rke2Provisioner;

use crate::command::CommandRunner;
use crate::config::{BootstrapConfig, RetryPolicy};
use crate::constants::REGISTRY_PORT;
use crate::kubectl::{all_nodes_ready, all_pods_ready, Kubectl, NodeSummary};
use crate::readiness::{wait_for, WaitOutcome};
use crate::target::{ClusterKind, ClusterTarget};
use crate::teardown::TeardownReport;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use serde_plain::derive_display_from_serialize;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::sync::Arc;

/// The live state of a cluster. Always observed, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ClusterStatus {
    NotInstalled,
    Installed {
        version: Option<String>,
    },
    Running {
        version: Option<String>,
        nodes: Vec<NodeSummary>,
    },
    Stopped {
        version: Option<String>,
    },
}

impl ClusterStatus {
    pub fn is_installed(&self) -> bool {
        !matches!(self, ClusterStatus::NotInstalled)
    }

    /// Running with at least one node, every node ready.
    pub fn is_ready(&self) -> bool {
        match self {
            ClusterStatus::Running { nodes, .. } => all_nodes_ready(nodes),
            _ => false,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            ClusterStatus::NotInstalled => None,
            ClusterStatus::Installed { version }
            | ClusterStatus::Running { version, .. }
            | ClusterStatus::Stopped { version } => version.as_deref(),
        }
    }

    pub fn nodes(&self) -> &[NodeSummary] {
        match self {
            ClusterStatus::Running { nodes, .. } => nodes,
            _ => &[],
        }
    }
}

impl Display for ClusterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterStatus::NotInstalled => write!(f, "not installed"),
            ClusterStatus::Installed { .. } => write!(f, "installed"),
            ClusterStatus::Running { nodes, .. } => {
                let ready = nodes.iter().filter(|node| node.ready).count();
                write!(f, "running ({}/{} nodes ready)", ready, nodes.len())
            }
            ClusterStatus::Stopped { .. } => write!(f, "stopped"),
        }
    }
}

/// Where an `install` is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionState {
    Absent,
    Installing,
    WaitingReady,
    Ready,
    Failed,
}

derive_display_from_serialize!(ProvisionState);

/// Logs every state change of one cluster.
#[derive(Debug)]
pub(crate) struct StateTracker {
    cluster: String,
    state: ProvisionState,
}

impl StateTracker {
    pub(crate) fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            state: ProvisionState::Absent,
        }
    }

    pub(crate) fn advance(&mut self, next: ProvisionState) {
        info!("Cluster '{}': {} -> {}", self.cluster, self.state, next);
        self.state = next;
    }

    /// Move to `Failed` when `result` is an error, then hand it back.
    pub(crate) fn settle<T, E>(
        &mut self,
        result: std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        if result.is_err() {
            self.advance(ProvisionState::Failed);
        }
        result
    }

    pub(crate) fn state(&self) -> ProvisionState {
        self.state
    }
}

/// The addresses an install needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostNetwork {
    pub host_ip: IpAddr,
    /// Address the in-cluster registry is exposed on.
    pub registry_ip: IpAddr,
}

impl HostNetwork {
    pub fn registry_address(&self) -> String {
        format!("{}:{}", self.registry_ip, REGISTRY_PORT)
    }
}

#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    fn kind(&self) -> ClusterKind;

    /// Bring the cluster to a running, ready state. Returns the resulting live status.
    async fn install(&self, target: &ClusterTarget, network: &HostNetwork)
        -> Result<ClusterStatus>;

    /// Read-only probe of the live cluster.
    async fn status(&self, target: &ClusterTarget) -> Result<ClusterStatus>;

    /// Remove the cluster. Every step is attempted, failures are only recorded.
    async fn uninstall(&self, target: &ClusterTarget) -> TeardownReport;
}

/// Create the provisioner for `kind`.
pub fn provisioner_for(
    kind: ClusterKind,
    runner: Arc<dyn CommandRunner>,
    config: &BootstrapConfig,
    kubectl: Kubectl,
) -> Box<dyn ClusterProvisioner> {
    match kind {
        ClusterKind::Rke2 => Box::new(Rke2Provisioner::new(runner, config, kubectl)),
        ClusterKind::K3dUds => Box::new(K3dProvisioner::new(runner, config, kubectl)),
    }
}

/// `registries.yaml` as understood by both RKE2 and k3s: a plain HTTP mirror for the local
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RegistriesConfig {
    mirrors: BTreeMap<String, Mirror>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Mirror {
    endpoint: Vec<String>,
}

impl RegistriesConfig {
    pub(crate) fn local_mirror(network: &HostNetwork) -> Self {
        let address = network.registry_address();
        let endpoint = vec![format!("http://{}", address)];
        let mut mirrors = BTreeMap::new();
        mirrors.insert(address, Mirror { endpoint });
        Self { mirrors }
    }

    pub(crate) fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context(error::SerializeSnafu {
            what: "registries config",
        })
    }
}

/// Nodes as `kubectl` sees them, or none when the API is not answering.
pub(crate) async fn live_nodes(kubectl: &Kubectl) -> Vec<NodeSummary> {
    match kubectl.nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            debug!("Unable to list nodes: {}", e);
            Vec::new()
        }
    }
}

/// Wait until every node is ready. Running out of attempts is an error.
pub(crate) async fn wait_for_nodes(
    kubectl: &Kubectl,
    cluster: &str,
    policy: RetryPolicy,
) -> Result<Vec<NodeSummary>> {
    let outcome = wait_for("cluster nodes", policy.check(), move || async move {
        all_nodes_ready(&live_nodes(kubectl).await)
    })
    .await;
    match outcome {
        WaitOutcome::Ready { .. } => {
            info!("All nodes of '{}' are ready", cluster);
            Ok(live_nodes(kubectl).await)
        }
        WaitOutcome::TimedOut { attempts } => error::NotReadySnafu { cluster, attempts }.fail(),
    }
}

/// Wait for the ingress controller. Running out of attempts is only a warning.
pub(crate) async fn wait_for_ingress(kubectl: &Kubectl, kind: ClusterKind, policy: RetryPolicy) {
    let (namespace, selector) = kind.ingress_pods();
    let outcome = wait_for("ingress controller", policy.check(), move || async move {
        kubectl
            .pods(namespace, Some(selector))
            .await
            .map(|pods| all_pods_ready(&pods))
            .unwrap_or(false)
    })
    .await;
    if !outcome.is_ready() {
        warn!(
            "Ingress controller pods '{}' in '{}' are not ready yet",
            selector, namespace
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(ready: bool) -> NodeSummary {
        NodeSummary {
            name: "server-0".to_string(),
            ready,
            kubelet_version: None,
        }
    }

    #[test]
    fn readiness_of_status() {
        assert!(!ClusterStatus::NotInstalled.is_ready());
        assert!(!ClusterStatus::NotInstalled.is_installed());
        let running = ClusterStatus::Running {
            version: Some("v1.28.3+rke2r1".to_string()),
            nodes: vec![node(true)],
        };
        assert!(running.is_ready());
        assert_eq!(running.version(), Some("v1.28.3+rke2r1"));
        assert_eq!(running.to_string(), "running (1/1 nodes ready)");
        let starting = ClusterStatus::Running {
            version: None,
            nodes: vec![node(false)],
        };
        assert!(!starting.is_ready());
        assert!(starting.is_installed());
    }

    #[test]
    fn status_json() {
        let json = serde_json::to_value(ClusterStatus::Stopped {
            version: Some("v5.6.0".to_string()),
        })
        .unwrap();
        assert_eq!(json["state"], "stopped");
        assert_eq!(json["version"], "v5.6.0");
    }

    #[test]
    fn tracker_records_failure() {
        let mut tracker = StateTracker::new("uds");
        tracker.advance(ProvisionState::Installing);
        let result: std::result::Result<(), &str> = tracker.settle(Err("boom"));
        assert!(result.is_err());
        assert_eq!(tracker.state(), ProvisionState::Failed);
        assert_eq!(ProvisionState::WaitingReady.to_string(), "waiting-ready");
    }

    #[test]
    fn registries_mirror() {
        let network = HostNetwork {
            host_ip: "10.0.0.5".parse().unwrap(),
            registry_ip: "192.168.1.50".parse().unwrap(),
        };
        let yaml = RegistriesConfig::local_mirror(&network).to_yaml().unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            value["mirrors"]["192.168.1.50:5000"]["endpoint"][0],
            serde_yaml::Value::String("http://192.168.1.50:5000".to_string())
        );
    }
}
