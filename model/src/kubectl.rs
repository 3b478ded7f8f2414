use crate::command::{self, CommandRunner, Invocation};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to {}: {}", action, source))]
    Command {
        action: String,
        source: command::Error,
    },

    #[snafu(display("Unable to parse output of {}: {}", action, source))]
    Json {
        action: String,
        source: serde_json::Error,
    },
}

/// `kubectl get <kind> -o json` output, which is always of kind `List`.
#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default)]
    items: Vec<T>,
}

/// A condensed view of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub name: String,
    pub ready: bool,
    pub kubelet_version: Option<String>,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        let status = node.status.as_ref();
        let ready = status
            .and_then(|status| status.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or_default();
        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            ready,
            kubelet_version: status
                .and_then(|status| status.node_info.as_ref())
                .map(|info| info.kubelet_version.clone()),
        }
    }
}

/// `true` when there is at least one node and every node is `Ready`.
pub fn all_nodes_ready(nodes: &[NodeSummary]) -> bool {
    !nodes.is_empty() && nodes.iter().all(|node| node.ready)
}

pub fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or_default()
}

/// `true` when there is at least one pod and every pod is `Ready`.
pub fn all_pods_ready(pods: &[Pod]) -> bool {
    !pods.is_empty() && pods.iter().all(pod_ready)
}

pub fn deployment_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or_default()
        >= 1
}

/// `true` when the service lists `ip` among its external ips.
pub fn service_exposes(service: &Service, ip: IpAddr) -> bool {
    let ip = ip.to_string();
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.external_ips.as_ref())
        .map(|ips| ips.contains(&ip))
        .unwrap_or_default()
}

/// `kubectl` bound to one kubeconfig.
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    program: String,
    kubeconfig: PathBuf,
    timeout: Duration,
}

impl Kubectl {
    pub fn new<S: Into<String>>(
        runner: Arc<dyn CommandRunner>,
        program: S,
        kubeconfig: &Path,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            kubeconfig: kubeconfig.to_path_buf(),
            timeout,
        }
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(self.program.as_str())
            .arg("--kubeconfig")
            .arg(self.kubeconfig.display().to_string())
            .args(args)
            .timeout(self.timeout)
    }

    async fn run(&self, action: &str, invocation: Invocation) -> Result<String> {
        Ok(self
            .runner
            .run_checked(&invocation)
            .await
            .context(CommandSnafu { action })?
            .stdout)
    }

    async fn get_json<T: DeserializeOwned>(&self, action: &str, args: &[&str]) -> Result<T> {
        let stdout = self
            .run(
                action,
                self.invocation(args.iter().copied().chain(["-o", "json"])),
            )
            .await?;
        serde_json::from_str(&stdout).context(JsonSnafu { action })
    }

    /// `true` when the API server answers its readiness endpoint.
    pub async fn reachable(&self) -> bool {
        self.runner
            .run(&self.invocation(["get", "--raw", "/readyz"]))
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    pub async fn nodes(&self) -> Result<Vec<NodeSummary>> {
        let nodes: Items<Node> = self.get_json("list nodes", &["get", "nodes"]).await?;
        Ok(nodes.items.iter().map(NodeSummary::from).collect())
    }

    pub async fn pods(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<Pod>> {
        let mut args = vec!["get", "pods", "--namespace", namespace];
        if let Some(selector) = selector {
            args.extend(["--selector", selector]);
        }
        let pods: Items<Pod> = self.get_json("list pods", &args).await?;
        Ok(pods.items)
    }

    /// `kubectl get <kind> <name>`, `None` when the object does not exist.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<T>> {
        let action = format!("get {}", kind);
        let invocation = self.invocation([
            "get",
            kind,
            name,
            "--namespace",
            namespace,
            "--ignore-not-found",
            "-o",
            "json",
        ]);
        let stdout = self.run(&action, invocation).await?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&stdout)
            .map(Some)
            .context(JsonSnafu { action })
    }

    pub async fn deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        self.get_optional("deployment", namespace, name).await
    }

    pub async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.get_optional("service", namespace, name).await
    }

    /// Pipe `yaml` to `kubectl apply` and return its stdout.
    pub async fn apply(&self, yaml: &str, namespace: Option<&str>) -> Result<String> {
        let mut args = vec!["apply"];
        if let Some(namespace) = namespace {
            args.extend(["--namespace", namespace]);
        }
        args.extend(["-f", "-"]);
        self.run("apply manifest", self.invocation(args).stdin(yaml))
            .await
    }

    pub async fn describe_pod(&self, namespace: &str, name: &str) -> Result<String> {
        self.run(
            "describe pod",
            self.invocation(["describe", "pod", name, "--namespace", namespace]),
        )
        .await
    }

    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.run(
            "delete namespace",
            self.invocation([
                "delete",
                "namespace",
                namespace,
                "--ignore-not-found",
                "--wait=false",
            ]),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn node(name: &str, ready: &str) -> Node {
        serde_json::from_value(json!({
            "metadata": {"name": name},
            "status": {
                "conditions": [
                    {"type": "MemoryPressure", "status": "False"},
                    {"type": "Ready", "status": ready}
                ],
                "nodeInfo": {
                    "architecture": "amd64",
                    "bootID": "", "containerRuntimeVersion": "", "kernelVersion": "",
                    "kubeProxyVersion": "", "machineID": "", "operatingSystem": "linux",
                    "osImage": "", "systemUUID": "",
                    "kubeletVersion": "v1.28.3+rke2r1"
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn node_summary() {
        let summary = NodeSummary::from(&node("server-0", "True"));
        assert_eq!(summary.name, "server-0");
        assert!(summary.ready);
        assert_eq!(summary.kubelet_version.as_deref(), Some("v1.28.3+rke2r1"));
        assert!(!NodeSummary::from(&node("server-1", "Unknown")).ready);
    }

    #[test]
    fn generic_list_output() {
        let list: Items<Pod> = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [{"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "agent-1"}}],
            "metadata": {"resourceVersion": ""}
        }))
        .unwrap();
        assert_eq!(list.items.len(), 1);
        let empty: Items<Pod> = serde_json::from_value(json!({"kind": "List"})).unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn readiness_needs_nodes() {
        assert!(!all_nodes_ready(&[]));
        let ready = NodeSummary::from(&node("a", "True"));
        let not_ready = NodeSummary::from(&node("b", "False"));
        assert!(all_nodes_ready(&[ready.clone()]));
        assert!(!all_nodes_ready(&[ready, not_ready]));
    }

    #[test]
    fn pods_ready() {
        let ready: Pod = serde_json::from_value(json!({
            "metadata": {"name": "agent-1"},
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }))
        .unwrap();
        let pending: Pod = serde_json::from_value(json!({
            "metadata": {"name": "agent-2"},
            "status": {"phase": "Pending"}
        }))
        .unwrap();
        assert!(all_pods_ready(&[ready.clone()]));
        assert!(!all_pods_ready(&[ready, pending]));
        assert!(!all_pods_ready(&[]));
    }

    #[test]
    fn deployment_availability() {
        let available: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "registry"},
            "status": {"availableReplicas": 1}
        }))
        .unwrap();
        let unavailable: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "registry"},
            "status": {"replicas": 1}
        }))
        .unwrap();
        assert!(deployment_available(&available));
        assert!(!deployment_available(&unavailable));
    }

    #[test]
    fn service_external_ips() {
        let service: Service = serde_json::from_value(json!({
            "metadata": {"name": "registry"},
            "spec": {"externalIPs": ["10.0.0.5"], "ports": [{"port": 5000}]}
        }))
        .unwrap();
        assert!(service_exposes(&service, "10.0.0.5".parse().unwrap()));
        assert!(!service_exposes(&service, "192.168.1.50".parse().unwrap()));
        let bare: Service = serde_json::from_value(json!({"metadata": {"name": "x"}})).unwrap();
        assert!(!service_exposes(&bare, "10.0.0.5".parse().unwrap()));
    }
}
