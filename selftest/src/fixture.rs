use crate::runner::{output, ScriptedRunner};
use anyhow::Result;
use rfstack_model::config::RetryPolicy;
use rfstack_model::{BootstrapConfig, ClusterKind, ClusterTarget, EnvOverrides};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HOST_IP: &str = "10.0.0.5";
pub const RKE2_VERSION_OUTPUT: &str = "rke2 version v1.28.3+rke2r1 (2c7ab7b)\n";
pub const K3D_VERSION_OUTPUT: &str = "k3d version v5.6.0\nk3s version v1.27.4-k3s1 (default)\n";

/// A minimal kubeconfig that passes validation.
pub const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
users:
- name: default
  user:
    token: abc
"#;

pub const CREDENTIALS: &str =
    "access_id=abc123\nsecret_key=s3cr3t\nrf_root_url=https://us01.rapidfort.com\n";

/// A fake host: a temporary home directory with every path of the config pointed inside it,
/// and retry budgets small enough that a test never waits.
#[derive(Debug)]
pub struct HostFixture {
    dir: TempDir,
    pub config: BootstrapConfig,
}

impl HostFixture {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path();
        let mut config = BootstrapConfig::for_home(&root.join("home"));
        let paths = &mut config.paths;
        paths.rke2_config_dir = root.join("etc/rancher/rke2");
        paths.rke2_data_dir = root.join("var/lib/rancher/rke2");
        paths.rke2_uninstall_scripts = vec![root.join("usr/local/bin/rke2-uninstall.sh")];
        paths.sysctl_conf = root.join("etc/sysctl.d/90-rfstack.conf");
        paths.os_release = root.join("etc/os-release");
        paths.meminfo = root.join("proc/meminfo");

        let quick = RetryPolicy::new(3, 0);
        config.retry.kubeconfig = quick;
        config.retry.node_ready = quick;
        config.retry.registry_ready = quick;
        config.retry.runtime_ready = quick;
        config.retry.ingress_ready = quick;

        let fixture = Self { dir, config };
        fixture.write(&fixture.config.paths.os_release, "ID=ubuntu\n")?;
        fixture.write(&fixture.config.paths.meminfo, "MemTotal: 16318480 kB\n")?;
        Ok(fixture)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `path`, creating parent directories.
    pub fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn write_credentials(&self, contents: &str) -> Result<()> {
        self.write(&self.config.paths.credentials, contents)
    }

    /// The kubeconfig RKE2 would write once its server is up.
    pub fn write_rke2_kubeconfig(&self) -> Result<()> {
        self.write(&self.config.paths.rke2_kubeconfig(), KUBECONFIG)
    }

    pub fn write_uninstall_script(&self) -> Result<PathBuf> {
        let script = self.config.paths.rke2_uninstall_scripts[0].clone();
        self.write(&script, "#!/bin/sh\n")?;
        Ok(script)
    }

    /// Environment with the host ip pinned so nothing probes the network.
    pub fn env(&self) -> EnvOverrides {
        EnvOverrides {
            host_ip: HOST_IP.parse().ok(),
            ..Default::default()
        }
    }

    pub fn target(&self, kind: ClusterKind) -> ClusterTarget {
        ClusterTarget::resolve(kind, None, None, None, &self.env(), &self.config)
    }
}

/// `kubectl get nodes -o json` with one ready node.
pub fn ready_nodes() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [{
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": "server-0"},
            "status": {
                "conditions": [{"type": "Ready", "status": "True"}],
                "nodeInfo": {
                    "architecture": "amd64",
                    "bootID": "", "containerRuntimeVersion": "", "kernelVersion": "",
                    "kubeProxyVersion": "", "machineID": "", "operatingSystem": "linux",
                    "osImage": "", "systemUUID": "",
                    "kubeletVersion": "v1.28.3+rke2r1"
                }
            }
        }]
    })
}

/// `kubectl get pods -o json` with one ready pod.
pub fn ready_pods() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [{
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "pod-0", "namespace": "default"},
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "True"}]
            }
        }]
    })
}

/// `kubectl get pods -o json` with one pod stuck pulling its image.
pub fn unready_pods() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [{
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "rfruntime-agent-0", "namespace": "rapidfort"},
            "status": {
                "phase": "Pending",
                "conditions": [{"type": "Ready", "status": "False"}]
            }
        }]
    })
}

/// The local registry service exposed on `ip`.
pub fn registry_service(ip: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": "registry", "namespace": "registry"},
        "spec": {"externalIPs": [ip], "ports": [{"port": 5000}]}
    })
}

/// The local registry deployment with one available replica.
pub fn available_registry() -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "registry", "namespace": "registry"},
        "status": {"replicas": 1, "availableReplicas": 1}
    })
}

/// `helm status -o json` of a release in `status`.
pub fn helm_release(status: &str) -> Value {
    json!({
        "name": "rfruntime",
        "namespace": "rapidfort",
        "version": 1,
        "info": {"status": status, "description": "Install complete"}
    })
}

/// Answers for a cluster whose API, nodes, pods and registry are all healthy.
pub fn script_healthy_api(runner: &ScriptedRunner) {
    runner
        .respond("kubectl", &["get", "nodes"], output(ready_nodes().to_string()))
        .respond("kubectl", &["get", "pods"], output(ready_pods().to_string()))
        .respond(
            "kubectl",
            &["get", "deployment", "registry"],
            output(available_registry().to_string()),
        );
}

/// An installed RKE2 whose service is running.
pub fn script_running_rke2(runner: &ScriptedRunner) {
    runner
        .respond("rke2", &["--version"], output(RKE2_VERSION_OUTPUT))
        .respond("systemctl", &["is-active"], output("active\n"))
        .respond("systemctl", &["is-enabled"], output("enabled\n"));
    script_healthy_api(runner);
}

/// A running k3d cluster called `name`.
pub fn script_running_k3d(runner: &ScriptedRunner, name: &str) {
    let clusters = json!([{"name": name, "serversCount": 1, "serversRunning": 1}]);
    runner
        .respond("k3d", &["cluster", "list"], output(clusters.to_string()))
        .respond("k3d", &["version"], output(K3D_VERSION_OUTPUT))
        .respond("k3d", &["kubeconfig", "get"], output(KUBECONFIG));
    script_healthy_api(runner);
}
