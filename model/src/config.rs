use crate::readiness::ReadinessCheck;
use crate::target::ClusterKind;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{ResultExt, Snafu};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to read config file '{}': {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse config file '{}': {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("Invalid environment override: {}", source))]
    Environment { source: envy::Error },
}

/// Every tunable of the bootstrapper. All fields have defaults so an empty (or absent) config
/// file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootstrapConfig {
    pub cluster_names: ClusterNames,
    pub paths: Paths,
    pub tools: Tools,
    pub timeouts: Timeouts,
    pub retry: RetryPolicies,
    pub registry: RegistryConfig,
    pub chart: ChartConfig,
}

impl BootstrapConfig {
    /// Read a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).context(ConfigReadSnafu { path })?;
        Self::from_yaml(&contents).context(ConfigParseSnafu { path })
    }

    pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Defaults with every user-home path rooted at `home`.
    pub fn for_home(home: &Path) -> Self {
        Self {
            paths: Paths::for_home(home),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterNames {
    pub rke2: String,
    pub k3d_uds: String,
}

impl Default for ClusterNames {
    fn default() -> Self {
        Self {
            rke2: "rf-rke2".to_string(),
            k3d_uds: "uds".to_string(),
        }
    }
}

impl ClusterNames {
    pub fn for_kind(&self, kind: ClusterKind) -> &str {
        match kind {
            ClusterKind::Rke2 => &self.rke2,
            ClusterKind::K3dUds => &self.k3d_uds,
        }
    }
}

/// Fixed locations on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paths {
    /// The kubeconfig written for the user after install.
    pub kubeconfig: PathBuf,
    /// Where a pre-existing kubeconfig is saved before it is replaced.
    pub kubeconfig_backup: PathBuf,
    /// Present while the kubeconfig at `kubeconfig` is one rfstack wrote.
    pub kubeconfig_marker: PathBuf,
    /// `key=value` file holding `access_id`, `secret_key` and `rf_root_url`.
    pub credentials: PathBuf,
    /// Optional YAML `Secret` used to pull RapidFort images from the upstream registry.
    pub pull_secret: PathBuf,
    /// Scratch space for generated k3d config and the chart checkout.
    pub work_dir: PathBuf,
    pub rke2_config_dir: PathBuf,
    pub rke2_data_dir: PathBuf,
    pub rke2_uninstall_scripts: Vec<PathBuf>,
    pub sysctl_conf: PathBuf,
    pub os_release: PathBuf,
    pub meminfo: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/root"));
        Self::for_home(&home)
    }
}

impl Paths {
    pub fn for_home(home: &Path) -> Self {
        let rapidfort = home.join(".rapidfort");
        Self {
            kubeconfig: home.join(".kube").join("config"),
            kubeconfig_backup: home.join(".kube").join("config.rfstack-backup"),
            kubeconfig_marker: home.join(".kube").join("config.rfstack-installed"),
            credentials: rapidfort.join("credentials"),
            pull_secret: rapidfort.join("rf-registry-secret.yaml"),
            work_dir: rapidfort.join("rfstack"),
            rke2_config_dir: PathBuf::from("/etc/rancher/rke2"),
            rke2_data_dir: PathBuf::from("/var/lib/rancher/rke2"),
            rke2_uninstall_scripts: vec![
                PathBuf::from("/usr/local/bin/rke2-uninstall.sh"),
                PathBuf::from("/usr/bin/rke2-uninstall.sh"),
            ],
            sysctl_conf: PathBuf::from("/etc/sysctl.d/90-rfstack.conf"),
            os_release: PathBuf::from("/etc/os-release"),
            meminfo: PathBuf::from("/proc/meminfo"),
        }
    }

    /// The kubeconfig RKE2 writes for its admin user.
    pub fn rke2_kubeconfig(&self) -> PathBuf {
        self.rke2_config_dir.join("rke2.yaml")
    }

    /// The `kubectl` RKE2 ships, used when none is on `PATH`.
    pub fn rke2_kubectl(&self) -> PathBuf {
        self.rke2_data_dir.join("bin").join("kubectl")
    }
}

/// Names (or paths) of the external programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tools {
    pub kubectl: String,
    pub helm: String,
    pub k3d: String,
    pub git: String,
    pub rke2: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
            k3d: "k3d".to_string(),
            git: "git".to_string(),
            rke2: "rke2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    /// Default limit for any single external command.
    pub command_secs: u64,
    /// Limit for the distribution installer and cluster creation.
    pub install_secs: u64,
    /// Passed to `helm --timeout`; the helm process itself gets an extra minute.
    pub helm_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: 120,
            install_secs: 900,
            helm_secs: 600,
        }
    }
}

impl Timeouts {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn helm(&self) -> Duration {
        Duration::from_secs(self.helm_secs)
    }
}

/// A retry budget: `attempts` polls, `interval_secs` apart. When `timeout_secs` is set the
/// number of polls is derived from it instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval_secs: u64) -> Self {
        Self {
            attempts,
            interval_secs,
            timeout_secs: None,
        }
    }

    pub fn check(&self) -> ReadinessCheck {
        let interval = Duration::from_secs(self.interval_secs);
        match self.timeout_secs {
            Some(timeout) => ReadinessCheck::new(Duration::from_secs(timeout), interval),
            None => ReadinessCheck::with_attempts(self.attempts, interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicies {
    pub kubeconfig: RetryPolicy,
    pub node_ready: RetryPolicy,
    pub registry_ready: RetryPolicy,
    pub runtime_ready: RetryPolicy,
    pub ingress_ready: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            kubeconfig: RetryPolicy::new(60, 5),
            node_ready: RetryPolicy::new(60, 10),
            registry_ready: RetryPolicy::new(30, 5),
            runtime_ready: RetryPolicy::new(60, 10),
            ingress_ready: RetryPolicy::new(30, 10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    pub namespace: String,
    pub image: String,
    pub storage: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace: "registry".to_string(),
            image: "registry:2".to_string(),
            storage: "10Gi".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartConfig {
    /// Git repository holding the chart.
    pub repository: String,
    /// Chart directory inside the repository.
    pub path: String,
    pub release: String,
    pub namespace: String,
    pub scan: bool,
    pub profiling: bool,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            repository: "https://github.com/rapidfort/runtime-helm.git".to_string(),
            path: "charts/rfruntime".to_string(),
            release: "rfruntime".to_string(),
            namespace: "rapidfort".to_string(),
            scan: true,
            profiling: true,
        }
    }
}

/// A boolean read from a loosely formatted environment string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Toggle {
    #[default]
    Unset,
    On,
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Toggle::On
    }
}

impl std::str::FromStr for Toggle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Toggle::Unset),
            "true" | "1" | "yes" | "on" => Ok(Toggle::On),
            "false" | "0" | "no" | "off" => Ok(Toggle::Off),
            other => Err(format!("'{}' is not a boolean", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Toggle {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Environment variables the bootstrapper honours. They are read once at startup and passed
/// around as a value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvOverrides {
    /// `RF_LOCAL_REGISTRY`: registry IP used when `--registry-ip` is not given.
    #[serde(rename = "RF_LOCAL_REGISTRY")]
    pub local_registry: Option<IpAddr>,

    /// `RF_USE_LOCAL_REGISTRY`: same effect as `--local-registry`.
    #[serde(rename = "RF_USE_LOCAL_REGISTRY", default)]
    pub use_local_registry: Toggle,

    /// `RKE2_VERSION`: RKE2 release to install when `--version` is not given.
    #[serde(rename = "RKE2_VERSION")]
    pub rke2_version: Option<String>,

    /// `RF_HOST_IP`: skips host ip detection.
    #[serde(rename = "RF_HOST_IP")]
    pub host_ip: Option<IpAddr>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        // Empty values are treated the same as unset ones.
        let vars = vars.into_iter().filter(|(_, value)| !value.trim().is_empty());
        envy::from_iter(vars).context(EnvironmentSnafu)
    }
}
