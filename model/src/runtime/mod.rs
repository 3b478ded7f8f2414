/*!

Deploys the RapidFort Runtime agent into a running cluster with `helm upgrade --install`, waits
for its pods, and removes it again.

!*/

mod chart;
mod diagnostics;
mod error;
mod values;

pub use chart::ChartSource;
pub use error::{DeployError, Result};
pub use values::{HelmValue, ImageSource, ValueOverrides};

use crate::command::{CommandRunner, Invocation};
use crate::config::BootstrapConfig;
use crate::constants::APP_INSTANCE;
use crate::credentials::CredentialStore;
use crate::host::HostProbe;
use crate::kubectl::{all_pods_ready, Kubectl};
use crate::manifest::{self, credentials_secret, load_pull_secret, ManifestApplier};
use crate::readiness::{wait_for, WaitOutcome};
use crate::target::ClusterTarget;
use crate::teardown::TeardownReport;
use diagnostics::log_unready_pods;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// `info.status` of a healthy helm release.
pub const DEPLOYED: &str = "deployed";

/// Extra time the helm process gets on top of its own `--timeout`.
const HELM_GRACE: Duration = Duration::from_secs(60);

/// Options of one `deploy-rapidfort` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Registry ip, defaults to the target's registry ip and then the host ip.
    pub registry_ip: Option<IpAddr>,
    /// Pull the runtime images from the in-cluster registry.
    pub use_local_registry: bool,
    pub image_tag: Option<String>,
}

/// A successful deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployed {
    pub release: String,
    pub namespace: String,
    pub overrides: ValueOverrides,
}

/// The parts of `helm status -o json` we report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStatus {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub version: u32,
    pub info: ReleaseInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub status: String,
    #[serde(default)]
    pub description: String,
}

pub struct RuntimeDeployer {
    runner: Arc<dyn CommandRunner>,
    config: BootstrapConfig,
    kubectl: Kubectl,
    probe: HostProbe,
}

impl RuntimeDeployer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: &BootstrapConfig,
        kubectl: Kubectl,
        probe: HostProbe,
    ) -> Self {
        Self {
            runner,
            config: config.clone(),
            kubectl,
            probe,
        }
    }

    fn helm(&self, kubeconfig: &Path) -> Invocation {
        Invocation::new(self.config.tools.helm.as_str())
            .arg("--kubeconfig")
            .arg(kubeconfig.display().to_string())
    }

    /// Install or upgrade the runtime release.
    pub async fn deploy(
        &self,
        target: &ClusterTarget,
        options: &DeployOptions,
    ) -> Result<Deployed> {
        let chart_config = &self.config.chart;
        let namespace = chart_config.namespace.as_str();
        let release = chart_config.release.as_str();

        // Preconditions, checked before anything is changed.
        ensure!(
            self.kubectl.reachable().await,
            error::ClusterUnreachableSnafu {
                kubeconfig: &target.kubeconfig
            }
        );
        let helm = self.config.tools.helm.as_str();
        ensure!(self.probe.has_tool(helm).await, error::NoHelmSnafu { helm });
        let credentials = CredentialStore::load(&self.config.paths.credentials)
            .context(error::NoCredentialsSnafu)?;
        let host_ip = self
            .probe
            .detect_host_ip()
            .await
            .context(error::NoHostIpSnafu)?;
        let registry_ip = options
            .registry_ip
            .or(target.registry_ip)
            .unwrap_or(host_ip);
        debug!("Host ip {}, registry ip {}", host_ip, registry_ip);

        let chart = ChartSource::new(Arc::clone(&self.runner), &self.config)
            .fetch()
            .await?;

        let applier = ManifestApplier::new(self.kubectl.clone());
        applier
            .apply(&manifest::namespace(namespace), None)
            .await
            .context(error::ManifestSnafu)?;
        applier
            .apply(&credentials_secret(namespace, &credentials), None)
            .await
            .context(error::ManifestSnafu)?;

        let images = if options.use_local_registry {
            info!("Using images from the local registry at {}", registry_ip);
            ImageSource::Local { registry_ip }
        } else {
            let pull_secret = match load_pull_secret(&self.config.paths.pull_secret, namespace)
                .context(error::ManifestSnafu)?
            {
                Some(secret) => {
                    applier
                        .apply(&secret, None)
                        .await
                        .context(error::ManifestSnafu)?;
                    secret.metadata.name
                }
                None => {
                    debug!(
                        "No pull secret at '{}'",
                        self.config.paths.pull_secret.display()
                    );
                    None
                }
            };
            ImageSource::Upstream { pull_secret }
        };
        let overrides = ValueOverrides::for_runtime(
            target,
            chart_config,
            &images,
            options.image_tag.as_deref(),
        );

        let helm_timeout = self.config.timeouts.helm();
        let upgrade = self
            .helm(&target.kubeconfig)
            .args(["upgrade", "--install", release])
            .arg(chart.display().to_string())
            .args(["--namespace", namespace, "--create-namespace", "--wait"])
            .arg("--timeout")
            .arg(format!("{}s", helm_timeout.as_secs()))
            .args(overrides.to_args())
            .timeout(helm_timeout + HELM_GRACE);
        info!("Installing release '{}' into '{}'", release, namespace);
        if let Err(e) = self.runner.run_checked(&upgrade).await {
            log_unready_pods(&self.kubectl, namespace).await;
            return Err(e).context(error::InstallFailedSnafu { release });
        }

        let selector = format!("{}={}", APP_INSTANCE, release);
        let selector = selector.as_str();
        let kubectl = &self.kubectl;
        let outcome = wait_for(
            "runtime pods",
            self.config.retry.runtime_ready.check(),
            move || async move {
                kubectl
                    .pods(namespace, Some(selector))
                    .await
                    .map(|pods| all_pods_ready(&pods))
                    .unwrap_or(false)
            },
        )
        .await;
        if let WaitOutcome::TimedOut { attempts } = outcome {
            log_unready_pods(&self.kubectl, namespace).await;
            return error::NotReadySnafu { release, attempts }.fail();
        }

        info!("RapidFort Runtime release '{}' is ready", release);
        Ok(Deployed {
            release: release.to_string(),
            namespace: namespace.to_string(),
            overrides,
        })
    }

    /// The release when it is already deployed and every one of its pods is ready, so that
    /// `install` can leave it alone. Upgrades go through [`RuntimeDeployer::deploy`].
    pub async fn current_release(&self, target: &ClusterTarget) -> Option<ReleaseStatus> {
        let release = match self.release_status(target).await {
            Ok(Some(release)) if release.info.status == DEPLOYED => release,
            Ok(Some(release)) => {
                debug!("Release '{}' is {}", release.name, release.info.status);
                return None;
            }
            Ok(None) => return None,
            Err(e) => {
                debug!("{}", e);
                return None;
            }
        };
        let selector = format!("{}={}", APP_INSTANCE, self.config.chart.release);
        match self
            .kubectl
            .pods(&self.config.chart.namespace, Some(selector.as_str()))
            .await
        {
            Ok(pods) if all_pods_ready(&pods) => Some(release),
            _ => None,
        }
    }

    /// Remove the release and its namespace. Failures are recorded, not returned.
    pub async fn teardown(&self, target: &ClusterTarget) -> TeardownReport {
        let namespace = self.config.chart.namespace.as_str();
        let release = self.config.chart.release.as_str();
        let mut report = TeardownReport::new();

        let uninstall = self
            .helm(&target.kubeconfig)
            .args(["uninstall", release, "--namespace", namespace, "--wait"])
            .timeout(self.config.timeouts.helm() + HELM_GRACE);
        report
            .attempt("uninstall runtime release", async {
                match self.runner.run(&uninstall).await {
                    Ok(output) if output.success() || is_not_found(&output.stderr) => Ok(()),
                    result => result
                        .and_then(|output| output.check(&uninstall))
                        .map(|_| ())
                        .context(error::UninstallSnafu { release }),
                }
            })
            .await;
        report
            .attempt("delete runtime namespace", async {
                self.kubectl
                    .delete_namespace(namespace)
                    .await
                    .context(error::DeleteNamespaceSnafu { namespace })
            })
            .await;
        report
    }

    /// The release as helm reports it, `None` when it is not installed.
    pub async fn release_status(&self, target: &ClusterTarget) -> Result<Option<ReleaseStatus>> {
        let release = self.config.chart.release.as_str();
        let status = self.helm(&target.kubeconfig).args([
            "status",
            release,
            "--namespace",
            self.config.chart.namespace.as_str(),
            "-o",
            "json",
        ]);
        let output = self
            .runner
            .run(&status)
            .await
            .context(error::ReleaseQuerySnafu { release })?;
        if !output.success() && is_not_found(&output.stderr) {
            return Ok(None);
        }
        let output = output
            .check(&status)
            .context(error::ReleaseQuerySnafu { release })?;
        serde_json::from_str(&output.stdout)
            .map(Some)
            .context(error::ReleaseParseSnafu { release })
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("not found")
}
