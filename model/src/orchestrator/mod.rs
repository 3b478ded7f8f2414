/*!

The `install`, `status`, `uninstall` and `deploy-rapidfort` workflows. Each one composes the
host probe, a cluster provisioner, the manifest applier and the runtime deployer, strictly one
step after another.

!*/

mod error;
mod plan;
mod report;

pub use error::{Error, Result};
pub use plan::{DeploymentPlan, PlanStep, RuntimeDecision};
pub use report::{ComponentState, StatusReport};

use crate::command::CommandRunner;
use crate::config::{BootstrapConfig, EnvOverrides};
use crate::constants::REGISTRY_NAME;
use crate::credentials::CredentialStore;
use crate::host::HostProbe;
use crate::kubectl::{all_pods_ready, deployment_available, service_exposes, Kubectl};
use crate::manifest::{ManifestApplier, RegistryBundle};
use crate::provisioner::{
    provisioner_for, ClusterProvisioner, ClusterStatus, HostNetwork, KubeconfigManager,
};
use crate::readiness::{wait_for, WaitOutcome};
use crate::runtime::{DeployOptions, Deployed, ReleaseStatus, RuntimeDeployer, DEPLOYED};
use crate::target::{ClusterKind, ClusterTarget};
use crate::teardown::TeardownReport;
use log::{info, warn};
use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::net::IpAddr;
use std::sync::Arc;

/// What an `install` run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallSummary {
    pub plan: DeploymentPlan,
    pub cluster: ClusterStatus,
    pub registry_ip: IpAddr,
    pub runtime: Option<Deployed>,
    /// The runtime release that was already deployed and ready, and so left as it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_release: Option<ReleaseStatus>,
}

pub struct Orchestrator {
    config: BootstrapConfig,
    env: EnvOverrides,
    runner: Arc<dyn CommandRunner>,
    probe: HostProbe,
}

impl Orchestrator {
    pub fn new(
        config: BootstrapConfig,
        env: EnvOverrides,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let probe = HostProbe::new(Arc::clone(&runner), &config.paths, env.host_ip);
        Self {
            config,
            env,
            runner,
            probe,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// `kubectl` for the target. RKE2 hosts often only have the copy bundled with RKE2.
    async fn kubectl(&self, target: &ClusterTarget) -> Kubectl {
        let tools = &self.config.tools;
        let program = match target.kind {
            ClusterKind::Rke2 => {
                self.probe
                    .resolve_tool(&tools.kubectl, &self.config.paths.rke2_kubectl())
                    .await
            }
            ClusterKind::K3dUds => tools.kubectl.clone(),
        };
        Kubectl::new(
            Arc::clone(&self.runner),
            program,
            &target.kubeconfig,
            self.config.timeouts.command(),
        )
    }

    fn provisioner(
        &self,
        target: &ClusterTarget,
        kubectl: &Kubectl,
    ) -> Box<dyn ClusterProvisioner> {
        provisioner_for(
            target.kind,
            Arc::clone(&self.runner),
            &self.config,
            kubectl.clone(),
        )
    }

    fn deployer(&self, kubectl: &Kubectl) -> RuntimeDeployer {
        RuntimeDeployer::new(
            Arc::clone(&self.runner),
            &self.config,
            kubectl.clone(),
            self.probe.clone(),
        )
    }

    /// Decide up front whether `install` ends with the runtime. Unusable credentials are an
    /// error here, before anything on the host is changed.
    async fn runtime_decision(&self) -> Result<RuntimeDecision> {
        let credentials = &self.config.paths.credentials;
        if !CredentialStore::exists(credentials) {
            return Ok(RuntimeDecision::Skip(format!(
                "no credentials file at '{}'",
                credentials.display()
            )));
        }
        CredentialStore::load(credentials).context(error::CredentialsSnafu)?;
        if !self.probe.has_tool(&self.config.tools.helm).await {
            return Ok(RuntimeDecision::Skip(format!(
                "'{}' is not installed",
                self.config.tools.helm
            )));
        }
        Ok(RuntimeDecision::Deploy)
    }

    /// Install the cluster, the local registry and, when possible, the runtime.
    pub async fn install(&self, target: &ClusterTarget) -> Result<InstallSummary> {
        let missing = self
            .probe
            .check_prerequisites(target.kind.install_prerequisites())
            .await;
        ensure!(
            missing.is_empty(),
            error::MissingToolsSnafu {
                tools: missing.iter().map(|t| t.to_string()).collect::<Vec<_>>()
            }
        );
        self.probe.host_info().warn_if_undersized();

        let detected = self.probe.detect_host_ip().await;
        let registry_ip = target
            .registry_ip
            .or(detected)
            .context(error::NoHostIpSnafu)?;
        let host_ip = match detected {
            Some(ip) => ip,
            None => {
                warn!(
                    "Host ip could not be detected, using registry ip {}",
                    registry_ip
                );
                registry_ip
            }
        };
        let network = HostNetwork {
            host_ip,
            registry_ip,
        };
        info!("Host ip {}, registry ip {}", host_ip, registry_ip);

        let plan = DeploymentPlan::for_install(self.runtime_decision().await?);
        let kubectl = self.kubectl(target).await;
        let provisioner = self.provisioner(target, &kubectl);
        let mut cluster = ClusterStatus::NotInstalled;
        let mut runtime = None;
        let mut current_release = None;

        let total = plan.steps().len();
        for (index, step) in plan.steps().iter().enumerate() {
            info!("Step {}/{}: {}", index + 1, total, step);
            match step {
                PlanStep::ProvisionCluster => {
                    cluster = provisioner
                        .install(target, &network)
                        .await
                        .context(error::ProvisionSnafu)?;
                }
                PlanStep::ApplyRegistry => {
                    if self.registry_current(&kubectl, registry_ip).await {
                        info!("Local registry is already serving on {}", registry_ip);
                        continue;
                    }
                    RegistryBundle::new(&self.config.registry, registry_ip)
                        .apply(&ManifestApplier::new(kubectl.clone()))
                        .await
                        .context(error::RegistrySnafu)?;
                }
                PlanStep::WaitForRegistry => self.wait_for_registry(&kubectl).await?,
                PlanStep::DeployRuntime => {
                    let deployer = self.deployer(&kubectl);
                    if let Some(release) = deployer.current_release(target).await {
                        info!(
                            "RapidFort Runtime release '{}' revision {} is already deployed, \
                             use 'deploy-rapidfort' to upgrade it",
                            release.name, release.version
                        );
                        current_release = Some(release);
                        continue;
                    }
                    let options = DeployOptions {
                        registry_ip: Some(registry_ip),
                        use_local_registry: self.env.use_local_registry.is_on(),
                        image_tag: None,
                    };
                    runtime = Some(
                        deployer
                            .deploy(target, &options)
                            .await
                            .context(error::DeploySnafu)?,
                    );
                }
            }
        }
        if let Some(reason) = plan.skipped_runtime() {
            info!(
                "Skipped RapidFort Runtime ({}), run 'deploy-rapidfort' once that is resolved",
                reason
            );
        }

        Ok(InstallSummary {
            plan,
            cluster,
            registry_ip,
            runtime,
            current_release,
        })
    }

    /// `true` when the registry is available and its service already exposes `registry_ip`.
    async fn registry_current(&self, kubectl: &Kubectl, registry_ip: IpAddr) -> bool {
        let namespace = self.config.registry.namespace.as_str();
        let available = matches!(
            kubectl.deployment(namespace, REGISTRY_NAME).await,
            Ok(Some(deployment)) if deployment_available(&deployment)
        );
        available
            && matches!(
                kubectl.service(namespace, REGISTRY_NAME).await,
                Ok(Some(service)) if service_exposes(&service, registry_ip)
            )
    }

    async fn wait_for_registry(&self, kubectl: &Kubectl) -> Result<()> {
        let namespace = self.config.registry.namespace.as_str();
        let policy = self.config.retry.registry_ready;
        let outcome = wait_for("local registry", policy.check(), move || async move {
            matches!(
                kubectl.deployment(namespace, REGISTRY_NAME).await,
                Ok(Some(deployment)) if deployment_available(&deployment)
            )
        })
        .await;
        match outcome {
            WaitOutcome::Ready { .. } => {
                info!("Local registry is available");
                Ok(())
            }
            WaitOutcome::TimedOut { attempts } => {
                error::RegistryNotReadySnafu {
                    namespace,
                    attempts,
                }
                .fail()
            }
        }
    }

    /// Report on every component. Never changes anything.
    pub async fn status(&self, target: &ClusterTarget) -> Result<StatusReport> {
        let kubectl = self.kubectl(target).await;
        let cluster = self
            .provisioner(target, &kubectl)
            .status(target)
            .await
            .context(error::ClusterStatusSnafu)?;

        let mut report = StatusReport {
            kind: target.kind,
            name: target.name.clone(),
            cluster,
            registry: ComponentState::Missing,
            runtime: ComponentState::Missing,
            release: None,
            ingress: ComponentState::Missing,
        };
        match &report.cluster {
            ClusterStatus::Running { .. } => {}
            ClusterStatus::NotInstalled => return Ok(report),
            ClusterStatus::Installed { .. } | ClusterStatus::Stopped { .. } => {
                report.registry = ComponentState::Unknown;
                report.runtime = ComponentState::Unknown;
                report.ingress = ComponentState::Unknown;
                return Ok(report);
            }
        }

        let registry_namespace = self.config.registry.namespace.as_str();
        report.registry = match kubectl.deployment(registry_namespace, REGISTRY_NAME).await {
            Ok(Some(deployment)) if deployment_available(&deployment) => ComponentState::Ready,
            Ok(Some(_)) => ComponentState::NotReady,
            Ok(None) => ComponentState::Missing,
            Err(e) => {
                warn!("Unable to query the local registry: {}", e);
                ComponentState::Unknown
            }
        };

        match self.deployer(&kubectl).release_status(target).await {
            Ok(Some(release)) => {
                report.runtime = if release.info.status == DEPLOYED {
                    ComponentState::Ready
                } else {
                    ComponentState::NotReady
                };
                report.release = Some(release);
            }
            Ok(None) => report.runtime = ComponentState::Missing,
            Err(e) => {
                warn!("Unable to query the runtime release: {}", e);
                report.runtime = ComponentState::Unknown;
            }
        }

        let (namespace, selector) = target.kind.ingress_pods();
        report.ingress = match kubectl.pods(namespace, Some(selector)).await {
            Ok(pods) if pods.is_empty() => ComponentState::Missing,
            Ok(pods) if all_pods_ready(&pods) => ComponentState::Ready,
            Ok(_) => ComponentState::NotReady,
            Err(e) => {
                warn!("Unable to query ingress pods: {}", e);
                ComponentState::Unknown
            }
        };
        if report.ingress != ComponentState::Ready {
            warn!("Ingress controller is {}", report.ingress);
        }
        Ok(report)
    }

    /// Remove the runtime and the cluster and put the user's kubeconfig back. Failures of
    /// individual steps are in the report.
    pub async fn uninstall(&self, target: &ClusterTarget) -> Result<TeardownReport> {
        let kubectl = self.kubectl(target).await;
        let provisioner = self.provisioner(target, &kubectl);
        let kubeconfig = KubeconfigManager::new(&self.config.paths);
        let mut report = TeardownReport::new();

        match provisioner.status(target).await {
            Ok(status) if !status.is_installed() => {
                info!("{} cluster '{}' is not installed", target.kind, target.name);
                if kubeconfig.has_backup() {
                    report.record(
                        "restore kubeconfig",
                        kubeconfig.restore_backup().map(|_| ()),
                    );
                }
                return Ok(report);
            }
            Ok(_) => {}
            Err(e) => warn!("Unable to query the cluster, removing it anyway: {}", e),
        }

        if kubectl.reachable().await {
            report.extend(self.deployer(&kubectl).teardown(target).await);
        } else {
            info!("Cluster API is not reachable, skipping runtime removal");
        }
        report.extend(provisioner.uninstall(target).await);
        report.record("restore kubeconfig", kubeconfig.restore().map(|_| ()));
        Ok(report)
    }

    /// Deploy the runtime into an existing cluster.
    pub async fn deploy_runtime(
        &self,
        target: &ClusterTarget,
        options: DeployOptions,
    ) -> Result<Deployed> {
        let options = DeployOptions {
            use_local_registry: options.use_local_registry || self.env.use_local_registry.is_on(),
            ..options
        };
        let kubectl = self.kubectl(target).await;
        self.deployer(&kubectl)
            .deploy(target, &options)
            .await
            .context(error::DeploySnafu)
    }
}
