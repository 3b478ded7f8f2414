use crate::config::{BootstrapConfig, EnvOverrides};
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// The Kubernetes distribution being managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterKind {
    /// RKE2 installed directly on the host as a systemd service.
    Rke2,
    /// A k3d (k3s in docker) cluster laid out for the UDS stack.
    K3dUds,
}

derive_fromstr_from_deserialize!(ClusterKind);
derive_display_from_serialize!(ClusterKind);

impl ClusterKind {
    /// The value the runtime chart expects for `ingress.variant`.
    pub fn ingress_variant(self) -> &'static str {
        match self {
            ClusterKind::Rke2 => "rke2-nginx",
            ClusterKind::K3dUds => "uds-istio",
        }
    }

    /// Namespace and label selector of the ingress controller pods.
    pub fn ingress_pods(self) -> (&'static str, &'static str) {
        match self {
            ClusterKind::Rke2 => ("kube-system", "app.kubernetes.io/name=rke2-ingress-nginx"),
            ClusterKind::K3dUds => ("istio-tenant-gateway", "app=tenant-ingressgateway"),
        }
    }

    /// Binaries that must be present before this distribution can be installed.
    pub fn install_prerequisites(self) -> &'static [&'static str] {
        match self {
            ClusterKind::Rke2 => &["curl", "systemctl"],
            ClusterKind::K3dUds => &["docker", "k3d", "kubectl"],
        }
    }
}

/// The cluster an invocation operates on. Built once at startup and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    pub kind: ClusterKind,
    pub name: String,
    pub kubeconfig: PathBuf,
    /// Explicitly requested registry ip. When `None` the detected host ip is used.
    pub registry_ip: Option<IpAddr>,
    /// RKE2 release or k3s image tag.
    pub version: Option<String>,
}

impl ClusterTarget {
    /// Resolve the target from CLI values, environment overrides and configuration. Flags win
    /// over the environment, the environment wins over configuration.
    pub fn resolve(
        kind: ClusterKind,
        name: Option<String>,
        registry_ip: Option<IpAddr>,
        version: Option<String>,
        env: &EnvOverrides,
        config: &BootstrapConfig,
    ) -> Self {
        let version = match kind {
            ClusterKind::Rke2 => version.or_else(|| env.rke2_version.clone()),
            ClusterKind::K3dUds => version,
        };
        Self {
            kind,
            name: name.unwrap_or_else(|| config.cluster_names.for_kind(kind).to_string()),
            kubeconfig: config.paths.kubeconfig.clone(),
            registry_ip: registry_ip.or(env.local_registry),
            version,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    #[test]
    fn kind_parsing() {
        assert_eq!("rke2".parse::<ClusterKind>().unwrap(), ClusterKind::Rke2);
        assert_eq!(
            "k3d-uds".parse::<ClusterKind>().unwrap(),
            ClusterKind::K3dUds
        );
        assert!("kind".parse::<ClusterKind>().is_err());
        assert_eq!(ClusterKind::K3dUds.to_string(), "k3d-uds");
    }

    #[test]
    fn flag_wins_over_environment() {
        let config = BootstrapConfig::for_home(Path::new("/home/ops"));
        let env = EnvOverrides {
            local_registry: Some("192.168.1.50".parse().unwrap()),
            rke2_version: Some("v1.27.1+rke2r1".to_string()),
            ..Default::default()
        };
        let target = ClusterTarget::resolve(
            ClusterKind::Rke2,
            None,
            Some("10.0.0.9".parse().unwrap()),
            Some("v1.28.3+rke2r1".to_string()),
            &env,
            &config,
        );
        assert_eq!(target.name, "rf-rke2");
        assert_eq!(target.registry_ip, Some("10.0.0.9".parse().unwrap()));
        assert_eq!(target.version.as_deref(), Some("v1.28.3+rke2r1"));
    }

    #[test]
    fn environment_fills_gaps() {
        let config = BootstrapConfig::for_home(Path::new("/home/ops"));
        let env = EnvOverrides {
            local_registry: Some("192.168.1.50".parse().unwrap()),
            rke2_version: Some("v1.27.1+rke2r1".to_string()),
            ..Default::default()
        };
        let rke2 = ClusterTarget::resolve(ClusterKind::Rke2, None, None, None, &env, &config);
        assert_eq!(rke2.registry_ip, Some("192.168.1.50".parse().unwrap()));
        assert_eq!(rke2.version.as_deref(), Some("v1.27.1+rke2r1"));

        let k3d = ClusterTarget::resolve(
            ClusterKind::K3dUds,
            Some("dev".to_string()),
            None,
            None,
            &env,
            &config,
        );
        assert_eq!(k3d.name, "dev");
        assert_eq!(k3d.version, None);
        assert_eq!(k3d.kubeconfig, PathBuf::from("/home/ops/.kube/config"));
    }
}
