/*!

Kubernetes objects are built as typed `k8s-openapi` values, serialized to YAML and handed to
`kubectl apply`. Nothing is produced by text templating.

!*/

mod registry;
mod secrets;

pub use registry::RegistryBundle;
pub use secrets::{credentials_secret, load_pull_secret};

use crate::constants::{APP_MANAGED_BY, MANAGER};
use crate::kubectl::{self, Kubectl};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{Metadata, Resource};
use log::info;
use maplit::btreemap;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to serialize {} '{}': {}", kind, name, source))]
    Serialize {
        kind: String,
        name: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Unable to apply {} '{}': {}", kind, name, source))]
    Apply {
        kind: String,
        name: String,
        source: kubectl::Error,
    },

    #[snafu(display("Unable to read pull secret '{}': {}", path.display(), source))]
    PullSecretRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Pull secret '{}' is not a valid Secret: {}", path.display(), source))]
    PullSecretParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("Pull secret '{}' has no metadata.name", path.display()))]
    PullSecretName { path: PathBuf },
}

/// What `kubectl apply` reported for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyOutcome {
    Created,
    Configured,
    Unchanged,
}

impl ApplyOutcome {
    /// Read the outcome from `kubectl apply` output such as `service/registry unchanged`.
    pub fn from_kubectl_output(stdout: &str) -> Self {
        let verb = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| line.split_whitespace().last())
            .unwrap_or_default();
        match verb {
            "created" => ApplyOutcome::Created,
            "unchanged" => ApplyOutcome::Unchanged,
            _ => ApplyOutcome::Configured,
        }
    }
}

impl Display for ApplyOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOutcome::Created => write!(f, "created"),
            ApplyOutcome::Configured => write!(f, "configured"),
            ApplyOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Declaratively applies typed objects through `kubectl`.
#[derive(Clone)]
pub struct ManifestApplier {
    kubectl: Kubectl,
}

impl ManifestApplier {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    /// Apply `object`. When `namespace` is given it replaces the object's own namespace.
    pub async fn apply<K>(&self, object: &K, namespace: Option<&str>) -> Result<ApplyOutcome>
    where
        K: Resource + Metadata<Ty = ObjectMeta> + Serialize + Clone,
    {
        let mut object = object.clone();
        if let Some(namespace) = namespace {
            object.metadata_mut().namespace = Some(namespace.to_string());
        }
        let kind = K::KIND;
        let name = object.metadata().name.clone().unwrap_or_default();

        let yaml = serde_yaml::to_string(&object).context(SerializeSnafu { kind, name: &name })?;
        let stdout = self
            .kubectl
            .apply(&yaml, namespace)
            .await
            .context(ApplySnafu { kind, name: &name })?;
        let outcome = ApplyOutcome::from_kubectl_output(&stdout);
        info!("{} '{}' {}", kind, name, outcome);
        Ok(outcome)
    }
}

/// A namespace labelled as managed by us.
pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                APP_MANAGED_BY.to_string() => MANAGER.to_string(),
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}
