use crate::{command, credentials, kubectl, manifest};
use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DeployError {
    #[snafu(display(
        "Cluster is not reachable with kubeconfig '{}', is it installed and running?",
        kubeconfig.display()
    ))]
    ClusterUnreachable { kubeconfig: PathBuf },

    #[snafu(display("'{}' was not found, install helm first", helm))]
    NoHelm { helm: String },

    #[snafu(display("RapidFort credentials are not usable: {}", source))]
    NoCredentials { source: credentials::Error },

    #[snafu(display("Unable to determine the host ip address"))]
    NoHostIp,

    #[snafu(display("Unable to prepare work directory '{}': {}", path.display(), source))]
    WorkDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to fetch the runtime chart: {}", source))]
    Chart { source: command::Error },

    #[snafu(display("Unable to apply runtime manifests: {}", source))]
    Manifest { source: manifest::Error },

    #[snafu(display("Helm install of release '{}' failed: {}", release, source))]
    InstallFailed {
        release: String,
        source: command::Error,
    },

    #[snafu(display(
        "Pods of release '{}' were not ready after {} attempts",
        release,
        attempts
    ))]
    NotReady { release: String, attempts: u32 },

    #[snafu(display("Unable to query release '{}': {}", release, source))]
    ReleaseQuery {
        release: String,
        source: command::Error,
    },

    #[snafu(display("Unable to parse status of release '{}': {}", release, source))]
    ReleaseParse {
        release: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to uninstall release '{}': {}", release, source))]
    Uninstall {
        release: String,
        source: command::Error,
    },

    #[snafu(display("Unable to delete namespace '{}': {}", namespace, source))]
    DeleteNamespace {
        namespace: String,
        source: kubectl::Error,
    },
}
