use crate::{command, kubectl};
use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to {}: {}", action, source))]
    Command {
        action: String,
        source: command::Error,
    },

    #[snafu(display("Unable to query cluster: {}", source))]
    Kubectl { source: kubectl::Error },

    #[snafu(display("Unable to write '{}': {}", path.display(), source))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to serialize {}: {}", what, source))]
    Serialize {
        what: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Unable to parse {}: {}", what, source))]
    Parse {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Kubeconfig from {} is invalid: {}", origin, source))]
    KubeconfigInvalid {
        origin: String,
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Kubeconfig from {} has no clusters", origin))]
    KubeconfigEmpty { origin: String },

    #[snafu(display("Unable to {} kubeconfig '{}': {}", action, path.display(), source))]
    KubeconfigFile {
        action: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Kubeconfig did not appear after {} attempts", attempts))]
    KubeconfigTimeout { attempts: u32 },

    #[snafu(display("Cluster '{}' nodes were not ready after {} attempts", cluster, attempts))]
    NotReady { cluster: String, attempts: u32 },
}
