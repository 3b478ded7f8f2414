use crate::{credentials, manifest, provisioner, runtime};
use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Required tools are missing: {}", tools.join(", ")))]
    MissingTools { tools: Vec<String> },

    #[snafu(display(
        "Unable to determine the host ip address, set RF_HOST_IP or pass --registry-ip"
    ))]
    NoHostIp,

    #[snafu(display("RapidFort credentials are not usable: {}", source))]
    Credentials { source: credentials::Error },

    #[snafu(display("Unable to provision the cluster: {}", source))]
    Provision { source: provisioner::Error },

    #[snafu(display("Unable to query the cluster: {}", source))]
    ClusterStatus { source: provisioner::Error },

    #[snafu(display("Unable to apply the local registry: {}", source))]
    Registry { source: manifest::Error },

    #[snafu(display(
        "Local registry in namespace '{}' was not available after {} attempts",
        namespace,
        attempts
    ))]
    RegistryNotReady { namespace: String, attempts: u32 },

    #[snafu(display("Unable to deploy RapidFort Runtime: {}", source))]
    Deploy { source: runtime::DeployError },
}
