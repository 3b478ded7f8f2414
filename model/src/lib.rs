/*!

This library bootstraps a single node Kubernetes cluster (RKE2 or k3d), runs a local image
registry inside it, and deploys the RapidFort Runtime with Helm.

Everything that touches the host goes through a [`CommandRunner`] so that the workflows in
[`orchestrator`] can be exercised without a real cluster.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use config::{BootstrapConfig, EnvOverrides, Toggle};
pub use orchestrator::{InstallSummary, Orchestrator, StatusReport};
pub use provisioner::ClusterStatus;
pub use runtime::{DeployOptions, Deployed};
pub use target::{ClusterKind, ClusterTarget};
pub use teardown::TeardownReport;

pub mod command;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod host;
pub mod kubectl;
pub mod manifest;
pub mod orchestrator;
pub mod provisioner;
pub mod readiness;
pub mod runtime;
pub mod target;
pub mod teardown;
