use crate::Session;
use anyhow::{Context, Result};
use clap::Parser;
use rfstack_model::constants::REGISTRY_PORT;
use std::net::IpAddr;

/// The install subcommand brings up the cluster, applies the local registry and, when the
/// credentials file and `helm` are present, deploys the RapidFort Runtime.
#[derive(Debug, Parser)]
pub(crate) struct Install {
    /// Address the local registry is exposed on. Defaults to `RF_LOCAL_REGISTRY`, then the
    /// detected host ip.
    #[clap(long = "registry-ip")]
    registry_ip: Option<IpAddr>,

    /// RKE2 release or k3s image tag to install. For RKE2 this defaults to `RKE2_VERSION`.
    #[clap(long = "version")]
    version: Option<String>,
}

impl Install {
    pub(crate) async fn run(self, session: &Session) -> Result<()> {
        let target = session.target(self.registry_ip, self.version);
        let summary = session.orchestrator().install(&target).await.context(format!(
            "Unable to install {} cluster '{}'. (Some artifacts may be left behind)",
            target.kind, target.name
        ))?;

        println!(
            "{} cluster '{}' is {}, local registry at {}:{}",
            target.kind, target.name, summary.cluster, summary.registry_ip, REGISTRY_PORT
        );
        match (&summary.runtime, summary.plan.skipped_runtime()) {
            (Some(deployed), _) => println!(
                "RapidFort Runtime release '{}' is ready in namespace '{}'",
                deployed.release, deployed.namespace
            ),
            (None, Some(reason)) => println!(
                "RapidFort Runtime was not deployed ({}), run 'rfstack deploy-rapidfort' later",
                reason
            ),
            (None, None) => {
                if let Some(release) = &summary.current_release {
                    println!(
                        "RapidFort Runtime release '{}' revision {} was already deployed, \
                         run 'rfstack deploy-rapidfort' to upgrade it",
                        release.name, release.version
                    );
                }
            }
        }
        Ok(())
    }
}
