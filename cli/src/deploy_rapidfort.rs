use crate::Session;
use anyhow::{Context, Result};
use clap::Parser;
use rfstack_model::DeployOptions;
use std::net::IpAddr;

/// Deploy the RapidFort Runtime into the running cluster, or upgrade an existing release.
#[derive(Debug, Parser)]
pub(crate) struct DeployRapidfort {
    /// Address of the local registry. Defaults to `RF_LOCAL_REGISTRY`, then the host ip.
    #[clap(long = "registry-ip")]
    registry_ip: Option<IpAddr>,

    /// Pull the runtime images from the local registry. Also enabled by `RF_USE_LOCAL_REGISTRY`.
    #[clap(long = "local-registry")]
    local_registry: bool,

    /// Image tag for every runtime image.
    #[clap(long = "image-tag")]
    image_tag: Option<String>,
}

impl DeployRapidfort {
    pub(crate) async fn run(self, session: &Session) -> Result<()> {
        let target = session.target(self.registry_ip, None);
        let options = DeployOptions {
            registry_ip: target.registry_ip,
            use_local_registry: self.local_registry,
            image_tag: self.image_tag,
        };
        let deployed = session
            .orchestrator()
            .deploy_runtime(&target, options)
            .await
            .context(format!(
                "Unable to deploy RapidFort Runtime into cluster '{}'",
                target.name
            ))?;

        println!(
            "RapidFort Runtime release '{}' is ready in namespace '{}'.",
            deployed.release, deployed.namespace
        );
        Ok(())
    }
}
