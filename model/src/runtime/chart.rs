use super::error::{self, Result};
use crate::command::{CommandRunner, Invocation};
use crate::config::{BootstrapConfig, ChartConfig};
use log::{info, warn};
use snafu::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;

const CHECKOUT_DIR: &str = "runtime-helm";

/// A shallow git checkout of the runtime chart repository inside the work dir.
pub struct ChartSource {
    runner: Arc<dyn CommandRunner>,
    git: String,
    chart: ChartConfig,
    checkout: PathBuf,
}

impl ChartSource {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &BootstrapConfig) -> Self {
        Self {
            runner,
            git: config.tools.git.clone(),
            chart: config.chart.clone(),
            checkout: config.paths.work_dir.join(CHECKOUT_DIR),
        }
    }

    /// Clone the repository, or fast-forward an existing clone, and return the chart directory.
    /// A failed update is only a warning, the existing checkout is used as is.
    pub async fn fetch(&self) -> Result<PathBuf> {
        let checkout = self.checkout.display().to_string();
        if self.checkout.join(".git").is_dir() {
            let pull = Invocation::new(self.git.as_str()).args([
                "-C",
                checkout.as_str(),
                "pull",
                "--ff-only",
            ]);
            match self.runner.run_checked(&pull).await {
                Ok(_) => info!("Updated chart checkout '{}'", checkout),
                Err(e) => warn!(
                    "Unable to update chart checkout '{}', using it as is: {}",
                    checkout, e
                ),
            }
        } else {
            if let Some(parent) = self.checkout.parent() {
                std::fs::create_dir_all(parent).context(error::WorkDirSnafu { path: parent })?;
            }
            let clone = Invocation::new(self.git.as_str()).args([
                "clone",
                "--depth",
                "1",
                self.chart.repository.as_str(),
                checkout.as_str(),
            ]);
            self.runner
                .run_checked(&clone)
                .await
                .context(error::ChartSnafu)?;
            info!("Cloned '{}' into '{}'", self.chart.repository, checkout);
        }
        Ok(self.checkout.join(&self.chart.path))
    }
}
