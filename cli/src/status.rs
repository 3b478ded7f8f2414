use crate::Session;
use anyhow::{Context, Result};
use clap::Parser;

/// Check the state of the cluster and of everything deployed into it.
#[derive(Debug, Parser)]
pub(crate) struct Status {
    /// Output the results in JSON format.
    #[clap(long = "json")]
    json: bool,
}

impl Status {
    pub(crate) async fn run(self, session: &Session) -> Result<()> {
        let target = session.target(None, None);
        let report = session
            .orchestrator()
            .status(&target)
            .await
            .context("Unable to get status")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .context("Could not create string from status.")?
            );
        } else {
            println!("{}", report);
        }
        Ok(())
    }
}
