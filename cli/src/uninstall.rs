use crate::Session;
use anyhow::{Context, Result};
use clap::Parser;

/// The uninstall subcommand removes the runtime and the cluster. Every step is attempted even
/// when an earlier one fails.
#[derive(Debug, Parser)]
pub(crate) struct Uninstall {}

impl Uninstall {
    pub(crate) async fn run(self, session: &Session) -> Result<()> {
        let target = session.target(None, None);
        let report = session
            .orchestrator()
            .uninstall(&target)
            .await
            .context(format!("Unable to uninstall cluster '{}'", target.name))?;

        if report.is_clean() {
            println!("{} cluster '{}' was removed.", target.kind, target.name);
        } else {
            println!(
                "{} cluster '{}' was removed, some steps failed (artifacts may be left behind):",
                target.kind, target.name
            );
            for step in report.failures() {
                println!("  {}: {}", step.name, step.error.as_deref().unwrap_or_default());
            }
        }
        Ok(())
    }
}
